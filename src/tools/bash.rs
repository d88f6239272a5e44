// Shell tool provider - bridges the bash tool contract onto the container manager
#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::container::ContainerManager;

use super::provider::{Declaration, JsonMap, ToolProvider, ToolValue};
use super::schema::{ParamType, Parameter, Tool};

/// Provider exposing `bash`, `bash_status`, and `bash_reset`.
///
/// The container record itself lives in the container manager; tool state is
/// bookkeeping only.
pub struct BashToolProvider {
    manager: Arc<ContainerManager>,
    description: String,
    default_timeout_secs: u64,
    total_commands: AtomicU64,
    total_containers: AtomicU64,
}

impl BashToolProvider {
    pub fn new(manager: Arc<ContainerManager>) -> Self {
        let default_timeout_secs = manager.config().default_command_timeout_secs;
        let descriptions =
            load_tool_descriptions(Path::new("tools.toml")).unwrap_or_default();
        let description = descriptions
            .get("bash")
            .cloned()
            .unwrap_or_else(default_bash_description);

        Self {
            manager,
            description,
            default_timeout_secs,
            total_commands: AtomicU64::new(0),
            total_containers: AtomicU64::new(0),
        }
    }

    async fn execute_bash(
        &self,
        args: &JsonMap,
        conversation: &mut JsonMap,
        global: &mut JsonMap,
        conversation_id: &str,
    ) -> Result<ToolValue, String> {
        let command = args
            .get("command")
            .and_then(Value::as_str)
            .ok_or_else(|| "command parameter is required".to_string())?;
        let timeout_secs = args
            .get("timeout")
            .and_then(Value::as_u64)
            .unwrap_or(self.default_timeout_secs);
        let working_dir = args.get("working_dir").and_then(Value::as_str);

        debug!(
            conversation = %conversation_id,
            command = %command.chars().take(100).collect::<String>(),
            "executing bash command"
        );

        let outcome = self
            .manager
            .execute(
                conversation_id,
                command,
                Some(Duration::from_secs(timeout_secs)),
                working_dir,
            )
            .await
            .map_err(|e| e.to_string())?;

        // The atomics are authoritative within the process; seed them from
        // the persisted totals so counts survive restarts.
        let persisted_commands = global
            .get("total_commands")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        self.total_commands
            .fetch_max(persisted_commands, Ordering::Relaxed);
        let persisted_containers = global
            .get("total_containers")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        self.total_containers
            .fetch_max(persisted_containers, Ordering::Relaxed);

        let is_first = outcome.container_was_created_or_resumed
            && conversation
                .get("container_created")
                .and_then(Value::as_bool)
                != Some(true);
        if is_first {
            self.total_containers.fetch_add(1, Ordering::Relaxed);
        }
        let totals = self.total_commands.fetch_add(1, Ordering::Relaxed) + 1;

        conversation.insert("container_created".to_string(), json!(true));
        conversation.insert(
            "command_count".to_string(),
            json!(outcome.command_number),
        );
        conversation.insert(
            "last_command_time".to_string(),
            json!(Utc::now().to_rfc3339()),
        );
        global.insert("total_commands".to_string(), json!(totals));
        global.insert(
            "total_containers".to_string(),
            json!(self.total_containers.load(Ordering::Relaxed)),
        );

        let success = outcome.exit_code == 0;
        let output = if success {
            outcome.stdout.clone()
        } else if !outcome.stderr.is_empty() {
            outcome.stderr.clone()
        } else {
            outcome.stdout.clone()
        };

        info!(
            conversation = %conversation_id,
            exit_code = outcome.exit_code,
            command_number = outcome.command_number,
            "bash command finished"
        );

        Ok(ToolValue::Json(json!({
            "exit_code": outcome.exit_code,
            "stdout": outcome.stdout,
            "stderr": outcome.stderr,
            "success": success,
            "output": output,
            "command_number": outcome.command_number,
            "container_was_created_or_resumed": outcome.container_was_created_or_resumed,
        })))
    }

    async fn get_status(
        &self,
        conversation: &JsonMap,
        conversation_id: &str,
    ) -> Result<ToolValue, String> {
        let status = self.manager.status(conversation_id).await;
        let mut value = serde_json::to_value(&status).map_err(|e| e.to_string())?;

        if let Value::Object(map) = &mut value {
            if let Some(count) = conversation.get("command_count") {
                map.insert("tool_command_count".to_string(), count.clone());
            }
            if status.container_state == "not_created" {
                map.insert(
                    "message".to_string(),
                    json!("No container created yet (will be created on first bash command)"),
                );
            }
        }

        Ok(ToolValue::Json(value))
    }

    async fn reset_environment(
        &self,
        args: &JsonMap,
        conversation: &mut JsonMap,
        conversation_id: &str,
    ) -> Result<ToolValue, String> {
        let keep_data = args
            .get("keep_data")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        self.manager
            .reset(conversation_id, keep_data)
            .await
            .map_err(|e| e.to_string())?;

        conversation.insert("container_created".to_string(), json!(false));
        conversation.insert("command_count".to_string(), json!(0));
        conversation.insert("last_command_time".to_string(), Value::Null);

        info!(conversation = %conversation_id, keep_data = keep_data, "bash environment reset");

        Ok(ToolValue::Json(json!({
            "ok": true,
            "data_kept": keep_data,
        })))
    }
}

#[async_trait]
impl ToolProvider for BashToolProvider {
    fn name(&self) -> &'static str {
        "shell"
    }

    fn declare(&self) -> Declaration {
        let tools = vec![
            Tool::new("bash", "Bash Command Execution", self.description.clone())
                .with_parameters(vec![
                    Parameter::new("command", ParamType::String, "Bash command to execute"),
                    Parameter::new(
                        "timeout",
                        ParamType::Integer,
                        "Command timeout in seconds",
                    )
                    .with_default(json!(self.default_timeout_secs)),
                    Parameter::new(
                        "working_dir",
                        ParamType::String,
                        "Directory to cd into before running the command",
                    )
                    .optional(),
                ]),
            Tool::new(
                "bash_status",
                "Bash Environment Status",
                "Get status of the bash environment for this conversation",
            ),
            Tool::new(
                "bash_reset",
                "Reset Bash Environment",
                "Reset the bash environment (stops and removes the container)",
            )
            .with_parameters(vec![Parameter::new(
                "keep_data",
                ParamType::Boolean,
                "Keep the /mnt data after reset",
            )
            .with_default(json!(false))]),
        ];

        let mut initial_global = JsonMap::new();
        initial_global.insert("total_commands".to_string(), json!(0));
        initial_global.insert("total_containers".to_string(), json!(0));

        let mut conversation_template = JsonMap::new();
        conversation_template.insert("container_created".to_string(), json!(false));
        conversation_template.insert("command_count".to_string(), json!(0));
        conversation_template.insert("last_command_time".to_string(), Value::Null);

        Declaration {
            tools,
            initial_global,
            conversation_template,
        }
    }

    async fn invoke(
        &self,
        tool_id: &str,
        args: JsonMap,
        conversation: &mut JsonMap,
        global: &mut JsonMap,
    ) -> Result<ToolValue, String> {
        let conversation_id = conversation
            .get("_conversation_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| "conversation id missing from tool state".to_string())?;

        match tool_id {
            "bash" => {
                self.execute_bash(&args, conversation, global, &conversation_id)
                    .await
            }
            "bash_status" => self.get_status(conversation, &conversation_id).await,
            "bash_reset" => {
                self.reset_environment(&args, conversation, &conversation_id)
                    .await
            }
            other => Err(format!("Unknown tool: {}", other)),
        }
    }
}

/// Default bash tool description.
pub fn default_bash_description() -> String {
    r#"Execute bash commands in a stateful Linux environment.
Each conversation has its own persistent sandbox with a writable /mnt directory.
The shell maintains state across commands (working directory, environment variables, aliases).
Use 'cd' to change directories - the shell remembers your location.
Stdout, stderr, and the exit code are returned."#
        .to_string()
}

/// Load tool description overrides from a TOML config file.
pub fn load_tool_descriptions(
    path: &Path,
) -> Result<HashMap<String, String>, Box<dyn std::error::Error>> {
    if !path.exists() {
        debug!(path = %path.display(), "tools.toml not found, using default descriptions");
        return Ok(HashMap::new());
    }

    let content = std::fs::read_to_string(path)?;
    let config: toml::Value = content.parse()?;

    let mut descriptions = HashMap::new();
    if let Some(table) = config.as_table() {
        for (key, value) in table {
            if let Some(desc) = value.get("description").and_then(|d| d.as_str()) {
                descriptions.insert(key.clone(), desc.to_string());
            }
        }
    }

    debug!(path = %path.display(), tool_count = descriptions.len(), "loaded tool descriptions");
    Ok(descriptions)
}
