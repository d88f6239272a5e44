// Tool registry - provider registration, validation, dispatch, persistence

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::brain::ToolDefinition;
use crate::state::{StateBuckets, StateStore};

use super::error::{RegistryError, ToolCallError};
use super::provider::{JsonMap, ToolProvider, ToolValue};
use super::schema::{validate_args, Tool};

/// Registry configuration.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Base directory; per-conversation working directories live under
    /// `agent-working-directory/<conversation_id>`.
    pub runtime_root: PathBuf,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            runtime_root: PathBuf::from("./berth_runtime"),
        }
    }
}

/// Owns tool schemas and provider state, validates and dispatches calls.
///
/// The provider/tool tables are effectively immutable after startup; the
/// state buckets sit behind a short-critical-section mutex so tool calls in
/// distinct conversations can run in parallel.
pub struct ToolRegistry {
    config: RegistryConfig,
    store: Arc<StateStore>,
    tools: RwLock<HashMap<String, Tool>>,
    providers: RwLock<HashMap<String, Arc<dyn ToolProvider>>>,
    templates: RwLock<HashMap<String, JsonMap>>,
    state: Mutex<StateBuckets>,
}

impl ToolRegistry {
    /// Create a registry, loading persisted state from the store.
    pub fn new(config: RegistryConfig, store: Arc<StateStore>) -> Self {
        let buckets = store.load();
        Self {
            config,
            store,
            tools: RwLock::new(HashMap::new()),
            providers: RwLock::new(HashMap::new()),
            templates: RwLock::new(HashMap::new()),
            state: Mutex::new(buckets),
        }
    }

    /// Register a provider: declare its tools, check id uniqueness, seed its
    /// global state slice if absent, record its conversation template.
    pub fn register(&self, provider: Arc<dyn ToolProvider>) -> Result<(), RegistryError> {
        let declaration = provider.declare();
        let provider_name = provider.name();

        {
            let mut tools = self.tools.write().unwrap();
            let mut providers = self.providers.write().unwrap();

            for tool in &declaration.tools {
                if tools.contains_key(&tool.id) {
                    return Err(RegistryError::DuplicateTool(tool.id.clone()));
                }
            }
            for tool in declaration.tools {
                providers.insert(tool.id.clone(), provider.clone());
                tools.insert(tool.id.clone(), tool);
            }
        }

        {
            let mut state = self.state.lock().unwrap();
            state
                .global
                .entry(provider_name.to_string())
                .or_insert_with(|| Value::Object(declaration.initial_global));
        }

        self.templates
            .write()
            .unwrap()
            .insert(provider_name.to_string(), declaration.conversation_template);

        info!(provider = provider_name, "tool provider registered");
        Ok(())
    }

    /// All tool schemas in the wire shape the completion service expects.
    pub fn tool_schemas(&self) -> Vec<ToolDefinition> {
        let tools = self.tools.read().unwrap();
        let mut wire: Vec<ToolDefinition> = tools.values().map(|t| t.to_wire()).collect();
        wire.sort_by(|a, b| a.name.cmp(&b.name));
        wire
    }

    /// Host-side working directory for a conversation.
    pub fn working_directory_for(&self, conversation_id: &str) -> PathBuf {
        self.config
            .runtime_root
            .join("agent-working-directory")
            .join(conversation_id)
    }

    /// Validate and dispatch one tool call.
    ///
    /// Exactly one of result/error holds: `Ok` carries the provider's value,
    /// `Err` carries the failure kind. Both are reported to the model as
    /// tool-result content by the caller.
    pub async fn call(
        &self,
        tool_id: &str,
        args: &Value,
        conversation_id: &str,
    ) -> Result<ToolValue, ToolCallError> {
        let (tool, provider) = {
            let tools = self.tools.read().unwrap();
            let providers = self.providers.read().unwrap();
            match (tools.get(tool_id), providers.get(tool_id)) {
                (Some(tool), Some(provider)) => (tool.clone(), provider.clone()),
                _ => return Err(ToolCallError::UnknownTool(tool_id.to_string())),
            }
        };

        let normalized = validate_args(&tool, args).map_err(|message| {
            debug!(tool = tool_id, error = %message, "argument validation failed");
            ToolCallError::InvalidArgs {
                tool: tool_id.to_string(),
                message,
            }
        })?;

        let provider_name = provider.name();

        // Check the provider's state slices out of the bucket mutex so the
        // invocation itself runs without holding any registry lock.
        let (mut conversation_state, mut global_state) = {
            let state = self.state.lock().unwrap();
            let global = as_map(state.global.get(provider_name));
            let conversation = state
                .conversations
                .get(conversation_id)
                .and_then(|per_provider| per_provider.get(provider_name))
                .map(|v| as_map(Some(v)))
                .unwrap_or_else(|| self.fresh_conversation_state(provider_name, conversation_id));
            (conversation, global)
        };

        let outcome = provider
            .invoke(tool_id, normalized, &mut conversation_state, &mut global_state)
            .await;

        {
            let mut state = self.state.lock().unwrap();
            state
                .global
                .insert(provider_name.to_string(), Value::Object(global_state));
            state
                .conversations
                .entry(conversation_id.to_string())
                .or_default()
                .insert(provider_name.to_string(), Value::Object(conversation_state));
        }
        self.persist();

        match outcome {
            Ok(value) => Ok(value),
            Err(message) => Err(ToolCallError::Provider(message)),
        }
    }

    fn fresh_conversation_state(&self, provider_name: &str, conversation_id: &str) -> JsonMap {
        let mut state = self
            .templates
            .read()
            .unwrap()
            .get(provider_name)
            .cloned()
            .unwrap_or_default();
        state.insert(
            "_conversation_id".to_string(),
            Value::String(conversation_id.to_string()),
        );
        state.insert(
            "_working_directory".to_string(),
            Value::String(
                self.working_directory_for(conversation_id)
                    .to_string_lossy()
                    .into_owned(),
            ),
        );
        state
    }

    /// Persist the current buckets. Failure is logged, not fatal: the
    /// in-memory buckets stay authoritative and the next call retries.
    pub fn persist(&self) {
        let snapshot = self.state.lock().unwrap().clone();
        if let Err(e) = self.store.save(&snapshot) {
            warn!(error = %e, "persisting tool state failed, will retry on next mutation");
        }
    }

    /// Drop all state and delete the persisted file.
    pub fn reset_all(&self) {
        let mut state = self.state.lock().unwrap();
        *state = self.store.reset();
        info!("tool state wiped");
    }

    /// Snapshot of the current buckets, for status reporting and tests.
    pub fn state_snapshot(&self) -> StateBuckets {
        self.state.lock().unwrap().clone()
    }
}

fn as_map(value: Option<&Value>) -> JsonMap {
    match value {
        Some(Value::Object(map)) => map.clone(),
        _ => JsonMap::new(),
    }
}
