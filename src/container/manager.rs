// Lazy container manager - per-conversation lifecycle, idle reaping, resume

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::error::{ContainerError, ShellError};
use super::runtime::{ContainerHandle, ContainerRuntime};
use super::shell::ShellSession;
use super::types::{ContainerState, ContainerStatus, ExecOutcome};
use super::ContainerConfig;

/// Retries for transient create/start failures.
const PROVISION_RETRIES: u32 = 2;
const PROVISION_BACKOFF: Duration = Duration::from_millis(500);

struct ContainerRecord {
    conversation_id: String,
    state: ContainerState,
    handle: Option<ContainerHandle>,
    shell: Option<ShellSession>,
    created_at: Option<Instant>,
    created_at_utc: Option<DateTime<Utc>>,
    last_activity: Option<Instant>,
    last_activity_utc: Option<DateTime<Utc>>,
    command_count: u64,
}

impl ContainerRecord {
    fn new(conversation_id: String) -> Self {
        Self {
            conversation_id,
            state: ContainerState::NotCreated,
            handle: None,
            shell: None,
            created_at: None,
            created_at_utc: None,
            last_activity: None,
            last_activity_utc: None,
            command_count: 0,
        }
    }
}

/// Owns the set of per-conversation containers.
///
/// Containers are never created up-front; they materialize on the first
/// shell invocation and may later be stopped by the idle reaper and resumed
/// in place. Each record carries its own lock, so distinct conversations
/// execute in parallel while operations on one conversation are serial.
pub struct ContainerManager {
    config: ContainerConfig,
    runtime: Arc<dyn ContainerRuntime>,
    records: Mutex<HashMap<String, Arc<tokio::sync::Mutex<ContainerRecord>>>>,
}

impl ContainerManager {
    pub fn new(config: ContainerConfig, runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            config,
            runtime,
            records: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ContainerConfig {
        &self.config
    }

    /// Host-side scratch directory for a conversation (mounted at /mnt).
    pub fn work_dir_for(&self, conversation_id: &str) -> PathBuf {
        self.config
            .runtime_root
            .join("agent-working-directory")
            .join(conversation_id)
    }

    fn record_for(&self, conversation_id: &str) -> Arc<tokio::sync::Mutex<ContainerRecord>> {
        let mut records = self.records.lock().unwrap();

        if !records.contains_key(conversation_id) && records.len() >= self.config.max_tracked {
            // Evict a non-running record to bound the table; its scratch
            // directory stays on disk.
            let victim = records.iter().find_map(|(id, rec)| {
                rec.try_lock()
                    .ok()
                    .filter(|r| r.state != ContainerState::Running)
                    .map(|_| id.clone())
            });
            if let Some(id) = victim {
                warn!(conversation = %id, "evicting tracked container record");
                records.remove(&id);
            }
        }

        records
            .entry(conversation_id.to_string())
            .or_insert_with(|| {
                debug!(conversation = %conversation_id, "tracking new conversation container");
                Arc::new(tokio::sync::Mutex::new(ContainerRecord::new(
                    conversation_id.to_string(),
                )))
            })
            .clone()
    }

    /// Execute one command against the conversation's container, creating or
    /// resuming it as needed.
    pub async fn execute(
        &self,
        conversation_id: &str,
        command: &str,
        timeout: Option<Duration>,
        working_dir: Option<&str>,
    ) -> Result<ExecOutcome, ContainerError> {
        let record = self.record_for(conversation_id);
        let mut rec = record.lock().await;

        let mut created_or_resumed = false;
        match rec.state {
            ContainerState::NotCreated => {
                self.provision(&mut rec).await?;
                created_or_resumed = true;
            }
            ContainerState::Stopped => {
                self.resume(&mut rec).await?;
                created_or_resumed = true;
            }
            ContainerState::Running => {
                let dead = rec.shell.as_mut().map(|s| s.is_broken()).unwrap_or(true);
                if dead {
                    warn!(conversation = %conversation_id, "shell died, restarting");
                    self.reopen_shell(&mut rec).await?;
                }
            }
            ContainerState::Creating
            | ContainerState::Failed
            | ContainerState::Destroyed => {
                return Err(ContainerError::Unavailable {
                    conversation: conversation_id.to_string(),
                    reason: format!("container is {}", rec.state.as_str()),
                });
            }
        }

        let limit = timeout
            .unwrap_or_else(|| Duration::from_secs(self.config.default_command_timeout_secs));
        let full_command = match working_dir {
            Some(dir) => format!("cd {} && {}", shell_quote(dir), command),
            None => command.to_string(),
        };

        let shell = rec.shell.as_mut().ok_or_else(|| ContainerError::Unavailable {
            conversation: conversation_id.to_string(),
            reason: "no shell session".to_string(),
        })?;

        let output = match shell.run(&full_command, limit).await {
            Ok(output) => output,
            Err(ShellError::ProcessExited) => {
                // Crash-restart: nothing survives beyond the scratch
                // directory contents. The current call still fails.
                warn!(conversation = %conversation_id, "shell process exited mid-command, restarting");
                self.reopen_shell(&mut rec).await?;
                return Err(ContainerError::Shell(ShellError::ProcessExited));
            }
            Err(e) => return Err(e.into()),
        };

        rec.command_count += 1;
        rec.last_activity = Some(Instant::now());
        rec.last_activity_utc = Some(Utc::now());

        info!(
            conversation = %conversation_id,
            exit_code = output.exit_code,
            command_number = rec.command_count,
            created_or_resumed = created_or_resumed,
            "command executed"
        );

        Ok(ExecOutcome {
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
            command_number: rec.command_count,
            container_was_created_or_resumed: created_or_resumed,
        })
    }

    async fn provision(&self, rec: &mut ContainerRecord) -> Result<(), ContainerError> {
        let conversation_id = rec.conversation_id.clone();
        info!(conversation = %conversation_id, "lazy-provisioning container");

        let work_dir = self.work_dir_for(&conversation_id);
        std::fs::create_dir_all(&work_dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&work_dir, std::fs::Permissions::from_mode(0o755))?;
        }

        if !self.runtime.image_present().await? {
            return Err(ContainerError::ImageMissing(self.config.image.clone()));
        }

        rec.state = ContainerState::Creating;

        let mut attempt = 0u32;
        let handle = loop {
            match self.runtime.create(&conversation_id, &work_dir).await {
                Ok(handle) => break handle,
                Err(e @ ContainerError::ImageMissing(_)) => {
                    rec.state = ContainerState::NotCreated;
                    return Err(e);
                }
                Err(e) if attempt < PROVISION_RETRIES => {
                    attempt += 1;
                    warn!(
                        conversation = %conversation_id,
                        attempt = attempt,
                        error = %e,
                        "container create failed, retrying"
                    );
                    tokio::time::sleep(PROVISION_BACKOFF).await;
                }
                Err(e) => {
                    error!(conversation = %conversation_id, error = %e, "container create failed");
                    rec.state = ContainerState::Failed;
                    return Err(ContainerError::Unavailable {
                        conversation: conversation_id,
                        reason: e.to_string(),
                    });
                }
            }
        };

        rec.handle = Some(handle);
        self.reopen_shell(rec).await?;

        rec.state = ContainerState::Running;
        rec.created_at = Some(Instant::now());
        rec.created_at_utc = Some(Utc::now());
        rec.last_activity = Some(Instant::now());
        rec.last_activity_utc = Some(Utc::now());

        info!(conversation = %rec.conversation_id, "container running");
        Ok(())
    }

    async fn resume(&self, rec: &mut ContainerRecord) -> Result<(), ContainerError> {
        let conversation_id = rec.conversation_id.clone();
        info!(conversation = %conversation_id, "resuming stopped container");

        let handle = rec.handle.clone().ok_or_else(|| ContainerError::Unavailable {
            conversation: conversation_id.clone(),
            reason: "stopped container has no handle".to_string(),
        })?;

        let mut attempt = 0u32;
        loop {
            match self.runtime.start(&handle).await {
                Ok(()) => break,
                Err(e) if attempt < PROVISION_RETRIES => {
                    attempt += 1;
                    warn!(
                        conversation = %conversation_id,
                        attempt = attempt,
                        error = %e,
                        "container start failed, retrying"
                    );
                    tokio::time::sleep(PROVISION_BACKOFF).await;
                }
                Err(e) => {
                    rec.state = ContainerState::Failed;
                    return Err(ContainerError::Unavailable {
                        conversation: conversation_id,
                        reason: e.to_string(),
                    });
                }
            }
        }

        self.reopen_shell(rec).await?;
        rec.state = ContainerState::Running;
        rec.last_activity = Some(Instant::now());
        rec.last_activity_utc = Some(Utc::now());
        Ok(())
    }

    async fn reopen_shell(&self, rec: &mut ContainerRecord) -> Result<(), ContainerError> {
        if let Some(mut old) = rec.shell.take() {
            old.close().await;
        }
        let handle = rec.handle.clone().ok_or_else(|| ContainerError::Unavailable {
            conversation: rec.conversation_id.clone(),
            reason: "no container handle".to_string(),
        })?;
        let work_dir = self.work_dir_for(&rec.conversation_id);
        let session = ShellSession::open(self.runtime.clone(), handle, &work_dir).await?;
        rec.shell = Some(session);
        Ok(())
    }

    async fn stop_record(&self, rec: &mut ContainerRecord) {
        if rec.state != ContainerState::Running {
            return;
        }
        if let Some(mut shell) = rec.shell.take() {
            shell.close().await;
        }
        if let Some(handle) = &rec.handle {
            if let Err(e) = self.runtime.stop(handle).await {
                warn!(conversation = %rec.conversation_id, error = %e, "container stop failed");
            }
        }
        rec.state = ContainerState::Stopped;
        info!(conversation = %rec.conversation_id, "container stopped");
    }

    /// Snapshot of a conversation's container record.
    pub async fn status(&self, conversation_id: &str) -> ContainerStatus {
        let existing = {
            let records = self.records.lock().unwrap();
            records.get(conversation_id).cloned()
        };

        let work_dir = self.work_dir_for(conversation_id).display().to_string();

        match existing {
            Some(record) => {
                let rec = record.lock().await;
                ContainerStatus {
                    conversation_id: conversation_id.to_string(),
                    container_state: rec.state.as_str().to_string(),
                    container_active: rec.state == ContainerState::Running,
                    command_count: rec.command_count,
                    created_at: rec.created_at_utc.map(|t| t.to_rfc3339()),
                    last_activity: rec.last_activity_utc.map(|t| t.to_rfc3339()),
                    uptime_seconds: rec.created_at.map(|t| t.elapsed().as_secs()),
                    idle_seconds: rec.last_activity.map(|t| t.elapsed().as_secs()),
                    work_dir,
                    memory_limit: self.config.memory_limit.clone(),
                    cpu_limit: self.config.cpu_limit,
                    idle_timeout_secs: self.config.idle_timeout_secs,
                }
            }
            None => ContainerStatus {
                conversation_id: conversation_id.to_string(),
                container_state: ContainerState::NotCreated.as_str().to_string(),
                container_active: false,
                command_count: 0,
                created_at: None,
                last_activity: None,
                uptime_seconds: None,
                idle_seconds: None,
                work_dir,
                memory_limit: self.config.memory_limit.clone(),
                cpu_limit: self.config.cpu_limit,
                idle_timeout_secs: self.config.idle_timeout_secs,
            },
        }
    }

    /// Stop and remove the conversation's container; optionally wipe its
    /// scratch directory. The next execute starts from not-created.
    pub async fn reset(
        &self,
        conversation_id: &str,
        keep_scratch: bool,
    ) -> Result<(), ContainerError> {
        let record = self.record_for(conversation_id);
        let mut rec = record.lock().await;

        if let Some(mut shell) = rec.shell.take() {
            shell.close().await;
        }
        if let Some(handle) = rec.handle.take() {
            let _ = self.runtime.stop(&handle).await;
            let _ = self.runtime.remove(&handle).await;
        }
        if !keep_scratch {
            let work_dir = self.work_dir_for(conversation_id);
            if work_dir.exists() {
                if let Err(e) = std::fs::remove_dir_all(&work_dir) {
                    warn!(conversation = %conversation_id, error = %e, "failed to wipe scratch directory");
                }
            }
        }

        rec.state = ContainerState::NotCreated;
        rec.command_count = 0;
        rec.created_at = None;
        rec.created_at_utc = None;
        rec.last_activity = None;
        rec.last_activity_utc = None;

        info!(conversation = %conversation_id, keep_scratch = keep_scratch, "container reset");
        Ok(())
    }

    /// Stop all running containers. Best-effort and idempotent.
    pub async fn shutdown(&self) {
        let all: Vec<_> = {
            let records = self.records.lock().unwrap();
            records.values().cloned().collect()
        };
        for record in all {
            let mut rec = record.lock().await;
            self.stop_record(&mut rec).await;
        }
        info!("all containers stopped");
    }

    /// Destroy every container and wipe every scratch directory.
    pub async fn destroy_all(&self) {
        let all: Vec<_> = {
            let mut records = self.records.lock().unwrap();
            records.drain().map(|(_, v)| v).collect()
        };
        for record in all {
            let mut rec = record.lock().await;
            if let Some(mut shell) = rec.shell.take() {
                shell.close().await;
            }
            if let Some(handle) = rec.handle.take() {
                let _ = self.runtime.stop(&handle).await;
                let _ = self.runtime.remove(&handle).await;
            }
            let work_dir = self.work_dir_for(&rec.conversation_id);
            if work_dir.exists() {
                let _ = std::fs::remove_dir_all(&work_dir);
            }
            rec.state = ContainerState::Destroyed;
        }
        info!("all containers destroyed");
    }

    /// Spawn the idle reaper: every sweep interval, stop running containers
    /// whose idle time exceeds their timeout. Containers are only stopped,
    /// never removed; the scratch directory survives for resume.
    pub fn start_reaper(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(
                manager.config.sweep_interval_secs.max(1),
            ));
            interval.tick().await; // first tick completes immediately
            loop {
                interval.tick().await;
                manager.sweep_idle().await;
            }
        })
    }

    async fn sweep_idle(&self) {
        if self.config.idle_timeout_secs == 0 {
            return;
        }
        let idle_limit = Duration::from_secs(self.config.idle_timeout_secs);
        let all: Vec<_> = {
            let records = self.records.lock().unwrap();
            records.values().cloned().collect()
        };
        for record in all {
            // A conversation mid-command holds its lock; it is active by
            // definition, so skip rather than wait.
            let mut rec = match record.try_lock() {
                Ok(rec) => rec,
                Err(_) => continue,
            };
            if rec.state != ContainerState::Running {
                continue;
            }
            let idle = rec
                .last_activity
                .map(|t| t.elapsed())
                .unwrap_or(Duration::ZERO);
            if idle >= idle_limit {
                info!(
                    conversation = %rec.conversation_id,
                    idle_secs = idle.as_secs(),
                    "idle timeout reached, stopping container"
                );
                self.stop_record(&mut rec).await;
            }
        }
    }
}

/// Quote a string for safe interpolation into a shell command line.
fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/tmp"), "'/tmp'");
        assert_eq!(shell_quote("a'b"), "'a'\\''b'");
    }
}
