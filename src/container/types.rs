// Data types for the container module
#![allow(dead_code)]

use serde::Serialize;

/// Lifecycle state of a conversation's container.
///
/// Transitions: not-created → creating → running ⇄ stopped; creating →
/// failed; failed/any → not-created via destroy; destroyed is terminal until
/// reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    NotCreated,
    Creating,
    Running,
    Stopped,
    Failed,
    Destroyed,
}

impl ContainerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerState::NotCreated => "not_created",
            ContainerState::Creating => "creating",
            ContainerState::Running => "running",
            ContainerState::Stopped => "stopped",
            ContainerState::Failed => "failed",
            ContainerState::Destroyed => "destroyed",
        }
    }
}

/// Result of one `execute` call against a conversation's container.
#[derive(Debug, Clone, Serialize)]
pub struct ExecOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    /// 1-based, monotonic per conversation.
    pub command_number: u64,
    /// True when this call provisioned or resumed the container.
    pub container_was_created_or_resumed: bool,
}

/// Snapshot of a conversation's container record.
#[derive(Debug, Clone, Serialize)]
pub struct ContainerStatus {
    pub conversation_id: String,
    pub container_state: String,
    pub container_active: bool,
    pub command_count: u64,
    pub created_at: Option<String>,
    pub last_activity: Option<String>,
    pub uptime_seconds: Option<u64>,
    pub idle_seconds: Option<u64>,
    pub work_dir: String,
    pub memory_limit: String,
    pub cpu_limit: f64,
    pub idle_timeout_secs: u64,
}
