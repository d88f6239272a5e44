// Container module - per-conversation sandbox lifecycle and stateful shells

pub mod error;
pub mod manager;
pub mod runtime;
pub mod shell;
pub mod types;

pub use error::{ContainerError, ShellError};
pub use manager::ContainerManager;
pub use runtime::{ContainerHandle, ContainerRuntime, DockerCli, ProcessRuntime};
pub use shell::{CommandOutput, ShellSession};
pub use types::{ContainerState, ContainerStatus, ExecOutcome};

use std::path::PathBuf;

/// Container manager configuration.
#[derive(Debug, Clone)]
pub struct ContainerConfig {
    /// Base directory; scratch mounts live under
    /// `agent-working-directory/<conversation_id>`.
    pub runtime_root: PathBuf,
    /// Image used for sandbox containers.
    pub image: String,
    /// Memory cap per container.
    pub memory_limit: String,
    /// CPU quota per container, in cores.
    pub cpu_limit: f64,
    /// Seconds before an idle running container is stopped; 0 disables.
    pub idle_timeout_secs: u64,
    /// Idle reaper wake interval.
    pub sweep_interval_secs: u64,
    /// Host network mode; false selects the runtime's default bridge.
    pub host_network: bool,
    /// Default per-command shell timeout.
    pub default_command_timeout_secs: u64,
    /// Upper bound on tracked conversation records.
    pub max_tracked: usize,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            runtime_root: PathBuf::from("./berth_runtime"),
            image: "agent-sandbox:latest".to_string(),
            memory_limit: "2g".to_string(),
            cpu_limit: 2.0,
            idle_timeout_secs: 0,
            sweep_interval_secs: 60,
            host_network: true,
            default_command_timeout_secs: 120,
            max_tracked: 100,
        }
    }
}

impl ContainerConfig {
    /// Load from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let mut config = Self::default();

        if let Ok(v) = std::env::var("RUNTIME_ROOT") {
            config.runtime_root = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("CONTAINER_IMAGE") {
            config.image = v;
        }
        if let Ok(v) = std::env::var("CONTAINER_MEMORY_LIMIT") {
            config.memory_limit = v;
        }
        if let Ok(v) = std::env::var("CONTAINER_CPU_LIMIT") {
            config.cpu_limit = v.parse().unwrap_or(config.cpu_limit);
        }
        if let Ok(v) = std::env::var("CONTAINER_IDLE_TIMEOUT_SECS") {
            config.idle_timeout_secs = v.parse().unwrap_or(config.idle_timeout_secs);
        }
        if let Ok(v) = std::env::var("CONTAINER_SWEEP_INTERVAL_SECS") {
            config.sweep_interval_secs = v.parse().unwrap_or(config.sweep_interval_secs);
        }
        if let Ok(v) = std::env::var("CONTAINER_NETWORK") {
            config.host_network = v != "bridge";
        }
        if let Ok(v) = std::env::var("CONTAINER_COMMAND_TIMEOUT_SECS") {
            config.default_command_timeout_secs =
                v.parse().unwrap_or(config.default_command_timeout_secs);
        }

        config
    }
}
