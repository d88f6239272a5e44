mod agent;
mod brain;
mod comm;
mod container;
mod state;
mod tools;

use std::sync::Arc;

use agent::{AgentConfig, ConversationManager};
use brain::{Brain, BrainConfig};
use comm::{Comm, CommConfig};
use container::{ContainerConfig, ContainerManager, ContainerRuntime, DockerCli, ProcessRuntime};
use state::StateStore;
use tools::bash::BashToolProvider;
use tools::{RegistryConfig, ToolRegistry};
use tracing::{error, info, warn};
use tracing_subscriber::fmt;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    fmt().with_max_level(tracing::Level::INFO).init();

    let reset_state = std::env::args().any(|a| a == "--reset-state");

    // Container and runtime-root configuration
    let container_config = ContainerConfig::from_env();
    let runtime_root = container_config.runtime_root.clone();
    std::fs::create_dir_all(runtime_root.join("agent-working-directory"))?;

    // State store
    let store = Arc::new(StateStore::new(&runtime_root));
    if reset_state {
        warn!("--reset-state: wiping persisted tool state and scratch directories");
        store.reset();
        let scratch = runtime_root.join("agent-working-directory");
        let _ = std::fs::remove_dir_all(&scratch);
        std::fs::create_dir_all(&scratch)?;
    }

    // Tool registry
    let registry = Arc::new(ToolRegistry::new(
        RegistryConfig {
            runtime_root: runtime_root.clone(),
        },
        store.clone(),
    ));

    // Container manager; CONTAINER_RUNTIME=process selects the host-process
    // fallback for machines without a container engine.
    let runtime: Arc<dyn ContainerRuntime> = match std::env::var("CONTAINER_RUNTIME").as_deref() {
        Ok("process") => {
            warn!("running shells directly on the host (no sandbox isolation)");
            Arc::new(ProcessRuntime::new())
        }
        _ => Arc::new(DockerCli::new(&container_config)),
    };
    let containers = Arc::new(ContainerManager::new(container_config, runtime));
    let _reaper = containers.start_reaper();

    registry.register(Arc::new(BashToolProvider::new(containers.clone())))?;
    info!(tools = registry.tool_schemas().len(), "tool providers loaded");

    // Completion client
    let brain_config = BrainConfig::from_env()?;
    info!(model = %brain_config.default_model, "initializing completion client");
    let brain = Arc::new(Brain::new(brain_config)?);

    // Prompt channel
    let comm_config = CommConfig::from_env();
    let (comm, prompt_rx) = Comm::new(comm_config).await?;
    info!("prompt channel ready on {}", comm.local_addr()?);
    tokio::spawn(async move {
        if let Err(e) = comm.run().await {
            error!(error = %e, "prompt channel server stopped");
        }
    });

    // Conversation manager
    let manager = Arc::new(ConversationManager::new(
        AgentConfig::from_env(),
        brain,
        registry.clone(),
        containers.clone(),
    ));
    let router = tokio::spawn(manager.clone().run(prompt_rx));

    info!("agent running, press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;

    info!("shutdown signal received, stopping containers");
    containers.shutdown().await;
    registry.persist();
    router.abort();

    info!("shutdown complete");
    Ok(())
}
