// Agent configuration

/// Conversation manager and turn-loop configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Safety cap on model-tool iterations within one user turn.
    pub max_tool_iterations: u32,
    /// System prompt sent with every completion request.
    pub system_prompt: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_tool_iterations: 25,
            system_prompt: r#"You are a capable assistant with access to tools, including a stateful bash shell running in your own sandbox.
The shell keeps its working directory, environment variables, and aliases between commands; /mnt is your writable workspace.
Use tools when a request needs them, and answer directly when it does not."#
                .to_string(),
        }
    }
}

impl AgentConfig {
    /// Load from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let mut config = Self::default();

        if let Ok(v) = std::env::var("AGENT_MAX_TOOL_ITERATIONS") {
            config.max_tool_iterations = v.parse().unwrap_or(config.max_tool_iterations);
        }
        if let Ok(v) = std::env::var("AGENT_SYSTEM_PROMPT") {
            config.system_prompt = v;
        }

        config
    }
}
