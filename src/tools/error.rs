// Error types for the tool runtime

use thiserror::Error;

/// Errors raised while registering a provider.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Tool with id `{0}` already registered")]
    DuplicateTool(String),
}

/// Errors raised by a single tool call.
///
/// All of these are surfaced to the model as tool-result error content; none
/// of them terminate the conversation.
#[derive(Debug, Error)]
pub enum ToolCallError {
    #[error("Unknown tool `{0}`")]
    UnknownTool(String),

    #[error("Invalid arguments for tool `{tool}`: {message}")]
    InvalidArgs { tool: String, message: String },

    #[error("{0}")]
    Provider(String),
}
