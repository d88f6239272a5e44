// Error types for the container module

use thiserror::Error;

/// Container lifecycle errors.
#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("Container unavailable for conversation `{conversation}`: {reason}")]
    Unavailable {
        conversation: String,
        reason: String,
    },

    #[error("Container image `{0}` not found; build or pull it before using the shell")]
    ImageMissing(String),

    #[error("Container runtime error: {0}")]
    Runtime(String),

    #[error("Shell error: {0}")]
    Shell(#[from] ShellError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Stateful shell errors.
#[derive(Debug, Error)]
pub enum ShellError {
    #[error("Shell process exited")]
    ProcessExited,

    #[error("Shell failed to become ready: {0}")]
    NotReady(String),

    #[error("Shell IO error: {0}")]
    Io(#[from] std::io::Error),
}
