// Agent errors

use thiserror::Error;

/// Failures that end a user turn without an assistant answer.
#[derive(Debug, Error)]
pub enum TurnError {
    #[error("Completion failed: {0}")]
    Completion(String),

    #[error("Request build error: {0}")]
    RequestBuild(&'static str),

    #[error("Tool loop exceeded {0} iterations")]
    ToolLoopLimit(u32),
}
