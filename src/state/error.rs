// Error types for State module

use thiserror::Error;

/// State persistence errors
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Failed to serialize state: {0}")]
    Serialize(String),

    #[error("Failed to write state file: {0}")]
    Write(#[from] std::io::Error),
}
