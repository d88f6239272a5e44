// Error types for Brain module

use thiserror::Error;

/// Runtime errors from Brain.
#[derive(Debug, Error)]
#[allow(dead_code)]
pub enum BrainError {
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Insufficient balance: {0}")]
    InsufficientBalance(String),

    #[error("Unknown model or endpoint: {0}")]
    NotFound(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Service overloaded: {0}")]
    Overloaded(String),

    #[error("Model error: {0}")]
    ModelError(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl BrainError {
    /// Transient failures are retried with backoff and count toward the
    /// backup-model fallback threshold; permanent ones surface immediately.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BrainError::RateLimited(_)
                | BrainError::Overloaded(_)
                | BrainError::ModelError(_)
                | BrainError::Timeout
                | BrainError::NetworkError(_)
        )
    }
}

/// Initialization errors for Brain.
#[derive(Debug, Error)]
#[allow(dead_code)]
pub enum BrainInitError {
    #[error("Configuration missing: {0}")]
    ConfigMissing(String),

    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("Failed to create HTTP client: {0}")]
    ClientError(#[from] reqwest::Error),
}
