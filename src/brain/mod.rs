// Brain module - completion service client with retry and model fallback

pub mod builder;
pub mod client;
pub mod error;
pub mod types;

pub use builder::RequestBuilder;
pub use client::{Brain, CompletionTransport, HttpTransport};
pub use error::{BrainError, BrainInitError};
pub use types::{
    ContentBlock, ImageSource, Message, MessageRequest, MessageResponse, Role, StopReason,
    ToolDefinition, ToolResultBlock, ToolResultContent,
};

/// Brain configuration.
#[derive(Debug, Clone)]
pub struct BrainConfig {
    /// Completion service base URL.
    pub endpoint: String,
    /// API key for authentication.
    pub api_key: String,
    /// Primary model identifier.
    pub default_model: String,
    /// Backup model the driver falls back to after repeated transient
    /// failures; None disables fallback.
    pub backup_model: Option<String>,
    /// First retry delay.
    pub initial_backoff_ms: u64,
    /// Retry delay cap.
    pub max_backoff_ms: u64,
    /// Backoff growth factor.
    pub backoff_multiplier: f64,
    /// Consecutive transient failures on the primary model before switching
    /// to the backup.
    pub fallback_retry_count: u32,
    /// Per-request HTTP timeout.
    pub request_timeout_secs: u64,
    /// Maximum output tokens.
    pub max_output_tokens: u32,
}

impl BrainConfig {
    pub fn from_env() -> Result<Self, BrainInitError> {
        dotenvy::dotenv().ok();

        let endpoint = std::env::var("INFERENCE_ENDPOINT")
            .map_err(|_| BrainInitError::ConfigMissing("INFERENCE_ENDPOINT".into()))?;
        let api_key = std::env::var("INFERENCE_API_KEY")
            .map_err(|_| BrainInitError::ConfigMissing("INFERENCE_API_KEY".into()))?;
        let default_model = std::env::var("INFERENCE_MODEL")
            .map_err(|_| BrainInitError::ConfigMissing("INFERENCE_MODEL".into()))?;

        let backup_model = std::env::var("INFERENCE_BACKUP_MODEL").ok();

        let initial_backoff_ms = std::env::var("INFERENCE_INITIAL_BACKOFF_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(100);

        let max_backoff_ms = std::env::var("INFERENCE_MAX_BACKOFF_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3000);

        let backoff_multiplier = std::env::var("INFERENCE_BACKOFF_MULTIPLIER")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(2.0);

        let fallback_retry_count = std::env::var("INFERENCE_FALLBACK_RETRY_COUNT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10);

        let request_timeout_secs = std::env::var("INFERENCE_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(120);

        let max_output_tokens = std::env::var("INFERENCE_MAX_TOKENS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(4096);

        Ok(Self {
            endpoint,
            api_key,
            default_model,
            backup_model,
            initial_backoff_ms,
            max_backoff_ms,
            backoff_multiplier,
            fallback_retry_count,
            request_timeout_secs,
            max_output_tokens,
        })
    }
}
