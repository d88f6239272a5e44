// Brain client - completion requests with retry, backoff, and model fallback

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, error, info, warn};

use super::{BrainConfig, BrainError, BrainInitError, MessageRequest, MessageResponse};

/// Transport seam between the retry loop and the wire. Production uses
/// `HttpTransport`; tests script failures.
#[async_trait]
pub trait CompletionTransport: Send + Sync {
    async fn send(&self, request: &MessageRequest) -> Result<MessageResponse, BrainError>;
}

/// HTTP transport speaking the completion service messages API.
pub struct HttpTransport {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl HttpTransport {
    pub fn new(config: &BrainConfig) -> Result<Self, BrainInitError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(BrainInitError::ClientError)?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl CompletionTransport for HttpTransport {
    async fn send(&self, request: &MessageRequest) -> Result<MessageResponse, BrainError> {
        let url = format!("{}/v1/messages", self.endpoint.trim_end_matches('/'));

        debug!(url = %url, model = %request.model, "sending completion request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("anthropic-version", "2023-06-01")
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BrainError::Timeout
                } else {
                    BrainError::NetworkError(e.to_string())
                }
            })?;

        let status = response.status();
        debug!(status = status.as_u16(), "completion response received");

        if status.is_success() {
            let body = response
                .text()
                .await
                .map_err(|e| BrainError::NetworkError(e.to_string()))?;
            let parsed: MessageResponse = serde_json::from_str(&body)?;
            return Ok(parsed);
        }

        let body = response.text().await.unwrap_or_default();
        Err(match status.as_u16() {
            400 => BrainError::InvalidRequest(body),
            401 => BrainError::AuthenticationFailed(body),
            402 => BrainError::InsufficientBalance(body),
            404 => BrainError::NotFound(body),
            429 => BrainError::RateLimited(body),
            529 => BrainError::Overloaded(body),
            s if status.is_server_error() => BrainError::ModelError(format!("HTTP {}: {}", s, body)),
            s => BrainError::InvalidRequest(format!("HTTP {}: {}", s, body)),
        })
    }
}

/// Completion client.
///
/// Transient failures retry with exponential backoff capped at the
/// configured maximum. After `fallback_retry_count` consecutive transient
/// failures on the primary model the client switches to the backup model and
/// keeps retrying without a further cap; `reset()` restores the primary for
/// subsequent turns. Permanent failures surface immediately.
pub struct Brain {
    config: BrainConfig,
    transport: Box<dyn CompletionTransport>,
    active_model: RwLock<String>,
    consecutive_failures: AtomicU32,
    on_backup: AtomicBool,
}

impl Brain {
    /// Create a Brain with the real HTTP transport.
    pub fn new(config: BrainConfig) -> Result<Self, BrainInitError> {
        info!(
            endpoint = %config.endpoint,
            model = %config.default_model,
            backup = config.backup_model.as_deref().unwrap_or("<none>"),
            fallback_after = config.fallback_retry_count,
            "initializing brain"
        );
        let transport = HttpTransport::new(&config)?;
        Ok(Self::with_transport(config, Box::new(transport)))
    }

    /// Create a Brain with a custom transport (tests, alternate backends).
    pub fn with_transport(config: BrainConfig, transport: Box<dyn CompletionTransport>) -> Self {
        let active_model = RwLock::new(config.default_model.clone());
        Self {
            config,
            transport,
            active_model,
            consecutive_failures: AtomicU32::new(0),
            on_backup: AtomicBool::new(false),
        }
    }

    /// Model currently in effect (primary, or backup after fallback).
    pub fn current_model(&self) -> String {
        self.active_model.read().unwrap().clone()
    }

    /// Configured primary model.
    pub fn default_model(&self) -> &str {
        &self.config.default_model
    }

    pub fn max_output_tokens(&self) -> u32 {
        self.config.max_output_tokens
    }

    pub fn is_using_backup(&self) -> bool {
        self.on_backup.load(Ordering::Relaxed)
    }

    /// Restore the primary model for subsequent turns.
    pub fn reset(&self) {
        *self.active_model.write().unwrap() = self.config.default_model.clone();
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.on_backup.store(false, Ordering::Relaxed);
    }

    /// Perform one completion, retrying transient failures until a response
    /// or a permanent error.
    pub async fn infer(&self, mut request: MessageRequest) -> Result<MessageResponse, BrainError> {
        let start = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            request.model = self.current_model();

            debug!(model = %request.model, attempt = attempt, "completion attempt");
            match self.transport.send(&request).await {
                Ok(response) => {
                    let (input_tokens, output_tokens) = response
                        .usage
                        .as_ref()
                        .map(|u| (u.input_tokens, u.output_tokens))
                        .unwrap_or((0, 0));
                    info!(
                        model = %response.model,
                        input_tokens = input_tokens,
                        output_tokens = output_tokens,
                        latency_ms = start.elapsed().as_millis() as u64,
                        retries = attempt,
                        stop_reason = ?response.stop_reason,
                        "completion succeeded"
                    );
                    self.consecutive_failures.store(0, Ordering::Relaxed);
                    return Ok(response);
                }
                Err(e) if e.is_transient() => {
                    attempt += 1;
                    let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;

                    self.maybe_fall_back(failures);

                    let delay = self.backoff_delay(attempt);
                    warn!(
                        attempt = attempt,
                        consecutive_failures = failures,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient completion failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!(error = %e, "permanent completion failure");
                    return Err(e);
                }
            }
        }
    }

    fn maybe_fall_back(&self, failures: u32) {
        if self.on_backup.load(Ordering::Relaxed) {
            return;
        }
        if failures < self.config.fallback_retry_count {
            return;
        }
        if let Some(backup) = &self.config.backup_model {
            warn!(
                primary = %self.config.default_model,
                backup = %backup,
                failures = failures,
                "*** PRIMARY MODEL FAILING - SWITCHING TO BACKUP MODEL ***"
            );
            *self.active_model.write().unwrap() = backup.clone();
            self.on_backup.store(true, Ordering::Relaxed);
        }
    }

    /// Exponential backoff: initial × multiplier^(attempt-1), capped.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(32) as i32;
        let raw = self.config.initial_backoff_ms as f64 * self.config.backoff_multiplier.powi(exp);
        let capped = raw.min(self.config.max_backoff_ms as f64);
        Duration::from_millis(capped as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::types::{ContentBlock, Role};
    use std::sync::Mutex;

    fn test_config() -> BrainConfig {
        BrainConfig {
            endpoint: "http://localhost:0".to_string(),
            api_key: "test".to_string(),
            default_model: "primary-model".to_string(),
            backup_model: Some("backup-model".to_string()),
            initial_backoff_ms: 1,
            max_backoff_ms: 4,
            backoff_multiplier: 2.0,
            fallback_retry_count: 3,
            request_timeout_secs: 5,
            max_output_tokens: 256,
        }
    }

    fn text_response(model: &str) -> MessageResponse {
        MessageResponse {
            id: "msg_1".to_string(),
            content: vec![ContentBlock::Text {
                text: "ok".to_string(),
            }],
            model: model.to_string(),
            role: Role::Assistant,
            stop_reason: None,
            stop_sequence: None,
            usage: None,
            extra: Default::default(),
        }
    }

    /// Transport that fails a scripted number of times, recording the model
    /// of every request it sees.
    struct ScriptedTransport {
        failures_remaining: Mutex<u32>,
        models_seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CompletionTransport for ScriptedTransport {
        async fn send(&self, request: &MessageRequest) -> Result<MessageResponse, BrainError> {
            self.models_seen.lock().unwrap().push(request.model.clone());
            let mut remaining = self.failures_remaining.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                Err(BrainError::Overloaded("overloaded".to_string()))
            } else {
                Ok(text_response(&request.model))
            }
        }
    }

    fn simple_request() -> MessageRequest {
        MessageRequest {
            model: String::new(),
            system: None,
            messages: vec![crate::brain::Message::user_text("hi")],
            tools: None,
            max_tokens: 64,
            temperature: None,
            stop_sequences: None,
        }
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let transport = ScriptedTransport {
            failures_remaining: Mutex::new(2),
            models_seen: Mutex::new(Vec::new()),
        };
        let brain = Brain::with_transport(test_config(), Box::new(transport));

        let response = brain.infer(simple_request()).await.unwrap();
        assert_eq!(response.text(), "ok");
        assert!(!brain.is_using_backup());
    }

    #[tokio::test]
    async fn test_falls_back_to_backup_after_threshold() {
        let transport = ScriptedTransport {
            failures_remaining: Mutex::new(3),
            models_seen: Mutex::new(Vec::new()),
        };
        let brain = Brain::with_transport(test_config(), Box::new(transport));

        let response = brain.infer(simple_request()).await.unwrap();
        assert_eq!(response.model, "backup-model");
        assert!(brain.is_using_backup());

        brain.reset();
        assert!(!brain.is_using_backup());
        assert_eq!(brain.current_model(), "primary-model");
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        struct PermanentFailure;

        #[async_trait]
        impl CompletionTransport for PermanentFailure {
            async fn send(&self, _: &MessageRequest) -> Result<MessageResponse, BrainError> {
                Err(BrainError::AuthenticationFailed("bad key".to_string()))
            }
        }

        let brain = Brain::with_transport(test_config(), Box::new(PermanentFailure));
        let err = brain.infer(simple_request()).await.unwrap_err();
        assert!(matches!(err, BrainError::AuthenticationFailed(_)));
    }

    #[test]
    fn test_backoff_caps_at_max() {
        let brain = Brain::with_transport(
            BrainConfig {
                initial_backoff_ms: 100,
                max_backoff_ms: 3000,
                backoff_multiplier: 2.0,
                ..test_config()
            },
            Box::new(ScriptedTransport {
                failures_remaining: Mutex::new(0),
                models_seen: Mutex::new(Vec::new()),
            }),
        );

        assert_eq!(brain.backoff_delay(1), Duration::from_millis(100));
        assert_eq!(brain.backoff_delay(2), Duration::from_millis(200));
        assert_eq!(brain.backoff_delay(6), Duration::from_millis(3000));
        assert_eq!(brain.backoff_delay(20), Duration::from_millis(3000));
    }
}
