// End-to-end tests: prompt in, model-tool loop, response out
// Run with cargo test --test test_agent

#[path = "../src/agent/mod.rs"]
mod agent;
#[path = "../src/brain/mod.rs"]
mod brain;
#[path = "../src/comm/mod.rs"]
mod comm;
#[path = "../src/container/mod.rs"]
mod container;
#[path = "../src/state/mod.rs"]
mod state;
#[path = "../src/tools/mod.rs"]
mod tools;

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Value};

use agent::{AgentConfig, ConversationManager};
use brain::{
    Brain, BrainConfig, BrainError, CompletionTransport, ContentBlock, MessageRequest,
    MessageResponse, Role, StopReason,
};
use container::{ContainerConfig, ContainerManager, ProcessRuntime};
use state::StateStore;
use tools::bash::BashToolProvider;
use tools::{
    Declaration, JsonMap, ParamType, Parameter, RegistryConfig, Tool, ToolProvider, ToolRegistry,
    ToolValue,
};

fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .init();
    });
}

fn temp_root() -> PathBuf {
    std::env::temp_dir().join(format!("berth-agent-{}", uuid::Uuid::new_v4().simple()))
}

fn brain_config() -> BrainConfig {
    BrainConfig {
        endpoint: "http://localhost:0".to_string(),
        api_key: "test".to_string(),
        default_model: "primary-model".to_string(),
        backup_model: Some("backup-model".to_string()),
        initial_backoff_ms: 1,
        max_backoff_ms: 5,
        backoff_multiplier: 2.0,
        fallback_retry_count: 10,
        request_timeout_secs: 5,
        max_output_tokens: 1024,
    }
}

fn text_response(text: &str, model: &str) -> MessageResponse {
    MessageResponse {
        id: "msg".to_string(),
        content: vec![ContentBlock::Text {
            text: text.to_string(),
        }],
        model: model.to_string(),
        role: Role::Assistant,
        stop_reason: Some(StopReason::EndTurn),
        stop_sequence: None,
        usage: None,
        extra: Default::default(),
    }
}

fn tool_use_response(id: &str, name: &str, input: Value) -> MessageResponse {
    MessageResponse {
        id: "msg".to_string(),
        content: vec![ContentBlock::ToolUse {
            id: id.to_string(),
            name: name.to_string(),
            input,
        }],
        model: "primary-model".to_string(),
        role: Role::Assistant,
        stop_reason: Some(StopReason::ToolUse),
        stop_sequence: None,
        usage: None,
        extra: Default::default(),
    }
}

/// Transport replaying a fixed queue of responses.
struct QueueTransport {
    responses: Mutex<VecDeque<MessageResponse>>,
}

impl QueueTransport {
    fn new(responses: Vec<MessageResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
        }
    }
}

#[async_trait]
impl CompletionTransport for QueueTransport {
    async fn send(&self, _request: &MessageRequest) -> Result<MessageResponse, BrainError> {
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| BrainError::InvalidRequest("script exhausted".to_string()))
    }
}

/// Stateless transport: first round of a turn asks for a shell sleep, the
/// round after the tool result answers in text. Safe under concurrent
/// conversations.
struct SleepyTransport;

#[async_trait]
impl CompletionTransport for SleepyTransport {
    async fn send(&self, request: &MessageRequest) -> Result<MessageResponse, BrainError> {
        let last = request.messages.last().unwrap();
        let saw_tool_result = last
            .content
            .iter()
            .any(|b| matches!(b, ContentBlock::ToolResult { .. }));
        if saw_tool_result {
            Ok(text_response("done", &request.model))
        } else {
            Ok(tool_use_response(
                "tu_sleep",
                "bash",
                json!({"command": "sleep 1"}),
            ))
        }
    }
}

/// Transport failing transiently a scripted number of times, recording the
/// model of every request.
struct FlakyTransport {
    failures_remaining: Mutex<u32>,
    models_seen: Mutex<Vec<String>>,
}

#[async_trait]
impl CompletionTransport for FlakyTransport {
    async fn send(&self, request: &MessageRequest) -> Result<MessageResponse, BrainError> {
        self.models_seen.lock().unwrap().push(request.model.clone());
        let mut remaining = self.failures_remaining.lock().unwrap();
        if *remaining > 0 {
            *remaining -= 1;
            Err(BrainError::Overloaded("overloaded".to_string()))
        } else {
            Ok(text_response("recovered after fallback", &request.model))
        }
    }
}

/// Canned weather provider for the no-shell scenario.
struct WeatherProvider;

#[async_trait]
impl ToolProvider for WeatherProvider {
    fn name(&self) -> &'static str {
        "weather"
    }

    fn declare(&self) -> Declaration {
        Declaration {
            tools: vec![Tool::new(
                "get_weather",
                "Get Weather",
                "Get the current weather for a specified location",
            )
            .with_parameters(vec![Parameter::new(
                "location",
                ParamType::String,
                "City to look up",
            )])],
            initial_global: JsonMap::new(),
            conversation_template: JsonMap::new(),
        }
    }

    async fn invoke(
        &self,
        _tool_id: &str,
        _args: JsonMap,
        _conversation: &mut JsonMap,
        _global: &mut JsonMap,
    ) -> Result<ToolValue, String> {
        Ok(ToolValue::Json(json!({"temp": 22, "cond": "sunny"})))
    }
}

struct Fixture {
    manager: Arc<ConversationManager>,
    containers: Arc<ContainerManager>,
    root: PathBuf,
}

fn fixture(transport: Box<dyn CompletionTransport>, with_weather: bool) -> Fixture {
    let root = temp_root();

    let store = Arc::new(StateStore::new(&root));
    let registry = Arc::new(ToolRegistry::new(
        RegistryConfig {
            runtime_root: root.clone(),
        },
        store,
    ));

    let container_config = ContainerConfig {
        runtime_root: root.clone(),
        ..ContainerConfig::default()
    };
    let containers = Arc::new(ContainerManager::new(
        container_config,
        Arc::new(ProcessRuntime::new()),
    ));

    registry
        .register(Arc::new(BashToolProvider::new(containers.clone())))
        .unwrap();
    if with_weather {
        registry.register(Arc::new(WeatherProvider)).unwrap();
    }

    let brain = Arc::new(Brain::with_transport(brain_config(), transport));
    let manager = Arc::new(ConversationManager::new(
        AgentConfig::default(),
        brain,
        registry,
        containers.clone(),
    ));

    Fixture {
        manager,
        containers,
        root,
    }
}

#[cfg(test)]
mod integration_tests {
    use super::*;

    /// Scenario: tool turn with no shell involved. No container appears and
    /// the history has exactly user / tool-use / tool-result / text.
    #[tokio::test]
    async fn test_weather_turn_without_shell() {
        init_tracing();
        let fx = fixture(
            Box::new(QueueTransport::new(vec![
                tool_use_response("tu_1", "get_weather", json!({"location": "Paris"})),
                text_response("Paris: 22°C, sunny.", "primary-model"),
            ])),
            true,
        );

        let response = fx
            .manager
            .on_prompt("c1", "What's the weather in Paris?")
            .await;

        assert!(!response.is_error);
        assert_eq!(response.conversation_id, "c1");
        assert_eq!(response.text, "Paris: 22°C, sunny.");

        let history = fx.manager.history("c1").await.unwrap();
        assert_eq!(history.len(), 4);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[1].role, Role::Assistant);
        assert_eq!(history[2].role, Role::User);
        assert_eq!(history[3].role, Role::Assistant);

        // The tool result fed back to the model carries the provider value.
        match &history[2].content[0] {
            ContentBlock::ToolResult { content, .. } => {
                assert!(content.as_text().contains("sunny"));
            }
            other => panic!("expected tool result, got {:?}", other),
        }

        // No shell use, no container.
        let status = fx.containers.status("c1").await;
        assert_eq!(status.container_state, "not_created");

        let _ = std::fs::remove_dir_all(&fx.root);
    }

    /// Scenario: the first bash tool call lazily creates the container.
    #[tokio::test]
    async fn test_lazy_container_creation_through_turn() {
        init_tracing();
        let fx = fixture(
            Box::new(QueueTransport::new(vec![
                tool_use_response("tu_1", "bash", json!({"command": "echo hi"})),
                text_response("hi", "primary-model"),
            ])),
            false,
        );

        assert_eq!(
            fx.containers.status("c2").await.container_state,
            "not_created"
        );

        let response = fx.manager.on_prompt("c2", "Run `echo hi` in a shell.").await;
        assert!(!response.is_error);
        assert_eq!(response.text, "hi");

        let status = fx.containers.status("c2").await;
        assert_eq!(status.container_state, "running");
        assert_eq!(status.command_count, 1);

        let history = fx.manager.history("c2").await.unwrap();
        match &history[2].content[0] {
            ContentBlock::ToolResult { content, is_error, .. } => {
                assert_eq!(*is_error, Some(false));
                let text = content.as_text();
                assert!(text.contains(r#""exit_code":0"#), "got: {}", text);
                assert!(text.contains("hi\\n") || text.contains("hi\n"), "got: {}", text);
                assert!(text.contains(r#""command_number":1"#), "got: {}", text);
                assert!(
                    text.contains(r#""container_was_created_or_resumed":true"#),
                    "got: {}",
                    text
                );
            }
            other => panic!("expected tool result, got {:?}", other),
        }

        fx.containers.shutdown().await;
        let _ = std::fs::remove_dir_all(&fx.root);
    }

    /// Scenario: two conversations run 1 s shell commands concurrently.
    #[tokio::test]
    async fn test_parallel_conversations() {
        init_tracing();
        let fx = fixture(Box::new(SleepyTransport), false);

        let start = Instant::now();
        let (a, b) = tokio::join!(
            fx.manager.on_prompt("c5", "Sleep for a second."),
            fx.manager.on_prompt("c6", "Sleep for a second."),
        );
        let elapsed = start.elapsed();

        assert_eq!(a.text, "done");
        assert_eq!(b.text, "done");
        assert!(
            elapsed < Duration::from_millis(1800),
            "turns should overlap, took {:?}",
            elapsed
        );

        fx.containers.shutdown().await;
        let _ = std::fs::remove_dir_all(&fx.root);
    }

    /// Scenario: ten consecutive transient failures push the driver onto the
    /// backup model; the eleventh request carries the backup identifier and
    /// the conversation still ends with assistant text.
    #[tokio::test]
    async fn test_fallback_to_backup_model() {
        init_tracing();
        let transport = Box::new(FlakyTransport {
            failures_remaining: Mutex::new(10),
            models_seen: Mutex::new(Vec::new()),
        });
        // Keep a handle on the recorded models.
        let transport_ref: &'static FlakyTransport = Box::leak(transport);
        let fx = fixture(Box::new(ForwardingTransport(transport_ref)), false);

        let response = fx.manager.on_prompt("c7", "Hello?").await;
        assert!(!response.is_error);
        assert_eq!(response.text, "recovered after fallback");

        let models = transport_ref.models_seen.lock().unwrap().clone();
        assert_eq!(models.len(), 11);
        assert!(models[..10].iter().all(|m| m == "primary-model"));
        assert_eq!(models[10], "backup-model");

        let history = fx.manager.history("c7").await.unwrap();
        assert_eq!(history.last().unwrap().role, Role::Assistant);

        let _ = std::fs::remove_dir_all(&fx.root);
    }

    /// Scenario: a permanent completion failure becomes a terminal apology,
    /// not a crash, and the conversation stays usable.
    #[tokio::test]
    async fn test_permanent_failure_yields_apology() {
        init_tracing();

        struct AuthFailThenOk {
            failed_once: Mutex<bool>,
        }

        #[async_trait]
        impl CompletionTransport for AuthFailThenOk {
            async fn send(
                &self,
                request: &MessageRequest,
            ) -> Result<MessageResponse, BrainError> {
                let mut failed = self.failed_once.lock().unwrap();
                if !*failed {
                    *failed = true;
                    Err(BrainError::AuthenticationFailed("bad key".to_string()))
                } else {
                    Ok(text_response("working now", &request.model))
                }
            }
        }

        let fx = fixture(
            Box::new(AuthFailThenOk {
                failed_once: Mutex::new(false),
            }),
            false,
        );

        let response = fx.manager.on_prompt("c8", "Hi").await;
        assert!(response.is_error);
        assert!(response.text.contains("could not finish"));

        // History stays well-formed: it ends with assistant text.
        let history = fx.manager.history("c8").await.unwrap();
        assert_eq!(history.last().unwrap().role, Role::Assistant);

        // The conversation remains usable afterwards.
        let response = fx.manager.on_prompt("c8", "Still there?").await;
        assert!(!response.is_error);
        assert_eq!(response.text, "working now");

        let _ = std::fs::remove_dir_all(&fx.root);
    }

    /// The full pipe: an enveloped prompt over UDP comes back as an
    /// enveloped agent response with the conversation id echoed.
    #[tokio::test]
    async fn test_prompt_channel_round_trip() {
        init_tracing();
        let fx = fixture(
            Box::new(QueueTransport::new(vec![text_response(
                "All quiet.",
                "primary-model",
            )])),
            false,
        );

        let comm_config = comm::CommConfig {
            listen_addr: "127.0.0.1".to_string(),
            listen_port: 0,
            max_payload_bytes: 65536,
            response_timeout_secs: 10,
            dedup_capacity: 256,
            dedup_ttl_secs: 300,
        };
        let (server, prompt_rx) = comm::Comm::new(comm_config).await.unwrap();
        let server_addr = server.local_addr().unwrap();

        tokio::spawn(async move {
            let _ = server.run().await;
        });
        tokio::spawn(fx.manager.clone().run(prompt_rx));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let client = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.connect(server_addr).await.unwrap();

        let envelope = comm::Envelope::new_prompt("c-wire", "Anything happening?");
        let mut payload = Vec::new();
        {
            use serde::Serialize;
            let mut ser = rmp_serde::encode::Serializer::new(&mut payload).with_struct_map();
            envelope.serialize(&mut ser).unwrap();
        }
        let mut packet = vec![comm::MsgType::Request as u8];
        packet.extend_from_slice(&1u32.to_be_bytes());
        packet.extend_from_slice(&payload);
        client.send(&packet).await.unwrap();

        let mut buf = [0u8; 65536];
        // ACK
        let (_, _) = tokio::time::timeout(Duration::from_secs(1), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(buf[0], comm::MsgType::RequestAck as u8);

        // Response envelope
        let (len, _) = tokio::time::timeout(Duration::from_secs(5), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(buf[0], comm::MsgType::Response as u8);
        let decoded: comm::Envelope = {
            use serde::Deserialize;
            let mut de = rmp_serde::decode::Deserializer::new(&buf[5..len]);
            comm::Envelope::deserialize(&mut de).unwrap()
        };
        assert_eq!(decoded.recipient, comm::RECIPIENT_USER_DEVICE);
        assert_eq!(decoded.kind, comm::MSG_AGENT_RESPONSE);
        assert_eq!(decoded.payload.conversation_id, "c-wire");
        assert_eq!(decoded.payload.prompt, "All quiet.");

        let _ = std::fs::remove_dir_all(&fx.root);
    }

    /// Conversation reset clears history but keeps tool state slots.
    #[tokio::test]
    async fn test_reset_gives_fresh_history() {
        init_tracing();
        let fx = fixture(
            Box::new(QueueTransport::new(vec![
                text_response("first", "primary-model"),
                text_response("second", "primary-model"),
            ])),
            false,
        );

        fx.manager.on_prompt("c9", "One").await;
        assert_eq!(fx.manager.history("c9").await.unwrap().len(), 2);

        fx.manager.reset("c9").await;
        assert_eq!(fx.manager.history("c9").await.unwrap().len(), 0);

        let response = fx.manager.on_prompt("c9", "Two").await;
        assert_eq!(response.text, "second");
        assert_eq!(fx.manager.history("c9").await.unwrap().len(), 2);

        let _ = std::fs::remove_dir_all(&fx.root);
    }
}

/// Forwards to a leaked transport so tests can inspect it afterwards.
struct ForwardingTransport(&'static FlakyTransport);

#[async_trait]
impl CompletionTransport for ForwardingTransport {
    async fn send(&self, request: &MessageRequest) -> Result<MessageResponse, BrainError> {
        self.0.send(request).await
    }
}
