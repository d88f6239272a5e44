// Conversation manager - owns conversations, routes prompts, emits responses

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::brain::{Brain, Message};
use crate::comm::{PromptRequest, PromptResponse};
use crate::container::ContainerManager;
use crate::tools::ToolRegistry;

use super::config::AgentConfig;
use super::turn::run_turn;

/// One independent dialog, keyed by the prompt channel's identifier.
pub struct Conversation {
    pub conversation_id: String,
    pub history: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub working_directory: PathBuf,
}

impl Conversation {
    fn new(conversation_id: String, working_directory: PathBuf) -> Self {
        Self {
            conversation_id,
            history: Vec::new(),
            created_at: Utc::now(),
            working_directory,
        }
    }
}

/// Routes inbound prompts to per-conversation turn loops.
///
/// Operations on one conversation are serialized by its lock; prompts for
/// distinct conversations run in parallel on spawned tasks.
pub struct ConversationManager {
    config: AgentConfig,
    brain: Arc<Brain>,
    registry: Arc<ToolRegistry>,
    containers: Arc<ContainerManager>,
    conversations: Mutex<HashMap<String, Arc<tokio::sync::Mutex<Conversation>>>>,
}

impl ConversationManager {
    pub fn new(
        config: AgentConfig,
        brain: Arc<Brain>,
        registry: Arc<ToolRegistry>,
        containers: Arc<ContainerManager>,
    ) -> Self {
        Self {
            config,
            brain,
            registry,
            containers,
            conversations: Mutex::new(HashMap::new()),
        }
    }

    fn get_or_create(&self, conversation_id: &str) -> Arc<tokio::sync::Mutex<Conversation>> {
        let mut conversations = self.conversations.lock().unwrap();
        conversations
            .entry(conversation_id.to_string())
            .or_insert_with(|| {
                info!(conversation = %conversation_id, "creating new conversation");
                let working_directory = self.registry.working_directory_for(conversation_id);
                if let Err(e) = std::fs::create_dir_all(&working_directory) {
                    warn!(
                        conversation = %conversation_id,
                        error = %e,
                        "failed to create working directory"
                    );
                }
                Arc::new(tokio::sync::Mutex::new(Conversation::new(
                    conversation_id.to_string(),
                    working_directory,
                )))
            })
            .clone()
    }

    /// Consume prompt requests from the channel, one spawned task per
    /// prompt. Returns when the channel closes.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<PromptRequest>) {
        while let Some(request) = rx.recv().await {
            let manager = self.clone();
            tokio::spawn(async move {
                let PromptRequest {
                    conversation_id,
                    prompt,
                    reply,
                    ..
                } = request;
                let response = manager.on_prompt(&conversation_id, &prompt).await;
                if reply.send(response).is_err() {
                    warn!(conversation = %conversation_id, "prompt channel dropped the reply");
                }
            });
        }
    }

    /// Handle one inbound prompt and produce the outbound response.
    ///
    /// Errors never escape: a failed turn becomes a terminal assistant-text
    /// apology and an error-flagged response.
    pub async fn on_prompt(&self, conversation_id: &str, prompt: &str) -> PromptResponse {
        let conversation = self.get_or_create(conversation_id);
        let mut conv = conversation.lock().await;

        info!(
            conversation = %conversation_id,
            prompt_len = prompt.len(),
            history_len = conv.history.len(),
            "handling prompt"
        );

        let result = run_turn(
            self.brain.as_ref(),
            self.registry.as_ref(),
            &mut conv.history,
            &self.config.system_prompt,
            conversation_id,
            prompt,
            self.config.max_tool_iterations,
        )
        .await;

        match result {
            Ok(text) => PromptResponse {
                conversation_id: conversation_id.to_string(),
                text,
                is_error: false,
            },
            Err(e) => {
                error!(conversation = %conversation_id, error = %e, "turn failed");
                let apology = format!("Sorry, I could not finish that request: {}", e);
                // Keep the history well-formed: it must end with assistant
                // text, never an orphaned tool-use.
                conv.history.push(Message::assistant_text(apology.clone()));
                PromptResponse {
                    conversation_id: conversation_id.to_string(),
                    text: apology,
                    is_error: true,
                }
            }
        }
    }

    /// Clear a conversation's history. Per-conversation tool state is
    /// retained; only the persistence-wide wipe removes it.
    pub async fn reset(&self, conversation_id: &str) {
        let existing = {
            let conversations = self.conversations.lock().unwrap();
            conversations.get(conversation_id).cloned()
        };
        if let Some(conversation) = existing {
            let mut conv = conversation.lock().await;
            conv.history.clear();
            info!(conversation = %conversation_id, "conversation history cleared");
        }
    }

    /// Drop all conversations, wipe persisted tool state, and destroy every
    /// container.
    pub async fn wipe_all(&self) {
        self.conversations.lock().unwrap().clear();
        self.registry.reset_all();
        self.containers.destroy_all().await;
        info!("all conversations and state wiped");
    }

    pub fn list_conversations(&self) -> Vec<String> {
        self.conversations.lock().unwrap().keys().cloned().collect()
    }

    /// History snapshot, for inspection and tests.
    pub async fn history(&self, conversation_id: &str) -> Option<Vec<Message>> {
        let existing = {
            let conversations = self.conversations.lock().unwrap();
            conversations.get(conversation_id).cloned()
        };
        match existing {
            Some(conversation) => Some(conversation.lock().await.history.clone()),
            None => None,
        }
    }
}
