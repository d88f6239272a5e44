// Turn loop - drives the model and the tool registry for one user turn

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::brain::{
    Brain, ContentBlock, Message, MessageRequest, MessageResponse, RequestBuilder, Role,
    ToolDefinition, ToolResultContent,
};
use crate::tools::{ToolCallError, ToolRegistry, ToolValue};

use super::error::TurnError;

/// Completion side of the turn loop. Implemented by `Brain`; tests script
/// responses.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, request: MessageRequest) -> Result<MessageResponse, String>;
    fn model(&self) -> String;
    fn max_output_tokens(&self) -> u32;
}

#[async_trait]
impl CompletionBackend for Brain {
    async fn complete(&self, request: MessageRequest) -> Result<MessageResponse, String> {
        self.infer(request).await.map_err(|e| e.to_string())
    }

    fn model(&self) -> String {
        self.current_model()
    }

    fn max_output_tokens(&self) -> u32 {
        Brain::max_output_tokens(self)
    }
}

/// Tool side of the turn loop. Implemented by `ToolRegistry`.
#[async_trait]
pub trait ToolDispatch: Send + Sync {
    fn tool_schemas(&self) -> Vec<ToolDefinition>;
    async fn dispatch(
        &self,
        tool_id: &str,
        args: &Value,
        conversation_id: &str,
    ) -> Result<ToolValue, ToolCallError>;
}

#[async_trait]
impl ToolDispatch for ToolRegistry {
    fn tool_schemas(&self) -> Vec<ToolDefinition> {
        ToolRegistry::tool_schemas(self)
    }

    async fn dispatch(
        &self,
        tool_id: &str,
        args: &Value,
        conversation_id: &str,
    ) -> Result<ToolValue, ToolCallError> {
        self.call(tool_id, args, conversation_id).await
    }
}

struct ToolUse {
    id: String,
    name: String,
    input: Value,
}

/// Run one user turn: append the prompt, call the model, execute any
/// requested tools, and loop until the model answers in text.
///
/// Mixed text + tool-use assistant messages are kept whole; each round of
/// tool-uses produces exactly one tool-result message carrying one result
/// per tool-use, in the model's declared order. Every tool failure is fed
/// back as tool-result error content so the model can self-correct.
pub async fn run_turn<B: CompletionBackend + ?Sized, T: ToolDispatch + ?Sized>(
    backend: &B,
    tools: &T,
    history: &mut Vec<Message>,
    system: &str,
    conversation_id: &str,
    prompt: &str,
    max_iterations: u32,
) -> Result<String, TurnError> {
    history.push(Message::user_text(prompt));

    let tool_defs = tools.tool_schemas();
    let mut tool_rounds: u32 = 0;

    loop {
        let request = build_request(backend, system, history, &tool_defs)?;

        let response = backend
            .complete(request)
            .await
            .map_err(TurnError::Completion)?;

        let tool_uses = extract_tool_uses(&response);

        if tool_uses.is_empty() {
            let text = response.text();
            info!(
                conversation = %conversation_id,
                tool_rounds = tool_rounds,
                "turn completed"
            );
            history.push(Message {
                role: Role::Assistant,
                content: response.content,
            });
            return Ok(text);
        }

        tool_rounds += 1;
        if tool_rounds > max_iterations {
            warn!(
                conversation = %conversation_id,
                max_iterations = max_iterations,
                "tool loop iteration cap exceeded"
            );
            return Err(TurnError::ToolLoopLimit(max_iterations));
        }

        // Keep the assistant message whole, text parts included.
        history.push(Message {
            role: Role::Assistant,
            content: response.content.clone(),
        });

        let mut results = Vec::with_capacity(tool_uses.len());
        for tool_use in tool_uses {
            debug!(
                conversation = %conversation_id,
                tool = %tool_use.name,
                id = %tool_use.id,
                "dispatching tool call"
            );
            let outcome = tools
                .dispatch(&tool_use.name, &tool_use.input, conversation_id)
                .await;
            results.push(tool_result_block(tool_use.id, outcome));
        }

        history.push(Message {
            role: Role::User,
            content: results,
        });
    }
}

fn build_request<B: CompletionBackend + ?Sized>(
    backend: &B,
    system: &str,
    history: &[Message],
    tool_defs: &[ToolDefinition],
) -> Result<MessageRequest, TurnError> {
    let mut builder = RequestBuilder::new(backend.model())
        .system(system.to_string())
        .max_tokens(backend.max_output_tokens());

    for message in history {
        builder = match message.role {
            Role::User => builder.user_content(message.content.clone()),
            Role::Assistant => builder.assistant_content(message.content.clone()),
        };
    }

    if !tool_defs.is_empty() {
        builder = builder.tools(tool_defs.to_vec());
    }

    builder.build().map_err(TurnError::RequestBuild)
}

fn extract_tool_uses(response: &MessageResponse) -> Vec<ToolUse> {
    response
        .content
        .iter()
        .filter_map(|block| {
            if let ContentBlock::ToolUse { id, name, input } = block {
                Some(ToolUse {
                    id: id.clone(),
                    name: name.clone(),
                    input: input.clone(),
                })
            } else {
                None
            }
        })
        .collect()
}

fn tool_result_block(
    tool_use_id: String,
    outcome: Result<ToolValue, ToolCallError>,
) -> ContentBlock {
    match outcome {
        Ok(ToolValue::Image { media_type, data }) => ContentBlock::ToolResult {
            tool_use_id,
            content: ToolResultContent::image(media_type, data),
            is_error: Some(false),
        },
        Ok(value) => ContentBlock::ToolResult {
            tool_use_id,
            content: ToolResultContent::text(value.to_result_string()),
            is_error: Some(false),
        },
        Err(e) => ContentBlock::ToolResult {
            tool_use_id,
            content: ToolResultContent::text(format!("Error: {}", e)),
            is_error: Some(true),
        },
    }
}
