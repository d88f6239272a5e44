// Data types for Brain module - aligned with the completion service messages API

use serde::{Deserialize, Serialize};

/// Message role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Assistant,
}

/// A single message in the conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

#[allow(dead_code)]
impl Message {
    pub fn user_text(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::Text {
                text: content.into(),
            }],
        }
    }

    pub fn assistant_text(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: vec![ContentBlock::Text {
                text: content.into(),
            }],
        }
    }
}

/// Content block types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Text content from model or user
    Text {
        #[serde(default)]
        text: String,
    },

    /// Tool use request from model
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },

    /// Tool result from user
    ToolResult {
        tool_use_id: String,
        content: ToolResultContent,
        #[serde(default)]
        is_error: Option<bool>,
    },

    /// Thinking content (reasoning)
    Thinking {
        #[serde(default)]
        thinking: String,
    },

    /// Redacted thinking content
    RedactedThinking,

    /// Unknown content block
    #[serde(other)]
    Other,
}

/// Body of a tool-result block: either a plain string or a list of typed
/// blocks (used for image results, which the model receives as visual
/// input).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolResultContent {
    Text(String),
    Blocks(Vec<ToolResultBlock>),
}

impl ToolResultContent {
    pub fn text(content: impl Into<String>) -> Self {
        ToolResultContent::Text(content.into())
    }

    pub fn image(media_type: impl Into<String>, data: impl Into<String>) -> Self {
        ToolResultContent::Blocks(vec![ToolResultBlock::Image {
            source: ImageSource::base64(media_type, data),
        }])
    }

    /// Text rendering, for logs and history summaries.
    pub fn as_text(&self) -> String {
        match self {
            ToolResultContent::Text(s) => s.clone(),
            ToolResultContent::Blocks(blocks) => blocks
                .iter()
                .map(|b| match b {
                    ToolResultBlock::Text { text } => text.clone(),
                    ToolResultBlock::Image { source } => {
                        format!("[image: {}]", source.media_type)
                    }
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// One block inside a structured tool result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolResultBlock {
    Text { text: String },
    Image { source: ImageSource },
}

/// Base64 image payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageSource {
    #[serde(rename = "type")]
    pub kind: String,
    pub media_type: String,
    pub data: String,
}

impl ImageSource {
    pub fn base64(media_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            kind: "base64".to_string(),
            media_type: media_type.into(),
            data: data.into(),
        }
    }
}

/// Stop reason from the completion service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    StopSequence,
}

/// Token usage statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u32,
    #[serde(default)]
    pub output_tokens: u32,
}

/// Tool definition in the wire shape the completion service expects
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    #[serde(rename = "input_schema")]
    pub input_schema: serde_json::Value,
}

/// Complete request to the completion service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRequest {
    pub model: String,
    #[serde(default)]
    pub system: Option<String>,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub tools: Option<Vec<ToolDefinition>>,
    #[serde(rename = "max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default, rename = "stop_sequences")]
    pub stop_sequences: Option<Vec<String>>,
}

/// Response from the completion service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub id: String,
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    pub model: String,
    #[serde(default)]
    pub role: Role,
    #[serde(rename = "stop_reason", default)]
    pub stop_reason: Option<StopReason>,
    #[serde(default)]
    pub stop_sequence: Option<String>,
    #[serde(default)]
    pub usage: Option<Usage>,
    /// Additional fields from the backend
    #[serde(flatten)]
    pub extra: std::collections::HashMap<String, serde_json::Value>,
}

impl MessageResponse {
    /// Concatenated text content.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| {
                if let ContentBlock::Text { text } = block {
                    Some(text.clone())
                } else {
                    None
                }
            })
            .collect::<Vec<_>>()
            .join("")
    }

    /// True when the response carries at least one tool-use item.
    pub fn has_tool_use(&self) -> bool {
        self.content
            .iter()
            .any(|block| matches!(block, ContentBlock::ToolUse { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_result_text_serializes_as_string() {
        let block = ContentBlock::ToolResult {
            tool_use_id: "tu_1".to_string(),
            content: ToolResultContent::text("42"),
            is_error: Some(false),
        };
        let value = serde_json::to_value(&block).unwrap();
        assert_eq!(value["type"], "tool_result");
        assert_eq!(value["content"], "42");
    }

    #[test]
    fn test_tool_result_image_serializes_as_blocks() {
        let block = ContentBlock::ToolResult {
            tool_use_id: "tu_1".to_string(),
            content: ToolResultContent::image("image/png", "aGk="),
            is_error: None,
        };
        let value = serde_json::to_value(&block).unwrap();
        assert_eq!(value["content"][0]["type"], "image");
        assert_eq!(value["content"][0]["source"]["type"], "base64");
        assert_eq!(value["content"][0]["source"]["media_type"], "image/png");
    }

    #[test]
    fn test_response_round_trip_with_tool_use() {
        let raw = json!({
            "id": "msg_1",
            "model": "test-model",
            "role": "assistant",
            "stop_reason": "tool_use",
            "content": [
                {"type": "text", "text": "Let me check."},
                {"type": "tool_use", "id": "tu_1", "name": "bash", "input": {"command": "ls"}}
            ]
        });
        let response: MessageResponse = serde_json::from_value(raw).unwrap();
        assert!(response.has_tool_use());
        assert_eq!(response.text(), "Let me check.");
        assert_eq!(response.stop_reason, Some(StopReason::ToolUse));
    }

    #[test]
    fn test_unknown_content_block_tolerated() {
        let raw = json!({
            "id": "msg_1",
            "model": "test-model",
            "content": [{"type": "server_tool_use", "whatever": 1}]
        });
        let response: MessageResponse = serde_json::from_value(raw).unwrap();
        assert!(matches!(response.content[0], ContentBlock::Other));
    }
}
