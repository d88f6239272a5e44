use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::sync::oneshot;

/// Message types for the packet framing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MsgType {
    /// Client → agent: enveloped prompt
    Request = 0x01,
    /// Agent → client: request acknowledged
    RequestAck = 0x02,
    /// Agent → client: enveloped response
    Response = 0x03,
}

impl MsgType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x01 => Some(Self::Request),
            0x02 => Some(Self::RequestAck),
            0x03 => Some(Self::Response),
            _ => None,
        }
    }
}

pub const RECIPIENT_AGENT: &str = "agent";
pub const RECIPIENT_USER_DEVICE: &str = "user_device";
pub const MSG_NEW_PROMPT: &str = "new_prompt";
pub const MSG_AGENT_RESPONSE: &str = "agent_response";

/// Message envelope carried in request and response packets.
///
/// Inbound messages are handled only when addressed to the agent with type
/// `new_prompt`; everything else is ignored. Outbound responses echo the
/// conversation id with the assistant's final text in `payload.prompt`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub recipient: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: PromptPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptPayload {
    pub conversation_id: String,
    pub prompt: String,
}

impl Envelope {
    pub fn new_prompt(conversation_id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            recipient: RECIPIENT_AGENT.to_string(),
            kind: MSG_NEW_PROMPT.to_string(),
            payload: PromptPayload {
                conversation_id: conversation_id.into(),
                prompt: prompt.into(),
            },
        }
    }

    pub fn agent_response(conversation_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            recipient: RECIPIENT_USER_DEVICE.to_string(),
            kind: MSG_AGENT_RESPONSE.to_string(),
            payload: PromptPayload {
                conversation_id: conversation_id.into(),
                prompt: text.into(),
            },
        }
    }

    /// True for messages the core must handle.
    pub fn is_inbound_prompt(&self) -> bool {
        self.recipient == RECIPIENT_AGENT && self.kind == MSG_NEW_PROMPT
    }
}

/// Prompt forwarded from the comm server to the conversation manager
#[derive(Debug)]
pub struct PromptRequest {
    pub conversation_id: String,
    pub prompt: String,
    /// Channel for the final response for this turn
    pub reply: oneshot::Sender<PromptResponse>,
    /// Client source address
    pub source_addr: SocketAddr,
}

/// Response sent from the conversation manager back to the comm server
#[derive(Debug)]
pub struct PromptResponse {
    pub conversation_id: String,
    pub text: String,
    pub is_error: bool,
}
