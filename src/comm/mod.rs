// Comm module - prompt channel adapter over UDP
// Inbound prompts and outbound agent responses travel as enveloped packets.

pub mod config;
pub mod error;
pub mod protocol;
pub mod server;
pub mod types;

pub use config::CommConfig;
pub use error::{CommError, CommInitError};
pub use server::Comm;
pub use types::{
    Envelope, MsgType, PromptPayload, PromptRequest, PromptResponse, MSG_AGENT_RESPONSE,
    MSG_NEW_PROMPT, RECIPIENT_AGENT, RECIPIENT_USER_DEVICE,
};
