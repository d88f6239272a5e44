// Agent module - conversation orchestration and the model-tool turn loop

pub mod config;
pub mod error;
pub mod manager;
pub mod turn;

pub use config::AgentConfig;
pub use error::TurnError;
pub use manager::{Conversation, ConversationManager};
pub use turn::{run_turn, CompletionBackend, ToolDispatch};
