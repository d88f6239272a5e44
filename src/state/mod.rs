// State module - durable tool-state persistence

pub mod error;
pub mod store;

pub use error::StateError;
pub use store::{StateBuckets, StateStore};

/// Name of the persisted state file under the runtime root.
pub const STATE_FILE_NAME: &str = "state.bin";
