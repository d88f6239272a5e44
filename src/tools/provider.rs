// Tool provider contract
#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::Value;

use super::schema::Tool;

/// JSON object map used for provider state and normalized arguments.
pub type JsonMap = serde_json::Map<String, Value>;

/// Everything a provider declares at registration time.
pub struct Declaration {
    /// Tools this provider answers for. Ids must be process-unique.
    pub tools: Vec<Tool>,
    /// Initial global state, merged under the provider name only if absent.
    pub initial_global: JsonMap,
    /// Template deep-copied into each conversation's state slot on first use.
    pub conversation_template: JsonMap,
}

/// Result of a successful tool invocation.
///
/// Everything serializes to a string in the tool-result turn except `Image`,
/// which becomes an image content item so the model receives it as visual
/// input.
#[derive(Debug, Clone)]
pub enum ToolValue {
    Json(Value),
    Image { media_type: String, data: String },
}

impl ToolValue {
    pub fn json(value: Value) -> Self {
        ToolValue::Json(value)
    }

    /// Render the value the way it is fed back to the model.
    pub fn to_result_string(&self) -> String {
        match self {
            ToolValue::Json(Value::String(s)) => s.clone(),
            ToolValue::Json(value) => value.to_string(),
            ToolValue::Image { media_type, .. } => format!("[image: {}]", media_type),
        }
    }
}

/// A plugin declaring one or more tools plus their initial state.
///
/// Providers are process singletons. `invoke` may mutate both state maps in
/// place; the registry persists them afterwards. Per-conversation calls are
/// serialized by the conversation's lock; a provider that wants coherent
/// cross-conversation global state does its own internal locking.
#[async_trait]
pub trait ToolProvider: Send + Sync {
    /// Name keying this provider's slices in both state buckets.
    fn name(&self) -> &'static str;

    fn declare(&self) -> Declaration;

    async fn invoke(
        &self,
        tool_id: &str,
        args: JsonMap,
        conversation: &mut JsonMap,
        global: &mut JsonMap,
    ) -> Result<ToolValue, String>;
}
