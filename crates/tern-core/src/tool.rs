use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Description of a tool the model may call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    /// Unique name, e.g. "bash", "read_file".
    pub name: String,
    /// Human-readable description for the LLM.
    pub description: String,
    /// JSON Schema of the parameters object.
    pub parameters: Value,
}

/// A request from the LLM to call a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Opaque id, unique within a turn.
    pub id: String,
    pub tool_name: String,
    pub arguments: Value,
    /// Gemini thought signature; must be echoed back with the call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought_signature: Option<String>,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, tool_name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            tool_name: tool_name.into(),
            arguments,
            thought_signature: None,
        }
    }
}

/// Anything that can execute tool calls: the tool registry seen by the dispatcher.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Schemas of every tool this executor provides.
    fn tools(&self) -> Vec<Tool>;

    fn has_tool(&self, name: &str) -> bool {
        self.tools().iter().any(|t| t.name == name)
    }

    /// Run one call and return the text the model will see.
    ///
    /// `Err` is reserved for failures the executor could not express as
    /// output; the dispatcher folds it into the tool message either way.
    async fn execute(&self, call: &ToolCall) -> crate::Result<String>;
}
