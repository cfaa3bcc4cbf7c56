use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tern_core::{Message, Result, Tool};

/// The outcome of one request/response exchange with a backend.
#[derive(Debug, Clone)]
pub struct RoundTrip {
    /// The assistant message, exactly as the model authored it.
    pub reply: Message,
    /// Telemetry, when the backend reported any.
    pub usage: Option<UsageSnapshot>,
}

/// Per round-trip token and cost telemetry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub prompt_tokens: u64,
    pub output_tokens: u64,
    /// Prompt tokens served from the provider cache.
    pub cached_tokens: u64,
    /// Prompt tokens written into the provider cache.
    pub cache_write_tokens: u64,
    pub cost_usd: f64,
}

/// Trait implemented by each LLM backend.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Human-readable name, e.g. "gemini", "openrouter".
    fn name(&self) -> &str;

    /// Model identifier requests are sent to.
    fn model(&self) -> &str;

    /// Send the full log and tool schemas, return the reply.
    ///
    /// Transport failures surface as `TernError::Transport`; rejected
    /// requests as `TernError::Provider` or `TernError::RateLimited`.
    async fn complete(&self, log: &[Message], tools: &[Tool]) -> Result<RoundTrip>;
}

/// Name of the pseudo-tool that asks a backend for a web-grounded answer.
///
/// Backends replace it with their own search feature; it is never sent as a
/// function declaration.
pub const SEARCH_TRIGGER: &str = "__google_search_trigger__";

/// The pseudo-tool to pass to [`LlmProvider::complete`] for a grounded search.
pub fn search_trigger_tool() -> Tool {
    Tool {
        name: SEARCH_TRIGGER.into(),
        description: "Trigger search".into(),
        parameters: serde_json::json!({ "type": "object", "properties": {} }),
    }
}

pub(crate) fn wants_search(tools: &[Tool]) -> bool {
    tools.iter().any(|t| t.name == SEARCH_TRIGGER)
}

/// Map a non-success HTTP answer to the matching error.
pub(crate) fn status_error(
    status: reqwest::StatusCode,
    retry_after: Option<u64>,
    body: String,
) -> tern_core::TernError {
    match (status.as_u16(), retry_after) {
        (429, Some(secs)) => tern_core::TernError::RateLimited {
            retry_after_secs: secs,
        },
        (code, _) => tern_core::TernError::Provider { status: code, body },
    }
}

/// Parse a `Retry-After` header given in seconds.
pub(crate) fn retry_after_secs(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
}

pub(crate) fn transport_error(e: reqwest::Error) -> tern_core::TernError {
    tern_core::TernError::Transport(e.to_string())
}
