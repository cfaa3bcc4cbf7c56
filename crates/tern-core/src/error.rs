use thiserror::Error;

/// Unified error type for the Tern workspace.
#[derive(Error, Debug)]
pub enum TernError {
    // ── LLM errors ─────────────────────────────────────────────
    /// The request never produced an HTTP response (DNS, connect, timeout, reset).
    #[error("transport error: {0}")]
    Transport(String),

    /// The backend answered with a non-success status or an error object.
    #[error("provider error: HTTP {status}: {body}")]
    Provider { status: u16, body: String },

    #[error("llm rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// A 2xx answer that carried no usable candidate or choice.
    #[error("provider returned no usable response: {0}")]
    EmptyResponse(String),

    // ── Tool errors ────────────────────────────────────────────
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("tool execution failed: {tool}: {reason}")]
    ToolExecution { tool: String, reason: String },

    // ── Config errors ──────────────────────────────────────────
    #[error("config error: {0}")]
    Config(String),

    // ── Generic wrappers ───────────────────────────────────────
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl TernError {
    /// Shorthand for a tool argument or runtime failure.
    pub fn tool(tool: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ToolExecution {
            tool: tool.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, TernError>;
