use std::sync::Arc;
use tern_autonomy::{ApprovalRequest, ApprovalResponse, Approver, ExecutionMode};
use tern_core::{Message, ToolCall, ToolExecutor};
use tracing::{debug, info, warn};

/// Tool message content when the user declines (or never answers) a call.
pub const DENIAL_MESSAGE: &str = "Tool execution cancelled by user.";

/// Characters allowed per token of output budget.
pub const CHARS_PER_TOKEN: usize = 4;

/// Turns one model-issued tool call into exactly one tool message.
pub struct ToolDispatcher {
    tools: Arc<dyn ToolExecutor>,
    mode: ExecutionMode,
    approver: Option<Arc<dyn Approver>>,
    limit_chars: usize,
}

impl ToolDispatcher {
    pub fn new(tools: Arc<dyn ToolExecutor>, mode: ExecutionMode, output_limit_tokens: usize) -> Self {
        Self {
            tools,
            mode,
            approver: None,
            limit_chars: output_limit_tokens.saturating_mul(CHARS_PER_TOKEN),
        }
    }

    /// Who is asked in manual mode. Without one, manual mode denies everything.
    pub fn with_approver(mut self, approver: Arc<dyn Approver>) -> Self {
        self.approver = Some(approver);
        self
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn executor(&self) -> &Arc<dyn ToolExecutor> {
        &self.tools
    }

    pub fn limit_chars(&self) -> usize {
        self.limit_chars
    }

    /// Resolve, gate, run and cap one call.
    ///
    /// Never fails: unknown tools, denials and tool errors all come back as
    /// the content of the returned tool message.
    pub async fn dispatch(&self, call: &ToolCall) -> Message {
        if !self.tools.has_tool(&call.tool_name) {
            warn!(tool = %call.tool_name, call_id = %call.id, "model requested an unknown tool");
            return Message::tool_result(call, format!("Error: Tool '{}' not found.", call.tool_name));
        }

        if self.mode.requires_approval() {
            let answer = match &self.approver {
                Some(approver) => {
                    let request = ApprovalRequest::for_tool(&call.tool_name, &call.arguments);
                    approver.approve(&request).await
                }
                None => ApprovalResponse::Denied,
            };
            if !answer.is_approved() {
                info!(tool = %call.tool_name, ?answer, "tool call not approved");
                return Message::tool_result(call, DENIAL_MESSAGE);
            }
        }

        debug!(tool = %call.tool_name, args = %call.arguments, "executing tool");
        let output = match self.tools.execute(call).await {
            Ok(output) => output,
            Err(e) => {
                warn!(tool = %call.tool_name, error = %e, "tool failed");
                format!("Error: {e}")
            }
        };

        Message::tool_result(call, truncate_output(&output, self.limit_chars))
    }
}

/// Cap `output` at `limit_chars` characters, noting the original length.
pub fn truncate_output(output: &str, limit_chars: usize) -> String {
    let total = output.chars().count();
    if total <= limit_chars {
        return output.to_string();
    }
    let kept: String = output.chars().take(limit_chars).collect();
    format!("{kept}\n... (Output truncated. Total length: {total} chars.)")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_output_untouched() {
        assert_eq!(truncate_output("hello", 10), "hello");
        assert_eq!(truncate_output("", 0), "");
    }

    #[test]
    fn test_truncation_counts_chars_not_bytes() {
        let out = truncate_output("ééééé", 3);
        assert!(out.starts_with("ééé\n"));
        assert!(out.ends_with("(Output truncated. Total length: 5 chars.)"));
    }
}
