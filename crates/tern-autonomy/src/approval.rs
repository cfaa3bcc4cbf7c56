use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::info;
use uuid::Uuid;

/// A request for human approval of one tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: Uuid,
    pub tool_name: String,
    pub tool_args: serde_json::Value,
    /// The yes/no question shown to the user.
    pub question: String,
    pub created_at: DateTime<Utc>,
}

impl ApprovalRequest {
    pub fn for_tool(tool_name: &str, tool_args: &serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            tool_name: tool_name.to_string(),
            tool_args: tool_args.clone(),
            question: format!("Execute tool '{tool_name}' with arguments {tool_args}?"),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalResponse {
    Approved,
    Denied,
    TimedOut,
}

impl ApprovalResponse {
    /// Only an explicit approval lets the call run.
    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approved)
    }
}

/// Something that can answer "may this tool call run?".
#[async_trait]
pub trait Approver: Send + Sync {
    async fn approve(&self, request: &ApprovalRequest) -> ApprovalResponse;
}

/// Receiving end handed to whoever renders approval prompts.
pub type ApprovalReceiver = mpsc::Receiver<(ApprovalRequest, oneshot::Sender<ApprovalResponse>)>;

/// Channel-backed approver. Requests go out over an mpsc channel with a
/// oneshot for the answer; the front end owns the receiver.
pub struct ApprovalGate {
    request_tx: mpsc::Sender<(ApprovalRequest, oneshot::Sender<ApprovalResponse>)>,
    request_rx: Option<ApprovalReceiver>,
    /// `None` waits indefinitely.
    timeout: Option<Duration>,
}

impl Default for ApprovalGate {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ApprovalGate {
    pub fn new(timeout: Option<Duration>) -> Self {
        let (tx, rx) = mpsc::channel(64);
        Self {
            request_tx: tx,
            request_rx: Some(rx),
            timeout,
        }
    }

    /// Build from a config value where 0 means "no timeout".
    pub fn with_timeout_secs(secs: u64) -> Self {
        Self::new((secs > 0).then(|| Duration::from_secs(secs)))
    }

    /// Take the receiver (used by the terminal to listen for requests).
    pub fn take_receiver(&mut self) -> Option<ApprovalReceiver> {
        self.request_rx.take()
    }
}

#[async_trait]
impl Approver for ApprovalGate {
    async fn approve(&self, request: &ApprovalRequest) -> ApprovalResponse {
        info!(
            request_id = %request.id,
            tool = %request.tool_name,
            "requesting human approval"
        );

        let (response_tx, response_rx) = oneshot::channel();

        if self
            .request_tx
            .send((request.clone(), response_tx))
            .await
            .is_err()
        {
            // No one listening
            return ApprovalResponse::Denied;
        }

        let answer = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, response_rx).await {
                Ok(answer) => answer,
                Err(_) => {
                    info!(request_id = %request.id, "approval request timed out");
                    return ApprovalResponse::TimedOut;
                }
            },
            None => response_rx.await,
        };

        // A dropped reply sender counts as a no.
        answer.unwrap_or(ApprovalResponse::Denied)
    }
}
