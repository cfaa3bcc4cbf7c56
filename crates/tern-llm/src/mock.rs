//! Mock LLM provider for deterministic testing.
//!
//! Returns pre-configured replies without making any HTTP calls.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::provider::*;
use tern_core::{Message, Result, TernError, Tool, ToolCall};

type RequestHook = Arc<dyn Fn(usize) + Send + Sync>;

/// A mock LLM provider that returns queued replies in order.
///
/// # Example
/// ```
/// use tern_llm::mock::MockProvider;
/// let provider = MockProvider::new("test")
///     .with_response("Hello, world!");
/// ```
pub struct MockProvider {
    responses: Arc<Mutex<VecDeque<MockResponse>>>,
    /// Snapshot of the log sent with every request (for assertions in tests).
    requests: Arc<Mutex<Vec<Vec<Message>>>>,
    /// Tool names offered with every request.
    tool_names: Arc<Mutex<Vec<Vec<String>>>>,
    hook: Option<RequestHook>,
    name: String,
    model: String,
}

/// A pre-configured reply from the mock provider.
#[derive(Clone)]
pub struct MockResponse {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub reasoning: Option<String>,
    pub usage: Option<UsageSnapshot>,
    /// If set, the provider fails with this error instead.
    pub error: Option<MockError>,
}

#[derive(Debug, Clone)]
pub enum MockError {
    Transport(String),
    Provider { status: u16, body: String },
}

impl From<MockError> for TernError {
    fn from(e: MockError) -> Self {
        match e {
            MockError::Transport(msg) => TernError::Transport(msg),
            MockError::Provider { status, body } => TernError::Provider { status, body },
        }
    }
}

impl Default for MockResponse {
    fn default() -> Self {
        Self {
            text: String::new(),
            tool_calls: vec![],
            reasoning: None,
            usage: Some(UsageSnapshot {
                prompt_tokens: 100,
                output_tokens: 50,
                cached_tokens: 0,
                cache_write_tokens: 0,
                cost_usd: 0.001,
            }),
            error: None,
        }
    }
}

impl MockResponse {
    /// Create a text reply.
    pub fn text(text: &str) -> Self {
        Self {
            text: text.to_string(),
            ..Default::default()
        }
    }

    /// A reply requesting the given calls, in order.
    pub fn tool_calls(calls: Vec<(&str, serde_json::Value)>) -> Self {
        Self {
            tool_calls: calls
                .into_iter()
                .map(|(name, args)| {
                    ToolCall::new(format!("call_{}", uuid::Uuid::new_v4().simple()), name, args)
                })
                .collect(),
            ..Default::default()
        }
    }

    /// Create an error reply.
    pub fn error(error: MockError) -> Self {
        Self {
            error: Some(error),
            ..Default::default()
        }
    }

    pub fn with_usage(mut self, usage: Option<UsageSnapshot>) -> Self {
        self.usage = usage;
        self
    }
}

impl MockProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::new())),
            requests: Arc::new(Mutex::new(vec![])),
            tool_names: Arc::new(Mutex::new(vec![])),
            hook: None,
            name: name.into(),
            model: "mock-model".into(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Queue a simple text reply.
    pub fn with_response(self, text: &str) -> Self {
        self.with_mock_response(MockResponse::text(text))
    }

    /// Queue a reply with one tool call.
    pub fn with_tool_call(self, name: &str, args: serde_json::Value) -> Self {
        self.with_mock_response(MockResponse::tool_calls(vec![(name, args)]))
    }

    /// Queue a provider rejection.
    pub fn with_error(self, status: u16, body: &str) -> Self {
        self.with_mock_response(MockResponse::error(MockError::Provider {
            status,
            body: body.to_string(),
        }))
    }

    /// Queue a transport failure.
    pub fn with_transport_error(self, msg: &str) -> Self {
        self.with_mock_response(MockResponse::error(MockError::Transport(msg.to_string())))
    }

    /// Queue a fully custom reply.
    pub fn with_mock_response(self, resp: MockResponse) -> Self {
        self.responses.lock().push_back(resp);
        self
    }

    /// Run `hook(request_index)` while each request is "in flight".
    pub fn on_request(mut self, hook: impl Fn(usize) + Send + Sync + 'static) -> Self {
        self.hook = Some(Arc::new(hook));
        self
    }

    /// Logs received so far, one entry per request.
    pub fn recorded_requests(&self) -> Arc<Mutex<Vec<Vec<Message>>>> {
        Arc::clone(&self.requests)
    }

    /// Names of the tools offered with each request.
    pub fn recorded_tool_names(&self) -> Vec<Vec<String>> {
        self.tool_names.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Pop the next queued reply, or a placeholder text when the queue is empty.
    fn next_response(&self) -> MockResponse {
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| MockResponse::text("(mock: no more queued responses)"))
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, log: &[Message], tools: &[Tool]) -> Result<RoundTrip> {
        self.tool_names
            .lock()
            .push(tools.iter().map(|t| t.name.clone()).collect());
        let index = {
            let mut requests = self.requests.lock();
            requests.push(log.to_vec());
            requests.len() - 1
        };
        if let Some(hook) = &self.hook {
            hook(index);
        }

        let mock = self.next_response();
        if let Some(error) = mock.error {
            return Err(error.into());
        }

        let mut reply = Message::assistant_with_calls(mock.text, mock.tool_calls);
        reply.reasoning = mock.reasoning;

        Ok(RoundTrip {
            reply,
            usage: mock.usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_text_response() {
        let provider = MockProvider::new("mock").with_response("Hello!");
        let rt = provider.complete(&[], &[]).await.unwrap();
        assert_eq!(rt.reply.text_content(), "Hello!");
        assert!(!rt.reply.has_tool_calls());
        assert!(rt.usage.is_some());
    }

    #[tokio::test]
    async fn test_mock_tool_call() {
        let provider =
            MockProvider::new("mock").with_tool_call("bash", serde_json::json!({"command": "ls"}));
        let rt = provider.complete(&[], &[]).await.unwrap();
        assert_eq!(rt.reply.tool_calls[0].tool_name, "bash");
        assert!(rt.reply.tool_calls[0].id.starts_with("call_"));
    }

    #[tokio::test]
    async fn test_mock_errors_keep_their_kind() {
        let provider = MockProvider::new("mock")
            .with_error(429, "rate limited")
            .with_transport_error("connection refused");
        let first = provider.complete(&[], &[]).await.unwrap_err();
        assert!(matches!(first, TernError::Provider { status: 429, .. }));
        let second = provider.complete(&[], &[]).await.unwrap_err();
        assert!(matches!(second, TernError::Transport(_)));
    }

    #[tokio::test]
    async fn test_mock_records_requests_and_runs_hook() {
        let seen = Arc::new(Mutex::new(vec![]));
        let seen_in_hook = Arc::clone(&seen);
        let provider = MockProvider::new("mock")
            .with_response("ok")
            .on_request(move |i| seen_in_hook.lock().push(i));

        let _ = provider.complete(&[Message::user("hello")], &[]).await;
        let _ = provider.complete(&[], &[]).await;

        let recorded = provider.recorded_requests();
        let recorded = recorded.lock();
        assert_eq!(recorded.len(), 2);
        assert_eq!(recorded[0][0].text_content(), "hello");
        assert_eq!(*seen.lock(), vec![0, 1]);
    }

    #[tokio::test]
    async fn test_mock_multiple_responses_in_order() {
        let provider = MockProvider::new("mock")
            .with_response("first")
            .with_response("second");

        let r1 = provider.complete(&[], &[]).await.unwrap();
        let r2 = provider.complete(&[], &[]).await.unwrap();
        let r3 = provider.complete(&[], &[]).await.unwrap();
        assert_eq!(r1.reply.text_content(), "first");
        assert_eq!(r2.reply.text_content(), "second");
        assert!(r3.reply.text_content().contains("no more queued"));
    }
}
