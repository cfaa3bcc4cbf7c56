#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;
    use tern_core::{Message, TernError};
    use tern_llm::mock::MockProvider;
    use tern_llm::{LlmProvider, RetryPolicy, RetryingProvider};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
        }
    }

    fn wrap(mock: Arc<MockProvider>, attempts: u32) -> RetryingProvider {
        RetryingProvider::new(mock, fast_policy(attempts))
    }

    // ── Retry logic ────────────────────────────────────────────

    #[tokio::test]
    async fn test_retry_on_server_error() {
        let mock = Arc::new(
            MockProvider::new("retry_test")
                .with_error(503, "overloaded")
                .with_response("success after retry"),
        );
        let provider = wrap(Arc::clone(&mock), 3);

        let rt = provider.complete(&[Message::user("hi")], &[]).await.unwrap();
        assert_eq!(rt.reply.text_content(), "success after retry");
        assert_eq!(mock.request_count(), 2);
    }

    #[tokio::test]
    async fn test_retry_on_transport_error() {
        let mock = Arc::new(
            MockProvider::new("net")
                .with_transport_error("connection reset by peer")
                .with_response("ok"),
        );
        let provider = wrap(Arc::clone(&mock), 3);
        assert!(provider.complete(&[], &[]).await.is_ok());
        assert_eq!(mock.request_count(), 2);
    }

    #[tokio::test]
    async fn test_retry_on_corrupted_thought_signature() {
        let mock = Arc::new(
            MockProvider::new("gemini")
                .with_error(400, "Corrupted thought signature.")
                .with_response("recovered"),
        );
        let provider = wrap(Arc::clone(&mock), 3);
        let rt = provider.complete(&[], &[]).await.unwrap();
        assert_eq!(rt.reply.text_content(), "recovered");
    }

    #[tokio::test]
    async fn test_no_retry_on_terminal_error() {
        let mock = Arc::new(
            MockProvider::new("no_retry")
                .with_error(401, "invalid api key")
                .with_response("never reached"),
        );
        let provider = wrap(Arc::clone(&mock), 3);

        let err = provider.complete(&[], &[]).await.unwrap_err();
        assert!(matches!(err, TernError::Provider { status: 401, .. }));
        assert_eq!(mock.request_count(), 1);
    }

    #[tokio::test]
    async fn test_attempt_ceiling_surfaces_last_error() {
        let mock = Arc::new(
            MockProvider::new("down")
                .with_error(500, "first")
                .with_error(502, "second")
                .with_error(503, "third")
                .with_response("too late"),
        );
        let provider = wrap(Arc::clone(&mock), 3);

        let err = provider.complete(&[], &[]).await.unwrap_err();
        match err {
            TernError::Provider { status, body } => {
                assert_eq!(status, 503);
                assert_eq!(body, "third");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(mock.request_count(), 3);
    }

    #[tokio::test]
    async fn test_single_attempt_policy_never_retries() {
        let mock = Arc::new(MockProvider::new("once").with_error(500, "boom"));
        let provider = wrap(Arc::clone(&mock), 1);
        assert!(provider.complete(&[], &[]).await.is_err());
        assert_eq!(mock.request_count(), 1);
    }

    #[tokio::test]
    async fn test_wrapper_reports_inner_identity() {
        let mock = Arc::new(MockProvider::new("inner").with_model("m-1"));
        let provider = wrap(mock, 3);
        assert_eq!(provider.name(), "inner");
        assert_eq!(provider.model(), "m-1");
    }
}
