use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::provider::{LlmProvider, RoundTrip};
use tern_core::{Message, Result, TernError, Tool};

/// Attempt ceiling and backoff base for one round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles on every further one.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// Backoff before retrying after the `attempt`-th failure (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Check if an error is transient and worth retrying.
pub fn is_retryable(err: &TernError) -> bool {
    match err {
        TernError::Transport(_) | TernError::RateLimited { .. } | TernError::EmptyResponse(_) => {
            true
        }
        TernError::Provider { status, body } => {
            *status == 429 || *status >= 500 || is_corrupted_thought_signature(body)
        }
        _ => false,
    }
}

/// Gemini occasionally rejects a replayed reasoning signature; a fresh
/// attempt with the same log usually goes through.
fn is_corrupted_thought_signature(body: &str) -> bool {
    let body = body.to_lowercase();
    body.contains("thought signature") || body.contains("thought_signature")
}

/// Extract retry-after hint from a RateLimited error.
fn retry_after_hint(err: &TernError) -> Option<Duration> {
    if let TernError::RateLimited { retry_after_secs } = err {
        Some(Duration::from_secs(*retry_after_secs))
    } else {
        None
    }
}

/// Wraps a backend with exponential backoff on transient errors.
///
/// Callers only ever see the final outcome: a reply, the first terminal
/// error, or the last transient error once attempts are exhausted.
#[derive(Clone)]
pub struct RetryingProvider {
    inner: Arc<dyn LlmProvider>,
    policy: RetryPolicy,
}

impl RetryingProvider {
    pub fn new(inner: Arc<dyn LlmProvider>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }
}

#[async_trait]
impl LlmProvider for RetryingProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }

    async fn complete(&self, log: &[Message], tools: &[Tool]) -> Result<RoundTrip> {
        let attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            match self.inner.complete(log, tools).await {
                Ok(rt) => return Ok(rt),
                Err(e) if is_retryable(&e) && attempt + 1 < attempts => {
                    let delay = retry_after_hint(&e).unwrap_or_else(|| self.policy.delay_for(attempt));
                    warn!(
                        provider = self.inner.name(),
                        attempt = attempt + 1,
                        max = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying after transient error"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(1), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(4000));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(is_retryable(&TernError::Transport("connection reset".into())));
        assert!(is_retryable(&TernError::Provider {
            status: 503,
            body: String::new()
        }));
        assert!(is_retryable(&TernError::Provider {
            status: 429,
            body: String::new()
        }));
        assert!(is_retryable(&TernError::Provider {
            status: 400,
            body: "Corrupted thought signature.".into()
        }));
        assert!(!is_retryable(&TernError::Provider {
            status: 400,
            body: "invalid argument".into()
        }));
        assert!(!is_retryable(&TernError::Provider {
            status: 401,
            body: "bad key".into()
        }));
        assert!(!is_retryable(&TernError::Config("x".into())));
    }
}
