//! # tern-llm
//!
//! The LLM client collaborator: one round trip in, one assistant reply and
//! optional usage telemetry out. Backends for Gemini and OpenRouter, a
//! retrying wrapper, and a mock for tests.

pub mod gemini;
pub mod mock;
pub mod openrouter;
pub mod provider;
pub mod retry;

pub use mock::MockProvider;
pub use provider::{LlmProvider, RoundTrip, SEARCH_TRIGGER, UsageSnapshot, search_trigger_tool};
pub use retry::{RetryPolicy, RetryingProvider};
