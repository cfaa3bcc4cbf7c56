use std::sync::Arc;
use std::time::Duration;
use tern_config::TernConfig;
use tern_core::{Result, TernError};
use tern_llm::gemini::GeminiProvider;
use tern_llm::openrouter::OpenRouterProvider;
use tern_llm::{LlmProvider, RetryPolicy, RetryingProvider};
use tracing::info;

/// Build the configured backend, wrapped in the retry policy from `[llm]`.
pub fn build_provider(config: &TernConfig) -> Result<Arc<dyn LlmProvider>> {
    let provider = config.agent.provider.as_str();
    let key = config.api_key().map(str::to_string).ok_or_else(|| {
        let var = match provider {
            "openrouter" => "OPENROUTER_API_KEY",
            _ => "GEMINI_API_KEY",
        };
        TernError::Config(format!(
            "no API key for provider '{provider}': set [services].{}_api_key in tern.toml or export {var}",
            provider
        ))
    })?;

    let timeout = Duration::from_secs(config.llm.request_timeout_secs);
    let model = config.agent.model.clone();
    let inner: Arc<dyn LlmProvider> = match provider {
        "gemini" => Arc::new(
            GeminiProvider::new(key, model, timeout)?.with_temperature(config.llm.temperature),
        ),
        "openrouter" => Arc::new(
            OpenRouterProvider::new(key, model, timeout)?.with_temperature(config.llm.temperature),
        ),
        other => return Err(TernError::Config(format!("unknown provider '{other}'"))),
    };

    let policy = RetryPolicy {
        max_attempts: config.llm.max_attempts,
        base_delay: Duration::from_millis(config.llm.base_delay_ms),
    };
    info!(
        provider = inner.name(),
        model = inner.model(),
        max_attempts = policy.max_attempts,
        "llm provider ready"
    );
    Ok(Arc::new(RetryingProvider::new(inner, policy)))
}
