use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration, maps to `tern.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TernConfig {
    pub agent: AgentConfig,
    pub llm: LlmConfig,
    pub tools: ToolsConfig,
    pub cache: CacheConfig,
    pub approval: ApprovalConfig,
    pub logging: LoggingConfig,
    pub services: ServicesConfig,
}

// ── Agent ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// LLM backend: "gemini" or "openrouter".
    pub provider: String,
    /// Model identifier as the backend expects it, e.g. "gemini-3-pro-preview"
    /// or "anthropic/claude-sonnet-4" on OpenRouter.
    pub model: String,
    /// "manual" asks before every tool call, "auto" runs them immediately.
    pub mode: String,
    /// Replaces the built-in system prompt.
    pub system_prompt: Option<String>,
    /// Round trips allowed in a single turn before it is stopped.
    pub max_round_trips: u32,
    /// Directory to switch into before the session starts.
    pub work_dir: Option<PathBuf>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            provider: "gemini".into(),
            model: "gemini-3-pro-preview".into(),
            mode: "manual".into(),
            system_prompt: None,
            max_round_trips: 100,
            work_dir: None,
        }
    }
}

// ── LLM client ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Attempts per round trip, including the first one.
    pub max_attempts: u32,
    /// Backoff base; attempt n waits `base_delay_ms * 2^n`.
    pub base_delay_ms: u64,
    pub request_timeout_secs: u64,
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            request_timeout_secs: 120,
            temperature: 0.0,
        }
    }
}

// ── Tools ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Token budget per tool result; the character ceiling is four times this.
    pub output_limit_tokens: usize,
    pub shell_timeout_secs: u64,
    pub read_file_max_lines: usize,
    /// Output (stdout and stderr together) a child process may write before
    /// it is killed.
    pub max_output_bytes: usize,
    /// Inside a git work tree, snapshot the whole tree for `/undo` instead
    /// of tracking only edited files.
    pub git_undo: bool,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            output_limit_tokens: 1000,
            shell_timeout_secs: 30,
            read_file_max_lines: 500,
            max_output_bytes: 1024 * 1024,
            git_undo: true,
        }
    }
}

// ── Cache ──────────────────────────────────────────────────────

/// Cache lifetimes used only by the cache-regression diagnostic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub gemini_ttl_minutes: f64,
    pub default_ttl_minutes: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            gemini_ttl_minutes: 60.0,
            default_ttl_minutes: 5.0,
        }
    }
}

impl CacheConfig {
    pub fn ttl_minutes_for(&self, provider: &str) -> f64 {
        if provider.eq_ignore_ascii_case("gemini") {
            self.gemini_ttl_minutes
        } else {
            self.default_ttl_minutes
        }
    }
}

// ── Approval ───────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalConfig {
    /// Seconds to wait for an answer before treating the call as denied.
    /// 0 waits indefinitely.
    pub timeout_secs: u64,
}

// ── Logging ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Output format: "pretty", "json", "compact".
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

// ── Services ───────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServicesConfig {
    pub gemini_api_key: Option<String>,
    pub openrouter_api_key: Option<String>,
}

// ── Validation ─────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub field: String,
    pub message: String,
    pub severity: WarningSeverity,
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningSeverity {
    Error,
    Warning,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self.severity {
            WarningSeverity::Error => "error",
            WarningSeverity::Warning => "warning",
        };
        write!(f, "{} {}: {}", label, self.field, self.message)?;
        if let Some(ref h) = self.hint {
            write!(f, " ({})", h)?;
        }
        Ok(())
    }
}

pub const PROVIDERS: [&str; 2] = ["gemini", "openrouter"];
pub const MODES: [&str; 2] = ["auto", "manual"];

impl TernConfig {
    /// API key for the configured provider, if any.
    pub fn api_key(&self) -> Option<&str> {
        match self.agent.provider.as_str() {
            "gemini" => self.services.gemini_api_key.as_deref(),
            "openrouter" => self.services.openrouter_api_key.as_deref(),
            _ => None,
        }
    }

    /// Copy with secrets masked, for display.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        let mask = |k: &mut Option<String>| {
            if k.is_some() {
                *k = Some("********".into());
            }
        };
        mask(&mut copy.services.gemini_api_key);
        mask(&mut copy.services.openrouter_api_key);
        copy
    }

    /// Validate the config and return a list of warnings.
    /// Returns `Err` with all messages joined if any severity is Error.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, String> {
        let mut warnings = Vec::new();

        if self.agent.model.trim().is_empty() {
            warnings.push(ConfigWarning {
                field: "agent.model".into(),
                message: "model is empty".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 'gemini-3-pro-preview'".into()),
            });
        }

        if !PROVIDERS.contains(&self.agent.provider.as_str()) {
            warnings.push(ConfigWarning {
                field: "agent.provider".into(),
                message: format!("unknown provider '{}'", self.agent.provider),
                severity: WarningSeverity::Error,
                hint: Some(format!("Valid values: {}", PROVIDERS.join(", "))),
            });
        }

        if !MODES.contains(&self.agent.mode.as_str()) {
            warnings.push(ConfigWarning {
                field: "agent.mode".into(),
                message: format!("unknown mode '{}'", self.agent.mode),
                severity: WarningSeverity::Error,
                hint: Some(format!("Valid values: {}", MODES.join(", "))),
            });
        }

        if self.agent.max_round_trips == 0 {
            warnings.push(ConfigWarning {
                field: "agent.max_round_trips".into(),
                message: "max_round_trips is 0, no request would ever be sent".into(),
                severity: WarningSeverity::Error,
                hint: None,
            });
        }

        if self.llm.max_attempts == 0 {
            warnings.push(ConfigWarning {
                field: "llm.max_attempts".into(),
                message: "max_attempts must be at least 1".into(),
                severity: WarningSeverity::Error,
                hint: None,
            });
        }

        if self.llm.temperature < 0.0 || self.llm.temperature > 2.0 {
            warnings.push(ConfigWarning {
                field: "llm.temperature".into(),
                message: format!("temperature {} is out of range", self.llm.temperature),
                severity: WarningSeverity::Error,
                hint: Some("Temperature must be between 0.0 and 2.0".into()),
            });
        }

        if self.tools.output_limit_tokens == 0 {
            warnings.push(ConfigWarning {
                field: "tools.output_limit_tokens".into(),
                message: "tool output limit is 0, every result would be cut to nothing".into(),
                severity: WarningSeverity::Error,
                hint: Some("Use e.g. 1000".into()),
            });
        }

        if self.tools.max_output_bytes == 0 {
            warnings.push(ConfigWarning {
                field: "tools.max_output_bytes".into(),
                message: "process output ceiling is 0, every command would be killed".into(),
                severity: WarningSeverity::Error,
                hint: Some("Use e.g. 1048576".into()),
            });
        }

        if self.api_key().is_none() && PROVIDERS.contains(&self.agent.provider.as_str()) {
            warnings.push(ConfigWarning {
                field: format!("services.{}_api_key", self.agent.provider),
                message: "no API key configured".into(),
                severity: WarningSeverity::Warning,
                hint: Some(format!(
                    "Set it in tern.toml or export {}_API_KEY",
                    self.agent.provider.to_uppercase()
                )),
            });
        }

        let valid_formats = ["pretty", "json", "compact"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.format".into(),
                message: format!("unknown log format '{}'", self.logging.format),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Valid values: {}", valid_formats.join(", "))),
            });
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.level".into(),
                message: format!("unknown log level '{}'", self.logging.level),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Valid values: {}", valid_levels.join(", "))),
            });
        }

        let errors: Vec<String> = warnings
            .iter()
            .filter(|w| w.severity == WarningSeverity::Error)
            .map(|w| format!("{}: {}", w.field, w.message))
            .collect();

        if !errors.is_empty() {
            return Err(format!("Configuration errors:\n  • {}", errors.join("\n  • ")));
        }

        Ok(warnings)
    }
}
