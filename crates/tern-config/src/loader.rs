use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::schema::TernConfig;

/// Loads the Tern configuration from disk and the environment.
pub struct ConfigLoader {
    config: TernConfig,
    config_path: PathBuf,
    found: bool,
}

impl ConfigLoader {
    /// Resolve the config path: explicit path > TERN_CONFIG env > ~/.tern/tern.toml
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var("TERN_CONFIG") {
            return PathBuf::from(p);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".tern")
            .join("tern.toml")
    }

    /// Load the config from disk, falling back to defaults, with process
    /// environment overrides applied.
    ///
    /// Nothing is logged or validated here; call [`ConfigLoader::report`]
    /// and [`ConfigLoader::check`] once tracing is initialised.
    pub fn load(path: Option<&Path>) -> tern_core::Result<Self> {
        Self::load_with_env(path, |key| std::env::var(key).ok())
    }

    /// Like [`ConfigLoader::load`] but reads overrides through `env`.
    pub fn load_with_env(
        path: Option<&Path>,
        env: impl Fn(&str) -> Option<String>,
    ) -> tern_core::Result<Self> {
        let config_path = Self::resolve_path(path);
        let found = config_path.exists();
        let config = if found {
            let raw = std::fs::read_to_string(&config_path)?;
            toml::from_str::<TernConfig>(&raw).map_err(|e| {
                tern_core::TernError::Config(format!(
                    "failed to parse {}: {}",
                    config_path.display(),
                    e
                ))
            })?
        } else {
            TernConfig::default()
        };

        Ok(Self {
            config: Self::apply_env_overrides(config, env),
            config_path,
            found,
        })
    }

    /// Log where the configuration came from.
    pub fn report(&self) {
        if self.found {
            info!(config_path = ?self.config_path, "configuration loaded");
        } else {
            warn!(config_path = ?self.config_path, "config file not found, using defaults");
        }
    }

    /// Log warnings and turn error-level findings into `TernError::Config`.
    pub fn check(config: &TernConfig) -> tern_core::Result<()> {
        match config.validate() {
            Ok(warnings) => {
                for w in &warnings {
                    warn!("{}", w);
                }
                Ok(())
            }
            Err(e) => Err(tern_core::TernError::Config(e)),
        }
    }

    /// Snapshot of the loaded config.
    pub fn get(&self) -> TernConfig {
        self.config.clone()
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Whether a config file existed at [`ConfigLoader::path`].
    pub fn found(&self) -> bool {
        self.found
    }

    /// Apply env var overrides (TERN_PROVIDER, TERN_MODE, DEFAULT_MODEL, ...).
    fn apply_env_overrides(
        mut config: TernConfig,
        env: impl Fn(&str) -> Option<String>,
    ) -> TernConfig {
        if let Some(v) = env("TERN_PROVIDER") {
            config.agent.provider = v.to_lowercase();
        }
        if let Some(v) = env("TERN_MODE") {
            config.agent.mode = v.to_lowercase();
        }
        if let Some(v) = env("DEFAULT_MODEL") {
            config.agent.model = v;
        }
        if let Some(v) = env("TERN_LOG_LEVEL") {
            config.logging.level = v;
        }
        if let Some(v) = env("AGENT_WORK_DIR") {
            config.agent.work_dir = Some(PathBuf::from(v));
        }
        // API keys: the file wins, the environment fills gaps.
        if config.services.gemini_api_key.is_none() {
            config.services.gemini_api_key = env("GEMINI_API_KEY");
        }
        if config.services.openrouter_api_key.is_none() {
            config.services.openrouter_api_key = env("OPENROUTER_API_KEY");
        }
        config
    }
}
