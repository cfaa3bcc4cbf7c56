use clap::{Parser, Subcommand};
use std::path::PathBuf;

use tern_config::{ConfigLoader, TernConfig};
use tern_core::TernError;

mod chat;

/// Tern — an LLM agent loop for your terminal
#[derive(Parser)]
#[command(name = "tern", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to tern.toml config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Execution mode: "manual" asks before every tool call, "auto" does not
    #[arg(long, global = true, value_parser = ["auto", "manual"])]
    mode: Option<String>,

    /// LLM backend
    #[arg(long, global = true, value_parser = ["gemini", "openrouter"])]
    provider: Option<String>,

    /// Model identifier (overrides [agent].model)
    #[arg(long, global = true, env = "DEFAULT_MODEL")]
    model: Option<String>,

    /// Prompt to run before reading from the terminal
    #[arg(short = 'p', long, global = true)]
    initial_prompt: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Log level override (e.g. debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive agent session in the terminal (default)
    Chat,
    /// Show the effective configuration
    Config {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

impl Cli {
    pub async fn run(self) -> tern_core::Result<()> {
        // Load config first so we can use it for log format
        let config_loader = ConfigLoader::load(self.config.as_deref())?;
        let mut config = config_loader.get();
        self.apply_overrides(&mut config);

        // Resolve log level: RUST_LOG > --debug > --log-level > config
        let log_level = if self.debug {
            "debug".to_string()
        } else {
            self.log_level
                .clone()
                .unwrap_or_else(|| config.logging.level.clone())
        };
        init_tracing(&log_level, &config.logging.format);

        // Validate once, after every override, with a subscriber in place.
        config_loader.report();
        ConfigLoader::check(&config)?;

        match self.command {
            None | Some(Commands::Chat) => chat::cmd_chat(config, self.initial_prompt).await,
            Some(Commands::Config { json }) => Self::cmd_config(&config, json),
        }
    }

    /// Command-line flags win over file and environment.
    fn apply_overrides(&self, config: &mut TernConfig) {
        if let Some(provider) = &self.provider {
            config.agent.provider = provider.clone();
        }
        if let Some(mode) = &self.mode {
            config.agent.mode = mode.clone();
        }
        if let Some(model) = &self.model {
            config.agent.model = model.clone();
        }
    }

    fn cmd_config(config: &TernConfig, json: bool) -> tern_core::Result<()> {
        let shown = config.redacted();
        if json {
            println!("{}", serde_json::to_string_pretty(&shown)?);
        } else {
            println!(
                "{}",
                toml::to_string_pretty(&shown).map_err(|e| TernError::Config(e.to_string()))?
            );
        }
        Ok(())
    }
}

fn init_tracing(log_level: &str, format: &str) {
    let filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level))
    };

    // Logs go to stderr so they never interleave with answers on stdout.
    match format {
        "json" => tracing_subscriber::fmt()
            .with_env_filter(filter())
            .with_writer(std::io::stderr)
            .json()
            .with_target(true)
            .init(),
        "compact" => tracing_subscriber::fmt()
            .with_env_filter(filter())
            .with_writer(std::io::stderr)
            .compact()
            .with_target(false)
            .init(),
        _ => tracing_subscriber::fmt()
            .with_env_filter(filter())
            .with_writer(std::io::stderr)
            .with_target(false)
            .init(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_defaults_to_chat() {
        let cli = Cli::try_parse_from(["tern"]).unwrap();
        assert!(cli.command.is_none());
        assert!(!cli.debug);
    }

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::try_parse_from([
            "tern",
            "--mode",
            "auto",
            "--provider",
            "openrouter",
            "--model",
            "anthropic/claude-sonnet-4",
        ])
        .unwrap();
        let mut config = TernConfig::default();
        cli.apply_overrides(&mut config);
        assert_eq!(config.agent.mode, "auto");
        assert_eq!(config.agent.provider, "openrouter");
        assert_eq!(config.agent.model, "anthropic/claude-sonnet-4");
    }

    #[test]
    fn test_mode_flag_repairs_bad_env_mode() {
        let dir = tempfile::tempdir().unwrap();
        let loader = ConfigLoader::load_with_env(Some(&dir.path().join("tern.toml")), |k| {
            (k == "TERN_MODE").then(|| "bogus".to_string())
        })
        .unwrap();
        let mut config = loader.get();
        assert!(ConfigLoader::check(&config).is_err());

        let cli = Cli::try_parse_from(["tern", "--mode", "auto"]).unwrap();
        cli.apply_overrides(&mut config);
        assert!(ConfigLoader::check(&config).is_ok());
    }

    #[derive(Clone, Default)]
    struct Sink(std::sync::Arc<parking_lot::Mutex<Vec<u8>>>);

    impl std::io::Write for Sink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_missing_config_is_reported_to_the_subscriber() {
        let dir = tempfile::tempdir().unwrap();
        let loader =
            ConfigLoader::load_with_env(Some(&dir.path().join("tern.toml")), |_| None).unwrap();

        let sink = Sink::default();
        let writer = sink.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        tracing::subscriber::with_default(subscriber, || loader.report());

        let logged = String::from_utf8(sink.0.lock().clone()).unwrap();
        assert!(logged.contains("config file not found, using defaults"));
    }

    #[test]
    fn test_rejects_unknown_mode() {
        assert!(Cli::try_parse_from(["tern", "--mode", "yolo"]).is_err());
    }

    #[test]
    fn test_config_subcommand() {
        let cli = Cli::try_parse_from(["tern", "config", "--json"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Config { json: true })));
    }
}
