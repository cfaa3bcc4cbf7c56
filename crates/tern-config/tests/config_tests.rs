#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;
    use tern_config::ConfigLoader;
    use tern_config::schema::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    // ── Default tests ──────────────────────────────────────────

    #[test]
    fn test_agent_defaults() {
        let config = TernConfig::default();
        assert_eq!(config.agent.provider, "gemini");
        assert_eq!(config.agent.model, "gemini-3-pro-preview");
        assert_eq!(config.agent.mode, "manual");
        assert_eq!(config.agent.max_round_trips, 100);
    }

    #[test]
    fn test_tool_and_llm_defaults() {
        let config = TernConfig::default();
        assert_eq!(config.tools.output_limit_tokens, 1000);
        assert_eq!(config.tools.shell_timeout_secs, 30);
        assert_eq!(config.tools.read_file_max_lines, 500);
        assert_eq!(config.tools.max_output_bytes, 1024 * 1024);
        assert!(config.tools.git_undo);
        assert_eq!(config.llm.max_attempts, 3);
        assert_eq!(config.llm.base_delay_ms, 1000);
        assert_eq!(config.approval.timeout_secs, 0);
    }

    #[test]
    fn test_cache_ttl_by_provider() {
        let cache = CacheConfig::default();
        assert_eq!(cache.ttl_minutes_for("gemini"), 60.0);
        assert_eq!(cache.ttl_minutes_for("openrouter"), 5.0);
    }

    // ── TOML tests ─────────────────────────────────────────────

    #[test]
    fn test_config_toml_roundtrip() {
        let config = TernConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let restored: TernConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(restored.agent.model, config.agent.model);
        assert_eq!(restored.tools.output_limit_tokens, config.tools.output_limit_tokens);
    }

    #[test]
    fn test_partial_toml_applies_defaults() {
        let toml_str = r#"
[agent]
provider = "openrouter"
model = "anthropic/claude-sonnet-4"

[tools]
output_limit_tokens = 250
"#;
        let config: TernConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.agent.provider, "openrouter");
        assert_eq!(config.tools.output_limit_tokens, 250);
        assert_eq!(config.agent.mode, "manual");
        assert_eq!(config.tools.shell_timeout_secs, 30);
        assert_eq!(config.logging.format, "pretty");
    }

    // ── Validation tests ───────────────────────────────────────

    #[test]
    fn test_default_config_validates() {
        let warnings = TernConfig::default().validate().unwrap();
        // Only the missing API key is reported.
        assert!(warnings.iter().all(|w| w.severity == WarningSeverity::Warning));
        assert!(warnings.iter().any(|w| w.field == "services.gemini_api_key"));
    }

    #[test]
    fn test_unknown_provider_is_error() {
        let mut config = TernConfig::default();
        config.agent.provider = "anthropic".into();
        let err = config.validate().unwrap_err();
        assert!(err.contains("agent.provider"));
    }

    #[test]
    fn test_unknown_mode_and_zero_limit_are_errors() {
        let mut config = TernConfig::default();
        config.agent.mode = "yolo".into();
        config.tools.output_limit_tokens = 0;
        let err = config.validate().unwrap_err();
        assert!(err.contains("agent.mode"));
        assert!(err.contains("tools.output_limit_tokens"));
    }

    #[test]
    fn test_bad_log_format_is_warning() {
        let mut config = TernConfig::default();
        config.services.gemini_api_key = Some("k".into());
        config.logging.format = "xml".into();
        let warnings = config.validate().unwrap();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].field, "logging.format");
    }

    #[test]
    fn test_redacted_masks_keys() {
        let mut config = TernConfig::default();
        config.services.openrouter_api_key = Some("sk-or-secret".into());
        let shown = config.redacted();
        assert_eq!(shown.services.openrouter_api_key.as_deref(), Some("********"));
        assert!(shown.services.gemini_api_key.is_none());
    }

    // ── Loader tests ───────────────────────────────────────────

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let loader = ConfigLoader::load_with_env(Some(&path), no_env).unwrap();
        assert_eq!(loader.get().agent.provider, "gemini");
        assert_eq!(loader.path(), path.as_path());
        assert!(!loader.found());
    }

    #[test]
    fn test_load_rejects_invalid_toml() {
        let file = write_config("[agent\nmodel = ");
        let result = ConfigLoader::load_with_env(Some(file.path()), no_env);
        assert!(matches!(result, Err(tern_core::TernError::Config(_))));
    }

    #[test]
    fn test_invalid_values_fail_the_check_not_the_load() {
        let file = write_config("[agent]\nmode = \"sometimes\"\n");
        let loader = ConfigLoader::load_with_env(Some(file.path()), no_env).unwrap();
        assert!(loader.found());
        let mut config = loader.get();
        assert!(matches!(
            ConfigLoader::check(&config),
            Err(tern_core::TernError::Config(ref m)) if m.contains("agent.mode")
        ));

        // A later override repairs the value before the one real check.
        config.agent.mode = "auto".into();
        assert!(ConfigLoader::check(&config).is_ok());
    }

    #[test]
    fn test_bad_env_mode_is_loaded_for_later_override() {
        let dir = tempfile::tempdir().unwrap();
        let loader = ConfigLoader::load_with_env(Some(&dir.path().join("none.toml")), |k| {
            (k == "TERN_MODE").then(|| "bogus".to_string())
        })
        .unwrap();
        assert_eq!(loader.get().agent.mode, "bogus");
    }

    #[test]
    fn test_zero_output_ceiling_is_error() {
        let mut config = TernConfig::default();
        config.tools.max_output_bytes = 0;
        assert!(config.validate().unwrap_err().contains("tools.max_output_bytes"));
    }

    #[test]
    fn test_env_overrides() {
        let file = write_config(
            "[agent]\nmodel = \"from-file\"\n[services]\ngemini_api_key = \"file-key\"\n",
        );
        let env: HashMap<&str, &str> = HashMap::from([
            ("TERN_MODE", "AUTO"),
            ("DEFAULT_MODEL", "gemini-2.5-flash"),
            ("GEMINI_API_KEY", "env-key"),
            ("OPENROUTER_API_KEY", "or-key"),
            ("AGENT_WORK_DIR", "/tmp/work"),
        ]);
        let loader = ConfigLoader::load_with_env(Some(file.path()), |k| {
            env.get(k).map(|v| v.to_string())
        })
        .unwrap();
        let config = loader.get();
        assert_eq!(config.agent.mode, "auto");
        assert_eq!(config.agent.model, "gemini-2.5-flash");
        // File keys take priority over the environment.
        assert_eq!(config.services.gemini_api_key.as_deref(), Some("file-key"));
        assert_eq!(config.services.openrouter_api_key.as_deref(), Some("or-key"));
        assert_eq!(
            config.agent.work_dir.as_deref(),
            Some(std::path::Path::new("/tmp/work"))
        );
    }
}
