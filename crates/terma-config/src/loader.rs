use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::schema::Config;

/// Location of the persisted configuration file.
pub fn config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".terma")
        .join("config.json")
}

/// Load the resolved configuration: `~/.terma/config.json` (auto-created
/// with defaults on first run) with `TERMA_*` environment overrides on top.
pub fn load() -> Config {
    let mut config = load_file(&config_path());
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    config
}

/// Read a config file, creating it with defaults when absent. An
/// unparseable file falls back to defaults with a warning.
pub fn load_file(path: &Path) -> Config {
    if path.exists() {
        match fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "invalid config file, using defaults");
                    Config::default()
                }
            },
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to read config file, using defaults");
                Config::default()
            }
        }
    } else {
        let config = Config::default();
        if let Err(e) = save(path, &config) {
            tracing::warn!(path = %path.display(), error = %e, "failed to write default config");
        }
        config
    }
}

/// Persist a configuration, creating parent directories as needed.
pub fn save(path: &Path, config: &Config) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create config dir: {}", parent.display()))?;
    }
    let content = serde_json::to_string_pretty(config)?;
    fs::write(path, content)
        .with_context(|| format!("failed to write config file: {}", path.display()))?;
    Ok(())
}

/// Apply `TERMA_<SECTION>_<KEY>` overrides. `TERMA_PORT` is the
/// process-level alias for `server.port` and wins over the dotted form.
pub fn apply_env_overrides<F>(config: &mut Config, get: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = get("TERMA_TERMINAL_DEFAULT_SHELL") {
        config.terminal.default_shell = v;
    }
    if let Some(v) = get("TERMA_TERMINAL_FONT_SIZE") {
        match v.parse() {
            Ok(n) => config.terminal.font_size = n,
            Err(_) => tracing::warn!(value = %v, "ignoring non-numeric TERMA_TERMINAL_FONT_SIZE"),
        }
    }
    if let Some(v) = get("TERMA_TERMINAL_THEME") {
        config.terminal.theme = v;
    }
    if let Some(v) = get("TERMA_SERVER_HOST") {
        config.server.host = v;
    }
    for key in ["TERMA_SERVER_PORT", "TERMA_PORT"] {
        if let Some(v) = get(key) {
            match v.parse() {
                Ok(n) => config.server.port = n,
                Err(_) => tracing::warn!(value = %v, key, "ignoring non-numeric port override"),
            }
        }
    }
    if let Some(v) = get("TERMA_LLM_PROVIDER") {
        config.llm.provider = v;
    }
    if let Some(v) = get("TERMA_LLM_MODEL") {
        config.llm.model = v;
    }
    if let Some(v) = get("TERMA_LLM_ADAPTER_URL") {
        config.llm.adapter_url = v;
    }
    if let Some(v) = get("TERMA_LLM_ADAPTER_WS_URL") {
        config.llm.adapter_ws_url = v;
    }
    if let Some(v) = get("TERMA_LLM_SYSTEM_PROMPT") {
        config.llm.system_prompt = v;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::DEFAULT_PORT;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.server.port, DEFAULT_PORT);
        assert_eq!(config.llm.provider, "claude");
        assert!(!config.terminal.default_shell.is_empty());
    }

    #[test]
    fn missing_file_is_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let config = load_file(&path);
        assert_eq!(config, Config::default());
        assert!(path.exists());

        // A second load round-trips the file contents.
        assert_eq!(load_file(&path), config);
    }

    #[test]
    fn invalid_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        assert_eq!(load_file(&path), Config::default());
    }

    #[test]
    fn file_values_survive_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = Config::default();
        config.server.port = 9999;
        config.llm.provider = "openai".to_string();
        save(&path, &config).unwrap();

        let loaded = load_file(&path);
        assert_eq!(loaded.server.port, 9999);
        assert_eq!(loaded.llm.provider, "openai");
    }

    #[test]
    fn env_overrides_file_values() {
        let mut config = Config::default();
        apply_env_overrides(&mut config, |key| match key {
            "TERMA_SERVER_PORT" => Some("9000".to_string()),
            "TERMA_LLM_MODEL" => Some("gpt-4".to_string()),
            "TERMA_TERMINAL_THEME" => Some("light".to_string()),
            _ => None,
        });

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.llm.model, "gpt-4");
        assert_eq!(config.terminal.theme, "light");
    }

    #[test]
    fn terma_port_alias_wins() {
        let mut config = Config::default();
        apply_env_overrides(&mut config, |key| match key {
            "TERMA_SERVER_PORT" => Some("9000".to_string()),
            "TERMA_PORT" => Some("9001".to_string()),
            _ => None,
        });
        assert_eq!(config.server.port, 9001);
    }

    #[test]
    fn bad_numeric_overrides_are_ignored() {
        let mut config = Config::default();
        apply_env_overrides(&mut config, |key| match key {
            "TERMA_SERVER_PORT" => Some("not-a-port".to_string()),
            "TERMA_TERMINAL_FONT_SIZE" => Some("huge".to_string()),
            _ => None,
        });
        assert_eq!(config.server.port, DEFAULT_PORT);
        assert_eq!(config.terminal.font_size, 14);
    }
}
