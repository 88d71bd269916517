//! Top-level runtime configuration: a TOML file with env-var overrides,
//! grounded on the teacher's `Config::load_or_default` (`src/config.rs`)
//! generalized with a second override pass — the teacher only ever read
//! `config.toml` with no environment layer.

use std::path::{Path, PathBuf};

use gridloom_domain::config::EngineConfig;
use serde::{Deserialize, Serialize};

fn default_session_store_path() -> PathBuf {
    PathBuf::from("./sessions")
}

fn default_log_filter() -> String {
    "gridloom=info".into()
}

/// Where a [`crate::builder::RuntimeBuilder`] should persist session
/// ledgers.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionBackend {
    #[default]
    Memory,
    Jsonl,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SessionConfig {
    #[serde(default)]
    pub backend: SessionBackend,
    #[serde(default = "default_session_store_path")]
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoggingConfig {
    #[serde(default = "default_log_filter")]
    pub filter: String,
    #[serde(default)]
    pub json: bool,
}

/// Top-level configuration for a `gridloom` process: per-agent engine
/// defaults, where sessions are persisted, and how logging is set up.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl RuntimeConfig {
    /// Load from a TOML file, falling back to defaults for missing keys
    /// and for a missing file entirely — mirrors the teacher's
    /// `load_or_default`.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(path).unwrap_or_default()
    }

    pub fn load(path: impl AsRef<Path>) -> gridloom_domain::error::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(gridloom_domain::error::Error::Io)?;
        let config: Self = toml::from_str(&content).map_err(|e| gridloom_domain::error::Error::Config(e.to_string()))?;
        Ok(config)
    }

    /// Apply `GRIDLOOM_*` environment overrides on top of whatever was
    /// loaded from file. Unlike the teacher (file-only), env vars here
    /// take precedence so a deployment can override a handful of knobs
    /// without forking the TOML.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var("GRIDLOOM_MAX_STEPS") {
            if let Ok(n) = v.parse() {
                self.engine.max_steps = n;
            }
        }
        if let Ok(v) = std::env::var("GRIDLOOM_SESSION_BACKEND") {
            self.session.backend = match v.to_ascii_lowercase().as_str() {
                "jsonl" => SessionBackend::Jsonl,
                _ => SessionBackend::Memory,
            };
        }
        if let Ok(v) = std::env::var("GRIDLOOM_SESSION_PATH") {
            self.session.path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("GRIDLOOM_LOG_FILTER") {
            self.logging.filter = v;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = RuntimeConfig::load_or_default("/nonexistent/gridloom.toml");
        assert_eq!(config.session.backend, SessionBackend::Memory);
        assert_eq!(config.engine.max_steps, EngineConfig::default().max_steps);
    }

    #[test]
    fn env_override_wins_over_file_default() {
        std::env::set_var("GRIDLOOM_MAX_STEPS", "7");
        let config = RuntimeConfig::default().with_env_overrides();
        std::env::remove_var("GRIDLOOM_MAX_STEPS");
        assert_eq!(config.engine.max_steps, 7);
    }
}
