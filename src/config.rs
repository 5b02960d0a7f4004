//! CodeAct Configuration
//!
//! Loads the agent's configuration from environment variables, merging unset
//! fields with defaults. A `.env` file is honored by the binary entry point
//! before this module runs.

use std::env;
use std::str::FromStr;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level: {}", other)),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub kernel_timeout_secs: u64,
    pub background_grace_ms: u64,
    pub log_level: LogLevel,
}

/// Returns an `AgentConfig` with every field at its default. The API key has
/// no sensible default and is left empty for the caller to fill in.
pub fn default_config() -> AgentConfig {
    AgentConfig {
        api_url: "https://api.anthropic.com/v1".to_string(),
        api_key: String::new(),
        model: "claude-4-sonnet-20250514".to_string(),
        temperature: 0.0,
        max_tokens: 8096,
        kernel_timeout_secs: 30,
        background_grace_ms: 2000,
        log_level: LogLevel::Info,
    }
}

/// Environment variable holding the completion API key. Required.
pub const API_KEY_VAR: &str = "CODEACT_API_KEY";

/// Load the agent config from the environment.
///
/// A missing API key is a fatal configuration error; everything else falls
/// back to defaults, and unparsable values fall back too.
pub fn load_config() -> Result<AgentConfig> {
    let Ok(api_key) = env::var(API_KEY_VAR) else {
        bail!(
            "{} not found in environment variables. \
             Set your API key in a .env file or environment variable.",
            API_KEY_VAR
        );
    };
    if api_key.is_empty() {
        bail!("{} is set but empty", API_KEY_VAR);
    }

    let defaults = default_config();
    Ok(AgentConfig {
        api_url: env::var("CODEACT_API_URL").unwrap_or(defaults.api_url),
        api_key,
        model: env::var("CODEACT_MODEL").unwrap_or(defaults.model),
        temperature: env_or("CODEACT_TEMPERATURE", defaults.temperature),
        max_tokens: env_or("CODEACT_MAX_TOKENS", defaults.max_tokens),
        kernel_timeout_secs: env_or("CODEACT_KERNEL_TIMEOUT_SECS", defaults.kernel_timeout_secs),
        background_grace_ms: env_or("CODEACT_BACKGROUND_GRACE_MS", defaults.background_grace_ms),
        log_level: env_or("CODEACT_LOG_LEVEL", defaults.log_level),
    })
}

/// Read and parse an environment variable, falling back to `default` when the
/// variable is unset or does not parse.
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = default_config();
        assert_eq!(config.api_url, "https://api.anthropic.com/v1");
        assert_eq!(config.model, "claude-4-sonnet-20250514");
        assert_eq!(config.temperature, 0.0);
        assert_eq!(config.max_tokens, 8096);
        assert_eq!(config.kernel_timeout_secs, 30);
        assert_eq!(config.background_grace_ms, 2000);
        assert_eq!(config.log_level, LogLevel::Info);
        assert!(config.api_key.is_empty());
    }

    #[test]
    fn test_env_or_falls_back_on_unset() {
        let value: u32 = env_or("CODEACT_TEST_UNSET_VARIABLE", 42);
        assert_eq!(value, 42);
    }

    #[test]
    fn test_env_or_falls_back_on_unparsable() {
        env::set_var("CODEACT_TEST_BAD_NUMBER", "not-a-number");
        let value: u64 = env_or("CODEACT_TEST_BAD_NUMBER", 7);
        assert_eq!(value, 7);
        env::remove_var("CODEACT_TEST_BAD_NUMBER");
    }

    #[test]
    fn test_log_level_parses() {
        assert_eq!("debug".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert_eq!("WARN".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!("loud".parse::<LogLevel>().is_err());
    }
}
