use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::search::PollPolicy;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub unitrad: UnitradConfig,
    pub search: SearchConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct UnitradConfig {
    pub base_url: String,
    /// Opaque credential forwarded to the remote service. Overridden by
    /// the UNITRAD_API_KEY environment variable.
    pub api_key: String,
    pub region: String,
    /// Default output filter; empty means no filtering.
    pub library_system: String,
}

impl Default for UnitradConfig {
    fn default() -> Self {
        Self {
            base_url: "https://unitrad.calil.jp/v1".to_string(),
            api_key: String::new(),
            region: "gifu".to_string(),
            library_system: String::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SearchConfig {
    pub deadline_secs: u64,
    pub poll_initial_ms: u64,
    pub poll_max_ms: u64,
    pub retry_limit: u32,
    pub http_timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            deadline_secs: 25,
            poll_initial_ms: 100,
            poll_max_ms: 2000,
            retry_limit: 3,
            http_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path).context("Failed to read config file")?;

        let mut config: Config =
            toml::from_str(&content).context("Failed to parse config file")?;

        // Override with environment variable if set
        if let Ok(key) = std::env::var("UNITRAD_API_KEY") {
            config.unitrad.api_key = key;
        }

        Ok(config)
    }

    /// Load from file when present, defaults otherwise. MCP hosts launch the
    /// server from arbitrary working directories, so a missing file is not
    /// an error.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::from_file(path)
        } else {
            let mut config = Config::default();
            if let Ok(key) = std::env::var("UNITRAD_API_KEY") {
                config.unitrad.api_key = key;
            }
            Ok(config)
        }
    }
}

impl UnitradConfig {
    pub fn library_filter(&self) -> Option<String> {
        let system = self.library_system.trim();
        if system.is_empty() {
            None
        } else {
            Some(system.to_string())
        }
    }
}

impl SearchConfig {
    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            deadline: Duration::from_secs(self.deadline_secs),
            initial_backoff: Duration::from_millis(self.poll_initial_ms),
            max_backoff: Duration::from_millis(self.poll_max_ms),
            retry_limit: self.retry_limit,
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_parsing() {
        let toml_str = r#"
            [unitrad]
            base_url = "https://unitrad-osaka-1.calil.jp/v1"
            api_key = "test_key"
            region = "gifu"
            library_system = "nakatsugawa"

            [search]
            deadline_secs = 30
            poll_initial_ms = 50
            poll_max_ms = 1000
            retry_limit = 5
            http_timeout_secs = 8

            [logging]
            level = "debug"
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.unitrad.api_key, "test_key");
        assert_eq!(
            config.unitrad.library_filter().as_deref(),
            Some("nakatsugawa")
        );
        assert_eq!(config.search.retry_limit, 5);
        assert_eq!(config.logging.level, "debug");

        let policy = config.search.poll_policy();
        assert_eq!(policy.deadline, Duration::from_secs(30));
        assert_eq!(policy.initial_backoff, Duration::from_millis(50));
    }

    #[test]
    fn test_missing_sections_fall_back_to_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.unitrad.region, "gifu");
        assert_eq!(config.unitrad.library_filter(), None);
        assert_eq!(config.search.deadline_secs, 25);
        assert_eq!(config.logging.level, "info");
    }
}
