use std::path::Path;
use std::time::Duration;

use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

use crate::realtime::ReconnectPolicy;

/// Client configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub api: ApiConfig,
    pub realtime: RealtimeConfig,
    pub session: SessionConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL the REST API is served under.
    pub base_url: String,
    pub timeout_seconds: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api".to_string(),
            timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// WebSocket endpoint of the push broker.
    pub url: String,
    pub max_reconnect_attempts: u32,
    pub reconnect_delay_seconds: u64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8080/ws".to_string(),
            max_reconnect_attempts: 5,
            reconnect_delay_seconds: 5,
        }
    }
}

impl RealtimeConfig {
    #[must_use]
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::new(
            self.max_reconnect_attempts,
            Duration::from_secs(self.reconnect_delay_seconds),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Directory the persisted session file lives in.
    pub state_dir: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            state_dir: ".".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

impl ClientConfig {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // Override with environment variables. Sections nest with a
        // double underscore so multi-word fields stay intact:
        // ROADINFRA_API__BASE_URL -> api.base_url
        builder = builder.add_source(
            Environment::with_prefix("ROADINFRA")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.api.base_url, "http://localhost:8080/api");
        assert_eq!(config.realtime.max_reconnect_attempts, 5);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_env_override_reaches_nested_field() {
        std::env::set_var("ROADINFRA_API__BASE_URL", "https://ops.example/api");
        let config = ClientConfig::load(None).unwrap();
        std::env::remove_var("ROADINFRA_API__BASE_URL");

        assert_eq!(config.api.base_url, "https://ops.example/api");
        // Untouched sections keep their defaults.
        assert_eq!(config.realtime.url, "ws://localhost:8080/ws");
    }

    #[test]
    fn test_reconnect_policy_from_config() {
        let config = RealtimeConfig {
            max_reconnect_attempts: 2,
            reconnect_delay_seconds: 1,
            ..RealtimeConfig::default()
        };
        let policy = config.reconnect_policy();
        assert_eq!(policy.max_attempts, 2);
        assert_eq!(policy.delay, Duration::from_secs(1));
    }
}
