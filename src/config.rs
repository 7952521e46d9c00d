//! Configuration management for Ratewarden.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use tracing::info;

use crate::error::{RatewardenError, Result};
use crate::ratelimit::{PresetsConfig, StoreConfig};

/// Prefix of environment variable overrides, e.g. `RATEWARDEN__SERVER__HTTP_ADDR`.
pub const ENV_PREFIX: &str = "RATEWARDEN";

/// Main configuration for the Ratewarden service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Named limiter quotas
    #[serde(default)]
    pub limiters: PresetsConfig,

    /// Bucket store bounds, shared by every limiter
    #[serde(default)]
    pub store: StoreConfig,
}

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP server address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

impl AppConfig {
    /// Load configuration from an optional file layered under environment
    /// variables prefixed with [`ENV_PREFIX`].
    ///
    /// The file format is picked from its extension (YAML, TOML or JSON).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config: AppConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: AppConfig = serde_yaml::from_str(yaml)
            .map_err(|e| RatewardenError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check every limiter quota and the store bounds.
    pub fn validate(&self) -> Result<()> {
        self.limiters.validate()?;
        self.store.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::LimiterConfig;
    use std::time::Duration;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.server.http_addr, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(config.limiters, PresetsConfig::default());
        assert_eq!(config.store.max_buckets, 10_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_yaml() {
        let yaml = r#"
server:
  http_addr: 0.0.0.0:9000
limiters:
  chat:
    interval_ms: 30000
    limit: 5
store:
  max_buckets: 500
"#;
        let config = AppConfig::from_yaml(yaml).unwrap();

        assert_eq!(config.server.http_addr, "0.0.0.0:9000".parse().unwrap());
        assert_eq!(
            config.limiters.chat,
            LimiterConfig::new(Duration::from_secs(30), 5)
        );
        assert_eq!(config.limiters.api, LimiterConfig::new(Duration::from_secs(60), 60));
        assert_eq!(config.store.max_buckets, 500);
        assert_eq!(config.store.sweep_every, 1_000);
    }

    #[test]
    fn test_limit_only_override_keeps_preset_interval() {
        let config = AppConfig::from_yaml("limiters:\n  chat:\n    limit: 5\n").unwrap();

        assert_eq!(
            config.limiters.chat,
            LimiterConfig::new(Duration::from_secs(60), 5)
        );
        assert_eq!(config.limiters.strict, PresetsConfig::default().strict);
    }

    #[test]
    fn test_load_env_overrides_without_file() {
        std::env::set_var("RATEWARDEN__LIMITERS__API__LIMIT", "7");
        std::env::set_var("RATEWARDEN__STORE__MAX_BUCKETS", "250");

        let config = AppConfig::load(None);

        std::env::remove_var("RATEWARDEN__LIMITERS__API__LIMIT");
        std::env::remove_var("RATEWARDEN__STORE__MAX_BUCKETS");

        let config = config.unwrap();
        assert_eq!(config.limiters.api, LimiterConfig::new(Duration::from_secs(60), 7));
        assert_eq!(config.limiters.chat, PresetsConfig::default().chat);
        assert_eq!(config.store.max_buckets, 250);
        assert_eq!(config.store.sweep_every, 1_000);
    }

    #[test]
    fn test_invalid_yaml_rejected() {
        let yaml = r#"
limiters:
  strict:
    interval_ms: 0
    unique_token_per_interval: 10
"#;
        let result = AppConfig::from_yaml(yaml);
        assert!(matches!(result, Err(RatewardenError::Config(_))));

        let result = AppConfig::from_yaml("server: [not, a, map]");
        assert!(matches!(result, Err(RatewardenError::Config(_))));
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("ratewarden-{}.yaml", std::process::id()));
        std::fs::write(
            &path,
            "limiters:\n  strict:\n    interval_ms: 1000\n    unique_token_per_interval: 3\n",
        )
        .unwrap();

        let config = AppConfig::load(Some(&path));
        std::fs::remove_file(&path).unwrap();

        let config = config.unwrap();
        assert_eq!(
            config.limiters.strict,
            LimiterConfig::new(Duration::from_secs(1), 3)
        );
        assert_eq!(config.limiters.chat.unique_token_per_interval, 20);
    }

    #[test]
    fn test_load_missing_file_fails() {
        let path = std::env::temp_dir().join("ratewarden-does-not-exist.yaml");
        assert!(matches!(
            AppConfig::load(Some(&path)),
            Err(RatewardenError::Config(_))
        ));
    }
}
