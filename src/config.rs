//! Configuration management for Tollgate.
//!
//! Settings come from an optional YAML file overlaid with `TOLLGATE_*`
//! environment variables, nested keys separated by `__`
//! (e.g. `TOLLGATE_SERVER__LISTEN_ADDR=0.0.0.0:9000`).

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{Result, TollgateError};
use crate::ratelimit::{PolicySet, ResetUnits};

/// Main configuration for the Tollgate service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TollgateConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Key clients by the first `X-Forwarded-For` entry instead of the
    /// socket peer. Only safe behind a proxy that sets the header.
    #[serde(default)]
    pub trust_forwarded_for: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            trust_forwarded_for: false,
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Units for `resetTime` in headers and 429 bodies
    #[serde(default)]
    pub reset_units: ResetUnits,

    /// Idle bucket sweep interval in seconds, 0 disables sweeping
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Refill windows a bucket may sit idle before it is evicted
    #[serde(default = "default_idle_windows")]
    pub idle_windows: u32,

    /// Per-tier policies
    #[serde(default)]
    pub policies: PolicySet,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            reset_units: ResetUnits::default(),
            sweep_interval_secs: default_sweep_interval(),
            idle_windows: default_idle_windows(),
            policies: PolicySet::default(),
        }
    }
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_idle_windows() -> u32 {
    2
}

impl RateLimitingConfig {
    /// The sweep interval, or `None` when sweeping is disabled.
    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_secs > 0).then(|| Duration::from_secs(self.sweep_interval_secs))
    }
}

impl TollgateConfig {
    /// Load configuration from an optional YAML file and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Yaml)
                    .required(true),
            );
        }

        let config: TollgateConfig = builder
            .add_source(
                config::Environment::with_prefix("TOLLGATE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file path, ignoring the environment.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse and validate configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: TollgateConfig = serde_yaml::from_str(yaml)
            .map_err(|e| TollgateError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check settings the limiter itself does not guard against.
    pub fn validate(&self) -> Result<()> {
        if self.rate_limiting.idle_windows == 0 {
            return Err(TollgateError::Config(
                "idle_windows must be at least 1".to_string(),
            ));
        }
        self.rate_limiting.policies.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::Tier;

    #[test]
    fn test_defaults() {
        let config = TollgateConfig::default();
        assert_eq!(config.server.listen_addr, "127.0.0.1:8080".parse().unwrap());
        assert!(!config.server.trust_forwarded_for);
        assert_eq!(config.rate_limiting.reset_units, ResetUnits::Seconds);
        assert_eq!(config.rate_limiting.sweep_interval(), Some(Duration::from_secs(60)));
        assert_eq!(config.rate_limiting.idle_windows, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_yaml_overrides() {
        let yaml = r#"
server:
  listen_addr: 0.0.0.0:9000
  trust_forwarded_for: true
rate_limiting:
  reset_units: legacy
  sweep_interval_secs: 0
  policies:
    auth:
      capacity: 3
      window_secs: 300
"#;
        let config = TollgateConfig::from_yaml(yaml).unwrap();

        assert_eq!(config.server.listen_addr.port(), 9000);
        assert!(config.server.trust_forwarded_for);
        assert_eq!(config.rate_limiting.reset_units, ResetUnits::Legacy);
        assert_eq!(config.rate_limiting.sweep_interval(), None);
        assert_eq!(config.rate_limiting.policies.get(Tier::Auth).capacity, 3.0);
        assert_eq!(config.rate_limiting.policies.get(Tier::Write).capacity, 20.0);
    }

    #[test]
    fn test_from_yaml_rejects_invalid() {
        let yaml = r#"
rate_limiting:
  idle_windows: 0
"#;
        assert!(matches!(
            TollgateConfig::from_yaml(yaml),
            Err(TollgateError::Config(_))
        ));

        let yaml = r#"
rate_limiting:
  policies:
    general:
      capacity: 0
      window_secs: 900
"#;
        assert!(TollgateConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("tollgate-config-{}.yaml", std::process::id()));
        std::fs::write(
            &path,
            "rate_limiting:\n  idle_windows: 5\n  policies:\n    write:\n      capacity: 40\n      window_secs: 60\n",
        )
        .unwrap();

        let layered = TollgateConfig::load(Some(path.as_path())).unwrap();
        let plain = TollgateConfig::from_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        for config in [layered, plain] {
            assert_eq!(config.rate_limiting.idle_windows, 5);
            assert_eq!(config.rate_limiting.policies.write.capacity, 40.0);
            assert_eq!(config.rate_limiting.policies.auth.capacity, 5.0);
        }
    }

    #[test]
    fn test_load_missing_file_fails() {
        let path = std::env::temp_dir().join("tollgate-definitely-missing.yaml");
        assert!(TollgateConfig::load(Some(path.as_path())).is_err());
    }
}
