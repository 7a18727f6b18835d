//! Daemon configuration.
//!
//! Precedence: CLI flags (and their env fallbacks) > `--config` TOML file > defaults.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use closer_core::config::CONFIG_FILE_NAME;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_PORT: u16 = 7800;
pub const DEFAULT_API_BASE: &str = "https://api.github.com";
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_DELIVERY_CACHE: usize = 1024;

#[derive(Debug, Error)]
pub enum DaemonConfigError {
    #[error("failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("invalid config file: {0}")]
    Invalid(#[from] toml::de::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Address to bind the webhook server to (default: 127.0.0.1).
    pub bind: IpAddr,
    /// Webhook server port (default: 7800).
    pub port: u16,
    /// GitHub REST API base URL.
    pub api_base: String,
    /// API token. Never serialized.
    #[serde(skip_serializing)]
    pub token: Option<String>,
    /// Repository config file name looked up under `.github/`.
    pub config_file: String,
    pub request_timeout_ms: u64,
    /// Recently seen delivery ids remembered for duplicate suppression; 0 disables.
    pub delivery_cache: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: DEFAULT_PORT,
            api_base: DEFAULT_API_BASE.to_string(),
            token: None,
            config_file: CONFIG_FILE_NAME.to_string(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            delivery_cache: DEFAULT_DELIVERY_CACHE,
        }
    }
}

impl DaemonConfig {
    /// Load a TOML config file, merging with defaults.
    pub fn from_file(path: &Path) -> Result<Self, DaemonConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_has_expected_values() {
        let config = DaemonConfig::default();
        assert_eq!(config.addr().to_string(), "127.0.0.1:7800");
        assert_eq!(config.api_base, "https://api.github.com");
        assert!(config.token.is_none());
        assert_eq!(config.config_file, "mistaken-pull-closer.yml");
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.delivery_cache, 1024);
    }

    #[test]
    fn file_values_override_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
bind = "0.0.0.0"
port = 9000
api_base = "https://ghe.example.com/api/v3"
delivery_cache = 0
"#
        )
        .unwrap();

        let config = DaemonConfig::from_file(file.path()).unwrap();
        assert_eq!(config.addr().to_string(), "0.0.0.0:9000");
        assert_eq!(config.api_base, "https://ghe.example.com/api/v3");
        assert_eq!(config.delivery_cache, 0);
        assert_eq!(config.config_file, CONFIG_FILE_NAME);
    }

    #[test]
    fn rejects_bad_types() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "port = \"eighty\"").unwrap();
        assert!(matches!(
            DaemonConfig::from_file(file.path()),
            Err(DaemonConfigError::Invalid(_))
        ));
    }

    #[test]
    fn token_is_never_serialized() {
        let config = DaemonConfig {
            token: Some("secret".to_string()),
            ..DaemonConfig::default()
        };
        let rendered = toml::to_string(&config).unwrap();
        assert!(!rendered.contains("secret"));
    }
}
