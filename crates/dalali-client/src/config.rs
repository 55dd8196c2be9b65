//! Client configuration.
//!
//! Loaded from TOML. Every field has a default so an empty file is a valid
//! configuration pointing at a local development backend.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Prefix for every REST path, e.g. `http://localhost:5000`.
    pub api_base_url: String,
    /// Realtime endpoint, e.g. `ws://localhost:5000/ws`.
    pub socket_url: String,
    /// Where the credential is persisted. `None` keeps it in memory only.
    pub credential_path: Option<PathBuf>,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub reconnect: ReconnectConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:5000".to_string(),
            socket_url: "ws://localhost:5000/ws".to_string(),
            credential_path: None,
            connect_timeout_secs: 10,
            request_timeout_secs: 30,
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.socket_url.starts_with("ws://") && !self.socket_url.starts_with("wss://") {
            return Err(ConfigError::Invalid(format!(
                "socket_url must be a ws:// or wss:// URL, got {}",
                self.socket_url
            )));
        }
        if self.reconnect.base_delay_ms == 0 {
            return Err(ConfigError::Invalid("reconnect.base_delay_ms must be positive".into()));
        }
        if self.reconnect.max_delay_ms < self.reconnect.base_delay_ms {
            return Err(ConfigError::Invalid(
                "reconnect.max_delay_ms must not be below base_delay_ms".into(),
            ));
        }
        Ok(())
    }
}

/// Backoff policy for the realtime connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 10_000,
            max_attempts: 5,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = ClientConfig::from_toml_str("").unwrap();
        assert_eq!(config.reconnect, ReconnectConfig::default());
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
        assert!(config.credential_path.is_none());
    }

    #[test]
    fn partial_reconnect_table() {
        let config = ClientConfig::from_toml_str(
            r#"
            api_base_url = "https://dalali.example"
            socket_url = "wss://dalali.example/ws"

            [reconnect]
            max_attempts = 8
            "#,
        )
        .unwrap();
        assert_eq!(config.api_base_url, "https://dalali.example");
        assert_eq!(config.reconnect.max_attempts, 8);
        assert_eq!(config.reconnect.base_delay_ms, 1_000);
    }

    #[test]
    fn rejects_http_socket_url() {
        let err = ClientConfig::from_toml_str(r#"socket_url = "http://x""#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_inverted_delays() {
        let err = ClientConfig::from_toml_str(
            "[reconnect]\nbase_delay_ms = 5000\nmax_delay_ms = 100\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
