//! On-disk configuration (§10.3): a `ServerConfig` loaded from an explicit
//! `--config` path, falling back to the platform config directory, falling
//! back to hardcoded defaults.

use std::{net::SocketAddr, path::{Path, PathBuf}};

use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("couldn't read config file {path}: {source}")]
    Io { path: PathBuf, #[source] source: std::io::Error },

    #[error("couldn't parse config file {path}: {source}")]
    Parse { path: PathBuf, #[source] source: toml::de::Error },

    #[error("invalid bind address {0:?}")]
    InvalidBindAddr(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub max_message_size: u32,
    pub max_data_frame_size: u16,
    pub poll_budget: usize,
    pub socket_buf_size: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:9273".to_string(),
            max_message_size: controller_net_core::MAX_MESSAGE_SIZE,
            max_data_frame_size: controller_net_core::MAX_DATA_FRAME_MESSAGE_SIZE,
            poll_budget: 32,
            socket_buf_size: None,
        }
    }
}

impl ServerConfig {
    /// `explicit_path` wins outright. Otherwise tries
    /// `$XDG_CONFIG_HOME/controller-net/config.toml` (or the platform
    /// equivalent) if it exists, and falls back to defaults if neither is
    /// present.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit_path {
            return Self::from_file(path);
        }
        if let Some(dirs) = directories::BaseDirs::new() {
            let path = dirs.config_dir().join("controller-net").join("config.toml");
            if path.exists() {
                return Self::from_file(&path);
            }
        }
        Ok(Self::default())
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.bind_addr.parse().map_err(|_| ConfigError::InvalidBindAddr(self.bind_addr.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_a_valid_bind_addr() {
        assert!(ServerConfig::default().bind_addr().is_ok());
    }

    #[test]
    fn invalid_bind_addr_string_is_rejected() {
        let config = ServerConfig { bind_addr: "not an address".to_string(), ..ServerConfig::default() };
        assert!(matches!(config.bind_addr(), Err(ConfigError::InvalidBindAddr(_))));
    }

    #[test]
    fn parses_a_minimal_toml_document() {
        let config: ServerConfig = toml::from_str("bind_addr = \"127.0.0.1:9000\"\n").unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:9000");
        assert_eq!(config.poll_budget, ServerConfig::default().poll_budget);
    }
}
