//! Configuration management for Honya.
//!
//! Handles loading, saving, and validating configuration from
//! platform-specific config directories. A few values can be overridden
//! from the environment after the file is read.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Application name used for config directory.
const APP_NAME: &str = "Honya";

/// Default config filename.
const CONFIG_FILENAME: &str = "config.toml";

/// Environment variable consulted when no proxy is configured.
pub const PROXY_ENV: &str = "HTTPS_PROXY";

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server settings.
    pub server: ServerConfig,

    /// Outbound network settings shared by all providers.
    pub network: NetworkConfig,

    /// Ingestion settings.
    pub ingest: IngestConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the server binds to.
    pub bind: String,

    /// Number of books per page of `/novel/list`.
    pub page_size: usize,

    /// `Cache-Control` max-age for rank responses, in seconds.
    pub rank_max_age_sec: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8081".to_string(),
            page_size: 10,
            rank_max_age_sec: 3600 * 2,
        }
    }
}

/// Outbound network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Proxy URL for all upstream requests. Falls back to `HTTPS_PROXY`.
    pub proxy: Option<String>,

    /// User agent sent to upstream sites.
    pub user_agent: String,

    /// Request timeout in seconds.
    pub timeout_sec: u64,

    /// Directory scanned for Netscape cookie files at startup.
    pub cookie_dir: Option<PathBuf>,

    /// Give every provider its own cookie jar instead of one shared jar.
    pub isolate_sessions: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
            timeout_sec: 30,
            cookie_dir: None,
            isolate_sessions: false,
        }
    }
}

impl NetworkConfig {
    /// Returns the proxy to use, preferring the config value over the environment.
    ///
    /// There is no built-in default: without either source, requests go direct.
    pub fn effective_proxy(&self) -> Option<String> {
        self.proxy
            .clone()
            .or_else(|| std::env::var(PROXY_ENV).ok())
            .filter(|p| !p.trim().is_empty())
    }
}

/// Ingestion configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Fetch from the provider when a requested book or episode is not stored yet.
    pub read_through: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self { read_through: true }
    }
}

impl Config {
    /// Returns the platform-specific config directory path.
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|p| p.join(APP_NAME))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Returns the full path to the config file.
    pub fn config_path() -> Result<PathBuf, ConfigError> {
        Ok(Self::config_dir()?.join(CONFIG_FILENAME))
    }

    /// Loads configuration from the default location.
    ///
    /// If the config file doesn't exist, creates a default one.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::config_path()?;
        Self::load_from(&path)
    }

    /// Loads configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            let config = Config::default();
            config.save_to(path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Saves configuration to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Parses the configured bind address.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.server
            .bind
            .parse()
            .map_err(|e: std::net::AddrParseError| ConfigError::InvalidValue {
                key: "server.bind".to_string(),
                message: e.to_string(),
            })
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.page_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "server.page_size".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }

        self.bind_addr()?;

        if let Some(proxy) = &self.network.proxy
            && url::Url::parse(proxy).is_err()
        {
            return Err(ConfigError::InvalidValue {
                key: "network.proxy".to_string(),
                message: format!("'{}' is not a URL", proxy),
            });
        }

        Ok(())
    }
}
