//! Server configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (CHORUS_*)
//! - TOML configuration file
//! - Command line arguments (see `main.rs`)

use anyhow::{Context, Result};
use chorus_core::HubConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Push transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Pull transport configuration.
    #[serde(default)]
    pub pull: PullConfig,

    /// Message log configuration.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Push transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for the WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,

    /// Undelivered messages a push subscriber may buffer before it is dropped.
    #[serde(default = "default_push_buffer")]
    pub push_buffer: usize,
}

/// Pull transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullConfig {
    /// How long a pull request waits for a message, in milliseconds.
    #[serde(default = "default_pull_wait")]
    pub wait_ms: u64,
}

/// Which message log backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// In-process log, lost on restart.
    Memory,
    /// JSON Lines file.
    File,
}

/// Message log configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Backend selection.
    #[serde(default = "default_backend")]
    pub backend: StorageBackend,

    /// Log file path, used by the file backend.
    #[serde(default = "default_storage_path")]
    pub path: String,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum message body length in bytes.
    #[serde(default = "default_max_body_length")]
    pub max_body_length: usize,

    /// Maximum WebSocket frame size in bytes.
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    std::env::var("CHORUS_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("CHORUS_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080)
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_push_buffer() -> usize {
    256
}

fn default_pull_wait() -> u64 {
    30_000 // 30 seconds
}

fn default_backend() -> StorageBackend {
    StorageBackend::Memory
}

fn default_storage_path() -> String {
    std::env::var("CHORUS_STORAGE_PATH").unwrap_or_else(|_| "chat_messages.jsonl".to_string())
}

fn default_max_body_length() -> usize {
    chorus_core::message::DEFAULT_MAX_BODY_LENGTH
}

fn default_max_frame_size() -> usize {
    128 * 1024 // 128 KB
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            pull: PullConfig::default(),
            storage: StorageConfig::default(),
            limits: LimitsConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
            push_buffer: default_push_buffer(),
        }
    }
}

impl Default for PullConfig {
    fn default() -> Self {
        Self {
            wait_ms: default_pull_wait(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: default_storage_path(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_body_length: default_max_body_length(),
            max_frame_size: default_max_frame_size(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from `path`, or from the first default location
    /// that exists, or fall back to defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::from_file(path);
        }

        let config_paths = [
            "chorus.toml",
            "/etc/chorus/chorus.toml",
            "~/.config/chorus/chorus.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }

    /// How long a pull request waits.
    #[must_use]
    pub fn pull_wait(&self) -> Duration {
        Duration::from_millis(self.pull.wait_ms)
    }

    /// Core settings derived from this configuration.
    #[must_use]
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            push_buffer: self.transport.push_buffer,
            max_body_length: self.limits.max_body_length,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.transport.websocket_path, "/ws");
        assert_eq!(config.pull_wait(), Duration::from_secs(30));
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.hub_config().push_buffer, 256);
    }

    #[test]
    fn test_config_bind_addr() {
        let mut config = Config::default();
        config.host = "127.0.0.1".into();
        config.port = 8080;
        assert_eq!(config.bind_addr().unwrap().port(), 8080);

        config.host = "not a host".into();
        assert!(config.bind_addr().is_err());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "0.0.0.0"
            port = 9000

            [pull]
            wait_ms = 5000

            [storage]
            backend = "file"
            path = "/var/lib/chorus/log.jsonl"

            [limits]
            max_body_length = 1024
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.pull_wait(), Duration::from_secs(5));
        assert_eq!(config.storage.backend, StorageBackend::File);
        assert_eq!(config.storage.path, "/var/lib/chorus/log.jsonl");
        assert_eq!(config.hub_config().max_body_length, 1024);
        assert_eq!(config.transport.push_buffer, 256);
    }

    #[test]
    fn test_config_rejects_unknown_backend() {
        let toml_str = r#"
            [storage]
            backend = "dynamo"
        "#;
        assert!(toml::from_str::<Config>(toml_str).is_err());
    }

    #[test]
    fn test_load_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chorus.toml");
        std::fs::write(&path, "port = 7000\n").unwrap();

        let config = Config::load(Some(path.as_path())).unwrap();
        assert_eq!(config.port, 7000);

        assert!(Config::load(Some(dir.path().join("missing.toml").as_path())).is_err());
    }
}
