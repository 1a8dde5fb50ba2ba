//! Configuration module for Clipper.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::{ClipperError, Result};

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port number to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// How long to wait for the reaper to stop on shutdown.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_shutdown_timeout() -> u64 {
    10
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Root directory for media; mailboxes live under `{media_dir}/mailboxes`.
    #[serde(default = "default_media_dir")]
    pub media_dir: String,
    /// Path to the JSON user directory.
    #[serde(default = "default_contacts_file")]
    pub contacts_file: String,
    /// Maximum upload request size in megabytes.
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size_mb: u64,
}

fn default_media_dir() -> String {
    "media".to_string()
}

fn default_contacts_file() -> String {
    "contacts.json".to_string()
}

fn default_max_upload_size() -> u64 {
    100
}

impl StorageConfig {
    /// Maximum upload size in bytes.
    pub fn max_upload_bytes(&self) -> usize {
        (self.max_upload_size_mb as usize).saturating_mul(1024 * 1024)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            media_dir: default_media_dir(),
            contacts_file: default_contacts_file(),
            max_upload_size_mb: default_max_upload_size(),
        }
    }
}

/// Expiry reaper configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ReaperConfig {
    /// How long an entry survives after its first download.
    #[serde(default = "default_retention")]
    pub retention_secs: u64,
    /// Pause between two scans.
    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,
}

fn default_retention() -> u64 {
    600 // 10 minutes
}

fn default_scan_interval() -> u64 {
    120 // 2 minutes
}

impl ReaperConfig {
    /// Retention window as a [`Duration`].
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    /// Scan interval as a [`Duration`].
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            retention_secs: default_retention(),
            scan_interval_secs: default_scan_interval(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Path to the log file.
    #[serde(default = "default_log_file")]
    pub file: String,
    /// Also append log lines to `file`. Console output is always on.
    #[serde(default = "default_true")]
    pub to_file: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "logs/clipper.log".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
            to_file: true,
        }
    }
}

/// Web API configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebConfig {
    /// CORS allowed origins. Empty means any origin, without credentials.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Expiry reaper configuration.
    #[serde(default)]
    pub reaper: ReaperConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Web API configuration.
    #[serde(default)]
    pub web: WebConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(ClipperError::Io)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML file and apply environment variable overrides.
    pub fn load_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| ClipperError::Config(format!("config parse error: {e}")))
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported environment variables:
    /// - `CLIPPER_PORT`: listening port
    /// - `CLIPPER_CONTACTS_FILE`: path to the user directory
    /// - `CLIPPER_MEDIA_DIR`: media root directory
    /// - `CLIPPER_RETENTION_SECS`: retention window after first download
    ///
    /// Empty or unparseable values are ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Some(port) = env_value("CLIPPER_PORT").and_then(|v| v.parse().ok()) {
            self.server.port = port;
        }
        if let Some(contacts_file) = env_value("CLIPPER_CONTACTS_FILE") {
            self.storage.contacts_file = contacts_file;
        }
        if let Some(media_dir) = env_value("CLIPPER_MEDIA_DIR") {
            self.storage.media_dir = media_dir;
        }
        if let Some(secs) = env_value("CLIPPER_RETENTION_SECS").and_then(|v| v.parse().ok()) {
            self.reaper.retention_secs = secs;
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.reaper.retention_secs == 0 {
            return Err(ClipperError::Config(
                "reaper.retention_secs must be greater than zero".to_string(),
            ));
        }
        if self.reaper.scan_interval_secs == 0 {
            return Err(ClipperError::Config(
                "reaper.scan_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.storage.max_upload_size_mb == 0 {
            return Err(ClipperError::Config(
                "storage.max_upload_size_mb must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}
