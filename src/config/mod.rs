//! Configuration management for cursord
//!
//! This module handles loading, parsing, and managing configuration from various sources:
//! - Configuration files (TOML format)
//! - Environment variables
//! - Command-line arguments
//!
//! Configuration precedence (highest to lowest):
//! 1. Command-line arguments
//! 2. Environment variables
//! 3. Configuration file
//! 4. Default values

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, Result};

/// Conventional single-message ceiling (16 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Cap on the bytes carried by one document sequence section.
pub const DEFAULT_MAX_DOC_SEQUENCE_SIZE: usize = 256 * 1024 * 1024;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Cursor and batch limits
    #[serde(default)]
    pub cursor: CursorConfig,

    /// Command surface settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Cursor registry and batch builder limits
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CursorConfig {
    /// Maximum size of one inline reply message
    #[serde(default = "default_max_message_size")]
    pub max_message_size_bytes: usize,

    /// Maximum bytes of documents in one document sequence section
    #[serde(default = "default_max_doc_sequence_size")]
    pub max_doc_sequence_bytes: usize,

    /// Document count ceiling used when a request carries no batch size
    #[serde(default = "default_batch_size")]
    pub default_batch_size: u32,

    /// Idle time in seconds after which the reaper kills a cursor
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// How often the reaper scans the registry, in seconds
    #[serde(default = "default_reaper_interval")]
    pub reaper_interval_secs: u64,

    /// Upper bound on simultaneously open cursors
    #[serde(default = "default_max_open_cursors")]
    pub max_open_cursors: usize,

    /// Number of lock shards in the cursor registry
    #[serde(default = "default_registry_shards")]
    pub registry_shards: usize,
}

/// Command surface configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// Honor `tempOptInToDocumentSequences` on getMore
    #[serde(default = "default_doc_sequences_enabled")]
    pub doc_sequences_enabled: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: LogLevel,

    /// Enable timestamps in logs
    #[serde(default = "default_log_timestamps")]
    pub timestamps: bool,
}

/// Log level options
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

// Default value functions
fn default_max_message_size() -> usize {
    DEFAULT_MAX_MESSAGE_SIZE
}

fn default_max_doc_sequence_size() -> usize {
    DEFAULT_MAX_DOC_SEQUENCE_SIZE
}

fn default_batch_size() -> u32 {
    101
}

fn default_idle_timeout() -> u64 {
    600
}

fn default_reaper_interval() -> u64 {
    60
}

fn default_max_open_cursors() -> usize {
    1_000_000
}

fn default_registry_shards() -> usize {
    16
}

fn default_doc_sequences_enabled() -> bool {
    true
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

fn default_log_timestamps() -> bool {
    true
}

impl Default for CursorConfig {
    fn default() -> Self {
        Self {
            max_message_size_bytes: default_max_message_size(),
            max_doc_sequence_bytes: default_max_doc_sequence_size(),
            default_batch_size: default_batch_size(),
            idle_timeout_secs: default_idle_timeout(),
            reaper_interval_secs: default_reaper_interval(),
            max_open_cursors: default_max_open_cursors(),
            registry_shards: default_registry_shards(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            doc_sequences_enabled: default_doc_sequences_enabled(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            timestamps: default_log_timestamps(),
        }
    }
}

impl Config {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a file
    ///
    /// # Arguments
    /// * `path` - Path to the configuration file (TOML format)
    ///
    /// # Returns
    /// * `Result<Config>` - Loaded configuration or error
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()).into());
        }

        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::InvalidFormat(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the optional file, then apply environment overrides
    ///
    /// A missing default file is not an error; an explicitly named one is.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_path = Self::default_path();
                if default_path.exists() {
                    Self::from_file(default_path)?
                } else {
                    Self::default()
                }
            }
        };

        config.apply_env(std::env::vars())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `CURSORD_*` overrides
    ///
    /// Example: `CURSORD_CURSOR_DEFAULT_BATCH_SIZE=500`
    pub fn apply_env<I>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(name) = key.strip_prefix("CURSORD_") else {
                continue;
            };

            match name {
                "CURSOR_MAX_MESSAGE_SIZE_BYTES" => {
                    self.cursor.max_message_size_bytes = parse_env(&key, &value)?
                }
                "CURSOR_MAX_DOC_SEQUENCE_BYTES" => {
                    self.cursor.max_doc_sequence_bytes = parse_env(&key, &value)?
                }
                "CURSOR_DEFAULT_BATCH_SIZE" => {
                    self.cursor.default_batch_size = parse_env(&key, &value)?
                }
                "CURSOR_IDLE_TIMEOUT_SECS" => {
                    self.cursor.idle_timeout_secs = parse_env(&key, &value)?
                }
                "CURSOR_MAX_OPEN_CURSORS" => {
                    self.cursor.max_open_cursors = parse_env(&key, &value)?
                }
                "SERVER_DOC_SEQUENCES_ENABLED" => {
                    self.server.doc_sequences_enabled = parse_env(&key, &value)?
                }
                "LOG_LEVEL" => {
                    self.logging.level = LogLevel::parse(&value).ok_or_else(|| {
                        ConfigError::InvalidValue {
                            field: key.clone(),
                            value: value.clone(),
                        }
                    })?
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    ///
    /// # Returns
    /// * `PathBuf` - Path to default configuration file
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("cursord")
            .join("config.toml")
    }

    /// Render the configuration as TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::InvalidFormat(e.to_string()).into())
    }

    /// Validate the configuration
    ///
    /// # Returns
    /// * `Result<()>` - Ok if valid, error otherwise
    pub fn validate(&self) -> Result<()> {
        let cursor = &self.cursor;
        let checks = [
            ("cursor.max_message_size_bytes", cursor.max_message_size_bytes == 0),
            ("cursor.default_batch_size", cursor.default_batch_size == 0),
            ("cursor.max_open_cursors", cursor.max_open_cursors == 0),
            ("cursor.registry_shards", cursor.registry_shards == 0),
            ("cursor.reaper_interval_secs", cursor.reaper_interval_secs == 0),
        ];
        if let Some((field, _)) = checks.iter().find(|(_, invalid)| *invalid) {
            return Err(ConfigError::InvalidValue {
                field: field.to_string(),
                value: "0".to_string(),
            }
            .into());
        }

        if cursor.max_doc_sequence_bytes < cursor.max_message_size_bytes {
            return Err(ConfigError::InvalidValue {
                field: "cursor.max_doc_sequence_bytes".to_string(),
                value: cursor.max_doc_sequence_bytes.to_string(),
            }
            .into());
        }

        Ok(())
    }

    /// Get cursor idle timeout as Duration
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.cursor.idle_timeout_secs)
    }

    /// Get reaper scan interval as Duration
    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.cursor.reaper_interval_secs)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        ConfigError::InvalidValue {
            field: key.to_string(),
            value: value.to_string(),
        }
        .into()
    })
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "error" => Some(LogLevel::Error),
            "warn" => Some(LogLevel::Warn),
            "info" => Some(LogLevel::Info),
            "debug" => Some(LogLevel::Debug),
            "trace" => Some(LogLevel::Trace),
            _ => None,
        }
    }
}
