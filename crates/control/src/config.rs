//! Configuration management for mirrorctl.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/mirrorctl/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use protocol::{ProtocolError, SessionOptions, DEFAULT_PORT};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),

    #[error("adb_path must not be empty")]
    EmptyAdbPath,

    #[error("server_path must not be empty")]
    EmptyServerPath,

    #[error("default_port must be greater than 0")]
    InvalidDefaultPort,

    #[error("probe_timeout_ms must be between 1 and 60000, got {0}")]
    InvalidProbeTimeout(u64),

    #[error("stop_grace_ms must be between 1 and 60000, got {0}")]
    InvalidStopGrace(u64),

    #[error("output_buffer_lines must be greater than 0, got {0}")]
    InvalidOutputBuffer(usize),

    #[error("invalid session defaults: {0}")]
    InvalidSessionDefaults(#[from] ProtocolError),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Upper bound for millisecond settings that are bounded.
const MAX_BOUNDED_MS: u64 = 60_000;

/// Main configuration structure for mirrorctl.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Logging configuration.
    pub logging: LoggingConfig,

    /// Transport (adb) configuration.
    pub transport: TransportConfig,

    /// Mirroring session configuration.
    pub session: SessionConfig,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Write logs to this file instead of stderr.
    pub log_file: Option<PathBuf>,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TransportConfig {
    /// Transport executable, as a path or a name looked up in `PATH`.
    pub adb_path: String,

    /// Port assumed for addresses given without one.
    pub default_port: u16,

    /// Reachability probe timeout in milliseconds.
    pub probe_timeout_ms: u64,

    /// Timeout for transport invocations in milliseconds (0 = no timeout).
    pub command_timeout_ms: u64,
}

/// Mirroring session configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Mirroring server executable, as a path or a name looked up in `PATH`.
    pub server_path: String,

    /// Arguments placed before the device selector.
    pub server_args: Vec<String>,

    /// Time between SIGTERM and a forced kill, in milliseconds.
    pub stop_grace_ms: u64,

    /// Output lines buffered per subscriber.
    pub output_buffer_lines: usize,

    /// Options used when the caller leaves a field unset.
    pub defaults: SessionOptions,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_file: None,
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            adb_path: "adb".to_string(),
            default_port: DEFAULT_PORT,
            probe_timeout_ms: 5000,
            command_timeout_ms: 30_000,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            server_path: "scrcpy".to_string(),
            server_args: Vec::new(),
            stop_grace_ms: 3000,
            output_buffer_lines: 1024,
            defaults: SessionOptions::default(),
        }
    }
}

impl TransportConfig {
    /// Returns the reachability probe timeout.
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Returns the transport invocation timeout, if any.
    pub fn command_timeout(&self) -> Option<Duration> {
        (self.command_timeout_ms > 0).then(|| Duration::from_millis(self.command_timeout_ms))
    }
}

impl SessionConfig {
    /// Returns the stop grace period.
    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mirrorctl")
        .join("config.toml")
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - MIRRORCTL_ADB_PATH: Override the transport executable
    /// - MIRRORCTL_SERVER_PATH: Override the mirroring server executable
    /// - MIRRORCTL_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    pub fn apply_env_overrides(&mut self) {
        if let Some(path) = non_empty_env("MIRRORCTL_ADB_PATH") {
            tracing::info!(adb_path = %path, "Overriding adb_path from environment");
            self.transport.adb_path = path;
        }

        if let Some(path) = non_empty_env("MIRRORCTL_SERVER_PATH") {
            tracing::info!(server_path = %path, "Overriding server_path from environment");
            self.session.server_path = path;
        }

        if let Some(level) = non_empty_env("MIRRORCTL_LOG_LEVEL") {
            tracing::info!(log_level = %level, "Overriding log_level from environment");
            self.logging.log_level = level;
        }
    }

    /// Validate the configuration values.
    ///
    /// Returns an error if any configuration value is outside the valid range.
    /// Executable paths are only checked for being non-empty; resolution
    /// happens when the controller is built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let level = self.logging.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.logging.log_level.clone()));
        }

        if self.transport.adb_path.trim().is_empty() {
            return Err(ConfigError::EmptyAdbPath);
        }

        if self.transport.default_port == 0 {
            return Err(ConfigError::InvalidDefaultPort);
        }

        let probe = self.transport.probe_timeout_ms;
        if !(1..=MAX_BOUNDED_MS).contains(&probe) {
            return Err(ConfigError::InvalidProbeTimeout(probe));
        }

        if self.session.server_path.trim().is_empty() {
            return Err(ConfigError::EmptyServerPath);
        }

        let grace = self.session.stop_grace_ms;
        if !(1..=MAX_BOUNDED_MS).contains(&grace) {
            return Err(ConfigError::InvalidStopGrace(grace));
        }

        if self.session.output_buffer_lines == 0 {
            return Err(ConfigError::InvalidOutputBuffer(0));
        }

        self.session.defaults.validate()?;

        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// If the file exists but is invalid TOML, returns an error with
    /// a helpful message.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!(path = %path.display(), "Configuration saved");
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}
