//! Configuration management for session channels.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/session-channel/config.toml`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("shell path does not exist: {0}")]
    InvalidShellPath(String),

    #[error("pty_provider_dir is not a directory: {0}")]
    InvalidPtyProviderDir(String),

    #[error("log level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Default interval between keepalive probes.
const DEFAULT_KEEPALIVE_SECS: u64 = 30;

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Logging configuration.
    pub logging: LoggingConfig,

    /// Session channel configuration.
    pub session: SessionConfig,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub level: String,
}

/// Session channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Shell used for `exec` and `shell` requests. Empty means `$SHELL` or `/bin/sh`.
    pub shell: String,

    /// Seconds between keepalive probes while a PTY command runs (0 disables).
    pub keepalive_interval_secs: u64,

    /// Location of the PTY backend, if it needs one.
    pub pty_provider_dir: Option<PathBuf>,

    /// Environment every session starts with.
    pub default_env: BTreeMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            shell: String::new(),
            keepalive_interval_secs: DEFAULT_KEEPALIVE_SECS,
            pty_provider_dir: None,
            default_env: BTreeMap::new(),
        }
    }
}

impl SessionConfig {
    /// The keepalive interval, or `None` when keepalive is disabled.
    pub fn keepalive_interval(&self) -> Option<Duration> {
        (self.keepalive_interval_secs > 0).then(|| Duration::from_secs(self.keepalive_interval_secs))
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("session-channel")
        .join("config.toml")
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - SESSION_CHANNEL_LOG_LEVEL: Override log level
    /// - SESSION_CHANNEL_SHELL: Override the shell
    /// - PTY_PROVIDER_DIR: Override the PTY backend location
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("SESSION_CHANNEL_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log level from environment: {}", level);
                self.logging.level = level;
            }
        }

        if let Ok(shell) = std::env::var("SESSION_CHANNEL_SHELL") {
            if !shell.is_empty() {
                tracing::info!("Overriding shell from environment: {}", shell);
                self.session.shell = shell;
            }
        }

        if let Ok(dir) = std::env::var("PTY_PROVIDER_DIR") {
            if !dir.is_empty() {
                tracing::info!("Overriding PTY provider location from environment: {}", dir);
                self.session.pty_provider_dir = Some(PathBuf::from(dir));
            }
        }
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let shell = &self.session.shell;
        if !shell.is_empty() {
            let shell_path = Path::new(shell);
            if shell_path.is_absolute() {
                if !shell_path.exists() {
                    return Err(ConfigError::InvalidShellPath(shell.clone()));
                }
            } else if which::which(shell).is_err() {
                return Err(ConfigError::InvalidShellPath(shell.clone()));
            }
        }

        if let Some(dir) = &self.session.pty_provider_dir {
            if !dir.is_dir() {
                return Err(ConfigError::InvalidPtyProviderDir(
                    dir.display().to_string(),
                ));
            }
        }

        let level = self.logging.level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.logging.level.clone()));
        }

        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load the configuration a handler should run with.
    ///
    /// Reads the file at `path` (defaults when missing), applies environment
    /// overrides, then validates the result.
    pub fn load_effective<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load the effective configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load_effective(default_config_path())
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

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}
