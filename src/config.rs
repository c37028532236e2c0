//! Configuration handling for cfops
//!
//! Configuration is read from `cfops.toml`. The file is located by, in order:
//! the `--config` flag, the `CFOPS_CONFIG` environment variable, then the
//! platform config directory (`~/.config/cfops/cfops.toml` on Linux). A
//! missing default file means defaults; a missing explicit file is an error.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::logging::{LogFormat, LOG_ENV};
use crate::plugin::{CallerConfig, HANDSHAKE};

pub const CONFIG_ENV: &str = "CFOPS_CONFIG";
pub const PLUGIN_DIR_ENV: &str = "CFOPS_PLUGIN_DIR";
pub const CONFIG_FILE: &str = "cfops.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    #[error("Configuration file not found: {}", .0.display())]
    NotFound(PathBuf),
}

/// Plugin session settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginsConfig {
    /// Seconds allowed for handshake, dispense and each `plugin-meta` query
    pub handshake_timeout_secs: u64,

    /// Seconds allowed per backup/restore call (unbounded when unset)
    pub call_timeout_secs: Option<u64>,

    /// Show plugin stderr output
    pub forward_stderr: bool,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_secs: 10,
            call_timeout_secs: None,
            forward_stderr: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CfopsConfig {
    /// Directories searched for plugin executables, in order
    pub plugin_dirs: Vec<PathBuf>,

    pub plugins: PluginsConfig,

    pub logging: LoggingConfig,
}

impl Default for CfopsConfig {
    fn default() -> Self {
        Self {
            plugin_dirs: Self::default_plugin_dir().into_iter().collect(),
            plugins: PluginsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl CfopsConfig {
    /// Loads configuration and applies environment overrides
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match Self::resolve_path(explicit) {
            Some(path) => Self::load_file(&path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Returns the file to read, or `None` when defaults apply
    fn resolve_path(explicit: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(path.to_path_buf());
        }
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return Some(PathBuf::from(path));
        }
        Self::global_config_dir()
            .map(|dir| dir.join(CONFIG_FILE))
            .filter(|path| path.exists())
    }

    /// Reads and parses one configuration file
    pub fn load_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()).into());
        }
        debug!(path = %path.display(), "loading configuration");

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;

        toml::from_str(&content)
            .map_err(|e| ConfigError::Parse(e.to_string()))
            .with_context(|| format!("Failed to parse config: {}", path.display()))
    }

    /// Applies `CFOPS_PLUGIN_DIR` and `CFOPS_LOG`
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dirs) = lookup(PLUGIN_DIR_ENV) {
            let mut overridden: Vec<PathBuf> = std::env::split_paths(&dirs)
                .filter(|dir| !dir.as_os_str().is_empty())
                .collect();
            overridden.append(&mut self.plugin_dirs);
            self.plugin_dirs = overridden;
        }
        if let Some(level) = lookup(LOG_ENV) {
            self.logging.level = level;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.plugins.handshake_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "plugins.handshake_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.plugins.call_timeout_secs == Some(0) {
            return Err(ConfigError::Invalid(
                "plugins.call_timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Session settings for [`crate::plugin::PluginCaller`]
    pub fn caller_config(&self) -> CallerConfig {
        CallerConfig {
            handshake: HANDSHAKE,
            handshake_timeout: Duration::from_secs(self.plugins.handshake_timeout_secs),
            call_timeout: self.plugins.call_timeout_secs.map(Duration::from_secs),
            forward_stderr: self.plugins.forward_stderr,
        }
    }

    /// Bound on a `plugin-meta` query during discovery
    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_secs(self.plugins.handshake_timeout_secs)
    }

    /// Returns the global config directory
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("io", "cfops", "cfops").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Plugin directory used when none is configured
    pub fn default_plugin_dir() -> Option<PathBuf> {
        ProjectDirs::from("io", "cfops", "cfops").map(|dirs| dirs.data_dir().join("plugins"))
    }
}
