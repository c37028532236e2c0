//! Backup/restore capability contract
//!
//! Every tile plugin implements [`BackupRestorer`]. The orchestrator talks to
//! the same trait through [`super::RemoteBackupRestorer`], which forwards each
//! call to the plugin process.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::error::Result;

/// Self-description of a plugin, emitted in metadata mode and on dispense
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginMeta {
    /// Unique, stable tile name (e.g., "ops-manager")
    pub name: String,

    /// Role of the tile in the platform (e.g., "backup-restore")
    #[serde(default)]
    pub role: String,

    /// Free-form descriptive properties
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, serde_json::Value>,
}

impl PluginMeta {
    pub fn new(name: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: role.into(),
            properties: BTreeMap::new(),
        }
    }

    /// Adds a descriptive property
    pub fn with_property(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// Tile-specific parameters handed to a plugin before backup or restore
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TileTarget {
    /// Directory the backup is written to or restored from
    pub destination: PathBuf,

    /// Control-plane host the tile lives on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// Opaque settings interpreted by the tile
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub settings: serde_json::Map<String, serde_json::Value>,
}

impl TileTarget {
    pub fn new(destination: impl Into<PathBuf>) -> Self {
        Self {
            destination: destination.into(),
            ..Self::default()
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn with_setting(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    /// Reads a setting as a string
    pub fn setting_str(&self, key: &str) -> Option<&str> {
        self.settings.get(key).and_then(|v| v.as_str())
    }

    /// Reads a setting as an unsigned integer
    pub fn setting_u64(&self, key: &str) -> Option<u64> {
        self.settings.get(key).and_then(|v| v.as_u64())
    }
}

/// Operations a capability exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Meta,
    Setup,
    Backup,
    Restore,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Meta => "meta",
            Operation::Setup => "setup",
            Operation::Backup => "backup",
            Operation::Restore => "restore",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The contract every tile plugin satisfies
pub trait BackupRestorer: Send {
    /// Returns the plugin's metadata. Must be pure.
    fn meta(&self) -> PluginMeta;

    /// Receives the tile target before backup or restore
    fn setup(&mut self, target: &TileTarget) -> Result<()>;

    fn backup(&mut self) -> Result<()>;

    fn restore(&mut self) -> Result<()>;
}

impl<T: BackupRestorer + ?Sized> BackupRestorer for Box<T> {
    fn meta(&self) -> PluginMeta {
        (**self).meta()
    }

    fn setup(&mut self, target: &TileTarget) -> Result<()> {
        (**self).setup(target)
    }

    fn backup(&mut self) -> Result<()> {
        (**self).backup()
    }

    fn restore(&mut self) -> Result<()> {
        (**self).restore()
    }
}
