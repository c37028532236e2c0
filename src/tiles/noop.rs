//! Reference tile that backs up nothing
//!
//! Backup writes a small marker file into the destination; restore requires
//! that marker to exist. Two settings let tests exercise failure handling:
//!
//! | Setting | Effect |
//! |---------|--------|
//! | `delay_ms` | Sleep before backup or restore |
//! | `crash` | Abort the process during backup or restore |

use std::fs;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::plugin::{BackupRestorer, Operation, PluginError, PluginMeta, Result, TileTarget};

pub const NOOP_TILE_NAME: &str = "noop-tile";
pub const MARKER_FILE: &str = "noop-tile.json";

/// Contents of the marker file written by a backup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupMarker {
    pub tile: String,
    pub sequence: u64,
    pub host: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct NoopTile {
    target: Option<TileTarget>,
    sequence: u64,
}

impl NoopTile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of backups taken by this instance
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    fn target(&self, operation: Operation) -> Result<&TileTarget> {
        self.target
            .as_ref()
            .ok_or_else(|| PluginError::operation(operation, "setup was not called"))
    }

    fn marker_path(&self, operation: Operation) -> Result<PathBuf> {
        Ok(self.target(operation)?.destination.join(MARKER_FILE))
    }

    fn simulate(&self, operation: Operation) -> Result<()> {
        let target = self.target(operation)?;
        if let Some(delay) = target.setting_u64("delay_ms") {
            thread::sleep(Duration::from_millis(delay));
        }
        if target.settings.get("crash").and_then(|v| v.as_bool()) == Some(true) {
            warn!(%operation, "crash requested, aborting");
            std::process::abort();
        }
        Ok(())
    }
}

impl BackupRestorer for NoopTile {
    fn meta(&self) -> PluginMeta {
        PluginMeta::new(NOOP_TILE_NAME, "backup-restore")
            .with_property("version", env!("CARGO_PKG_VERSION"))
            .with_property("description", "writes a marker file instead of tile data")
    }

    fn setup(&mut self, target: &TileTarget) -> Result<()> {
        if target.destination.as_os_str().is_empty() {
            return Err(PluginError::operation(
                Operation::Setup,
                "destination must not be empty",
            ));
        }
        self.target = Some(target.clone());
        Ok(())
    }

    fn backup(&mut self) -> Result<()> {
        self.simulate(Operation::Backup)?;
        let target = self.target(Operation::Backup)?;

        fs::create_dir_all(&target.destination).map_err(|e| {
            PluginError::operation(
                Operation::Backup,
                format!("cannot create {}: {}", target.destination.display(), e),
            )
        })?;

        let marker = BackupMarker {
            tile: NOOP_TILE_NAME.to_string(),
            sequence: self.sequence + 1,
            host: target.host.clone(),
            created_at: Utc::now(),
        };
        let path = self.marker_path(Operation::Backup)?;
        let content = serde_json::to_string_pretty(&marker)?;
        fs::write(&path, content).map_err(|e| {
            PluginError::operation(
                Operation::Backup,
                format!("cannot write {}: {}", path.display(), e),
            )
        })?;

        self.sequence = marker.sequence;
        info!(path = %path.display(), sequence = marker.sequence, "backup written");
        Ok(())
    }

    fn restore(&mut self) -> Result<()> {
        self.simulate(Operation::Restore)?;
        let path = self.marker_path(Operation::Restore)?;

        let content = fs::read_to_string(&path).map_err(|e| {
            PluginError::operation(
                Operation::Restore,
                format!("no backup found at {}: {}", path.display(), e),
            )
        })?;
        let marker: BackupMarker = serde_json::from_str(&content).map_err(|e| {
            PluginError::operation(
                Operation::Restore,
                format!("corrupt marker {}: {}", path.display(), e),
            )
        })?;
        if marker.tile != NOOP_TILE_NAME {
            return Err(PluginError::operation(
                Operation::Restore,
                format!("backup belongs to tile '{}'", marker.tile),
            ));
        }

        info!(path = %path.display(), sequence = marker.sequence, "restore complete");
        Ok(())
    }
}
