//! Tile implementations shipped with cfops

mod noop;

pub use noop::{BackupMarker, NoopTile, MARKER_FILE, NOOP_TILE_NAME};
