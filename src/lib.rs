//! cfops - backup and restore for platform control-plane tiles
//!
//! Each tile is handled by a plugin: a separate executable that implements
//! [`plugin::BackupRestorer`] and is driven over its stdin/stdout. The
//! [`plugin`] module holds both sides of that conversation; [`cli`] is the
//! orchestrator built on top of it.

pub mod cli;
pub mod config;
pub mod logging;
pub mod plugin;
pub mod tiles;

pub use plugin::{BackupRestorer, PluginCaller, PluginError, PluginMeta, TileTarget};
