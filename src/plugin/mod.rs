//! # Plugin Host
//!
//! Tiles are backed up and restored by plugins: separately compiled
//! executables that each implement [`BackupRestorer`] for one tile.
//!
//! ## Invocation
//!
//! | Arguments | Behaviour |
//! |-----------|-----------|
//! | `<plugin> plugin-meta` | Print one JSON metadata line and exit |
//! | `<plugin> plugin` (or anything else) | Serve the tile over stdin/stdout |
//!
//! ## Protocol
//!
//! ```text
//! cfops                              Plugin Binary
//!  │                                     │
//!  ├── Spawn: <plugin> plugin            │
//!  ├── {"type":"handshake",...}  ───────▶│
//!  │◀─────── {"type":"handshake_ok",...} │
//!  ├── {"type":"dispense","name":...} ──▶│
//!  │◀─────── {"type":"dispensed",...}    │
//!  ├── {"type":"invoke","call":{"operation":"backup"}} ──▶│
//!  │◀─────── {"type":"done"}             │
//!  └── close stdin, kill, reap           │
//! ```
//!
//! One request is in flight per session; responses arrive in request order.
//! Plugin logs go to stderr, which the orchestrator passes through.
//!
//! ## Key Types
//!
//! - [`start`] - Entry point of every plugin binary
//! - [`PluginCaller`] - Launches a plugin and dispenses its capability
//! - [`RemoteBackupRestorer`] - Proxy implementing [`BackupRestorer`] over the wire
//! - [`PluginSession`] - Lifecycle handle of the plugin subprocess
//! - [`PluginLoader`] - Discovers plugins in plugin directories

mod caller;
mod capability;
mod error;
mod handshake;
mod loader;
mod protocol;
mod registry;
mod remote;
mod runtime;

pub use caller::{CallerConfig, PluginCaller, PluginSession, DEFAULT_HANDSHAKE_TIMEOUT};
pub use capability::{BackupRestorer, Operation, PluginMeta, TileTarget};
pub use error::{Phase, PluginError, Result};
pub use handshake::{HandshakeConfig, HandshakeOffer, HANDSHAKE, PROTOCOL_VERSION};
pub use loader::{
    read_metadata, read_metadata_within, PluginInfo, PluginLoader, DEFAULT_METADATA_TIMEOUT,
};
pub use protocol::{
    read_frame, write_frame, Invocation, PluginRequest, PluginResponse, PLUGIN_META_ARG,
    PLUGIN_SERVE_ARG,
};
pub use registry::{CapabilityAdapter, PluginRegistry};
pub use remote::RemoteBackupRestorer;
pub use runtime::{start, write_metadata, PluginServer, StartupMode};
