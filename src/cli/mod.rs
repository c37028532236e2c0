//! # Command-Line Interface
//!
//! | Command | Purpose |
//! |---------|---------|
//! | `list` | Show tile plugins found in the plugin directories |
//! | `meta <path>` | Print a plugin executable's metadata |
//! | `backup --tile <name> --destination <dir>` | Back up one tile |
//! | `restore --tile <name> --destination <dir>` | Restore one tile |
//!
//! ## Output Formats
//!
//! All commands support `--format text|json`. Use `--verbose` (or `-v`) for
//! debug output on stderr; `CFOPS_LOG` takes a full tracing filter.
//!
//! ## Entry Point
//!
//! Call [`run()`] to parse arguments and execute the appropriate command.

mod app;
mod output;
mod tile_cmd;

pub use app::{run, Cli, Commands};
pub use output::{Output, OutputFormat};
pub use tile_cmd::{TileAction, TileArgs};
