//! Plugin binary serving the noop tile

use std::process::ExitCode;

use cfops::plugin;
use cfops::tiles::NoopTile;

fn main() -> ExitCode {
    plugin::start(NoopTile::new())
}
