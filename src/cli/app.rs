//! Main CLI application structure

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use super::output::{Output, OutputFormat};
use super::tile_cmd::{self, TileAction, TileArgs};
use crate::config::{CfopsConfig, CONFIG_ENV};
use crate::logging;

#[derive(Parser)]
#[command(name = "cfops")]
#[command(author, version, about = "Backup and restore platform tiles through plugins")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output format
    #[arg(long, short = 'f', global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Enable verbose output for debugging
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    /// Configuration file
    #[arg(long, global = true, env = CONFIG_ENV)]
    pub config: Option<PathBuf>,

    /// Plugin directory, searched before configured ones (repeatable)
    #[arg(long = "plugin-dir", global = true)]
    pub plugin_dirs: Vec<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List discovered tile plugins
    List,

    /// Print the metadata of a plugin executable
    Meta {
        /// Path to the plugin executable
        path: PathBuf,
    },

    /// Back up a tile
    Backup(TileArgs),

    /// Restore a tile from a backup
    Restore(TileArgs),
}

/// Main entry point for the CLI
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let output = Output::new(cli.format, cli.verbose);

    let mut config = CfopsConfig::load(cli.config.as_deref())?;
    logging::init(
        logging::level_for(cli.verbose, &config.logging.level),
        config.logging.format,
    );

    if !cli.plugin_dirs.is_empty() {
        let mut dirs = cli.plugin_dirs;
        dirs.append(&mut config.plugin_dirs);
        config.plugin_dirs = dirs;
    }
    output.verbose_ctx(
        "config",
        &format!("Plugin directories: {:?}", config.plugin_dirs),
    );

    match cli.command {
        Commands::List => tile_cmd::list(&config, &output)?,
        Commands::Meta { path } => tile_cmd::meta(&config, &path, &output)?,
        Commands::Backup(args) => tile_cmd::run(TileAction::Backup, &args, &config, &output)?,
        Commands::Restore(args) => tile_cmd::run(TileAction::Restore, &args, &config, &output)?,
    }

    output.verbose("Command completed successfully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "cfops",
            "list",
            "--plugin-dir",
            "/a",
            "--plugin-dir",
            "/b",
            "-f",
            "json",
        ])
        .unwrap();

        assert_eq!(cli.plugin_dirs, vec![PathBuf::from("/a"), PathBuf::from("/b")]);
        assert_eq!(cli.format, OutputFormat::Json);
        assert!(matches!(cli.command, Commands::List));
    }

    #[test]
    fn backup_requires_tile_and_destination() {
        assert!(Cli::try_parse_from(["cfops", "backup", "--tile", "noop-tile"]).is_err());
        assert!(Cli::try_parse_from([
            "cfops",
            "backup",
            "--tile",
            "noop-tile",
            "--destination",
            "/tmp/out"
        ])
        .is_ok());
    }
}
