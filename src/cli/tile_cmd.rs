//! Tile commands: list, meta, backup, restore

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;

use super::output::Output;
use crate::config::CfopsConfig;
use crate::plugin::{
    read_metadata_within, BackupRestorer, PluginCaller, PluginError, PluginLoader, TileTarget,
};

/// Arguments shared by `backup` and `restore`
#[derive(Args, Debug, Clone)]
pub struct TileArgs {
    /// Tile name as reported by its plugin
    #[arg(long)]
    pub tile: String,

    /// Backup directory
    #[arg(long, short = 'd')]
    pub destination: PathBuf,

    /// Control-plane host of the tile
    #[arg(long)]
    pub host: Option<String>,

    /// Tile setting as key=value; JSON values are parsed (repeatable)
    #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_setting)]
    pub settings: Vec<(String, serde_json::Value)>,

    /// Seconds to wait for each plugin call
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout: Option<u64>,
}

impl TileArgs {
    pub fn target(&self) -> TileTarget {
        let mut target = TileTarget::new(&self.destination);
        if let Some(host) = &self.host {
            target = target.with_host(host);
        }
        for (key, value) in &self.settings {
            target = target.with_setting(key, value.clone());
        }
        target
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileAction {
    Backup,
    Restore,
}

impl fmt::Display for TileAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TileAction::Backup => f.write_str("backup"),
            TileAction::Restore => f.write_str("restore"),
        }
    }
}

fn parse_setting(raw: &str) -> std::result::Result<(String, serde_json::Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", raw))?;
    if key.is_empty() {
        return Err("setting key must not be empty".to_string());
    }
    let value = serde_json::from_str(value)
        .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

fn discover(config: &CfopsConfig) -> PluginLoader {
    let mut loader = PluginLoader::new();
    loader.set_metadata_timeout(config.metadata_timeout());
    for dir in &config.plugin_dirs {
        loader.add_plugin_dir(dir);
    }
    loader.discover();
    loader
}

pub fn list(config: &CfopsConfig, output: &Output) -> Result<()> {
    let loader = discover(config);
    let plugins = loader.list();

    if output.is_json() {
        let items: Vec<_> = plugins
            .iter()
            .map(|p| {
                serde_json::json!({
                    "name": p.name(),
                    "role": p.meta.role,
                    "path": p.path.display().to_string(),
                })
            })
            .collect();
        output.data(&items);
    } else if plugins.is_empty() {
        println!("No tile plugins found.");
        println!();
        println!("Plugins are discovered in:");
        for dir in &config.plugin_dirs {
            println!("  - {}", dir.display());
        }
    } else {
        println!("{:<24} {:<18} PATH", "NAME", "ROLE");
        println!("{}", "-".repeat(70));
        for plugin in plugins {
            println!(
                "{:<24} {:<18} {}",
                plugin.name(),
                plugin.meta.role,
                plugin.path.display()
            );
        }
    }

    Ok(())
}

pub fn meta(config: &CfopsConfig, path: &Path, output: &Output) -> Result<()> {
    let meta = read_metadata_within(path, config.metadata_timeout())?;

    if output.is_json() {
        output.data(&meta);
    } else {
        println!("Name: {}", meta.name);
        println!("Role: {}", meta.role);
        for (key, value) in &meta.properties {
            println!("{}: {}", key, value);
        }
    }

    Ok(())
}

pub fn run(action: TileAction, args: &TileArgs, config: &CfopsConfig, output: &Output) -> Result<()> {
    let loader = discover(config);
    let plugin = loader.get(&args.tile).with_context(|| {
        format!(
            "Tile plugin not found: {} (run 'cfops list' to see available tiles)",
            args.tile
        )
    })?;
    output.verbose_ctx(
        "plugin",
        &format!("Using {} for tile '{}'", plugin.path.display(), args.tile),
    );

    let mut caller_config = config.caller_config();
    if let Some(secs) = args.timeout {
        caller_config.call_timeout = Some(Duration::from_secs(secs));
    }
    let mut caller = PluginCaller::new(caller_config);

    let (mut tile, session) = caller
        .acquire(&args.tile, &plugin.path)
        .map_err(|e| report(e, action))?;
    output.verbose_ctx("plugin", &format!("Plugin running with pid {}", session.pid()));

    let result = tile.setup(&args.target()).and_then(|()| match action {
        TileAction::Backup => tile.backup(),
        TileAction::Restore => tile.restore(),
    });
    session.terminate();
    result.map_err(|e| report(e, action))?;

    output.success(&format!(
        "{} of tile '{}' complete ({})",
        capitalize(&action.to_string()),
        args.tile,
        args.destination.display()
    ));
    Ok(())
}

/// Wraps a plugin failure so the message names the tile and the phase
fn report(err: PluginError, action: TileAction) -> anyhow::Error {
    let context = match (err.plugin(), err.phase()) {
        (Some(plugin), Some(phase)) => {
            format!("{} of tile '{}' failed during {}", action, plugin, phase)
        }
        _ => format!("{} failed", action),
    };
    anyhow::Error::new(err).context(context)
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::Phase;

    #[test]
    fn settings_parse_json_values() {
        assert_eq!(
            parse_setting("delay_ms=250").unwrap(),
            ("delay_ms".to_string(), serde_json::json!(250))
        );
        assert_eq!(
            parse_setting("crash=true").unwrap(),
            ("crash".to_string(), serde_json::json!(true))
        );
        assert_eq!(
            parse_setting("mode=full").unwrap(),
            ("mode".to_string(), serde_json::json!("full"))
        );
        assert_eq!(
            parse_setting("empty=").unwrap(),
            ("empty".to_string(), serde_json::json!(""))
        );
    }

    #[test]
    fn settings_require_key() {
        assert!(parse_setting("novalue").is_err());
        assert!(parse_setting("=3").is_err());
    }

    #[test]
    fn target_from_args() {
        let args = TileArgs {
            tile: "noop-tile".into(),
            destination: PathBuf::from("/backups"),
            host: Some("opsman".into()),
            settings: vec![("delay_ms".into(), serde_json::json!(5))],
            timeout: None,
        };

        let target = args.target();
        assert_eq!(target.destination, PathBuf::from("/backups"));
        assert_eq!(target.host.as_deref(), Some("opsman"));
        assert_eq!(target.setting_u64("delay_ms"), Some(5));
    }

    #[test]
    fn report_names_tile_and_phase() {
        let err = PluginError::connection_lost("noop-tile", Phase::Call, "plugin process exited");
        let message = format!("{:#}", report(err, TileAction::Backup));

        assert!(message.starts_with("backup of tile 'noop-tile' failed during call"));
        assert!(message.contains("plugin process exited"));
    }

    #[test]
    fn capitalize_words() {
        assert_eq!(capitalize("backup"), "Backup");
        assert_eq!(capitalize(""), "");
    }
}
