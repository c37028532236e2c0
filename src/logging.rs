//! Tracing subscriber setup
//!
//! Both the orchestrator and plugin processes log to stderr. For a plugin
//! this is mandatory: its stdout carries protocol frames.

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// Environment variable holding a tracing filter (e.g. `debug`, `cfops=trace`)
pub const LOG_ENV: &str = "CFOPS_LOG";

/// Default filter for plugin processes
const PLUGIN_DEFAULT_LEVEL: &str = "warn";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Installs the orchestrator's subscriber.
///
/// `CFOPS_LOG` takes precedence over `level`. Returns without error if a
/// subscriber is already installed.
pub fn init(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let _ = match format {
        LogFormat::Json => builder.json().with_target(true).try_init(),
        LogFormat::Text => builder.with_target(false).try_init(),
    };
}

/// Installs the subscriber used inside a serving plugin process
pub fn init_plugin() {
    let filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(PLUGIN_DEFAULT_LEVEL));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(true)
        .try_init();
}

/// Maps the CLI verbosity flag onto a filter level
pub fn level_for(verbose: bool, configured: &str) -> &str {
    if verbose {
        "debug"
    } else {
        configured
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_init_is_harmless() {
        init("warn", LogFormat::Text);
        init("debug", LogFormat::Json);
        init_plugin();
    }

    #[test]
    fn verbose_overrides_configured_level() {
        assert_eq!(level_for(true, "warn"), "debug");
        assert_eq!(level_for(false, "info"), "info");
    }

    #[test]
    fn format_parses_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            format: LogFormat,
        }
        let parsed: Wrapper = toml::from_str("format = \"json\"").unwrap();
        assert_eq!(parsed.format, LogFormat::Json);
    }
}
