//! Error taxonomy for the plugin host
//!
//! Every failure on the caller side carries the plugin name and the phase in
//! which it happened, so an operator can tell a missing binary from a
//! misbehaving one.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use super::capability::Operation;

/// Phase of a plugin session in which a failure occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Spawn,
    Handshake,
    Dispense,
    Call,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Spawn => "spawn",
            Phase::Handshake => "handshake",
            Phase::Dispense => "dispense",
            Phase::Call => "call",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("plugin '{plugin}': failed to start {}: {source}", .path.display())]
    Spawn {
        plugin: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("plugin '{plugin}': handshake mismatch: {reason}")]
    HandshakeMismatch { plugin: String, reason: String },

    #[error("plugin '{plugin}': connection lost during {phase}: {reason}")]
    ConnectionLost {
        plugin: String,
        phase: Phase,
        reason: String,
    },

    #[error("plugin '{plugin}': capability not served by the plugin process")]
    CapabilityNotFound { plugin: String },

    #[error("plugin '{plugin}': {operation} failed: {message}")]
    RemoteCall {
        plugin: String,
        operation: Operation,
        message: String,
    },

    #[error("plugin '{plugin}': no response during {phase} after {timeout:?}")]
    TimedOut {
        plugin: String,
        phase: Phase,
        timeout: Duration,
    },

    #[error("{operation} failed: {message}")]
    Operation { operation: Operation, message: String },

    #[error("failed to read plugin metadata from {}: {reason}", .path.display())]
    Metadata { path: PathBuf, reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = PluginError> = std::result::Result<T, E>;

impl PluginError {
    /// Failure reported by a tile's own backup/restore logic
    pub fn operation(operation: Operation, message: impl Into<String>) -> Self {
        PluginError::Operation {
            operation,
            message: message.into(),
        }
    }

    pub(crate) fn connection_lost(
        plugin: impl Into<String>,
        phase: Phase,
        reason: impl Into<String>,
    ) -> Self {
        PluginError::ConnectionLost {
            plugin: plugin.into(),
            phase,
            reason: reason.into(),
        }
    }

    /// Returns the session phase the error belongs to, if any
    pub fn phase(&self) -> Option<Phase> {
        match self {
            PluginError::Spawn { .. } => Some(Phase::Spawn),
            PluginError::HandshakeMismatch { .. } => Some(Phase::Handshake),
            PluginError::ConnectionLost { phase, .. } | PluginError::TimedOut { phase, .. } => {
                Some(*phase)
            }
            PluginError::CapabilityNotFound { .. } => Some(Phase::Dispense),
            PluginError::RemoteCall { .. } | PluginError::Operation { .. } => Some(Phase::Call),
            PluginError::Metadata { .. } | PluginError::Io(_) | PluginError::Serialization(_) => {
                None
            }
        }
    }

    /// Returns the name of the plugin that failed, if known
    pub fn plugin(&self) -> Option<&str> {
        match self {
            PluginError::Spawn { plugin, .. }
            | PluginError::HandshakeMismatch { plugin, .. }
            | PluginError::ConnectionLost { plugin, .. }
            | PluginError::CapabilityNotFound { plugin }
            | PluginError::RemoteCall { plugin, .. }
            | PluginError::TimedOut { plugin, .. } => Some(plugin),
            _ => None,
        }
    }

    /// True when the tile itself reported the failure (the session is still usable)
    pub fn is_call_failure(&self) -> bool {
        matches!(
            self,
            PluginError::RemoteCall { .. } | PluginError::Operation { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_of_each_caller_error() {
        let spawn = PluginError::Spawn {
            plugin: "ops-manager".into(),
            path: PathBuf::from("/nope"),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert_eq!(spawn.phase(), Some(Phase::Spawn));

        let mismatch = PluginError::HandshakeMismatch {
            plugin: "ops-manager".into(),
            reason: "cookie".into(),
        };
        assert_eq!(mismatch.phase(), Some(Phase::Handshake));

        let missing = PluginError::CapabilityNotFound {
            plugin: "redis".into(),
        };
        assert_eq!(missing.phase(), Some(Phase::Dispense));
        assert_eq!(missing.plugin(), Some("redis"));

        let lost = PluginError::connection_lost("mysql", Phase::Call, "broken pipe");
        assert_eq!(lost.phase(), Some(Phase::Call));
        assert!(!lost.is_call_failure());
    }

    #[test]
    fn display_names_plugin_and_phase() {
        let err = PluginError::connection_lost("elastic-runtime", Phase::Handshake, "eof");
        let message = err.to_string();

        assert!(message.contains("elastic-runtime"));
        assert!(message.contains("handshake"));
    }

    #[test]
    fn remote_call_is_call_failure() {
        let err = PluginError::RemoteCall {
            plugin: "noop-tile".into(),
            operation: Operation::Restore,
            message: "no backup found".into(),
        };

        assert!(err.is_call_failure());
        assert_eq!(err.phase(), Some(Phase::Call));
        assert!(err.to_string().contains("restore failed"));
    }

    #[test]
    fn metadata_error_has_no_phase() {
        let err = PluginError::Metadata {
            path: PathBuf::from("/plugins/thing"),
            reason: "exit status 2".into(),
        };

        assert_eq!(err.phase(), None);
        assert_eq!(err.plugin(), None);
    }
}
