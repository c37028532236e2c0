//! Plugin protocol types
//!
//! The orchestrator and a serving plugin exchange newline-delimited JSON
//! frames over the plugin's stdin/stdout. Each request gets exactly one
//! response, in order.

use std::io::{BufRead, Write};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::capability::{Operation, PluginMeta, TileTarget};
use super::error::Result;
use super::handshake::HandshakeOffer;

/// Argument that puts a plugin executable into metadata mode
pub const PLUGIN_META_ARG: &str = "plugin-meta";

/// Argument the orchestrator passes when spawning a plugin to serve
pub const PLUGIN_SERVE_ARG: &str = "plugin";

/// A message sent to a plugin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PluginRequest {
    /// First frame of every session
    Handshake(HandshakeOffer),

    /// Asks for a named capability
    Dispense { name: String },

    /// Invokes an operation on a dispensed capability
    Invoke { name: String, call: Invocation },
}

/// Capability call carried by [`PluginRequest::Invoke`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum Invocation {
    Meta,
    Setup { target: TileTarget },
    Backup,
    Restore,
}

impl Invocation {
    pub fn operation(&self) -> Operation {
        match self {
            Invocation::Meta => Operation::Meta,
            Invocation::Setup { .. } => Operation::Setup,
            Invocation::Backup => Operation::Backup,
            Invocation::Restore => Operation::Restore,
        }
    }
}

/// A response from a plugin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PluginResponse {
    HandshakeOk { protocol_version: u32 },

    HandshakeRejected { reason: String },

    Dispensed { name: String, meta: PluginMeta },

    UnknownCapability { name: String },

    Meta { meta: PluginMeta },

    /// The operation completed
    Done,

    /// The capability reported an error
    Failed { message: String },

    /// The request violated the protocol
    Error { message: String },
}

impl PluginResponse {
    pub fn failed(message: impl Into<String>) -> Self {
        PluginResponse::Failed {
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        PluginResponse::Error {
            message: message.into(),
        }
    }
}

/// Writes one frame followed by a newline and flushes
pub fn write_frame<W: Write, T: Serialize>(mut writer: W, frame: &T) -> Result<()> {
    let line = serde_json::to_string(frame)?;
    writeln!(writer, "{}", line)?;
    writer.flush()?;
    Ok(())
}

/// Reads the next frame, or `None` once the peer closed the stream
pub fn read_frame<R: BufRead, T: DeserializeOwned>(reader: &mut R) -> Result<Option<T>> {
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        if !line.trim().is_empty() {
            return Ok(Some(decode_frame(&line)?));
        }
    }
}

/// Parses a single frame
pub fn decode_frame<T: DeserializeOwned>(line: &str) -> Result<T> {
    Ok(serde_json::from_str(line.trim())?)
}
