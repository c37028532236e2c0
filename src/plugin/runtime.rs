//! Plugin-side runtime
//!
//! A plugin binary hands its tile to [`start`]. Depending on how the binary was
//! invoked it either prints its metadata and exits, or serves the tile to the
//! orchestrator over stdin/stdout until the orchestrator hangs up.

use std::collections::BTreeSet;
use std::io::{self, BufRead, Write};
use std::process::ExitCode;

use tracing::{debug, info, warn};

use super::capability::{BackupRestorer, PluginMeta};
use super::error::{PluginError, Result};
use super::handshake::{HandshakeConfig, HANDSHAKE};
use super::protocol::{
    read_frame, write_frame, Invocation, PluginRequest, PluginResponse, PLUGIN_META_ARG,
};
use super::registry::{CapabilityAdapter, PluginRegistry};
use crate::logging;

/// How the plugin executable was asked to run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupMode {
    /// Print metadata to stdout and exit
    Metadata,

    /// Serve registered capabilities until the caller disconnects
    Serve,
}

impl StartupMode {
    /// Decides the mode from the full argument vector (program name first)
    pub fn from_args<S: AsRef<str>>(args: &[S]) -> Self {
        match args {
            [_, flag] if flag.as_ref() == PLUGIN_META_ARG => StartupMode::Metadata,
            _ => StartupMode::Serve,
        }
    }
}

/// Entry point for plugin executables
pub fn start<P: BackupRestorer + 'static>(plugin: P) -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let mode = StartupMode::from_args(&args);

    let meta = plugin.meta();
    let mut registry = PluginRegistry::new();
    registry.register(meta.name.clone(), CapabilityAdapter::local(plugin));

    let result = match mode {
        StartupMode::Metadata => write_metadata(&meta, io::stdout().lock()),
        StartupMode::Serve => {
            logging::init_plugin();
            PluginServer::new(registry, HANDSHAKE).serve(io::stdin().lock(), io::stdout().lock())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Writes the metadata line emitted in metadata mode
pub fn write_metadata<W: Write>(meta: &PluginMeta, writer: W) -> Result<()> {
    write_frame(writer, meta)
}

/// Serves the capabilities of one registry over a framed byte stream
pub struct PluginServer {
    registry: PluginRegistry,
    handshake: HandshakeConfig,
    /// Capabilities the caller may invoke
    dispensed: BTreeSet<String>,
}

impl PluginServer {
    pub fn new(registry: PluginRegistry, handshake: HandshakeConfig) -> Self {
        Self {
            registry,
            handshake,
            dispensed: BTreeSet::new(),
        }
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    /// Runs the request loop until the caller closes the stream.
    ///
    /// Returns an error after a rejected handshake or a protocol violation;
    /// the caller sees the corresponding response before the stream closes.
    /// Invoking a capability that was never dispensed is a protocol violation.
    pub fn serve<R: BufRead, W: Write>(&mut self, mut reader: R, mut writer: W) -> Result<()> {
        info!(plugins = ?self.registry.names(), "plugin serving");
        let mut handshaken = false;

        loop {
            let request: PluginRequest = match read_frame(&mut reader) {
                Ok(Some(request)) => request,
                Ok(None) => {
                    debug!("caller closed the connection");
                    return Ok(());
                }
                Err(PluginError::Serialization(e)) => {
                    let message = format!("malformed request: {}", e);
                    write_frame(&mut writer, &PluginResponse::error(&message))?;
                    return Err(protocol_violation(message));
                }
                Err(e) => return Err(e),
            };

            match request {
                PluginRequest::Handshake(offer) if !handshaken => {
                    if let Err(reason) = self.handshake.validate(&offer) {
                        warn!(%reason, "rejecting handshake");
                        write_frame(
                            &mut writer,
                            &PluginResponse::HandshakeRejected {
                                reason: reason.clone(),
                            },
                        )?;
                        return Err(PluginError::HandshakeMismatch {
                            plugin: self.registry.names().join(","),
                            reason,
                        });
                    }
                    handshaken = true;
                    debug!("handshake accepted");
                    write_frame(
                        &mut writer,
                        &PluginResponse::HandshakeOk {
                            protocol_version: self.handshake.protocol_version,
                        },
                    )?;
                }
                PluginRequest::Handshake(_) => {
                    let message = "handshake already completed";
                    write_frame(&mut writer, &PluginResponse::error(message))?;
                    return Err(protocol_violation(message));
                }
                _ if !handshaken => {
                    let message = "handshake required before any other request";
                    write_frame(&mut writer, &PluginResponse::error(message))?;
                    return Err(protocol_violation(message));
                }
                PluginRequest::Dispense { name } => {
                    let response = self.dispense(&name);
                    write_frame(&mut writer, &response)?;
                }
                PluginRequest::Invoke { name, .. } if !self.dispensed.contains(&name) => {
                    let message = format!("capability '{}' was not dispensed", name);
                    write_frame(&mut writer, &PluginResponse::error(&message))?;
                    return Err(protocol_violation(message));
                }
                PluginRequest::Invoke { name, call } => {
                    let response = self.invoke(&name, call);
                    write_frame(&mut writer, &response)?;
                }
            }
        }
    }

    fn dispense(&mut self, name: &str) -> PluginResponse {
        match self.registry.get(name) {
            Some(CapabilityAdapter::Local(capability)) => {
                debug!(plugin = name, "dispensing capability");
                self.dispensed.insert(name.to_string());
                PluginResponse::Dispensed {
                    name: name.to_string(),
                    meta: capability.meta(),
                }
            }
            _ => {
                warn!(plugin = name, "dispense requested for a capability this process does not serve");
                PluginResponse::UnknownCapability {
                    name: name.to_string(),
                }
            }
        }
    }

    fn invoke(&mut self, name: &str, call: Invocation) -> PluginResponse {
        let Some(CapabilityAdapter::Local(capability)) = self.registry.get_mut(name) else {
            return PluginResponse::UnknownCapability {
                name: name.to_string(),
            };
        };

        let operation = call.operation();
        debug!(plugin = name, %operation, "invoking capability");
        let result = match call {
            Invocation::Meta => {
                return PluginResponse::Meta {
                    meta: capability.meta(),
                }
            }
            Invocation::Setup { target } => capability.setup(&target),
            Invocation::Backup => capability.backup(),
            Invocation::Restore => capability.restore(),
        };

        match result {
            Ok(()) => PluginResponse::Done,
            Err(e) => {
                warn!(plugin = name, %operation, error = %e, "capability reported an error");
                PluginResponse::failed(e.to_string())
            }
        }
    }
}

fn protocol_violation(message: impl Into<String>) -> PluginError {
    PluginError::Io(io::Error::new(io::ErrorKind::InvalidData, message.into()))
}
