//! Caller-side proxy for a capability served by a plugin process

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::debug;

use super::caller::{lock, Connection};
use super::capability::{BackupRestorer, Operation, PluginMeta, TileTarget};
use super::error::{Phase, PluginError, Result};
use super::protocol::{Invocation, PluginRequest, PluginResponse};

/// Implements [`BackupRestorer`] by forwarding every call to the plugin process.
///
/// Calls block until the plugin answers, the connection fails, or the
/// configured call timeout expires. Terminating the session from another
/// thread interrupts a blocked call, and from then on every call fails with
/// [`PluginError::ConnectionLost`].
pub struct RemoteBackupRestorer {
    name: String,
    meta: PluginMeta,
    connection: Arc<Mutex<Connection>>,
    timeout: Option<Duration>,
}

impl RemoteBackupRestorer {
    pub(crate) fn new(
        name: &str,
        meta: PluginMeta,
        connection: Arc<Mutex<Connection>>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            name: name.to_string(),
            meta,
            connection,
            timeout,
        }
    }

    /// Name the capability was dispensed under
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Asks the plugin for its metadata again and updates the cached copy
    pub fn refresh_meta(&mut self) -> Result<PluginMeta> {
        match self.invoke(Invocation::Meta)? {
            PluginResponse::Meta { meta } => {
                self.meta = meta.clone();
                Ok(meta)
            }
            other => Err(self.unexpected(&other)),
        }
    }

    fn run(&self, call: Invocation) -> Result<()> {
        match self.invoke(call)? {
            PluginResponse::Done => Ok(()),
            other => Err(self.unexpected(&other)),
        }
    }

    fn invoke(&self, call: Invocation) -> Result<PluginResponse> {
        let operation = call.operation();
        let mut connection = lock(&self.connection, &self.name, Phase::Call)?;
        debug!(plugin = %self.name, %operation, "forwarding call");

        let request = PluginRequest::Invoke {
            name: self.name.clone(),
            call,
        };
        match connection.round_trip(Phase::Call, &request, self.timeout)? {
            PluginResponse::Failed { message } => Err(self.remote_failure(operation, message)),
            PluginResponse::UnknownCapability { .. } => Err(PluginError::CapabilityNotFound {
                plugin: connection.plugin().to_string(),
            }),
            response => Ok(response),
        }
    }

    fn remote_failure(&self, operation: Operation, message: String) -> PluginError {
        PluginError::RemoteCall {
            plugin: self.name.clone(),
            operation,
            message,
        }
    }

    fn unexpected(&self, response: &PluginResponse) -> PluginError {
        match lock(&self.connection, &self.name, Phase::Call) {
            Ok(mut connection) => connection.unexpected(Phase::Call, response),
            Err(e) => e,
        }
    }
}

impl BackupRestorer for RemoteBackupRestorer {
    /// Metadata received when the capability was dispensed
    fn meta(&self) -> PluginMeta {
        self.meta.clone()
    }

    fn setup(&mut self, target: &TileTarget) -> Result<()> {
        self.run(Invocation::Setup {
            target: target.clone(),
        })
    }

    fn backup(&mut self) -> Result<()> {
        self.run(Invocation::Backup)
    }

    fn restore(&mut self) -> Result<()> {
        self.run(Invocation::Restore)
    }
}

impl fmt::Debug for RemoteBackupRestorer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteBackupRestorer")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .finish()
    }
}
