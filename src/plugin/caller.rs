//! Orchestrator side of a plugin session
//!
//! [`PluginCaller::acquire`] launches a plugin executable, completes the
//! handshake, dispenses the requested capability and hands back a proxy plus
//! a session handle. The proxy owns the [`Connection`] behind a mutex, so calls
//! on a session are serialized and answered in order. The session handle only
//! shares the [`Process`], which lets it kill the plugin while a call is
//! blocked.

use std::fmt;
use std::io::{self, BufRead, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::capability::PluginMeta;
use super::error::{Phase, PluginError, Result};
use super::handshake::{HandshakeConfig, HANDSHAKE};
use super::protocol::{decode_frame, write_frame, PluginRequest, PluginResponse, PLUGIN_SERVE_ARG};
use super::registry::{CapabilityAdapter, PluginRegistry};
use super::remote::RemoteBackupRestorer;

/// Default bound on handshake and dispense
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct CallerConfig {
    /// Handshake offered to every plugin
    pub handshake: HandshakeConfig,

    /// Bound on the handshake and dispense round trips
    pub handshake_timeout: Duration,

    /// Bound on each capability call; `None` waits indefinitely
    pub call_timeout: Option<Duration>,

    /// Pass the plugin's stderr through to ours instead of discarding it
    pub forward_stderr: bool,
}

impl Default for CallerConfig {
    fn default() -> Self {
        Self {
            handshake: HANDSHAKE,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            call_timeout: None,
            forward_stderr: true,
        }
    }
}

/// Launches plugin executables and connects to the capability they serve
#[derive(Debug, Default)]
pub struct PluginCaller {
    registry: PluginRegistry,
    config: CallerConfig,
}

impl PluginCaller {
    pub fn new(config: CallerConfig) -> Self {
        Self {
            registry: PluginRegistry::new(),
            config,
        }
    }

    pub fn config(&self) -> &CallerConfig {
        &self.config
    }

    /// Capabilities this caller has asked for so far
    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    /// Starts `path` as a plugin and dispenses the capability registered as `name`.
    ///
    /// Any failure after the subprocess started terminates it before the error
    /// is returned.
    pub fn acquire(
        &mut self,
        name: &str,
        path: impl AsRef<Path>,
    ) -> Result<(RemoteBackupRestorer, PluginSession)> {
        let path = path.as_ref();
        self.registry.register(name, CapabilityAdapter::Remote);

        info!(plugin = name, path = %path.display(), "starting plugin");
        let mut connection = Connection::spawn(name, path, self.config.forward_stderr)?;

        let meta = match self.open(&mut connection, name) {
            Ok(meta) => meta,
            Err(e) => {
                warn!(plugin = name, error = %e, "plugin failed to start");
                connection.terminate();
                return Err(e);
            }
        };
        info!(plugin = name, pid = connection.pid, "plugin session ready");

        let session = PluginSession {
            name: name.to_string(),
            pid: connection.pid,
            process: Arc::clone(&connection.process),
        };
        let remote = RemoteBackupRestorer::new(
            name,
            meta,
            Arc::new(Mutex::new(connection)),
            self.config.call_timeout,
        );
        Ok((remote, session))
    }

    fn open(&self, connection: &mut Connection, name: &str) -> Result<PluginMeta> {
        connection.handshake(&self.config.handshake, self.config.handshake_timeout)?;
        connection.dispense(name, self.config.handshake_timeout)
    }
}

/// Handle to a live plugin subprocess. Dropping it terminates the subprocess.
///
/// Termination does not wait for an in-flight call: it kills the subprocess
/// and the blocked call returns [`PluginError::ConnectionLost`].
pub struct PluginSession {
    name: String,
    pid: u32,
    process: Arc<Process>,
}

impl PluginSession {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Kills and reaps the subprocess. Safe to call any number of times.
    pub fn terminate(&self) {
        self.process.terminate();
    }

    pub fn is_alive(&self) -> bool {
        self.process.is_alive()
    }

    /// Exit status once the subprocess has exited
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.process.exit_status()
    }
}

impl fmt::Debug for PluginSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginSession")
            .field("name", &self.name)
            .field("pid", &self.pid)
            .finish()
    }
}

impl Drop for PluginSession {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// What the stdout reader (or a terminating session) delivers to a waiting call
enum Incoming {
    Line(io::Result<String>),
    Closed,
    Terminated,
}

struct ProcessState {
    child: Child,
    exit_status: Option<ExitStatus>,
    terminated: bool,
}

/// Kill side of a plugin subprocess.
///
/// Lives outside the connection lock so a session can be terminated while a
/// call is blocked waiting for the plugin.
pub(crate) struct Process {
    plugin: String,
    pid: u32,
    state: Mutex<ProcessState>,
    wake: Mutex<Sender<Incoming>>,
}

impl Process {
    // Termination must work even if a thread panicked while holding the lock.
    fn state(&self) -> MutexGuard<'_, ProcessState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn terminate(&self) {
        let mut state = self.state();
        if state.terminated {
            return;
        }
        state.terminated = true;

        match state.child.try_wait() {
            Ok(Some(status)) => state.exit_status = Some(status),
            _ => {
                if let Err(e) = state.child.kill() {
                    debug!(plugin = %self.plugin, error = %e, "kill failed");
                }
                // The direct child is reaped even when a grandchild still
                // holds its stdout open.
                match state.child.wait() {
                    Ok(status) => state.exit_status = Some(status),
                    Err(e) => warn!(plugin = %self.plugin, error = %e, "failed to reap plugin process"),
                }
            }
        }

        let _ = self
            .wake
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .send(Incoming::Terminated);
        info!(plugin = %self.plugin, pid = self.pid, status = ?state.exit_status, "plugin session terminated");
    }

    fn is_terminated(&self) -> bool {
        self.state().terminated
    }

    fn is_alive(&self) -> bool {
        let mut state = self.state();
        !state.terminated && Self::poll_exit(&mut state).is_none()
    }

    fn exit_status(&self) -> Option<ExitStatus> {
        Self::poll_exit(&mut self.state())
    }

    fn poll_exit(state: &mut ProcessState) -> Option<ExitStatus> {
        if state.exit_status.is_none() {
            if let Ok(Some(status)) = state.child.try_wait() {
                state.exit_status = Some(status);
            }
        }
        state.exit_status
    }
}

/// Pipes of one plugin subprocess
pub(crate) struct Connection {
    plugin: String,
    pid: u32,
    process: Arc<Process>,
    stdin: Option<BufWriter<ChildStdin>>,
    incoming: Receiver<Incoming>,
    reader: Option<JoinHandle<()>>,
    broken: Option<String>,
}

impl Connection {
    fn spawn(plugin: &str, path: &Path, forward_stderr: bool) -> Result<Self> {
        let spawn_error = |source: io::Error| PluginError::Spawn {
            plugin: plugin.to_string(),
            path: PathBuf::from(path),
            source,
        };

        let stderr = if forward_stderr {
            Stdio::inherit()
        } else {
            Stdio::null()
        };
        let mut child = Command::new(path)
            .arg(PLUGIN_SERVE_ARG)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(stderr)
            .spawn()
            .map_err(spawn_error)?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(spawn_error(io::Error::other("plugin stdio was not captured")));
        };

        let (tx, incoming) = mpsc::channel();
        let lines = tx.clone();
        let reader = thread::Builder::new()
            .name(format!("plugin-{}", plugin))
            .spawn(move || {
                for line in BufReader::new(stdout).lines() {
                    let failed = line.is_err();
                    if lines.send(Incoming::Line(line)).is_err() || failed {
                        return;
                    }
                }
                let _ = lines.send(Incoming::Closed);
            });
        let reader = match reader {
            Ok(handle) => handle,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(spawn_error(e));
            }
        };

        let pid = child.id();
        debug!(plugin, pid, "plugin process spawned");
        let process = Arc::new(Process {
            plugin: plugin.to_string(),
            pid,
            state: Mutex::new(ProcessState {
                child,
                exit_status: None,
                terminated: false,
            }),
            wake: Mutex::new(tx),
        });
        Ok(Self {
            plugin: plugin.to_string(),
            pid,
            process,
            stdin: Some(BufWriter::new(stdin)),
            incoming,
            reader: Some(reader),
            broken: None,
        })
    }

    fn handshake(&mut self, config: &HandshakeConfig, timeout: Duration) -> Result<()> {
        // A non-plugin may exit before reading our offer. Whatever it printed
        // still decides the outcome, so a failed write is only reported when
        // nothing comes back.
        let sent = self.send(Phase::Handshake, &PluginRequest::Handshake(config.offer()));
        let line = match self.next_line(Phase::Handshake, Some(timeout)) {
            Ok(line) => line,
            Err(e) => return Err(sent.err().unwrap_or(e)),
        };

        let response = match decode_frame::<PluginResponse>(&line) {
            Ok(response) => response,
            Err(_) => {
                return Err(self.handshake_mismatch(format!(
                    "not a cfops plugin, first line was '{}'",
                    excerpt(&line)
                )))
            }
        };

        match response {
            PluginResponse::HandshakeOk { protocol_version }
                if protocol_version == config.protocol_version =>
            {
                debug!(plugin = %self.plugin, protocol_version, "handshake complete");
                Ok(())
            }
            PluginResponse::HandshakeOk { protocol_version } => {
                Err(self.handshake_mismatch(format!(
                    "plugin speaks protocol version {}, expected {}",
                    protocol_version, config.protocol_version
                )))
            }
            PluginResponse::HandshakeRejected { reason } => Err(self.handshake_mismatch(reason)),
            other => Err(self.handshake_mismatch(format!(
                "unexpected handshake response '{}'",
                kind(&other)
            ))),
        }
    }

    fn dispense(&mut self, name: &str, timeout: Duration) -> Result<PluginMeta> {
        let request = PluginRequest::Dispense {
            name: name.to_string(),
        };
        match self.round_trip(Phase::Dispense, &request, Some(timeout))? {
            PluginResponse::Dispensed { meta, .. } => Ok(meta),
            PluginResponse::UnknownCapability { .. } => Err(PluginError::CapabilityNotFound {
                plugin: self.plugin.clone(),
            }),
            other => Err(self.unexpected(Phase::Dispense, &other)),
        }
    }

    /// Sends one request and waits for its response
    pub(crate) fn round_trip(
        &mut self,
        phase: Phase,
        request: &PluginRequest,
        timeout: Option<Duration>,
    ) -> Result<PluginResponse> {
        self.send(phase, request)?;
        let line = self.next_line(phase, timeout)?;
        match decode_frame::<PluginResponse>(&line) {
            Ok(PluginResponse::Error { message }) => Err(self.fail(
                phase,
                format!("plugin reported a protocol error: {}", message),
            )),
            Ok(response) => Ok(response),
            Err(e) => Err(self.fail(phase, format!("malformed frame from plugin: {}", e))),
        }
    }

    /// Marks the connection unusable after a response it cannot interpret
    pub(crate) fn unexpected(&mut self, phase: Phase, response: &PluginResponse) -> PluginError {
        self.fail(
            phase,
            format!("unexpected response '{}' from plugin", kind(response)),
        )
    }

    fn send(&mut self, phase: Phase, request: &PluginRequest) -> Result<()> {
        if self.broken.is_none() && self.process.is_terminated() {
            self.broken = Some("session terminated".to_string());
        }
        if let Some(reason) = &self.broken {
            return Err(PluginError::connection_lost(&self.plugin, phase, reason.clone()));
        }
        let Some(stdin) = self.stdin.as_mut() else {
            return Err(self.fail(phase, "plugin input already closed"));
        };
        if let Err(e) = write_frame(stdin, request) {
            return Err(self.fail(phase, format!("failed to write to plugin: {}", e)));
        }
        debug!(plugin = %self.plugin, %phase, "request sent");
        Ok(())
    }

    fn next_line(&mut self, phase: Phase, timeout: Option<Duration>) -> Result<String> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let received = match deadline {
                Some(deadline) => {
                    match self
                        .incoming
                        .recv_timeout(deadline.saturating_duration_since(Instant::now()))
                    {
                        Ok(incoming) => incoming,
                        Err(RecvTimeoutError::Timeout) => {
                            return Err(self.timed_out(phase, timeout.unwrap_or_default()))
                        }
                        Err(RecvTimeoutError::Disconnected) => Incoming::Closed,
                    }
                }
                None => self.incoming.recv().unwrap_or(Incoming::Closed),
            };

            match received {
                Incoming::Line(Ok(line)) if line.trim().is_empty() => continue,
                Incoming::Line(Ok(line)) => return Ok(line),
                Incoming::Line(Err(e)) => {
                    return Err(self.fail(phase, format!("failed to read from plugin: {}", e)))
                }
                Incoming::Terminated => return Err(self.fail(phase, "session terminated")),
                Incoming::Closed => {
                    let reason = match self.process.exit_status() {
                        Some(status) => format!("plugin process exited ({})", status),
                        None => "plugin process closed its output".to_string(),
                    };
                    return Err(self.fail(phase, reason));
                }
            }
        }
    }

    fn fail(&mut self, phase: Phase, reason: impl Into<String>) -> PluginError {
        let reason = reason.into();
        warn!(plugin = %self.plugin, %phase, %reason, "plugin connection broken");
        self.broken = Some(reason.clone());
        PluginError::connection_lost(&self.plugin, phase, reason)
    }

    fn handshake_mismatch(&mut self, reason: String) -> PluginError {
        self.broken = Some("handshake failed".to_string());
        PluginError::HandshakeMismatch {
            plugin: self.plugin.clone(),
            reason,
        }
    }

    // A late response would be taken as the answer to the next request, so
    // the subprocess cannot be reused after a timeout.
    fn timed_out(&mut self, phase: Phase, timeout: Duration) -> PluginError {
        warn!(plugin = %self.plugin, %phase, ?timeout, "plugin did not respond in time");
        self.broken = Some(format!("timed out during {}", phase));
        self.process.terminate();
        PluginError::TimedOut {
            plugin: self.plugin.clone(),
            phase,
            timeout,
        }
    }

    pub(crate) fn terminate(&mut self) {
        self.broken.get_or_insert_with(|| "session terminated".to_string());
        self.process.terminate();
        self.close();
    }

    // A grandchild holding the plugin's stdout keeps the reader blocked, so
    // it is only joined once it has finished. Otherwise it is detached and
    // exits when the pipe closes.
    fn close(&mut self) {
        drop(self.stdin.take());
        if let Some(reader) = self.reader.take() {
            if reader.is_finished() {
                let _ = reader.join();
            }
        }
    }

    pub(crate) fn plugin(&self) -> &str {
        &self.plugin
    }
}

// Closing stdin lets the plugin shut down on EOF. Killing and reaping is left
// to the session handle, which may outlive the proxy.
impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

/// Locks a shared connection, mapping poisoning to a lost connection
pub(crate) fn lock<'a>(
    connection: &'a Mutex<Connection>,
    plugin: &str,
    phase: Phase,
) -> Result<MutexGuard<'a, Connection>> {
    connection
        .lock()
        .map_err(|_| PluginError::connection_lost(plugin, phase, "session lock poisoned"))
}

fn kind(response: &PluginResponse) -> &'static str {
    match response {
        PluginResponse::HandshakeOk { .. } => "handshake_ok",
        PluginResponse::HandshakeRejected { .. } => "handshake_rejected",
        PluginResponse::Dispensed { .. } => "dispensed",
        PluginResponse::UnknownCapability { .. } => "unknown_capability",
        PluginResponse::Meta { .. } => "meta",
        PluginResponse::Done => "done",
        PluginResponse::Failed { .. } => "failed",
        PluginResponse::Error { .. } => "error",
    }
}

fn excerpt(line: &str) -> String {
    const MAX: usize = 80;
    let line = line.trim();
    match line.char_indices().nth(MAX) {
        Some((cut, _)) => format!("{}...", &line[..cut]),
        None => line.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = CallerConfig::default();
        assert_eq!(config.handshake, HANDSHAKE);
        assert_eq!(config.handshake_timeout, DEFAULT_HANDSHAKE_TIMEOUT);
        assert!(config.call_timeout.is_none());
        assert!(config.forward_stderr);
    }

    #[test]
    fn missing_executable_is_a_spawn_failure() {
        let mut caller = PluginCaller::default();
        let err = caller
            .acquire("ops-manager", "/definitely/not/a/plugin")
            .unwrap_err();

        assert!(matches!(err, PluginError::Spawn { .. }));
        assert_eq!(err.phase(), Some(Phase::Spawn));
        assert_eq!(err.plugin(), Some("ops-manager"));
        assert!(caller.registry().contains("ops-manager"));
    }

    #[test]
    fn excerpt_truncates_long_lines() {
        let long = "x".repeat(200);
        let cut = excerpt(&long);
        assert!(cut.ends_with("..."));
        assert_eq!(cut.len(), 83);
        assert_eq!(excerpt("  short \n"), "short");
    }

    #[test]
    fn response_kinds_match_wire_tags() {
        for response in [
            PluginResponse::Done,
            PluginResponse::failed("x"),
            PluginResponse::error("y"),
            PluginResponse::HandshakeOk { protocol_version: 1 },
        ] {
            let json = serde_json::to_value(&response).unwrap();
            assert_eq!(json["type"], kind(&response));
        }
    }
}
