//! Plugin discovery
//!
//! Every executable file in a plugin directory is a candidate. A candidate is
//! queried with `plugin-meta`; anything that does not answer with a metadata
//! line is skipped. Plugins are indexed by the tile name they report, and the
//! first directory to provide a name wins. A candidate that does not exit
//! within the metadata timeout is killed and skipped.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::capability::PluginMeta;
use super::error::{PluginError, Result};
use super::protocol::PLUGIN_META_ARG;

/// A plugin found on disk
#[derive(Debug, Clone)]
pub struct PluginInfo {
    /// Path to the plugin executable
    pub path: PathBuf,

    /// Metadata reported by the executable
    pub meta: PluginMeta,
}

impl PluginInfo {
    pub fn name(&self) -> &str {
        &self.meta.name
    }
}

/// Default bound on a `plugin-meta` query
pub const DEFAULT_METADATA_TIMEOUT: Duration = Duration::from_secs(10);

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug)]
pub struct PluginLoader {
    plugins: BTreeMap<String, PluginInfo>,
    plugin_dirs: Vec<PathBuf>,
    metadata_timeout: Duration,
}

impl Default for PluginLoader {
    fn default() -> Self {
        Self {
            plugins: BTreeMap::new(),
            plugin_dirs: Vec::new(),
            metadata_timeout: DEFAULT_METADATA_TIMEOUT,
        }
    }
}

impl PluginLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bounds how long each candidate may take to print its metadata
    pub fn set_metadata_timeout(&mut self, timeout: Duration) {
        self.metadata_timeout = timeout;
    }

    pub fn metadata_timeout(&self) -> Duration {
        self.metadata_timeout
    }

    /// Adds a directory to search, after the ones already added
    pub fn add_plugin_dir(&mut self, dir: impl Into<PathBuf>) {
        self.plugin_dirs.push(dir.into());
    }

    pub fn plugin_dirs(&self) -> &[PathBuf] {
        &self.plugin_dirs
    }

    /// Rescans all plugin directories
    pub fn discover(&mut self) {
        self.plugins.clear();
        for dir in self.plugin_dirs.clone() {
            self.scan_directory(&dir);
        }
        debug!(count = self.plugins.len(), "plugin discovery finished");
    }

    fn scan_directory(&mut self, dir: &Path) {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(dir = %dir.display(), error = %e, "skipping plugin directory");
                return;
            }
        };

        let mut paths: Vec<PathBuf> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| is_executable(path))
            .collect();
        paths.sort();

        for path in paths {
            let meta = match read_metadata_within(&path, self.metadata_timeout) {
                Ok(meta) => meta,
                Err(e) => {
                    warn!(error = %e, "skipping executable that is not a plugin");
                    continue;
                }
            };

            if let Some(existing) = self.plugins.get(&meta.name) {
                warn!(
                    plugin = %meta.name,
                    kept = %existing.path.display(),
                    ignored = %path.display(),
                    "duplicate plugin name"
                );
                continue;
            }
            debug!(plugin = %meta.name, path = %path.display(), "discovered plugin");
            self.plugins
                .insert(meta.name.clone(), PluginInfo { path, meta });
        }
    }

    /// Discovered plugins, sorted by name
    pub fn list(&self) -> Vec<&PluginInfo> {
        self.plugins.values().collect()
    }

    pub fn get(&self, name: &str) -> Option<&PluginInfo> {
        self.plugins.get(name)
    }
}

/// Runs `path plugin-meta` and parses the line it prints
pub fn read_metadata(path: impl AsRef<Path>) -> Result<PluginMeta> {
    read_metadata_within(path, DEFAULT_METADATA_TIMEOUT)
}

/// Like [`read_metadata`], killing the executable if it has not exited by `timeout`
pub fn read_metadata_within(path: impl AsRef<Path>, timeout: Duration) -> Result<PluginMeta> {
    let path = path.as_ref();
    let metadata_error = |reason: String| PluginError::Metadata {
        path: path.to_path_buf(),
        reason,
    };

    let mut child = Command::new(path)
        .arg(PLUGIN_META_ARG)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| metadata_error(e.to_string()))?;

    let stdout = collect(child.stdout.take());
    let stderr = collect(child.stderr.take());
    let deadline = Instant::now() + timeout;

    let status = match wait_until(&mut child, deadline) {
        Ok(Some(status)) => status,
        Ok(None) => {
            let _ = child.kill();
            let _ = child.wait();
            debug!(path = %path.display(), ?timeout, "metadata query killed");
            return Err(metadata_error(format!("did not exit within {:?}", timeout)));
        }
        Err(e) => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(metadata_error(e.to_string()));
        }
    };

    // The pipes stay open while a background child of the plugin holds them.
    let grace = deadline
        .saturating_duration_since(Instant::now())
        .max(Duration::from_millis(100));
    if !status.success() {
        let stderr = stderr.recv_timeout(grace).unwrap_or_default();
        return Err(metadata_error(format!(
            "exited with {}: {}",
            status,
            String::from_utf8_lossy(&stderr).trim()
        )));
    }

    let stdout = stdout
        .recv_timeout(grace)
        .map_err(|_| metadata_error("output was not closed after exit".to_string()))?;
    let stdout = String::from_utf8_lossy(&stdout);
    let line = stdout
        .lines()
        .find(|line| !line.trim().is_empty())
        .ok_or_else(|| metadata_error("printed no metadata".to_string()))?;
    let meta: PluginMeta = serde_json::from_str(line)
        .map_err(|e| metadata_error(format!("invalid metadata: {}", e)))?;
    if meta.name.is_empty() {
        return Err(metadata_error("metadata has an empty name".to_string()));
    }
    Ok(meta)
}

/// Reads a pipe to the end on its own thread
fn collect(pipe: Option<impl Read + Send + 'static>) -> Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    if let Some(mut pipe) = pipe {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            let _ = tx.send(buf);
        });
    }
    rx
}

fn wait_until(child: &mut Child, deadline: Instant) -> std::io::Result<Option<ExitStatus>> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(None);
        }
        thread::sleep(EXIT_POLL_INTERVAL.min(deadline - now));
    }
}

fn is_executable(path: &Path) -> bool {
    if !path.is_file() {
        return false;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(meta) = path.metadata() {
            return meta.permissions().mode() & 0o111 != 0;
        }
    }

    #[cfg(windows)]
    {
        if let Some(ext) = path.extension() {
            return ext == "exe";
        }
    }

    false
}
