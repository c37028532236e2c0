//! CLI integration tests for cfops
//!
//! Each test gets its own plugin directory holding a copy of the noop tile
//! plugin, and an empty config file so the user's configuration never leaks in.

use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const NOOP: &str = env!("CARGO_BIN_EXE_cfops-noop-tile");

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("plugins")).unwrap();
        fs::copy(NOOP, dir.path().join("plugins").join("noop-tile")).unwrap();
        fs::write(dir.path().join("cfops.toml"), "").unwrap();
        Self { dir }
    }

    fn plugins(&self) -> PathBuf {
        self.dir.path().join("plugins")
    }

    fn backups(&self) -> PathBuf {
        self.dir.path().join("backups")
    }

    fn config(&self) -> PathBuf {
        self.dir.path().join("cfops.toml")
    }

    /// A `cfops` command isolated to this workspace
    fn cmd(&self) -> assert_cmd::Command {
        let mut cmd = assert_cmd::Command::new(assert_cmd::cargo::cargo_bin!("cfops"));
        cmd.env_remove("CFOPS_PLUGIN_DIR")
            .env_remove("CFOPS_LOG")
            .arg("--config")
            .arg(self.config())
            .arg("--plugin-dir")
            .arg(self.plugins());
        cmd
    }
}

fn marker(dir: &Path) -> PathBuf {
    dir.join("noop-tile.json")
}

// =============================================================================
// Discovery
// =============================================================================

#[test]
fn test_list_shows_noop_tile() {
    let ws = Workspace::new();

    ws.cmd()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("noop-tile"))
        .stdout(predicate::str::contains("backup-restore"));
}

#[test]
fn test_list_json() {
    let ws = Workspace::new();

    let output = ws.cmd().args(["list", "--format", "json"]).output().unwrap();
    assert!(output.status.success());

    let items: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(items.as_array().unwrap().len(), 1);
    assert_eq!(items[0]["name"], "noop-tile");
}

#[test]
fn test_list_skips_non_plugins() {
    let ws = Workspace::new();
    fs::write(ws.plugins().join("notes.txt"), "hello").unwrap();

    ws.cmd()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("noop-tile"))
        .stdout(predicate::str::contains("notes.txt").not());
}

#[cfg(unix)]
#[test]
fn test_list_skips_hanging_executable() {
    use std::os::unix::fs::PermissionsExt;

    let ws = Workspace::new();
    let hanging = ws.plugins().join("hanging");
    fs::write(&hanging, "#!/bin/sh\nsleep 30\n").unwrap();
    fs::set_permissions(&hanging, fs::Permissions::from_mode(0o755)).unwrap();
    fs::write(ws.config(), "[plugins]\nhandshake_timeout_secs = 1\n").unwrap();

    let started = std::time::Instant::now();
    ws.cmd()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("noop-tile"))
        .stdout(predicate::str::contains("hanging").not());
    assert!(started.elapsed() < std::time::Duration::from_secs(10));
}

#[test]
fn test_list_empty_directory() {
    let ws = Workspace::new();
    let empty = ws.dir.path().join("empty");
    fs::create_dir_all(&empty).unwrap();

    assert_cmd::Command::new(assert_cmd::cargo::cargo_bin!("cfops"))
        .env_remove("CFOPS_PLUGIN_DIR")
        .arg("--config")
        .arg(ws.config())
        .arg("--plugin-dir")
        .arg(&empty)
        .arg("list")
        .assert()
        .success();
}

#[test]
fn test_plugin_dir_from_env() {
    let ws = Workspace::new();

    assert_cmd::Command::new(assert_cmd::cargo::cargo_bin!("cfops"))
        .env("CFOPS_PLUGIN_DIR", ws.plugins())
        .arg("--config")
        .arg(ws.config())
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("noop-tile"));
}

#[test]
fn test_meta_prints_plugin_metadata() {
    let ws = Workspace::new();

    ws.cmd()
        .arg("meta")
        .arg(ws.plugins().join("noop-tile"))
        .assert()
        .success()
        .stdout(predicate::str::contains("Name: noop-tile"));
}

#[test]
fn test_meta_of_non_plugin_fails() {
    let ws = Workspace::new();

    ws.cmd()
        .arg("meta")
        .arg(ws.dir.path().join("does-not-exist"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to read plugin metadata"));
}

// =============================================================================
// Backup and restore
// =============================================================================

#[test]
fn test_backup_then_restore() {
    let ws = Workspace::new();

    ws.cmd()
        .args(["backup", "--tile", "noop-tile", "--destination"])
        .arg(ws.backups())
        .args(["--host", "opsman.example.com"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Backup of tile 'noop-tile' complete"));

    assert!(marker(&ws.backups()).is_file());

    ws.cmd()
        .args(["restore", "--tile", "noop-tile", "--destination"])
        .arg(ws.backups())
        .assert()
        .success()
        .stdout(predicate::str::contains("Restore of tile 'noop-tile' complete"));
}

#[test]
fn test_backup_json_output() {
    let ws = Workspace::new();

    let output = ws
        .cmd()
        .args(["--format", "json", "backup", "--tile", "noop-tile", "-d"])
        .arg(ws.backups())
        .output()
        .unwrap();
    assert!(output.status.success());

    let result: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(result["success"], true);
}

#[test]
fn test_restore_without_backup_fails() {
    let ws = Workspace::new();

    ws.cmd()
        .args(["restore", "--tile", "noop-tile", "--destination"])
        .arg(ws.backups())
        .assert()
        .failure()
        .stderr(predicate::str::contains("restore of tile 'noop-tile' failed during call"))
        .stderr(predicate::str::contains("no backup found"));
}

#[test]
fn test_unknown_tile_fails() {
    let ws = Workspace::new();

    ws.cmd()
        .args(["backup", "--tile", "mysql", "--destination"])
        .arg(ws.backups())
        .assert()
        .failure()
        .stderr(predicate::str::contains("Tile plugin not found: mysql"));
}

#[test]
fn test_crashing_tile_reports_connection_lost() {
    let ws = Workspace::new();

    ws.cmd()
        .args(["backup", "--tile", "noop-tile", "--set", "crash=true", "--destination"])
        .arg(ws.backups())
        .assert()
        .failure()
        .stderr(predicate::str::contains("connection lost during call"));
}

#[test]
fn test_timeout_flag() {
    let ws = Workspace::new();

    ws.cmd()
        .args([
            "backup",
            "--tile",
            "noop-tile",
            "--set",
            "delay_ms=5000",
            "--timeout",
            "1",
            "--destination",
        ])
        .arg(ws.backups())
        .assert()
        .failure()
        .stderr(predicate::str::contains("no response during call"));

    assert!(!marker(&ws.backups()).exists());
}

#[test]
fn test_zero_timeout_is_rejected() {
    let ws = Workspace::new();

    ws.cmd()
        .args(["backup", "--tile", "noop-tile", "--timeout", "0", "-d"])
        .arg(ws.backups())
        .assert()
        .failure();
}

// =============================================================================
// Configuration
// =============================================================================

#[test]
fn test_missing_config_file_fails() {
    let ws = Workspace::new();

    assert_cmd::Command::new(assert_cmd::cargo::cargo_bin!("cfops"))
        .arg("--config")
        .arg(ws.dir.path().join("missing.toml"))
        .arg("list")
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_config_plugin_dirs() {
    let ws = Workspace::new();
    fs::write(
        ws.config(),
        format!("plugin_dirs = [{:?}]\n", ws.plugins().display().to_string()),
    )
    .unwrap();

    assert_cmd::Command::new(assert_cmd::cargo::cargo_bin!("cfops"))
        .env_remove("CFOPS_PLUGIN_DIR")
        .arg("--config")
        .arg(ws.config())
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("noop-tile"));
}

#[test]
fn test_invalid_config_fails() {
    let ws = Workspace::new();
    fs::write(ws.config(), "[plugins]\nhandshake_timeout_secs = 0\n").unwrap();

    ws.cmd()
        .arg("list")
        .assert()
        .failure()
        .stderr(predicate::str::contains("handshake_timeout_secs"));
}
