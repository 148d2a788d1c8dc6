//! Tests for the `gsm` binary against an isolated settings/status pair.
//!
//! Only paths that need no live server are covered here; supervisor
//! behaviour with real processes is tested in gsm-core.

use serde_json::{json, Value};
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

fn create_test_env() -> TempDir {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    std::fs::create_dir_all(temp_dir.path().join("servers/alpha")).unwrap();

    let settings = json!({
        "paths": {
            "servers": temp_dir.path().join("servers"),
            "config": temp_dir.path().join("config"),
        },
        "supervisor": {
            "launch_mode": "foreground",
            "stop_timeout_secs": 1,
        },
    });
    std::fs::write(
        temp_dir.path().join("settings.json"),
        serde_json::to_vec_pretty(&settings).unwrap(),
    )
    .unwrap();
    temp_dir
}

fn gsm(env: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_gsm"))
        .arg("--settings")
        .arg(env.join("settings.json"))
        .arg("--status-file")
        .arg(env.join("status.json"))
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to run gsm")
}

fn stdout_json(output: &Output) -> Value {
    serde_json::from_slice(&output.stdout).unwrap_or_else(|e| {
        panic!(
            "stdout is not JSON ({}): {}",
            e,
            String::from_utf8_lossy(&output.stdout)
        )
    })
}

#[test]
fn test_status_of_unknown_server() {
    let env = create_test_env();
    let output = gsm(env.path(), &["status", "alpha"]);

    assert!(output.status.success());
    assert_eq!(
        stdout_json(&output),
        json!({ "name": "alpha", "status": null, "running": false })
    );
}

#[test]
fn test_stop_when_not_running() {
    let env = create_test_env();
    let output = gsm(env.path(), &["stop", "alpha"]);

    assert!(output.status.success());
    assert_eq!(stdout_json(&output)["outcome"], "not_running");
    // Nothing ran, so no status was written
    assert!(!env.path().join("status.json").exists());
}

#[test]
fn test_send_when_not_running_exits_with_code_3() {
    let env = create_test_env();
    let output = gsm(env.path(), &["send", "alpha", "say", "hi"]);

    assert_eq!(output.status.code(), Some(3));
    assert!(output.stdout.is_empty());
}

#[test]
fn test_info_when_not_running() {
    let env = create_test_env();
    let output = gsm(env.path(), &["info", "alpha"]);

    assert!(output.status.success());
    assert_eq!(stdout_json(&output)["running"], false);
}

#[test]
fn test_run_with_missing_install_fails() {
    let env = create_test_env();
    let output = gsm(env.path(), &["run", "missing"]);

    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
}

#[test]
fn test_invalid_settings_file_is_a_config_error() {
    let env = create_test_env();
    std::fs::write(env.path().join("settings.json"), "[1, 2]").unwrap();
    let output = gsm(env.path(), &["status", "alpha"]);

    assert_eq!(output.status.code(), Some(2));
}
