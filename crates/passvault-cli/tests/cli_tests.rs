//! Integration tests for the `passvault` CLI binary.
//!
//! These run the CLI as a subprocess against an address where nothing is
//! listening, so they cover argument parsing, local validation and error
//! reporting without a server.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::path::Path;
use std::process::Command;

fn passvault_bin() -> String {
    let path = env!("CARGO_BIN_EXE_passvault");
    assert!(
        Path::new(path).exists(),
        "passvault binary not found at {path}"
    );
    path.to_owned()
}

/// Run passvault with args and return (`exit_code`, stdout, stderr).
fn run(args: &[&str], token: Option<&str>) -> (i32, String, String) {
    let mut command = Command::new(passvault_bin());
    command
        .args(args)
        .env("PASSVAULT_ADDR", "http://127.0.0.1:19998")
        .env_remove("PASSVAULT_TOKEN")
        .env_remove("PASSVAULT_EXPORT_PASSWORD");
    if let Some(token) = token {
        command.env("PASSVAULT_TOKEN", token);
    }
    let output = command.output().expect("failed to execute passvault");

    let code = output.status.code().unwrap_or(-1);
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (code, stdout, stderr)
}

// ── Version & help ───────────────────────────────────────────────────

#[test]
fn test_version_flag() {
    let (code, stdout, _) = run(&["--version"], None);
    assert_eq!(code, 0, "passvault --version should exit 0");
    assert!(stdout.contains("passvault"), "unexpected version: {stdout}");
}

#[test]
fn test_help_lists_commands() {
    let (code, stdout, _) = run(&["--help"], None);
    assert_eq!(code, 0);
    assert!(stdout.contains("PassVault CLI"));
    for command in ["status", "tracks", "export", "verify", "import", "backup"] {
        assert!(stdout.contains(command), "help should list '{command}'");
    }
}

#[test]
fn test_tracks_help() {
    let (code, stdout, _) = run(&["tracks", "--help"], None);
    assert_eq!(code, 0);
    for action in ["list", "unlock", "delete", "clear"] {
        assert!(stdout.contains(action), "tracks help should list '{action}'");
    }
}

// ── Local validation ─────────────────────────────────────────────────

#[test]
fn test_missing_token_is_reported() {
    let (code, _, stderr) = run(&["tracks", "list"], None);
    assert_ne!(code, 0);
    assert!(
        stderr.contains("PASSVAULT_TOKEN"),
        "should mention the token variable: {stderr}"
    );
}

#[test]
fn test_verify_rejects_paths() {
    let (code, _, stderr) = run(&["verify", "../etc/passwd"], Some("t"));
    assert_ne!(code, 0);
    assert!(
        stderr.contains("not a plain file name"),
        "should reject path: {stderr}"
    );
}

#[test]
fn test_unlock_requires_numeric_id() {
    let (code, _, stderr) = run(&["tracks", "unlock", "abc"], Some("t"));
    assert_ne!(code, 0);
    assert!(stderr.contains("invalid value"), "clap error expected: {stderr}");
}

// ── Unreachable server ───────────────────────────────────────────────

#[test]
fn test_status_without_server_fails_cleanly() {
    let (code, _, stderr) = run(&["status"], None);
    assert_ne!(code, 0);
    assert!(
        stderr.contains("request failed"),
        "should report connection failure: {stderr}"
    );
}
