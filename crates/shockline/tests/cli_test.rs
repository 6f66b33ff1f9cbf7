//! Integration tests for the `shockline` binary.
//!
//! Argument parsing, config management, and the backend-bound commands
//! against a mocked OpenShock API.
#![allow(clippy::unwrap_used)]

use std::path::Path;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ── Helpers ─────────────────────────────────────────────────────────

/// Build a [`Command`] for the binary with env isolation: every
/// `SHOCKLINE_*` variable is cleared and the config file lives at `config`.
fn shockline_cmd(config: &Path) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("shockline");
    cmd.env("SHOCKLINE_CONFIG", config)
        .env("NO_COLOR", "1")
        .env_remove("SHOCKLINE_BACKEND")
        .env_remove("SHOCKLINE_TOKEN")
        .env_remove("SHOCKLINE_OUTPUT")
        .env_remove("SHOCKLINE_TIMEOUT")
        .env_remove("SHOCKLINE_TOKEN_ENV")
        .env_remove("SHOCKLINE_PRESENCE")
        .env_remove("SHOCKLINE_REFRESH_INTERVAL")
        .env_remove("SHOCKLINE_LOG_LEVEL")
        .env_remove("RUST_LOG");
    cmd
}

fn combined_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{stdout}{stderr}")
}

async fn mock_roster(server: &MockServer, body: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path("/1/shockers/own"))
        .and(header("OpenShockToken", "test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn no_args_shows_help() {
    let dir = tempfile::tempdir().unwrap();
    let output = shockline_cmd(&dir.path().join("config.toml"))
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("Usage"));
}

#[test]
fn help_lists_commands() {
    let dir = tempfile::tempdir().unwrap();
    shockline_cmd(&dir.path().join("config.toml"))
        .arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("run")
                .and(predicate::str::contains("status"))
                .and(predicate::str::contains("devices"))
                .and(predicate::str::contains("config")),
        );
}

#[test]
fn completions_bash() {
    let dir = tempfile::tempdir().unwrap();
    shockline_cmd(&dir.path().join("config.toml"))
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("shockline"));
}

// ── Config management ───────────────────────────────────────────────

#[test]
fn config_path_honors_override() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("custom.toml");
    shockline_cmd(&config)
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("custom.toml"));
}

#[test]
fn config_set_then_show() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.toml");

    shockline_cmd(&config)
        .args(["config", "set", "refresh_interval", "0"])
        .assert()
        .success();
    assert!(config.exists());

    let output = shockline_cmd(&config)
        .args(["-o", "json", "config", "show"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let shown: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(shown["refresh_interval"], 0);
    assert_eq!(shown["backend"], "https://api.openshock.app");
}

#[test]
fn config_show_masks_plaintext_token() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.toml");
    std::fs::write(&config, "token = \"very-secret\"\n").unwrap();

    shockline_cmd(&config)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("****")
                .and(predicate::str::contains("very-secret").not())
                .and(predicate::str::contains("token source: config file")),
        );
}

#[test]
fn config_set_unknown_key_is_usage_error() {
    let dir = tempfile::tempdir().unwrap();
    shockline_cmd(&dir.path().join("config.toml"))
        .args(["config", "set", "colour", "red"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("unknown config key"));
}

// ── Backend-bound commands ──────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn devices_lists_roster_as_json() {
    let server = MockServer::start().await;
    let hub = Uuid::new_v4();
    mock_roster(
        &server,
        json!({
            "message": "",
            "data": [{
                "id": hub,
                "name": "Desk hub",
                "shockers": [{ "id": Uuid::new_v4(), "name": "Left", "rfId": 4, "model": "CaiXianlin" }]
            }]
        }),
    )
    .await;

    let dir = tempfile::tempdir().unwrap();
    let output = shockline_cmd(&dir.path().join("config.toml"))
        .args(["--backend", &server.uri(), "--token", "test-token"])
        .args(["-o", "json", "devices"])
        .output()
        .unwrap();

    assert!(output.status.success(), "{}", combined_output(&output));
    let devices: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(devices[0]["id"], hub.to_string());
    assert_eq!(devices[0]["name"], "Desk hub");
    assert_eq!(devices[0]["shockers"][0]["name"], "Left");
}

#[tokio::test(flavor = "multi_thread")]
async fn devices_sync_writes_shocker_preferences() {
    let server = MockServer::start().await;
    let shocker = Uuid::new_v4();
    mock_roster(
        &server,
        json!({
            "data": [{
                "id": Uuid::new_v4(),
                "name": "Hub",
                "shockers": [{ "id": shocker, "name": "Left", "rfId": 4, "model": "Petrainer" }]
            }]
        }),
    )
    .await;

    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.toml");
    shockline_cmd(&config)
        .args(["--backend", &server.uri(), "--token", "test-token"])
        .args(["-o", "plain", "devices", "--sync"])
        .assert()
        .success()
        .stderr(predicate::str::contains("1 added"));

    let written = std::fs::read_to_string(&config).unwrap();
    assert!(written.contains(&shocker.to_string()));
    assert!(written.contains("enabled = true"));
}

#[tokio::test(flavor = "multi_thread")]
async fn status_with_empty_roster_reports_ok() {
    let server = MockServer::start().await;
    mock_roster(&server, json!({ "data": [] })).await;

    let dir = tempfile::tempdir().unwrap();
    let output = shockline_cmd(&dir.path().join("config.toml"))
        .args(["--backend", &server.uri(), "--token", "test-token"])
        .args(["-o", "json", "status", "--settle", "0"])
        .output()
        .unwrap();

    assert!(output.status.success(), "{}", combined_output(&output));
    let status: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(status["auth"], "ok");
    assert_eq!(status["report"]["outcome"]["outcome"], "completed");
    assert_eq!(status["connections"], json!([]));
}

#[tokio::test(flavor = "multi_thread")]
async fn status_with_rejected_token_exits_with_auth_code() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/1/shockers/own"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    shockline_cmd(&dir.path().join("config.toml"))
        .args(["--backend", &server.uri(), "--token", "bad-token"])
        .args(["status", "--settle", "0"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("rejected the API token"));
}

#[test]
fn invalid_backend_is_usage_error() {
    let dir = tempfile::tempdir().unwrap();
    shockline_cmd(&dir.path().join("config.toml"))
        .args(["--backend", "ftp://example.org", "--token", "t", "devices"])
        .assert()
        .code(2);
}
