//! CLI integration tests
//!
//! Tests the devmanager CLI using assert_cmd. Every test points the binary
//! at its own configuration file so nothing touches the real user config.

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn devmanager() -> Command {
    Command::cargo_bin("devmanager")
        .expect("Failed to locate devmanager binary - ensure it's built before running tests")
}

/// A config file whose token slot and install dirs live in `dir`
fn isolated_config(dir: &Path) -> PathBuf {
    let path = dir.join("config.toml");
    let content = format!(
        "[launcher]\ninstall_dir = '{}'\n\n[worker]\ninstall_dir = '{}'\n\n[token]\npath = '{}'\n",
        dir.join("apps/DevManager").display(),
        dir.join("apps/DevAutomator").display(),
        dir.join("auth_token.json").display(),
    );
    std::fs::write(&path, content).unwrap();
    path
}

/// Run `devmanager token mint` and return the plaintext
fn mint(config: &Path) -> String {
    let output = devmanager()
        .arg("-q")
        .arg("--config")
        .arg(config)
        .args(["token", "mint"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let token = String::from_utf8(output.stdout).unwrap().trim().to_string();
    assert_eq!(token.len(), 64);
    token
}

#[test]
fn test_cli_help() {
    devmanager()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("devmanager"))
        .stdout(predicate::str::contains("Self-updating launcher"))
        .stdout(predicate::str::contains("apply-update").not());
}

#[test]
fn test_cli_version() {
    devmanager()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("devmanager"));
}

#[test]
fn test_cli_token_help() {
    devmanager()
        .args(["token", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("mint"))
        .stdout(predicate::str::contains("redeem"));
}

#[test]
fn test_cli_unknown_command() {
    devmanager()
        .arg("nonexistent-command")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unrecognized subcommand"));
}

#[test]
fn test_cli_token_single_use() {
    let dir = TempDir::new().unwrap();
    let config = isolated_config(dir.path());
    let token = mint(&config);

    devmanager()
        .arg("--config")
        .arg(&config)
        .args(["token", "verify", &token])
        .assert()
        .success()
        .stdout(predicate::str::contains("Token is valid"));

    devmanager()
        .arg("--config")
        .arg(&config)
        .args(["token", "redeem", &token])
        .assert()
        .success()
        .stdout(predicate::str::contains("Token redeemed"));

    devmanager()
        .arg("--config")
        .arg(&config)
        .args(["token", "redeem", &token])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("already been used"));
}

#[test]
fn test_cli_second_mint_invalidates_first() {
    let dir = TempDir::new().unwrap();
    let config = isolated_config(dir.path());
    let first = mint(&config);
    let second = mint(&config);

    devmanager()
        .arg("--config")
        .arg(&config)
        .args(["token", "verify", &first])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Invalid token"));

    devmanager()
        .arg("--config")
        .arg(&config)
        .args(["token", "verify", &second])
        .assert()
        .success();
}

#[test]
fn test_cli_token_without_slot() {
    let dir = TempDir::new().unwrap();
    let config = isolated_config(dir.path());

    devmanager()
        .arg("--config")
        .arg(&config)
        .args(["token", "verify", "deadbeef"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("No token has been issued"));

    devmanager()
        .arg("--config")
        .arg(&config)
        .args(["token", "revoke"])
        .assert()
        .success();
}

#[test]
fn test_cli_token_info_and_revoke() {
    let dir = TempDir::new().unwrap();
    let config = isolated_config(dir.path());
    let token = mint(&config);

    devmanager()
        .arg("--config")
        .arg(&config)
        .args(["token", "info"])
        .assert()
        .success()
        .stdout(predicate::str::contains("State: active"))
        .stdout(predicate::str::contains(&token).not());

    devmanager()
        .arg("--config")
        .arg(&config)
        .args(["token", "revoke"])
        .assert()
        .success();
    assert!(!dir.path().join("auth_token.json").exists());

    devmanager()
        .arg("--config")
        .arg(&config)
        .args(["token", "info"])
        .assert()
        .success()
        .stderr(predicate::str::contains("No token has been issued"));
}

#[test]
fn test_cli_developer_mode() {
    let dir = TempDir::new().unwrap();
    let config = isolated_config(dir.path());
    let token = mint(&config);

    devmanager()
        .arg("--config")
        .arg(&config)
        .args(["--token", &token])
        .assert()
        .success()
        .stdout(predicate::str::contains("Developer mode unlocked"))
        .stdout(predicate::str::contains("DevAutomator"));

    // Replay is refused
    devmanager()
        .arg("--config")
        .arg(&config)
        .args(["--token", &token])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("already been used"));
}

#[test]
fn test_cli_status() {
    let dir = TempDir::new().unwrap();
    let config = isolated_config(dir.path());

    devmanager()
        .arg("--config")
        .arg(&config)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("DevManager"))
        .stdout(predicate::str::contains("not installed"));
}

#[test]
fn test_cli_config_init_and_get() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("nested").join("config.toml");

    devmanager()
        .arg("--config")
        .arg(&config)
        .args(["config", "init"])
        .assert()
        .success();
    assert!(config.exists());

    devmanager()
        .arg("--config")
        .arg(&config)
        .args(["config", "get", "feed.owner"])
        .assert()
        .success()
        .stdout(predicate::str::contains("cyberionsoft"));

    devmanager()
        .arg("--config")
        .arg(&config)
        .args(["config", "get", "feed.nonexistent"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Key not found"));

    // A second init keeps the file
    devmanager()
        .arg("--config")
        .arg(&config)
        .args(["config", "init"])
        .assert()
        .success()
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn test_cli_config_set() {
    let dir = TempDir::new().unwrap();
    let config = isolated_config(dir.path());

    devmanager()
        .arg("--config")
        .arg(&config)
        .args(["config", "set", "update.max_attempts", "5"])
        .assert()
        .success();

    devmanager()
        .arg("--config")
        .arg(&config)
        .args(["config", "get", "update.max_attempts"])
        .assert()
        .success()
        .stdout(predicate::str::contains("5"));

    devmanager()
        .arg("--config")
        .arg(&config)
        .args(["config", "set", "update.max_attempts", "0"])
        .assert()
        .failure();
}

#[test]
fn test_cli_config_path() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("custom.toml");

    devmanager()
        .arg("--config")
        .arg(&config)
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("custom.toml"));
}

#[test]
fn test_cli_apply_update_missing_plan() {
    let dir = TempDir::new().unwrap();
    let config = isolated_config(dir.path());

    devmanager()
        .arg("--config")
        .arg(&config)
        .args(["apply-update", "--plan"])
        .arg(dir.path().join("missing_plan.json"))
        .assert()
        .code(1);
}
