//! CLI integration tests
//!
//! Tests the cm2 CLI using assert_cmd.

use assert_cmd::Command;
use predicates::prelude::*;

fn cm2() -> Command {
    let mut cmd = Command::cargo_bin("cm2")
        .expect("Failed to locate cm2 binary - ensure it's built before running tests");
    cmd.env_remove("CM2_SERVER");
    cmd
}

#[test]
fn test_cli_help() {
    cm2()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("cm2"))
        .stdout(predicate::str::contains("Conversational CAD client"));
}

#[test]
fn test_cli_version() {
    cm2()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("cm2"));
}

#[test]
fn test_cli_bench_help() {
    cm2()
        .args(["bench", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--ground-truth"))
        .stdout(predicate::str::contains("--case"));
}

#[test]
fn test_cli_chat_help() {
    cm2()
        .args(["chat", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("session"));
}

#[test]
fn test_cli_config_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");

    cm2()
        .arg("--config")
        .arg(&path)
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config.toml"));
}

#[test]
fn test_cli_config_init_and_show() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");

    cm2()
        .arg("--config")
        .arg(&path)
        .args(["config", "init"])
        .assert()
        .success();
    assert!(path.exists());

    cm2()
        .arg("--config")
        .arg(&path)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("server_url"))
        .stdout(predicate::str::contains("[reconnect]"));
}

#[test]
fn test_cli_config_show_without_file() {
    let dir = tempfile::tempdir().unwrap();

    cm2()
        .arg("--config")
        .arg(dir.path().join("absent.toml"))
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("http://localhost:8000"));
}

#[test]
fn test_cli_status_unreachable() {
    let dir = tempfile::tempdir().unwrap();

    cm2()
        .arg("--config")
        .arg(dir.path().join("absent.toml"))
        .args(["--server", "http://127.0.0.1:9", "status"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Backend unreachable"));
}

#[test]
fn test_cli_bench_missing_cases_file() {
    let dir = tempfile::tempdir().unwrap();

    cm2()
        .arg("--config")
        .arg(dir.path().join("absent.toml"))
        .args(["bench", "--cases"])
        .arg(dir.path().join("missing.toml"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load cases"));
}

#[test]
fn test_cli_unknown_command() {
    cm2()
        .arg("nonexistent-command")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unrecognized subcommand"));
}
