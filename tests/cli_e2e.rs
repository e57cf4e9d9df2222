//! End-to-end CLI tests for the acquirer binary.

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn acquirer() -> Command {
    let mut cmd = Command::cargo_bin("acquirer").unwrap();
    cmd.env_remove("RUST_LOG");
    cmd
}

fn write_config(dir: &Path, body: &str) -> std::path::PathBuf {
    let path = dir.join("config.toml");
    let db_path = dir.join("acquirer.db");
    let text = format!("database_path = {:?}\n{body}", db_path.display().to_string());
    fs::write(&path, text).expect("failed to write config");
    path
}

const VALID: &str = r#"
[scheduler]
search_interval_secs = 3600

[[indexers]]
id = 1
name = "feed"
kind = "torznab"
base_url = "http://127.0.0.1:9117/api/v2.0/indexers/all/results/torznab"
api_key = "secret"

[[clients]]
id = 1
name = "qbit"
kind = "qbittorrent"
base_url = "http://127.0.0.1:8080"
username = "admin"
password = "adminadmin"

[[wanted]]
media_item_id = 7
title = "Dune"
author = "Frank Herbert"
media_type = "ebook"
"#;

#[test]
fn test_binary_help_displays_usage() {
    acquirer()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Search indexers"))
        .stdout(predicate::str::contains("check-config"));
}

#[test]
fn test_binary_version_displays_version() {
    acquirer()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("acquirer"));
}

#[test]
fn test_binary_without_subcommand_fails() {
    acquirer().assert().failure();
}

#[test]
fn test_binary_invalid_flag_returns_error() {
    acquirer()
        .arg("--invalid-flag")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

#[test]
fn test_check_config_prints_summary() {
    let dir = TempDir::new().expect("failed to create temp dir");
    let config = write_config(dir.path(), VALID);

    acquirer()
        .arg("--config")
        .arg(&config)
        .arg("check-config")
        .assert()
        .success()
        .stdout(predicate::str::contains("indexers = 1"))
        .stdout(predicate::str::contains("[1] feed (torznab, priority 25)"))
        .stdout(predicate::str::contains("clients = 1"))
        .stdout(predicate::str::contains("wanted = 1"))
        .stdout(predicate::str::contains("config OK"));
}

#[test]
fn test_check_config_rejects_duplicate_indexer_ids() {
    let dir = TempDir::new().expect("failed to create temp dir");
    let body = r#"
[[indexers]]
id = 1
name = "a"
kind = "scrape"
base_url = "http://127.0.0.1:1"

[[indexers]]
id = 1
name = "b"
kind = "scrape"
base_url = "http://127.0.0.1:2"
"#;
    let config = write_config(dir.path(), body);

    acquirer()
        .arg("--config")
        .arg(&config)
        .arg("check-config")
        .assert()
        .failure()
        .stderr(predicate::str::contains("duplicate indexer id 1"));
}

#[test]
fn test_unknown_config_key_is_a_syntax_error() {
    let dir = TempDir::new().expect("failed to create temp dir");
    let config = write_config(dir.path(), "colour = \"blue\"\n");

    acquirer()
        .arg("--config")
        .arg(&config)
        .arg("check-config")
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid config syntax"));
}

#[test]
fn test_missing_explicit_config_fails() {
    let dir = TempDir::new().expect("failed to create temp dir");

    acquirer()
        .arg("--config")
        .arg(dir.path().join("absent.toml"))
        .arg("check-config")
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot read config file"));
}

#[test]
fn test_sync_on_empty_store_reports_zero() {
    let dir = TempDir::new().expect("failed to create temp dir");
    let config = write_config(dir.path(), "");

    acquirer()
        .arg("--config")
        .arg(&config)
        .arg("sync")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "checked 0, updated 0, completed 0, failed 0, errors 0",
        ));
    assert!(dir.path().join("acquirer.db").exists());
}

#[test]
fn test_search_without_indexers_says_so() {
    let dir = TempDir::new().expect("failed to create temp dir");
    let config = write_config(dir.path(), "");

    acquirer()
        .arg("--config")
        .arg(&config)
        .args(["search", "Dune", "--author", "Frank Herbert"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No enabled indexers configured."));
}
