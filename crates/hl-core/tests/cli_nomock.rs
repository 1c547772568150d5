//! End-to-end runs of the `hostlog` binary against temp directories.

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::TempDir;

fn hostlog(home: &Path) -> Command {
    let mut cmd = Command::cargo_bin("hostlog").unwrap();
    cmd.env_remove("HOSTLOG_CONFIG")
        .env_remove("HOSTLOG_CONFIG_DIR")
        .env_remove("HOSTLOG_BASE_DIR")
        .env_remove("HOSTLOG_LOG_FILE")
        .env_remove("HOSTLOG_PASSPHRASE")
        .env("XDG_CONFIG_HOME", home.join("xdg"))
        .env("HOSTLOG_LOG", "warn");
    cmd
}

fn seed_hardware(base: &Path) {
    let dir = base.join("cache").join("Hardware");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("20240105100000_000000.json"),
        r#"{"kind":"hardware","timestamp":"2024-01-05T10:00:00","payload":{"cpu_util":12.5}}"#,
    )
    .unwrap();
}

#[test]
fn test_version_prints_crate_version() {
    let home = TempDir::new().unwrap();
    hostlog(home.path())
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(concat!("hostlog ", env!("CARGO_PKG_VERSION"))));
}

#[test]
fn test_config_masks_secrets() {
    let home = TempDir::new().unwrap();
    let path = home.path().join("hostlog.toml");
    std::fs::write(
        &path,
        r#"
[report]
passphrase = "report-secret"

[[delivery.senders]]
host = "smtp.example.com"
port = 465
identity = "agent@example.com"
secret = "hunter2"
"#,
    )
    .unwrap();

    hostlog(home.path())
        .arg("--config")
        .arg(&path)
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("smtp.example.com"))
        .stdout(predicate::str::contains("********"))
        .stdout(predicate::str::contains("hunter2").not())
        .stdout(predicate::str::contains("report-secret").not());
}

#[test]
fn test_missing_config_file_is_config_error() {
    let home = TempDir::new().unwrap();
    hostlog(home.path())
        .arg("--config")
        .arg(home.path().join("nope.toml"))
        .arg("config")
        .assert()
        .code(11);
}

#[test]
fn test_invalid_config_is_config_error() {
    let home = TempDir::new().unwrap();
    let path = home.path().join("hostlog.toml");
    std::fs::write(&path, "[delivery]\nmax_retries = 0\n").unwrap();
    hostlog(home.path())
        .arg("--config")
        .arg(&path)
        .arg("config")
        .assert()
        .code(11);
}

#[test]
fn test_rollup_then_decrypt() {
    let home = TempDir::new().unwrap();
    let base = home.path().join("base");
    seed_hardware(&base);

    hostlog(home.path())
        .arg("--base-dir")
        .arg(&base)
        .arg("rollup")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"status\": \"sealed\""))
        .stdout(predicate::str::contains("2024-01-05"));

    let artifacts: Vec<_> = std::fs::read_dir(base.join("Hardware"))
        .unwrap()
        .filter_map(Result::ok)
        .map(|e| e.path())
        .collect();
    assert_eq!(artifacts.len(), 1);
    assert!(std::fs::read_dir(base.join("cache").join("Hardware"))
        .unwrap()
        .next()
        .is_none());

    let out = home.path().join("report.json");
    hostlog(home.path())
        .arg("--base-dir")
        .arg(&base)
        .arg("decrypt")
        .arg(&artifacts[0])
        .arg("--out")
        .arg(&out)
        .assert()
        .success();
    let doc: serde_json::Value = serde_json::from_slice(&std::fs::read(&out).unwrap()).unwrap();
    assert_eq!(doc["record_count"], 1);
    assert_eq!(doc["day"], "2024-01-05");
    assert_eq!(doc["table"]["columns"][1], "cpu_util");

    hostlog(home.path())
        .arg("decrypt")
        .arg(&artifacts[0])
        .arg("--passphrase")
        .arg("wrong")
        .assert()
        .code(21);
}

#[test]
fn test_deliver_with_sentinel_recipient_is_disabled() {
    let home = TempDir::new().unwrap();
    let base = home.path().join("base");
    std::fs::create_dir_all(&base).unwrap();
    std::fs::write(base.join("recipient.conf"), "do not send\n").unwrap();

    hostlog(home.path())
        .arg("--base-dir")
        .arg(&base)
        .arg("deliver")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"status\": \"disabled\""));
}

#[test]
fn test_deliver_without_recipient_file_is_not_disabled() {
    let home = TempDir::new().unwrap();
    let base = home.path().join("base");
    let config = home.path().join("hostlog.toml");
    // Nothing listens on port 1, so the cycle stops at the network check.
    std::fs::write(
        &config,
        "[delivery]\nprobe_address = \"127.0.0.1:1\"\nprobe_timeout_secs = 1\n",
    )
    .unwrap();

    hostlog(home.path())
        .arg("--config")
        .arg(&config)
        .arg("--base-dir")
        .arg(&base)
        .arg("deliver")
        .assert()
        .code(3)
        .stdout(predicate::str::contains("\"status\": \"offline\""));
}

#[test]
fn test_unknown_subcommand_is_args_error() {
    Command::cargo_bin("hostlog")
        .unwrap()
        .arg("frobnicate")
        .assert()
        .code(10);
}
