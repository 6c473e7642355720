//! CLI integration tests for the leasegate binary.
//!
//! Each test uses an isolated temp directory, ensuring tests can run in
//! parallel safely.

#![allow(deprecated)] // Command::cargo_bin deprecation only affects custom build dirs

mod common;

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use assert_fs::TempDir;
use common::{ALICE, BOB, REPO, TestServer};
use leasegate::store::{EmbeddedStore, LeaseStore};
use predicates::prelude::*;
use serde_json::Value;

const VALID_CONFIG: &str = r#"
[server]
host = "127.0.0.1"
port = 4929

[leases]
ttl_secs = 120
commit_recovery = "manual"

[store]
backend = "embedded"

[repositories."repo.example.org"]
keys = [{ id = "alice", secret = "s3cret" }, { id = "bob", secret = "t0ps3cret" }]

[repositories."other.example.org"]
keys = [{ id = "carol", secret = "hunter2" }]
"#;

struct TestContext {
    temp_dir: TempDir,
}

impl TestContext {
    fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("failed to create temp dir"),
        }
    }

    fn data_dir(&self) -> &Path {
        self.temp_dir.path()
    }

    fn write_config(&self, content: &str) -> PathBuf {
        let path = self.data_dir().join("leasegate.toml");
        std::fs::write(&path, content).expect("write config");
        path
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("leasegate").expect("failed to find binary");
        cmd.env("NO_COLOR", "1")
            .env_remove("LEASEGATE_CONFIG")
            .env_remove("LEASEGATE_KEY_ID")
            .env_remove("LEASEGATE_SECRET")
            .env_remove("LEASEGATE_SERVER");
        cmd
    }
}

#[test]
fn test_config_check_accepts_valid_file() {
    let ctx = TestContext::new();
    let config = ctx.write_config(VALID_CONFIG);

    ctx.cmd()
        .args(["config", "check", "--config"])
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("is valid"))
        .stdout(predicate::str::contains("Repositories: 2 (3 keys)"))
        .stdout(predicate::str::contains("Manual"));
}

#[test]
fn test_config_check_rejects_duplicate_key_ids() {
    let ctx = TestContext::new();
    let config = ctx.write_config(
        r#"
[repositories.a]
keys = [{ id = "shared", secret = "x" }]

[repositories.b]
keys = [{ id = "shared", secret = "y" }]
"#,
    );

    ctx.cmd()
        .args(["config", "check", "--config"])
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("duplicate key id shared"));
}

#[test]
fn test_config_check_rejects_zero_ttl() {
    let ctx = TestContext::new();
    let config = ctx.write_config("[leases]\nttl_secs = 0\n");

    ctx.cmd()
        .args(["config", "check", "--config"])
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("ttl_secs"));
}

#[test]
fn test_config_check_missing_file() {
    let ctx = TestContext::new();

    ctx.cmd()
        .args(["config", "check", "--config"])
        .arg(ctx.data_dir().join("absent.toml"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot read"));
}

#[test]
fn test_admin_compact_requires_journal() {
    let ctx = TestContext::new();

    ctx.cmd()
        .args(["admin", "compact", "--data-dir"])
        .arg(ctx.data_dir())
        .assert()
        .failure()
        .stderr(predicate::str::contains("No lease journal"));
}

#[tokio::test]
async fn test_admin_compact_keeps_live_leases() {
    let ctx = TestContext::new();
    let journal = ctx.data_dir().join("leases.db");

    let store = EmbeddedStore::open(&journal).unwrap();
    let engine_config = std::sync::Arc::new(common::test_config());
    let engine = leasegate::lease::LeaseEngine::new(
        engine_config,
        std::sync::Arc::new(store),
        std::sync::Arc::new(leasegate::lease::NoopPublisher),
    );
    let kept = engine.acquire(REPO, "/kept", "alice").await.unwrap();
    let dropped = engine.acquire(REPO, "/dropped", "alice").await.unwrap();
    engine.cancel(&dropped.token, "alice").await.unwrap();
    engine.store().close().await.unwrap();
    drop(engine);

    ctx.cmd()
        .args(["admin", "compact", "--data-dir"])
        .arg(ctx.data_dir())
        .assert()
        .success()
        .stdout(predicate::str::contains("to 1 rows"));

    let reopened = EmbeddedStore::open(&journal).unwrap();
    assert!(reopened.get(&kept.token).await.is_ok());
    assert!(reopened.get(&dropped.token).await.is_err());
}

#[test]
fn test_lease_commands_need_a_key() {
    let ctx = TestContext::new();

    ctx.cmd()
        .args([
            "lease",
            "--server",
            "http://127.0.0.1:9",
            "acquire",
            "--repository",
            REPO,
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--key-id and --secret"));
}

fn lease_cmd(base_url: &str, key: common::Key, args: &[&str]) -> std::process::Output {
    let mut cmd = Command::cargo_bin("leasegate").expect("failed to find binary");
    cmd.env("NO_COLOR", "1")
        .env("LEASEGATE_SERVER", base_url)
        .env("LEASEGATE_KEY_ID", key.id)
        .env("LEASEGATE_SECRET", key.secret)
        .arg("lease")
        .args(args);
    cmd.output().expect("failed to run command")
}

async fn run_lease(base_url: &str, key: common::Key, args: &[&str]) -> std::process::Output {
    let base_url = base_url.to_string();
    let args: Vec<String> = args.iter().map(|a| (*a).to_string()).collect();
    tokio::task::spawn_blocking(move || {
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        lease_cmd(&base_url, key, &args)
    })
    .await
    .expect("join command")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_lease_lifecycle_through_cli() {
    let server = TestServer::start().await;

    let output = run_lease(
        &server.base_url,
        ALICE,
        &["acquire", "--repository", REPO, "--path", "/docs", "--quiet"],
    )
    .await;
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let token = String::from_utf8(output.stdout).unwrap().trim().to_string();
    assert_eq!(token.len(), 36);

    let output = run_lease(
        &server.base_url,
        BOB,
        &["acquire", "--repository", REPO, "--path", "/docs/api"],
    )
    .await;
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("held by alice on /docs"));

    let output = run_lease(&server.base_url, BOB, &["list", "--json"]).await;
    assert!(output.status.success());
    let leases: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(leases.as_array().unwrap().len(), 1);
    assert_eq!(leases[0]["owner"], "alice");

    let output = run_lease(&server.base_url, BOB, &["cancel", &token]).await;
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("forbidden"));

    let output = run_lease(
        &server.base_url,
        ALICE,
        &["commit", &token, "--payload", "sha256:feed"],
    )
    .await;
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let output = run_lease(&server.base_url, ALICE, &["show", &token]).await;
    assert!(!output.status.success());
}
