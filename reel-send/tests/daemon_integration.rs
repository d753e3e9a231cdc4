//! Integration tests for the reel-send daemon

use assert_cmd::Command;
use libreelcast::error::FailureKind;
use libreelcast::service::EnqueueOptions;
use libreelcast::types::{ContentType, JobPayload, JobStatus, MediaRef};
use libreelcast::{Config, ReelcastService};
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Helper to escape path for TOML on Windows
fn escape_path_for_toml(path: &str) -> String {
    path.replace('\\', "\\\\")
}

/// Config pointing the publisher at a closed local port, so any attempt
/// fails fast with a network error
fn setup_test_env(with_instagram: bool) -> (TempDir, String) {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    let db_path = temp_dir.path().join("jobs.db");
    let token_path = temp_dir.path().join("instagram.token");
    fs::write(&token_path, "EAAB-test-token\n").unwrap();

    let mut config_content = format!(
        r#"
[database]
path = "{}"

[queue]
poll_interval = 1
max_retries = 3

[rate_limit]
min_interval = 0
"#,
        escape_path_for_toml(&db_path.to_string_lossy())
    );
    if with_instagram {
        config_content.push_str(&format!(
            r#"
[instagram]
account_id = "17841400000000000"
token_file = "{}"
base_url = "http://127.0.0.1:9"
request_timeout = 5
"#,
            escape_path_for_toml(&token_path.to_string_lossy())
        ));
    }

    fs::write(&config_path, config_content).unwrap();
    (temp_dir, config_path.to_string_lossy().to_string())
}

fn reel_send(config_path: &str) -> Command {
    let mut cmd = Command::cargo_bin("reel-send").unwrap();
    cmd.env("REELCAST_CONFIG", config_path)
        .env_remove("REELCAST_DB_PATH")
        .env_remove("RUST_LOG")
        .env("REELCAST_LOG_LEVEL", "info");
    cmd
}

#[test]
fn test_help_describes_daemon() {
    Command::cargo_bin("reel-send")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--once"))
        .stdout(predicate::str::contains("SIGTERM"));
}

#[test]
fn test_missing_config_file_exits_2() {
    let temp_dir = TempDir::new().unwrap();
    let missing = temp_dir.path().join("nope.toml");

    reel_send(missing.to_str().unwrap())
        .arg("--once")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Failed to read config file"));
}

#[test]
fn test_missing_instagram_section_exits_2() {
    let (_temp_dir, config_path) = setup_test_env(false);

    reel_send(&config_path)
        .arg("--once")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("instagram"));
}

#[test]
fn test_zero_workers_rejected() {
    let (_temp_dir, config_path) = setup_test_env(true);

    reel_send(&config_path)
        .args(["--once", "--workers", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--workers"));
}

#[test]
fn test_once_with_empty_queue() {
    let (_temp_dir, config_path) = setup_test_env(true);

    reel_send(&config_path)
        .args(["--once", "--log-format", "json"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Processed available jobs"));
}

#[tokio::test]
async fn test_once_requeues_job_after_network_failure() {
    let (_temp_dir, config_path) = setup_test_env(true);
    let config = Config::load_from_path(Path::new(&config_path)).unwrap();

    let job_id = {
        let service = ReelcastService::from_config(config.clone()).await.unwrap();
        service
            .enqueue(
                ContentType::Image,
                JobPayload::new(
                    vec![MediaRef::new("https://cdn.example.com/a.jpg")],
                    Some("hello".to_string()),
                ),
                EnqueueOptions::default(),
            )
            .await
            .unwrap()
    };

    reel_send(&config_path).arg("--once").assert().success();

    let service = ReelcastService::from_config(config).await.unwrap();
    let job = service.get_status(&job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.retry_count, 1);
    assert_eq!(job.error.unwrap().kind, FailureKind::Network);
    assert_eq!(service.queue().len().await.unwrap(), 1);
}

#[tokio::test]
async fn test_once_logs_permanent_failure() {
    let (_temp_dir, config_path) = setup_test_env(true);
    let config = Config::load_from_path(Path::new(&config_path)).unwrap();

    let job_id = {
        let service = ReelcastService::from_config(config.clone()).await.unwrap();
        service
            .enqueue(
                ContentType::Image,
                JobPayload::new(
                    vec![MediaRef::new("https://cdn.example.com/loop.gif")],
                    Some("hello".to_string()),
                ),
                EnqueueOptions::default(),
            )
            .await
            .unwrap()
    };

    reel_send(&config_path)
        .arg("--once")
        .assert()
        .success()
        .stderr(predicate::str::contains("Job failed permanently"))
        .stderr(predicate::str::contains(job_id.as_str()));

    let service = ReelcastService::from_config(config).await.unwrap();
    let job = service.get_status(&job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.unwrap().kind, FailureKind::Validation);
}
