//! Integration tests for the replay harness
//!
//! These tests drive the built binary end to end:
//! - Credential validation at startup
//! - Recorded events through the reporter into a file sink
//! - Delivery failures staying out of the exit status
//! - Config display and doctor checks

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use tempfile::TempDir;

/// Helper to get the stepmetrics binary path
fn stepmetrics_binary() -> PathBuf {
    // When running tests, the binary is in target/debug/stepmetrics
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // Remove test binary name
    path.pop(); // Remove deps
    path.push("stepmetrics");
    path
}

/// Helper to run stepmetrics isolated inside `dir`
fn run_stepmetrics(dir: &Path, args: &[&str]) -> std::process::Output {
    Command::new(stepmetrics_binary())
        .env("STEPMETRICS_DIR", dir)
        .env("XDG_DATA_HOME", dir.join("data"))
        .env_remove("KEEN_PROJECT_WRITE_KEY")
        .env_remove("KEEN_PROJECT_ID")
        .env_remove("RUST_LOG")
        .args(args)
        .output()
        .expect("Failed to execute stepmetrics")
}

/// Write a config file with a file sink and return its path
fn write_config(dir: &Path, keen: &str, extra: &str) -> PathBuf {
    let config = format!(
        r#"keen:
{keen}
sinks: [file]
output: {output}
{extra}
"#,
        output = dir.join("records.jsonl").display()
    );
    let path = dir.join("stepmetrics.yaml");
    fs::write(&path, config).unwrap();
    path
}

const CREDENTIALS: &str = "  project_write_key: test-write-key\n  project_id: test-project";

const EVENTS: &str = r#"{"at": "2026-01-03T12:00:00Z", "event": "stepStarted", "options": {"applicationId": "app-1", "applicationName": "web", "applicationOwnerName": "team", "applicationStartedByName": "alice", "buildId": "build-1", "deployId": ""}, "step": {"name": "npm-install"}, "order": 0}
{"at": "2026-01-03T12:00:02Z", "event": "stepFinished", "options": {"applicationId": "app-1", "applicationName": "web", "applicationOwnerName": "team", "applicationStartedByName": "alice", "buildId": "build-1", "deployId": ""}, "step": {"name": "npm-install"}, "order": 0, "successful": true}
"#;

fn write_events(dir: &Path, content: &str) -> PathBuf {
    let path = dir.join("events.jsonl");
    fs::write(&path, content).unwrap();
    path
}

fn read_records(dir: &Path) -> Vec<serde_json::Value> {
    fs::read_to_string(dir.join("records.jsonl"))
        .unwrap_or_default()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

#[test]
fn test_replay_start_and_finish_records() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path();
    let config = write_config(dir, CREDENTIALS, "");
    let events = write_events(dir, EVENTS);

    let output = run_stepmetrics(
        dir,
        &[
            "--config",
            config.to_str().unwrap(),
            "replay",
            events.to_str().unwrap(),
            "--recorded-time",
            "-o",
            "json",
        ],
    );
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let records = read_records(dir);
    assert_eq!(records.len(), 2);

    let started = &records[0];
    assert_eq!(started["event"], "buildStepStarted");
    assert_eq!(started["application"]["id"], "app-1");
    assert_eq!(started["buildID"], "build-1");
    assert_eq!(started["stepOrder"], 0);
    assert_eq!(started["versionControl"], "git");
    assert_eq!(started["timestamp"], 1_767_441_600);
    assert!(started.get("succesful").is_none());
    assert!(started.get("timeElapsed").is_none());

    let finished = &records[1];
    assert_eq!(finished["event"], "buildStepFinished");
    assert_eq!(finished["succesful"], true);
    assert!((finished["timeElapsed"].as_f64().unwrap() - 2.0).abs() < 0.05);

    let summary: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(summary["events"], 2);
    assert_eq!(summary["delivery"]["delivered"], 2);
}

#[test]
fn test_replay_missing_write_key_fails() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path();
    let config = write_config(dir, "  project_id: test-project", "");
    let events = write_events(dir, EVENTS);

    let output = run_stepmetrics(
        dir,
        &["--config", config.to_str().unwrap(), "replay", events.to_str().unwrap()],
    );
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("write key"));
    assert!(!dir.join("records.jsonl").exists());
}

#[test]
fn test_replay_missing_project_id_fails() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path();
    let config = write_config(dir, "  project_write_key: test-write-key", "");
    let events = write_events(dir, EVENTS);

    let output = run_stepmetrics(
        dir,
        &["--config", config.to_str().unwrap(), "replay", events.to_str().unwrap()],
    );
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("project id"));
}

#[test]
fn test_credentials_from_env() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path();
    let config = write_config(dir, "  collection: build-events-ewok", "");
    let events = write_events(dir, EVENTS);

    let output = Command::new(stepmetrics_binary())
        .env("STEPMETRICS_DIR", dir)
        .env("XDG_DATA_HOME", dir.join("data"))
        .env("KEEN_PROJECT_WRITE_KEY", "env-key")
        .env("KEEN_PROJECT_ID", "env-project")
        .args(["--config", config.to_str().unwrap(), "replay", events.to_str().unwrap()])
        .output()
        .expect("Failed to execute stepmetrics");

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(read_records(dir).len(), 2);
}

#[test]
fn test_replay_skips_malformed_lines() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path();
    let config = write_config(dir, CREDENTIALS, "delivery:\n  mode: direct");
    let content = format!("not json\n{{\"event\": \"stepSkipped\", \"order\": 1}}\n\n{}", EVENTS);
    let events = write_events(dir, &content);

    let output = run_stepmetrics(
        dir,
        &["--config", config.to_str().unwrap(), "replay", events.to_str().unwrap(), "-o", "json"],
    );
    assert!(output.status.success());

    let summary: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(summary["events"], 2);
    assert_eq!(summary["skipped"], 2);
    assert_eq!(read_records(dir).len(), 2);
}

#[test]
fn test_unreachable_backend_does_not_fail_replay() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path();
    let config_path = dir.join("stepmetrics.yaml");
    fs::write(
        &config_path,
        r#"keen:
  project_write_key: test-write-key
  project_id: test-project
  api_url: http://127.0.0.1:9
delivery:
  mode: direct
  flush_timeout_ms: 500
sinks: [keen]
"#,
    )
    .unwrap();
    let events = write_events(dir, EVENTS);

    let output = run_stepmetrics(
        dir,
        &["--config", config_path.to_str().unwrap(), "replay", events.to_str().unwrap(), "-o", "json"],
    );
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let summary: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(summary["delivery"]["submitted"], 2);
    assert_eq!(summary["delivery"]["failed"], 2);
}

#[test]
fn test_dry_run_prints_records() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path();
    let config = write_config(dir, CREDENTIALS, "");
    let events = write_events(dir, EVENTS);

    let output = run_stepmetrics(
        dir,
        &["--config", config.to_str().unwrap(), "replay", events.to_str().unwrap(), "--dry-run", "-o", "text"],
    );
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("buildStepStarted"));
    assert!(stdout.contains("buildStepFinished"));
    assert!(stdout.contains("npm-install"));
    assert!(!dir.join("records.jsonl").exists());
}

#[test]
fn test_config_show_redacts_write_key() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path();
    let config = write_config(dir, CREDENTIALS, "");

    let output = run_stepmetrics(dir, &["--config", config.to_str().unwrap(), "config", "show", "-o", "json"]);
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(!stdout.contains("test-write-key"));
    let shown: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(shown["keen"]["project_id"], "test-project");
}

#[test]
fn test_doctor_reports_missing_credentials() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path();
    let config = write_config(dir, "  collection: build-events-ewok", "");

    let output = run_stepmetrics(dir, &["--config", config.to_str().unwrap(), "doctor"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("write key"));

    let config = write_config(dir, CREDENTIALS, "");
    let output = run_stepmetrics(dir, &["--config", config.to_str().unwrap(), "doctor"]);
    assert!(output.status.success());
}
