//! Basic CLI E2E tests.
//!
//! Each test runs the built binary against its own data directory.

use std::io::Write;
use std::process::{Command, Stdio};

use tempfile::TempDir;

fn respite(home: &TempDir) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_respite"));
    cmd.env("RESPITE_HOME", home.path())
        .env("RESPITE_LOG", "warn")
        .env_remove("RUST_LOG");
    cmd
}

/// Run a CLI command and return (exit code, stdout, stderr).
fn run_cli(home: &TempDir, args: &[&str]) -> (i32, String, String) {
    let output = respite(home)
        .args(args)
        .output()
        .expect("failed to execute CLI command");
    (
        output.status.code().unwrap_or(-1),
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
    )
}

#[test]
fn test_config_path_follows_data_dir() {
    let home = TempDir::new().unwrap();
    let (code, stdout, _) = run_cli(&home, &["config", "path"]);
    assert_eq!(code, 0);
    assert!(stdout.trim().starts_with(home.path().to_str().unwrap()));
    assert!(stdout.trim().ends_with("config.toml"));
}

#[test]
fn test_config_set_then_get() {
    let home = TempDir::new().unwrap();
    let (code, _, stderr) = run_cli(&home, &["config", "set", "breaks.micro.cadence_secs", "900"]);
    assert_eq!(code, 0, "set failed: {stderr}");

    let (code, stdout, _) = run_cli(&home, &["config", "get", "breaks.micro.cadence_secs"]);
    assert_eq!(code, 0);
    assert_eq!(stdout.trim(), "900");
}

#[test]
fn test_config_list_is_json() {
    let home = TempDir::new().unwrap();
    let (code, stdout, _) = run_cli(&home, &["config", "list"]);
    assert_eq!(code, 0);
    let parsed: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(parsed["scheduling"]["missed_break_anchor"], "now");
}

#[test]
fn test_config_unknown_key_fails() {
    let home = TempDir::new().unwrap();
    let (code, _, stderr) = run_cli(&home, &["config", "get", "breaks.nap.cadence_secs"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("unknown key"));
}

#[test]
fn test_history_starts_empty() {
    let home = TempDir::new().unwrap();
    let (code, stdout, _) = run_cli(&home, &["history"]);
    assert_eq!(code, 0);
    let parsed: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(parsed, serde_json::json!([]));
}

#[test]
fn test_run_records_manual_break() {
    let home = TempDir::new().unwrap();
    let mut child = respite(&home)
        .args(["run", "--json"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to spawn run");
    child
        .stdin
        .take()
        .unwrap()
        .write_all(b"trigger micro\nstatus\nquit\n")
        .unwrap();
    let output = child.wait_with_output().unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    let lines: Vec<serde_json::Value> = stdout
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert!(lines.iter().any(|v| v["type"] == "BreakStarted" && v["kind"] == "micro"));
    assert!(lines.iter().any(|v| v["current"]["kind"] == "micro"));
    assert!(lines.iter().any(|v| v["type"] == "SchedulerStopped"));

    let (code, stdout, _) = run_cli(&home, &["history"]);
    assert_eq!(code, 0);
    let outcomes: Vec<serde_json::Value> = serde_json::from_str(&stdout).unwrap();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0]["status"], "skipped");
    assert_eq!(outcomes[0]["trigger"], "manual");
}
