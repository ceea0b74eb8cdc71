//! Integration tests for the relaxd CLI.
//!
//! Each test works on its own job store in a temporary directory. Calculators
//! are small `sh` scripts speaking the line protocol.

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::path::Path;
use tempfile::tempdir;

/// Get a command for the relaxd binary.
fn relaxd() -> Command {
    #[allow(deprecated)]
    let mut cmd = Command::cargo_bin("relaxd").unwrap();
    cmd.env_remove("RELAXD_SETTINGS")
        .env_remove("RELAXD_QUEUE")
        .env_remove("RELAXD_CALCULATOR")
        .env("NO_COLOR", "true");
    cmd
}

/// Answers every request with a converged energy of -1.25.
const CONVERGING: &str = r#"
while IFS= read -r line; do
  case "$line" in
    *'"exit"'*) exit 0 ;;
  esac
  echo '{"type":"converged","energy":-1.25,"label":"C2v","steps":3}'
done
"#;

/// Answers every request with not_converged.
const NOT_CONVERGING: &str = r#"
while IFS= read -r line; do
  case "$line" in
    *'"exit"'*) exit 0 ;;
  esac
  echo '{"type":"not_converged"}'
done
"#;

/// Fails on every request.
const FAILING: &str = r#"
while IFS= read -r line; do
  case "$line" in
    *'"exit"'*) exit 0 ;;
  esac
  echo '{"type":"error","message":"cell too small"}'
done
"#;

fn db_arg(path: &Path) -> String {
    path.to_str().unwrap().to_string()
}

/// Submit `count` small structures.
fn submit(db: &Path, count: usize) {
    let structures: Vec<Value> = (0..count)
        .map(|i| serde_json::json!({ "natom": 3 + i, "positions": [] }))
        .collect();
    let file = db.with_file_name("structures.json");
    std::fs::write(&file, serde_json::to_string(&structures).unwrap()).unwrap();

    relaxd()
        .args(["--db-path", &db_arg(db), "submit", file.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains(format!("{} job(s)", count)));
}

fn run_with(db: &Path, script: &str, extra: &[&str]) -> assert_cmd::assert::Assert {
    let calculator_arg = format!("--calculator-arg={}", script);
    let mut args = vec![
        "--db-path".to_string(),
        db_arg(db),
        "run".to_string(),
        "--calculator".to_string(),
        "sh".to_string(),
        "--calculator-arg=-c".to_string(),
        calculator_arg,
        "--exit-when-idle".to_string(),
        "--idle-interval".to_string(),
        "0.1".to_string(),
    ];
    args.extend(extra.iter().map(|s| s.to_string()));
    relaxd().args(&args).timeout(std::time::Duration::from_secs(60)).assert()
}

fn status_json(db: &Path) -> Value {
    let output = relaxd()
        .args(["--db-path", &db_arg(db), "status", "--format", "json"])
        .assert()
        .success();
    let stdout = String::from_utf8(output.get_output().stdout.clone()).unwrap();
    serde_json::from_str(&stdout).expect("status output should be valid JSON")
}

fn list_json(db: &Path) -> Vec<Value> {
    let output = relaxd()
        .args([
            "--db-path",
            &db_arg(db),
            "list",
            "--limit",
            "0",
            "--format",
            "json",
        ])
        .assert()
        .success();
    let stdout = String::from_utf8(output.get_output().stdout.clone()).unwrap();
    let parsed: Value = serde_json::from_str(&stdout).expect("list output should be valid JSON");
    parsed.as_array().expect("list output should be an array").clone()
}

// ============================================================================
// Help and Version Tests
// ============================================================================

#[test]
fn test_help_displays() {
    relaxd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("start"))
        .stdout(predicate::str::contains("stop"))
        .stdout(predicate::str::contains("submit"))
        .stdout(predicate::str::contains("status"))
        .stdout(predicate::str::contains("unlock"))
        .stdout(predicate::str::contains("completions"));
}

#[test]
fn test_version_displays() {
    relaxd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("relaxd"))
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_internal_worker_flag_is_hidden() {
    relaxd()
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--calculator"))
        .stdout(predicate::str::contains("--internal-worker").not());
}

// ============================================================================
// Store Commands
// ============================================================================

#[test]
fn test_submit_then_status() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("jobs.db");
    submit(&db, 3);

    let stats = status_json(&db);
    assert_eq!(stats["queue"], "relax");
    assert_eq!(stats["total"], 3);
    assert_eq!(stats["pending"], 3);
    assert_eq!(stats["locked"], 0);
}

#[test]
fn test_submit_single_structure_from_stdin() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("jobs.db");

    relaxd()
        .args(["--db-path", &db_arg(&db), "submit", "-"])
        .write_stdin(r#"{"natom": 13}"#)
        .assert()
        .success()
        .stdout(predicate::str::contains("1 job(s)"));

    let jobs = list_json(&db);
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0]["structure"]["natom"], 13);
    assert_eq!(jobs[0]["state"], "pending");
}

#[test]
fn test_submit_rejects_invalid_json() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("jobs.db");

    relaxd()
        .args(["--db-path", &db_arg(&db), "submit", "-"])
        .write_stdin("not json")
        .assert()
        .failure()
        .stderr(predicate::str::contains("valid JSON"));
}

#[test]
fn test_jobs_of_other_queue_are_ineligible() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("jobs.db");
    submit(&db, 2);

    let output = relaxd()
        .args([
            "--db-path",
            &db_arg(&db),
            "--queue",
            "dft",
            "status",
            "--format",
            "json",
        ])
        .assert()
        .success();
    let stdout = String::from_utf8(output.get_output().stdout.clone()).unwrap();
    let stats: Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(stats["pending"], 0);
    assert_eq!(stats["ineligible"], 2);
}

#[test]
fn test_status_without_store_fails() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("missing.db");

    relaxd()
        .args(["--db-path", &db_arg(&db), "status"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No job store found"));
    assert!(!db.exists());
}

#[test]
fn test_status_table_output() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("jobs.db");
    submit(&db, 1);

    relaxd()
        .args(["--db-path", &db_arg(&db), "status", "--ascii"])
        .assert()
        .success()
        .stdout(predicate::str::contains("not running"))
        .stdout(predicate::str::contains("Pending"));
}

#[test]
fn test_list_plain_output() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("jobs.db");
    submit(&db, 2);

    relaxd()
        .args([
            "--db-path",
            &db_arg(&db),
            "list",
            "--state",
            "pending",
            "--format",
            "plain",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("ID\tSTATE"))
        .stdout(predicate::str::contains("pending"));
}

// ============================================================================
// Scheduler Tests
// ============================================================================

#[test]
fn test_run_requires_calculator() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("jobs.db");
    submit(&db, 1);

    relaxd()
        .args(["--db-path", &db_arg(&db), "run", "--exit-when-idle"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No calculator configured"));
}

#[test]
fn test_run_worker_pool_completes_every_job() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("jobs.db");
    submit(&db, 5);

    run_with(&db, CONVERGING, &["--workers", "2"]).success();

    let jobs = list_json(&db);
    assert_eq!(jobs.len(), 5);
    for job in &jobs {
        assert_eq!(job["state"], "completed");
        assert_eq!(job["properties"]["energy"], -1.25);
        assert_eq!(job["properties"]["converged"], true);
        assert!(job["locked_at"].is_null());
    }

    let stats = status_json(&db);
    assert_eq!(stats["completed"], 5);
    assert_eq!(stats["pending"], 0);
    assert_eq!(stats["locked"], 0);
}

#[test]
fn test_run_single_marks_not_converged() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("jobs.db");
    submit(&db, 3);

    run_with(&db, NOT_CONVERGING, &["--single"]).success();

    let stats = status_json(&db);
    assert_eq!(stats["completed"], 3);
    assert_eq!(stats["not_converged"], 3);
    assert_eq!(stats["pending"], 0);

    for job in list_json(&db) {
        assert_eq!(job["properties"]["converged"], false);
    }
}

#[test]
fn test_calculator_failure_leaves_job_locked_until_unlocked() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("jobs.db");
    submit(&db, 1);

    // The failing worker exits; the scheduler sees nothing claimable and stops.
    run_with(&db, FAILING, &["--workers", "1"]).success();

    let stats = status_json(&db);
    assert_eq!(stats["locked"], 1);
    assert_eq!(stats["completed"], 0);

    relaxd()
        .args(["--db-path", &db_arg(&db), "unlock", "--stuck-for", "0"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Unlocked 1 job(s)"));

    let stats = status_json(&db);
    assert_eq!(stats["locked"], 0);
    assert_eq!(stats["pending"], 1);

    relaxd()
        .args(["--db-path", &db_arg(&db), "unlock", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("was not locked"));
}

#[test]
fn test_unlock_rejects_out_of_range_age() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("jobs.db");
    submit(&db, 1);

    relaxd()
        .args(["--db-path", &db_arg(&db), "unlock", "--stuck-for", "1e20"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("--stuck-for must be between 0 and"));
}

#[test]
fn test_run_rejects_out_of_range_idle_interval() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("jobs.db");
    submit(&db, 1);

    relaxd()
        .args([
            "--db-path",
            &db_arg(&db),
            "run",
            "--calculator",
            "sh",
            "--idle-interval",
            "1e20",
        ])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("idle interval must be between 0 and"));
}

#[test]
fn test_unlock_is_scoped_to_queue() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("jobs.db");
    submit(&db, 1);

    // The job stays locked after its calculator fails.
    run_with(&db, FAILING, &["--workers", "1"]).success();

    relaxd()
        .args([
            "--db-path",
            &db_arg(&db),
            "--queue",
            "dft",
            "unlock",
            "--stuck-for",
            "0",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("No jobs locked"));

    relaxd()
        .args(["--db-path", &db_arg(&db), "--queue", "dft", "unlock", "1"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("not in queue 'dft'"));

    assert_eq!(status_json(&db)["locked"], 1);
}

#[test]
fn test_unlock_requires_ids_or_age() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("jobs.db");
    submit(&db, 1);

    relaxd()
        .args(["--db-path", &db_arg(&db), "unlock"])
        .assert()
        .failure();
}

#[test]
fn test_stop_without_scheduler() {
    let dir = tempdir().unwrap();
    let pid_file = dir.path().join("relaxd.pid");

    relaxd()
        .args(["stop", "--pid-file", pid_file.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("No running scheduler"));
}

#[test]
fn test_start_then_stop_background_scheduler() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("jobs.db");
    let pid_file = dir.path().join("relaxd.pid");
    let log_file = dir.path().join("relaxd.log");
    submit(&db, 2);

    relaxd()
        .args([
            "--db-path",
            &db_arg(&db),
            "start",
            "--workers",
            "1",
            "--idle-interval",
            "0.1",
            "--calculator",
            "sh",
            "--calculator-arg=-c",
            &format!("--calculator-arg={}", CONVERGING),
            "--pid-file",
            pid_file.to_str().unwrap(),
            "--log-file",
            log_file.to_str().unwrap(),
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Started"));
    assert!(pid_file.exists());

    relaxd()
        .args([
            "--db-path",
            &db_arg(&db),
            "start",
            "--calculator",
            "sh",
            "--pid-file",
            pid_file.to_str().unwrap(),
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already running"));

    relaxd()
        .args(["stop", "--pid-file", pid_file.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Stopped"));
    assert!(!pid_file.exists());
    assert!(log_file.exists());
}

#[test]
fn test_completions_bash() {
    relaxd()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("relaxd"));
}
