//! Integration tests for coach-cli
//!
//! These tests drive the binary end-to-end against a throwaway database.
//! Tests run serially to avoid database lock conflicts.

use assert_cmd::Command;
use predicates::prelude::*;
use serial_test::serial;
use tempfile::TempDir;

const RESUME: &str = "Jane Doe, backend engineer. Five years of Rust and Go, built payment \
services on PostgreSQL and Kafka, led the migration of a billing platform to Kubernetes.";

/// A Command for the coach binary bound to a fresh database in `dir`
fn coach(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("coach").unwrap();
    cmd.env("COACH_DB_PATH", dir.path().join("coach.db"))
        .env_remove("COACH_USER")
        .env_remove("COACH_AI_API_KEY");
    cmd
}

fn create_account(dir: &TempDir, id: &str, args: &[&str]) {
    coach(dir)
        .args(["account", "create", id])
        .args(args)
        .assert()
        .success();
}

// =============================================================================
// Help and Version Tests
// =============================================================================

#[test]
#[serial]
fn test_cli_help() {
    let dir = TempDir::new().unwrap();
    coach(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("coach"))
        .stdout(predicate::str::contains("interview"));
}

#[test]
#[serial]
fn test_cli_version() {
    let dir = TempDir::new().unwrap();
    coach(&dir)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("coach"));
}

#[test]
#[serial]
fn test_interview_help_lists_actions() {
    let dir = TempDir::new().unwrap();
    coach(&dir)
        .args(["interview", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("resume"))
        .stdout(predicate::str::contains("pause"));
}

// =============================================================================
// Account Command Tests
// =============================================================================

#[test]
#[serial]
fn test_account_create_and_balance() {
    let dir = TempDir::new().unwrap();
    create_account(&dir, "alice", &["--quiz", "3", "--special", "1"]);

    coach(&dir)
        .args(["--user", "alice", "--format", "json", "account", "balance"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"resume_quiz_count\": 3"))
        .stdout(predicate::str::contains("\"special_interview_count\": 1"))
        .stdout(predicate::str::contains("\"behavior_interview_count\": 0"));
}

#[test]
#[serial]
fn test_account_balance_table() {
    let dir = TempDir::new().unwrap();
    create_account(&dir, "bob", &["--behavior", "2"]);

    coach(&dir)
        .args(["--user", "bob", "account", "balance"])
        .assert()
        .success()
        .stdout(predicate::str::contains("behavior_interview"))
        .stdout(predicate::str::contains("Remaining"));
}

#[test]
#[serial]
fn test_account_create_duplicate_fails() {
    let dir = TempDir::new().unwrap();
    create_account(&dir, "carol", &[]);

    coach(&dir)
        .args(["account", "create", "carol"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
}

#[test]
#[serial]
fn test_balance_requires_user() {
    let dir = TempDir::new().unwrap();
    coach(&dir)
        .args(["account", "balance"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No user selected"));
}

#[test]
#[serial]
fn test_user_from_env() {
    let dir = TempDir::new().unwrap();
    create_account(&dir, "dave", &["--quiz", "5"]);

    coach(&dir)
        .env("COACH_USER", "dave")
        .args(["--format", "json", "account", "balance"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"resume_quiz_count\": 5"));
}

// =============================================================================
// Quota Tests
// =============================================================================

#[test]
#[serial]
fn test_quiz_without_quota_is_rejected() {
    let dir = TempDir::new().unwrap();
    create_account(&dir, "erin", &[]);
    let resume = dir.path().join("resume.txt");
    std::fs::write(&resume, RESUME).unwrap();

    coach(&dir)
        .args(["--user", "erin", "quiz", "run", "--position", "Backend Engineer"])
        .args(["--jd", "Rust services", "--resume-file"])
        .arg(&resume)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Quota exceeded"));

    // Rejected before billing: no record is written
    coach(&dir)
        .args(["--user", "erin", "--format", "json", "records", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"total\": 0"));
}

#[test]
#[serial]
fn test_interview_without_quota_is_rejected() {
    let dir = TempDir::new().unwrap();
    create_account(&dir, "frank", &["--special", "1"]);

    coach(&dir)
        .args(["--user", "frank", "interview", "start", "--kind", "behavior"])
        .write_stdin("")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Quota exceeded"));

    coach(&dir)
        .args(["--user", "frank", "--format", "json", "account", "balance"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"special_interview_count\": 1"));
}

#[test]
#[serial]
fn test_interview_invalid_kind() {
    let dir = TempDir::new().unwrap();
    coach(&dir)
        .args(["--user", "gina", "interview", "start", "--kind", "panel"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid interview kind"));
}

#[test]
#[serial]
fn test_resume_unknown_interview() {
    let dir = TempDir::new().unwrap();
    create_account(&dir, "hank", &[]);

    coach(&dir)
        .args(["--user", "hank", "interview", "resume", "no-such-result"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Session not found"));
}

// =============================================================================
// Records and Config Tests
// =============================================================================

#[test]
#[serial]
fn test_records_list_empty() {
    let dir = TempDir::new().unwrap();
    create_account(&dir, "ivy", &["--quiz", "1"]);

    coach(&dir)
        .args(["--user", "ivy", "records", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No items found."));
}

#[test]
#[serial]
fn test_config_show() {
    let dir = TempDir::new().unwrap();
    coach(&dir)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("COACH_AI_PROVIDER"))
        .stdout(predicate::str::contains("COACH_SPECIAL_MAX_MINUTES"));
}

#[test]
#[serial]
fn test_config_show_masks_api_key() {
    let dir = TempDir::new().unwrap();
    coach(&dir)
        .env("COACH_AI_API_KEY", "sk-test-secret")
        .args(["--format", "json", "config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("****"))
        .stdout(predicate::str::contains("sk-test-secret").not());
}

#[test]
#[serial]
fn test_config_show_reflects_env_override() {
    let dir = TempDir::new().unwrap();
    coach(&dir)
        .env("COACH_BEHAVIOR_MAX_MINUTES", "45")
        .args(["--format", "json", "config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"behavior_max_minutes\": 45"));
}
