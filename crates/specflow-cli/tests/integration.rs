#![allow(deprecated)]
use assert_cmd::Command;
use predicates::prelude::*;
use std::path::PathBuf;
use tempfile::TempDir;

fn specflow(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("specflow").unwrap();
    cmd.current_dir(dir.path())
        .env("SPECFLOW_ROOT", dir.path())
        .env_remove("SPECFLOW_LOCK_TIMEOUT_MS")
        .env_remove("RUST_LOG");
    cmd
}

fn tasks_dir(dir: &TempDir) -> PathBuf {
    dir.path().join("specs/001-auth/tasks")
}

/// Feature 001 with one done, one in progress and one pending task.
fn init_feature(dir: &TempDir) {
    let tasks = tasks_dir(dir);
    std::fs::create_dir_all(&tasks).unwrap();
    std::fs::write(
        tasks.join("T001-schema.md"),
        "### T001: Create schema\n\n- [x] users table\n\n**Estimated:** 2h\n",
    )
    .unwrap();
    std::fs::write(
        tasks.join("T002-login.md"),
        "### T002: Login form\n\n- [>] render form\n",
    )
    .unwrap();
    std::fs::write(
        tasks.join("T003-logout.md"),
        "### T003: Logout\n\n- [ ] clear session\n",
    )
    .unwrap();
}

fn json_stdout(cmd: &mut Command) -> serde_json::Value {
    let output = cmd.output().unwrap();
    assert!(
        output.status.success(),
        "command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).unwrap()
}

// ---------------------------------------------------------------------------
// discover / task list / get
// ---------------------------------------------------------------------------

#[test]
fn discover_populates_the_store() {
    let dir = TempDir::new().unwrap();
    init_feature(&dir);

    specflow(&dir)
        .args(["discover", "001"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Discovered 3 task(s)"));

    assert!(dir.path().join(".specflow/memory/task-states.json").exists());

    let tasks = json_stdout(specflow(&dir).args(["task", "list", "001", "--json"]));
    let tasks = tasks.as_array().unwrap();
    assert_eq!(tasks.len(), 3);
    assert_eq!(tasks[0]["id"], "T001");
    assert_eq!(tasks[0]["state"], "completed");
    assert_eq!(tasks[1]["state"], "in_progress");
    assert_eq!(tasks[2]["state"], "pending");
}

#[test]
fn task_list_filters_by_state() {
    let dir = TempDir::new().unwrap();
    init_feature(&dir);

    let pending = json_stdout(specflow(&dir).args(["task", "list", "001", "--state", "pending", "--json"]));
    assert_eq!(pending.as_array().unwrap().len(), 1);
    assert_eq!(pending[0]["id"], "T003");
}

#[test]
fn task_get_shows_details_and_missing_task_fails() {
    let dir = TempDir::new().unwrap();
    init_feature(&dir);

    specflow(&dir)
        .args(["task", "get", "001", "T002"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Login form"))
        .stdout(predicate::str::contains("in_progress"));

    specflow(&dir)
        .args(["task", "get", "001", "T999"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn feature_directory_name_is_accepted() {
    let dir = TempDir::new().unwrap();
    init_feature(&dir);

    let tasks = json_stdout(specflow(&dir).args(["task", "list", "001-auth", "--json"]));
    assert_eq!(tasks.as_array().unwrap().len(), 3);

    specflow(&dir)
        .args(["task", "list", "auth"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid feature id"));
}

// ---------------------------------------------------------------------------
// transitions
// ---------------------------------------------------------------------------

#[test]
fn complete_rewrites_the_task_file() {
    let dir = TempDir::new().unwrap();
    init_feature(&dir);

    specflow(&dir)
        .args(["task", "complete", "001", "T002", "--hours", "1.5"])
        .assert()
        .success()
        .stdout(predicate::str::contains("is now completed"));

    let content = std::fs::read_to_string(tasks_dir(&dir).join("T002-login.md")).unwrap();
    assert!(content.contains("- [x] render form"));
    assert!(content.contains("**Status:** COMPLETED"));
    assert!(content.contains("- **Execution Time:** 1.5h"));

    let history = json_stdout(specflow(&dir).args(["history", "001", "--json"]));
    let history = history.as_array().unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["task_id"], "T002");
    assert_eq!(history[0]["old_state"], "in_progress");
    assert_eq!(history[0]["new_state"], "completed");
}

#[test]
fn start_on_completed_task_is_rejected() {
    let dir = TempDir::new().unwrap();
    init_feature(&dir);

    specflow(&dir)
        .args(["task", "start", "001", "T001"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot start task T001 while it is completed"));
}

#[test]
fn block_then_reset() {
    let dir = TempDir::new().unwrap();
    init_feature(&dir);

    specflow(&dir)
        .args(["task", "block", "001", "T003", "waiting", "on", "design"])
        .assert()
        .success()
        .stdout(predicate::str::contains("blocked: waiting on design"));

    let content = std::fs::read_to_string(tasks_dir(&dir).join("T003-logout.md")).unwrap();
    assert!(content.contains("- [!] clear session"));
    assert!(content.contains("- **Error:** waiting on design"));

    // Blocked tasks may only go back to pending.
    specflow(&dir)
        .args(["task", "set", "001", "T003", "completed"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid transition"));

    specflow(&dir)
        .args(["task", "reset", "001", "T003"])
        .assert()
        .success();

    let task = json_stdout(specflow(&dir).args(["task", "get", "001", "T003", "--json"]));
    assert_eq!(task["state"], "pending");
    assert!(task.get("error_message").is_none());
}

#[test]
fn create_next_and_delete() {
    let dir = TempDir::new().unwrap();
    init_feature(&dir);

    specflow(&dir)
        .args(["task", "create", "001", "T010", "Write", "docs", "--estimate", "3"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Created task [T010]: Write docs"));

    specflow(&dir)
        .args(["task", "create", "001", "T010", "Again"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));

    let next = json_stdout(specflow(&dir).args(["task", "next", "001", "--json"]));
    assert_eq!(next["id"], "T002");

    specflow(&dir)
        .args(["task", "delete", "001", "T010"])
        .assert()
        .success();
    let tasks = json_stdout(specflow(&dir).args(["task", "list", "001", "--json"]));
    assert_eq!(tasks.as_array().unwrap().len(), 3);
}

// ---------------------------------------------------------------------------
// analytics
// ---------------------------------------------------------------------------

#[test]
fn progress_is_recorded() {
    let dir = TempDir::new().unwrap();
    init_feature(&dir);

    let value = json_stdout(specflow(&dir).args(["progress", "001", "--weighted", "--json"]));
    assert_eq!(value["progress"]["total_tasks"], 3);
    assert_eq!(value["progress"]["completed_tasks"], 1);
    assert_eq!(value["progress"]["percentage"], 33.3);
    assert!(value["weighted"]["percentage"].is_number());

    let stored = std::fs::read_to_string(dir.path().join(".specflow/memory/task-progress.json")).unwrap();
    assert!(stored.contains("\"001\""));

    specflow(&dir)
        .args(["progress", "001"])
        .assert()
        .success()
        .stdout(predicate::str::contains("33.3% complete (1/3 tasks)"));
}

#[test]
fn health_trend_and_estimate_render() {
    let dir = TempDir::new().unwrap();
    init_feature(&dir);

    specflow(&dir)
        .args(["health", "001"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Health:"));

    let trend = json_stdout(specflow(&dir).args(["trend", "001", "--days", "7", "--json"]));
    assert_eq!(trend["days_analyzed"], 7);
    assert_eq!(trend["total_completions"], 0);

    specflow(&dir)
        .args(["estimate", "001"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No completions in the last week"));
}

#[test]
fn out_of_range_windows_are_rejected() {
    let dir = TempDir::new().unwrap();
    init_feature(&dir);

    specflow(&dir)
        .args(["trend", "001", "--days", "4294967295"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("4294967295"));

    specflow(&dir)
        .args(["config", "set", "history_retention_days", "4294967295"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("exceeds the maximum"));

    specflow(&dir)
        .args(["task", "start", "001", "T003"])
        .assert()
        .success();
}

// ---------------------------------------------------------------------------
// sync
// ---------------------------------------------------------------------------

#[test]
fn sync_picks_up_hand_edits() {
    let dir = TempDir::new().unwrap();
    init_feature(&dir);
    specflow(&dir).args(["discover", "001"]).assert().success();

    std::fs::write(
        tasks_dir(&dir).join("T003-logout.md"),
        "### T003: Logout\n\n- [>] clear session\n",
    )
    .unwrap();

    let report = json_stdout(specflow(&dir).args(["sync", "001", "--json"]));
    let discrepancies = report["files_to_store"]["discrepancies"].as_array().unwrap();
    assert_eq!(discrepancies.len(), 1);
    assert_eq!(discrepancies[0]["kind"], "state_changed");
    assert_eq!(discrepancies[0]["task_id"], "T003");

    let task = json_stdout(specflow(&dir).args(["task", "get", "001", "T003", "--json"]));
    assert_eq!(task["state"], "in_progress");

    // A second pass finds nothing to do.
    let report = json_stdout(specflow(&dir).args(["sync", "001", "--json"]));
    assert!(report["files_to_store"]["discrepancies"].as_array().unwrap().is_empty());
}

#[test]
fn sync_before_discover_lists_untracked_files() {
    let dir = TempDir::new().unwrap();
    init_feature(&dir);

    for _ in 0..2 {
        let report = json_stdout(specflow(&dir).args(["sync", "001", "--json"]));
        assert!(report["files_to_store"]["discrepancies"].as_array().unwrap().is_empty());
        assert_eq!(report["files_to_store"]["add_to_store"].as_array().unwrap().len(), 3);
    }

    specflow(&dir)
        .args(["sync", "001", "--direction", "files"])
        .assert()
        .success()
        .stdout(predicate::str::contains("run discover to add them"));
}

#[test]
fn sync_store_direction_only_writes_files() {
    let dir = TempDir::new().unwrap();
    init_feature(&dir);
    specflow(&dir).args(["discover", "001"]).assert().success();

    specflow(&dir)
        .args(["sync", "001", "--direction", "store"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Synced 3 task file(s) from the store."));

    let content = std::fs::read_to_string(tasks_dir(&dir).join("T001-schema.md")).unwrap();
    assert!(content.contains("<!-- task-metadata -->"));
    assert!(content.contains("- **State:** COMPLETED"));
}

// ---------------------------------------------------------------------------
// store maintenance
// ---------------------------------------------------------------------------

#[test]
fn features_and_reset_feature() {
    let dir = TempDir::new().unwrap();
    init_feature(&dir);
    specflow(&dir).args(["discover", "001"]).assert().success();

    specflow(&dir)
        .arg("features")
        .assert()
        .success()
        .stdout(predicate::str::contains("001"));

    specflow(&dir)
        .args(["reset-feature", "001"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Cleared stored state"));

    let stats = json_stdout(specflow(&dir).args(["stats", "--json"]));
    assert_eq!(stats["features"], 0);
    assert_eq!(stats["tasks"], 0);
}

#[test]
fn validate_reports_corrupted_store_file() {
    let dir = TempDir::new().unwrap();
    init_feature(&dir);

    specflow(&dir).arg("validate").assert().success();

    std::fs::write(
        dir.path().join(".specflow/memory/task-states.json"),
        "{ not json",
    )
    .unwrap();

    specflow(&dir)
        .arg("validate")
        .assert()
        .failure()
        .stdout(predicate::str::contains("invalid"))
        .stderr(predicate::str::contains("store validation found"));
}

#[test]
fn corrupted_store_reads_as_empty() {
    let dir = TempDir::new().unwrap();
    init_feature(&dir);
    std::fs::create_dir_all(dir.path().join(".specflow/memory")).unwrap();
    std::fs::write(
        dir.path().join(".specflow/memory/task-states.json"),
        "[[[",
    )
    .unwrap();

    // Falls back to rediscovery from the task files.
    let tasks = json_stdout(specflow(&dir).args(["task", "list", "001", "--json"]));
    assert_eq!(tasks.as_array().unwrap().len(), 3);
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

#[test]
fn config_set_show_validate() {
    let dir = TempDir::new().unwrap();

    specflow(&dir)
        .args(["config", "set", "cache_ttl_seconds", "60"])
        .assert()
        .success();

    let config = json_stdout(specflow(&dir).args(["config", "show", "--json"]));
    assert_eq!(config["cache_ttl_seconds"], 60);
    assert_eq!(config["max_backups"], 10);

    specflow(&dir)
        .args(["config", "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Config is valid"));

    specflow(&dir)
        .args(["config", "set", "max_tasks_per_feature", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("max_tasks_per_feature"));

    specflow(&dir)
        .args(["config", "set", "colour", "blue"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown option"));
}

#[test]
fn config_validate_flags_stored_errors() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join(".specflow/memory")).unwrap();
    std::fs::write(
        dir.path().join(".specflow/memory/monitor-config.json"),
        r#"{"history_retention_days": 0}"#,
    )
    .unwrap();

    specflow(&dir)
        .args(["config", "validate"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("[error] history_retention_days"));
}

#[test]
fn lock_timeout_flag_is_accepted() {
    let dir = TempDir::new().unwrap();
    init_feature(&dir);

    specflow(&dir)
        .args(["--lock-timeout-ms", "500", "features"])
        .assert()
        .success()
        .stdout(predicate::str::contains("001"));
}
