use fs2::FileExt;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

const CREDENTIAL_VARS: &[&str] = &[
    "ZOOM_ACCOUNT_ID",
    "ZOOM_CLIENT_ID",
    "ZOOM_CLIENT_SECRET",
    "SERVICE_ACCOUNT_FILE",
    "GOOGLE_DRIVE_PARENT_ID",
];

fn recsync(cwd: &Path, home: &Path) -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("recsync");
    cmd.current_dir(cwd)
        .env("RECSYNC_HOME", home)
        .env_remove("RECSYNC_CONFIG_PATH")
        .env_remove("RECSYNC_STATE_DIR")
        .env_remove("RECSYNC_LOGS_DIR")
        .env_remove("RECSYNC_DOWNLOADS_DIR")
        .env_remove("RECSYNC_DELETE_ACTION")
        .env("RECSYNC_LOG", "warn");
    for var in CREDENTIAL_VARS {
        cmd.env_remove(var);
    }
    cmd
}

fn with_dummy_credentials(cmd: &mut assert_cmd::Command, home: &Path) {
    cmd.env("ZOOM_ACCOUNT_ID", "acct")
        .env("ZOOM_CLIENT_ID", "client")
        .env("ZOOM_CLIENT_SECRET", "secret")
        .env("SERVICE_ACCOUNT_FILE", home.join("service-account.json"))
        .env("GOOGLE_DRIVE_PARENT_ID", "root-folder")
        .env("RECSYNC_ZOOM_API_BASE", "http://127.0.0.1:9/v2")
        .env("RECSYNC_ZOOM_OAUTH_URL", "http://127.0.0.1:9/oauth/token")
        .env("RECSYNC_MAX_ATTEMPTS", "1");
}

#[test]
fn missing_credentials_fail_before_any_state_is_written() {
    let tmp = tempdir().expect("tempdir");
    let home = tmp.path().join("home");

    recsync(tmp.path(), &home)
        .arg("sync")
        .assert()
        .failure()
        .stderr(predicate::str::contains("E002_CONFIG_MISSING"))
        .stderr(predicate::str::contains("ZOOM_ACCOUNT_ID"))
        .stderr(predicate::str::contains("GOOGLE_DRIVE_PARENT_ID"));

    assert!(!home.join("state/run_count.json").exists());
    assert!(!home.join("state/processed_recordings.json").exists());
}

#[test]
fn invalid_delete_action_is_a_config_error() {
    let tmp = tempdir().expect("tempdir");
    let home = tmp.path().join("home");
    let mut cmd = recsync(tmp.path(), &home);
    with_dummy_credentials(&mut cmd, &home);

    cmd.env("RECSYNC_DELETE_ACTION", "shred")
        .assert()
        .failure()
        .stderr(predicate::str::contains("E003_CONFIG_INVALID"));
    assert!(!home.join("state/run_count.json").exists());
}

#[test]
fn held_lock_refuses_a_second_run_before_counting() {
    let tmp = tempdir().expect("tempdir");
    let home = tmp.path().join("home");
    fs::create_dir_all(home.join("state")).expect("mkdir state");
    let lock_file = fs::OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(home.join("state/recsync.lock"))
        .expect("open lock");
    lock_file.try_lock_exclusive().expect("hold lock");
    fs::write(
        home.join("state/recsync.lock"),
        "{\"pid\":4242,\"build_id\":\"other\",\"started_at\":\"2025-06-01T00:00:00Z\"}",
    )
    .expect("write payload");

    let mut cmd = recsync(tmp.path(), &home);
    with_dummy_credentials(&mut cmd, &home);
    cmd.arg("sync")
        .assert()
        .failure()
        .stderr(predicate::str::contains("E001_LOCKED"))
        .stderr(predicate::str::contains("4242"));

    assert!(!home.join("state/run_count.json").exists());
    FileExt::unlock(&lock_file).expect("unlock");
}

#[test]
fn corrupt_ledger_aborts_but_keeps_the_advisory_count() {
    let tmp = tempdir().expect("tempdir");
    let home = tmp.path().join("home");
    fs::create_dir_all(home.join("state")).expect("mkdir state");
    fs::write(home.join("state/processed_recordings.json"), "{ not json").expect("seed ledger");

    let mut cmd = recsync(tmp.path(), &home);
    with_dummy_credentials(&mut cmd, &home);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("E004_LEDGER_CORRUPT"));

    let raw = fs::read_to_string(home.join("state/run_count.json")).expect("run count written");
    let parsed: serde_json::Value = serde_json::from_str(&raw).expect("json");
    assert_eq!(parsed["run_count"], 1);
    assert_eq!(
        fs::read_to_string(home.join("state/processed_recordings.json")).expect("ledger"),
        "{ not json"
    );

    let audit = fs::read_to_string(home.join("logs/audit.jsonl")).expect("audit written");
    assert!(audit.contains("\"status\":\"failed\""));
}

#[test]
fn counter_moves_first_and_log_pruning_waits_for_a_finished_run() {
    let tmp = tempdir().expect("tempdir");
    let home = tmp.path().join("home");
    fs::create_dir_all(home.join("state")).expect("mkdir state");
    fs::create_dir_all(home.join("logs")).expect("mkdir logs");
    fs::create_dir_all(home.join("downloads/recsync-rec-left-behind")).expect("mkdir scratch");
    fs::write(home.join("state/processed_recordings.json"), "").expect("seed ledger");
    fs::write(home.join("logs/recsync.log"), "2001-03-04 05:06:07.890  INFO ancient run\n")
        .expect("seed log");

    let mut cmd = recsync(tmp.path(), &home);
    with_dummy_credentials(&mut cmd, &home);
    cmd.arg("sync")
        .assert()
        .failure()
        .stderr(predicate::str::contains("E004_LEDGER_CORRUPT"));

    let raw = fs::read_to_string(home.join("state/run_count.json")).expect("run count written");
    let parsed: serde_json::Value = serde_json::from_str(&raw).expect("json");
    assert_eq!(parsed["run_count"], 1);
    assert!(!home.join("downloads/recsync-rec-left-behind").exists());
    let log = fs::read_to_string(home.join("logs/recsync.log")).expect("log");
    assert!(log.contains("ancient run"));
}

#[test]
fn non_numeric_day_count_is_a_config_error() {
    let tmp = tempdir().expect("tempdir");
    let home = tmp.path().join("home");
    let mut cmd = recsync(tmp.path(), &home);
    with_dummy_credentials(&mut cmd, &home);

    cmd.env_remove("RECSYNC_PROCESSING_DAYS")
        .env("PROCESSING_DAYS", "abc")
        .arg("sync")
        .assert()
        .failure()
        .stderr(predicate::str::contains("E003_CONFIG_INVALID"))
        .stderr(predicate::str::contains("PROCESSING_DAYS"));
    assert!(!home.join("state/run_count.json").exists());
}

#[test]
fn unreachable_auth_endpoint_fails_the_run() {
    let tmp = tempdir().expect("tempdir");
    let home = tmp.path().join("home");

    let mut cmd = recsync(tmp.path(), &home);
    with_dummy_credentials(&mut cmd, &home);
    cmd.env("RECSYNC_REQUEST_TIMEOUT_SECS", "2")
        .arg("sync")
        .assert()
        .failure()
        .stderr(predicate::str::contains("zoom token request failed"));

    assert!(home.join("state/run_count.json").exists());
    assert!(!home.join("state/processed_recordings.json").exists());
}
