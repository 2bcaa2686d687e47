use chrono::{Duration, Local};
use std::fs;
use tempfile::tempdir;

#[test]
fn housekeeping_drops_log_lines_past_retention() {
    let tmp = tempdir().expect("tempdir");
    let home = tmp.path().join("home");
    fs::create_dir_all(home.join("logs")).expect("mkdir logs");

    let recent = (Local::now() - Duration::days(2)).format("%Y-%m-%d %H:%M:%S%.3f");
    let log = format!(
        "2001-03-04 05:06:07.890  INFO ancient run\n\
         \x20   at continuation of ancient\n\
         {recent}  INFO recent run\n"
    );
    fs::write(home.join("logs/recsync.log"), log).expect("seed log");
    fs::write(
        home.join("logs/audit.jsonl"),
        "{\"at\":\"2001-03-04T05:06:07Z\",\"phase\":\"sync\",\"status\":\"ok\",\"message\":\"old\"}\n",
    )
    .expect("seed audit");

    assert_cmd::cargo::cargo_bin_cmd!("recsync")
        .current_dir(tmp.path())
        .env("RECSYNC_HOME", &home)
        .env_remove("RECSYNC_CONFIG_PATH")
        .env_remove("RECSYNC_LOGS_DIR")
        .env_remove("RECSYNC_STATE_DIR")
        .env("RECSYNC_LOG_RETENTION_DAYS", "30")
        .args(["housekeeping"])
        .assert()
        .success();

    let pruned = fs::read_to_string(home.join("logs/recsync.log")).expect("read log");
    assert!(!pruned.contains("ancient run"));
    assert!(!pruned.contains("continuation of ancient"));
    assert!(pruned.contains("recent run"));

    let audit = fs::read_to_string(home.join("logs/audit.jsonl")).expect("read audit");
    assert!(!audit.contains("\"old\""));
    assert!(audit.contains("\"housekeeping\""));
}
