use anyhow::Result;
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct SyncPaths {
    pub home: PathBuf,
    pub state_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub downloads_dir: PathBuf,
    pub log_file: PathBuf,
    pub audit_file: PathBuf,
    pub ledger_file: PathBuf,
    pub deletions_file: PathBuf,
    pub run_count_file: PathBuf,
    pub lock_file: PathBuf,
}

impl SyncPaths {
    pub fn under(home: PathBuf, state_dir: PathBuf, logs_dir: PathBuf, downloads_dir: PathBuf) -> Self {
        Self {
            log_file: logs_dir.join("recsync.log"),
            audit_file: logs_dir.join("audit.jsonl"),
            ledger_file: state_dir.join("processed_recordings.json"),
            deletions_file: state_dir.join("source_deletions.json"),
            run_count_file: state_dir.join("run_count.json"),
            lock_file: state_dir.join("recsync.lock"),
            home,
            state_dir,
            logs_dir,
            downloads_dir,
        }
    }
}

fn required_home_dir() -> Result<PathBuf> {
    if let Some(home) = dirs::home_dir() {
        return Ok(home);
    }
    Err(anyhow::anyhow!("HOME directory could not be resolved"))
}

fn env_or_default_path(var: &str, fallback: PathBuf) -> PathBuf {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => fallback,
    }
}

pub fn resolve_paths() -> Result<SyncPaths> {
    let home = match env::var("RECSYNC_HOME") {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => required_home_dir()?.join(".recsync"),
    };

    let state_dir = env_or_default_path("RECSYNC_STATE_DIR", home.join("state"));
    let logs_dir = env_or_default_path("RECSYNC_LOGS_DIR", home.join("logs"));
    let downloads_dir = env_or_default_path("RECSYNC_DOWNLOADS_DIR", home.join("downloads"));

    Ok(SyncPaths::under(home, state_dir, logs_dir, downloads_dir))
}

#[cfg(test)]
pub fn test_paths(root: &std::path::Path) -> SyncPaths {
    SyncPaths::under(
        root.to_path_buf(),
        root.join("state"),
        root.join("logs"),
        root.join("downloads"),
    )
}
