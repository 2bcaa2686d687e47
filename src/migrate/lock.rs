use crate::error::SyncError;
use anyhow::{Context, Result};
use chrono::Utc;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockPayload {
    pub pid: u32,
    pub build_id: String,
    pub started_at: String,
}

/// Exclusive advisory lock held for the whole run. Released when dropped,
/// including when the process dies.
#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl RunLock {
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("failed to open lock file {}", path.display()))?;

        if file.try_lock_exclusive().is_err() {
            let pid = read_holder(path)
                .map(|holder| holder.pid.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            return Err(SyncError::Locked {
                path: path.display().to_string(),
                pid,
            }
            .into());
        }

        let payload = LockPayload {
            pid: std::process::id(),
            build_id: env!("BUILD_UUID").to_string(),
            started_at: Utc::now().to_rfc3339(),
        };
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(serde_json::to_string(&payload)?.as_bytes())
            .with_context(|| format!("failed to write lock payload {}", path.display()))?;
        file.sync_all()?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = self.file.set_len(0);
        let _ = FileExt::unlock(&self.file);
    }
}

/// Who last took the lock, if the payload is readable. An empty file means
/// the previous holder exited cleanly.
pub fn read_holder(path: &Path) -> Option<LockPayload> {
    let raw = fs::read_to_string(path).ok()?;
    if raw.trim().is_empty() {
        return None;
    }
    serde_json::from_str(&raw).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn second_acquire_reports_holder_pid() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("state/recsync.lock");

        let held = RunLock::acquire(&path).expect("first acquire");
        let err = RunLock::acquire(&path).expect_err("second acquire must fail");
        let typed = err.downcast_ref::<SyncError>().expect("typed error");
        assert_eq!(typed.code().as_str(), "E001_LOCKED");
        assert!(err.to_string().contains(&std::process::id().to_string()));

        drop(held);
        RunLock::acquire(&path).expect("reacquire after release");
    }

    #[test]
    fn payload_is_cleared_on_release() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("recsync.lock");
        {
            let _lock = RunLock::acquire(&path).expect("acquire");
            let holder = read_holder(&path).expect("payload");
            assert_eq!(holder.pid, std::process::id());
            assert_eq!(holder.build_id, env!("BUILD_UUID"));
        }
        assert!(read_holder(&path).is_none());
    }
}
