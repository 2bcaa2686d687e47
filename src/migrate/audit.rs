use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub at: DateTime<Utc>,
    pub phase: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recording_id: Option<String>,
    pub message: String,
}

pub fn append_event(
    path: &Path,
    phase: &str,
    status: &str,
    recording_id: Option<&str>,
    message: &str,
) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let event = AuditEvent {
        at: Utc::now(),
        phase: phase.to_string(),
        status: status.to_string(),
        recording_id: recording_id.map(str::to_string),
        message: message.to_string(),
    };

    let line = format!("{}\n", serde_json::to_string(&event)?);
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    file.write_all(line.as_bytes())?;
    Ok(())
}

/// Failures here never abort a run.
pub fn append_event_lossy(
    path: &Path,
    phase: &str,
    status: &str,
    recording_id: Option<&str>,
    message: &str,
) {
    if let Err(err) = append_event(path, phase, status, recording_id, message) {
        tracing::warn!(path = %path.display(), "audit append failed: {err:#}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn events_are_appended_as_json_lines() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("logs/audit.jsonl");
        append_event(&path, "sync", "ok", Some("abc=="), "recorded").expect("first");
        append_event(&path, "housekeeping", "ok", None, "pruned 0 lines").expect("second");

        let raw = fs::read_to_string(&path).expect("read");
        let events = raw
            .lines()
            .map(|line| serde_json::from_str::<AuditEvent>(line).expect("json line"))
            .collect::<Vec<_>>();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].recording_id.as_deref(), Some("abc=="));
        assert_eq!(events[1].phase, "housekeeping");
        assert!(!raw.lines().nth(1).unwrap_or_default().contains("recording_id"));
    }
}
