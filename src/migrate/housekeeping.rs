use crate::migrate::config::MAX_DAYS;
use crate::migrate::deletions::DeletionLog;
use crate::migrate::engine::{ReconcileSettings, SCRATCH_PREFIX};
use crate::migrate::ledger::{Ledger, lenient_timestamp};
use crate::migrate::paths::SyncPaths;
use crate::migrate::util::write_atomic;
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Local, NaiveDateTime, Utc};
use serde::Serialize;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

const LOG_PREFIX_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const LOG_PREFIX_LEN: usize = 19;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PruneStats {
    pub kept: usize,
    pub removed: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct HousekeepingOutcome {
    pub log: PruneStats,
    pub audit: PruneStats,
    pub failures: Vec<String>,
}

impl HousekeepingOutcome {
    pub fn summary(&self) -> String {
        format!(
            "log_removed={} audit_removed={} failed={}",
            self.log.removed,
            self.audit.removed,
            self.failures.len()
        )
    }
}

fn line_timestamp(line: &str) -> Option<NaiveDateTime> {
    let prefix = line.get(..LOG_PREFIX_LEN)?;
    NaiveDateTime::parse_from_str(prefix, LOG_PREFIX_FORMAT).ok()
}

/// Drop log lines stamped before `cutoff` (local wall clock). Continuation
/// lines share the fate of the stamped line above them.
pub fn prune_log_file(path: &Path, cutoff: NaiveDateTime) -> Result<PruneStats> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(PruneStats::default()),
        Err(err) => return Err(err).with_context(|| format!("failed to read {}", path.display())),
    };

    let mut stats = PruneStats::default();
    let mut keep_current = true;
    let mut out = String::with_capacity(raw.len());
    for line in raw.lines() {
        if let Some(ts) = line_timestamp(line) {
            keep_current = ts >= cutoff;
        }
        if keep_current {
            stats.kept += 1;
            out.push_str(line);
            out.push('\n');
        } else {
            stats.removed += 1;
        }
    }

    if stats.removed > 0 {
        write_atomic(path, out.as_bytes())?;
    }
    Ok(stats)
}

/// Same as [`prune_log_file`] for the JSON-lines audit trail, keyed on `at`.
/// Lines that do not parse are kept.
pub fn prune_audit_log(path: &Path, cutoff: DateTime<Utc>) -> Result<PruneStats> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(PruneStats::default()),
        Err(err) => return Err(err).with_context(|| format!("failed to read {}", path.display())),
    };

    let mut stats = PruneStats::default();
    let mut out = String::with_capacity(raw.len());
    for line in raw.lines() {
        let at = serde_json::from_str::<serde_json::Value>(line)
            .ok()
            .and_then(|v| v.get("at").and_then(|at| at.as_str()).and_then(lenient_timestamp::parse));
        if at.is_some_and(|at| at < cutoff) {
            stats.removed += 1;
            continue;
        }
        stats.kept += 1;
        out.push_str(line);
        out.push('\n');
    }

    if stats.removed > 0 {
        write_atomic(path, out.as_bytes())?;
    }
    Ok(stats)
}

/// Remove per-recording scratch directories left behind by a killed run.
/// Only call while holding the run lock.
pub fn sweep_stale_scratch(downloads_dir: &Path) -> Result<usize> {
    let entries = match fs::read_dir(downloads_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(0),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to list {}", downloads_dir.display()));
        }
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let stale = entry.file_name().to_string_lossy().starts_with(SCRATCH_PREFIX)
            && entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        if !stale {
            continue;
        }
        match fs::remove_dir_all(entry.path()) {
            Ok(()) => removed += 1,
            Err(err) => tracing::warn!(path = %entry.path().display(), "failed to remove stale scratch dir: {err}"),
        }
    }
    Ok(removed)
}

/// Forget recordings that are both confirmed deleted at the source and old
/// enough that no incremental window can list them again.
pub fn prune_ledger(
    ledger: &mut Ledger,
    deletions: &mut DeletionLog,
    now: DateTime<Utc>,
    settings: &ReconcileSettings,
) -> Result<Vec<String>> {
    let horizon = now - Duration::days(settings.delete_after_days + settings.processing_days);
    let pruned = ledger.prune(|id, entry| {
        deletions.contains(id) && entry.recording_start.is_some_and(|start| start < horizon)
    })?;
    if !pruned.is_empty() {
        deletions.forget(&pruned)?;
    }
    Ok(pruned)
}

pub fn run(paths: &SyncPaths, log_retention_days: u64, now: DateTime<Utc>) -> HousekeepingOutcome {
    let mut outcome = HousekeepingOutcome::default();
    let retention = Duration::days(i64::try_from(log_retention_days.min(MAX_DAYS)).unwrap_or_default());
    let local_cutoff = now.with_timezone(&Local).naive_local() - retention;

    match prune_log_file(&paths.log_file, local_cutoff) {
        Ok(stats) => outcome.log = stats,
        Err(err) => {
            tracing::warn!("log pruning failed: {err:#}");
            outcome.failures.push(format!("log: {err:#}"));
        }
    }
    match prune_audit_log(&paths.audit_file, now - retention) {
        Ok(stats) => outcome.audit = stats,
        Err(err) => {
            tracing::warn!("audit pruning failed: {err:#}");
            outcome.failures.push(format!("audit: {err:#}"));
        }
    }

    if outcome.log.removed > 0 || outcome.audit.removed > 0 {
        tracing::info!(
            log_removed = outcome.log.removed,
            audit_removed = outcome.audit.removed,
            retention_days = log_retention_days,
            "pruned old log entries"
        );
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::ledger::ProcessedEntry;
    use crate::migrate::paths::test_paths;
    use chrono::{NaiveDate, TimeZone};
    use tempfile::tempdir;

    fn naive(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .expect("date")
    }

    #[test]
    fn old_log_lines_and_their_continuations_are_dropped() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("recsync.log");
        fs::write(
            &path,
            "2024-01-01 10:00:00.000  INFO old entry\n\
             \x20 caused by: something\n\
             2025-05-30 08:00:00.123  WARN recent entry\n\
             \x20 continuation of recent\n",
        )
        .expect("seed");

        let stats = prune_log_file(&path, naive(2025, 1, 1)).expect("prune");
        assert_eq!(stats, PruneStats { kept: 2, removed: 2 });
        let rewritten = fs::read_to_string(&path).expect("read");
        assert!(rewritten.starts_with("2025-05-30 08:00:00.123"));
        assert!(rewritten.contains("continuation of recent"));
        assert!(!rewritten.contains("old entry"));
    }

    #[test]
    fn log_without_old_lines_is_left_alone() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("recsync.log");
        fs::write(&path, "banner without timestamp\n2025-05-30 08:00:00.000  INFO kept\n").expect("seed");
        let stats = prune_log_file(&path, naive(2025, 1, 1)).expect("prune");
        assert_eq!(stats.removed, 0);
        assert_eq!(stats.kept, 2);

        let missing = prune_log_file(&tmp.path().join("absent.log"), naive(2025, 1, 1)).expect("missing ok");
        assert_eq!(missing, PruneStats::default());
    }

    #[test]
    fn audit_pruning_keeps_recent_and_unparsable_lines() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("audit.jsonl");
        fs::write(
            &path,
            "{\"at\":\"2023-02-01T00:00:00Z\",\"phase\":\"sync\",\"status\":\"ok\",\"message\":\"old\"}\n\
             not json at all\n\
             {\"at\":\"2025-05-01T00:00:00+00:00\",\"phase\":\"sync\",\"status\":\"ok\",\"message\":\"new\"}\n",
        )
        .expect("seed");

        let cutoff = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).single().expect("cutoff");
        let stats = prune_audit_log(&path, cutoff).expect("prune");
        assert_eq!(stats, PruneStats { kept: 2, removed: 1 });
        let rewritten = fs::read_to_string(&path).expect("read");
        assert!(rewritten.contains("not json"));
        assert!(rewritten.contains("\"new\""));
    }

    #[test]
    fn stale_scratch_dirs_are_swept() {
        let tmp = tempdir().expect("tempdir");
        let downloads = tmp.path().join("downloads");
        fs::create_dir_all(downloads.join(format!("{SCRATCH_PREFIX}abc"))).expect("stale");
        fs::write(downloads.join(format!("{SCRATCH_PREFIX}abc/part.mp4")), b"x").expect("file");
        fs::create_dir_all(downloads.join("keep-me")).expect("other");

        assert_eq!(sweep_stale_scratch(&downloads).expect("sweep"), 1);
        assert!(downloads.join("keep-me").exists());
        assert_eq!(sweep_stale_scratch(&tmp.path().join("absent")).expect("absent"), 0);
    }

    #[test]
    fn ledger_entries_need_confirmed_deletion_and_age() {
        let tmp = tempdir().expect("tempdir");
        let paths = test_paths(tmp.path());
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).single().expect("now");
        let settings = ReconcileSettings {
            processing_days: 60,
            delete_after_days: 365,
            delete_source: true,
            backfill_from: Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 0).single().expect("epoch"),
            force_backfill: false,
        };
        let mut ledger = Ledger::open(&paths.ledger_file).expect("ledger");
        let mut deletions = DeletionLog::open(&paths.deletions_file);

        let entry = |days: i64| ProcessedEntry {
            processed_at: now - Duration::days(days),
            recording_start: Some(now - Duration::days(days)),
            topic: None,
            destination: None,
        };
        ledger.mark_processed("gone-old", entry(500)).expect("seed");
        ledger.mark_processed("gone-recent", entry(400)).expect("seed");
        ledger.mark_processed("present-old", entry(500)).expect("seed");
        ledger.mark_processed("no-start", ProcessedEntry::at(now - Duration::days(900))).expect("seed");
        for id in ["gone-old", "gone-recent", "no-start"] {
            deletions.record(id, now).expect("deleted");
        }

        let pruned = prune_ledger(&mut ledger, &mut deletions, now, &settings).expect("prune");
        assert_eq!(pruned, vec!["gone-old".to_string()]);
        assert!(!ledger.contains("gone-old"));
        assert!(ledger.contains("gone-recent"));
        assert!(ledger.contains("present-old"));
        assert!(ledger.contains("no-start"));
        assert!(!deletions.contains("gone-old"));

        let reopened = Ledger::open(&paths.ledger_file).expect("reopen");
        assert_eq!(reopened.len(), 3);
    }

    #[test]
    fn run_reports_without_failing_on_missing_files() {
        let tmp = tempdir().expect("tempdir");
        let paths = test_paths(tmp.path());
        let outcome = run(&paths, 180, Utc::now());
        assert!(outcome.failures.is_empty());
        assert_eq!(outcome.summary(), "log_removed=0 audit_removed=0 failed=0");
    }
}
