use crate::drive::DriveClient;
use crate::logging;
use crate::migrate::audit;
use crate::migrate::config::{SyncConfig, load_config};
use crate::migrate::deletions::DeletionLog;
use crate::migrate::engine::{ReconcileSettings, Reconciler, RecordingState, RunSummary};
use crate::migrate::housekeeping::{self, HousekeepingOutcome};
use crate::migrate::ledger::Ledger;
use crate::migrate::lock::RunLock;
use crate::migrate::paths::{SyncPaths, resolve_paths};
use crate::migrate::run_counter::RunCounter;
use crate::zoom::ZoomClient;
use anyhow::Result;
use chrono::Utc;

#[derive(Debug)]
pub struct SyncOutcome {
    pub paths: SyncPaths,
    pub summary: RunSummary,
    pub housekeeping: HousekeepingOutcome,
    pub stale_scratch_removed: usize,
    pub ledger_pruned: usize,
    pub ledger_entries: usize,
}

/// One batch run: setup checks, lock, counter, reconcile, housekeeping.
/// Setup failures return before any recording is touched.
pub fn run_once() -> Result<SyncOutcome> {
    let paths = resolve_paths()?;
    let cfg = load_config(&paths.home)?;
    cfg.require_credentials()?;
    let settings = ReconcileSettings::from_config(&cfg)?;
    logging::init(&paths.log_file)?;

    match run_locked(&paths, &cfg, &settings) {
        Ok(outcome) => Ok(outcome),
        Err(err) => {
            tracing::error!("sync aborted: {err:#}");
            audit::append_event_lossy(&paths.audit_file, "sync", "failed", None, &format!("{err:#}"));
            Err(err)
        }
    }
}

fn run_locked(paths: &SyncPaths, cfg: &SyncConfig, settings: &ReconcileSettings) -> Result<SyncOutcome> {
    let lock = RunLock::acquire(&paths.lock_file)?;
    tracing::info!("{}", "=".repeat(50));
    tracing::info!(
        home = %paths.home.display(),
        lock = %lock.path().display(),
        build = env!("BUILD_UUID"),
        "recsync run starting"
    );
    tracing::info!("{}", "=".repeat(50));

    let counter = RunCounter::new(&paths.run_count_file);
    let run_number = counter.increment_and_get()?;
    tracing::info!(run = run_number, counter = %counter.path().display(), "run counted");

    let stale_scratch_removed = housekeeping::sweep_stale_scratch(&paths.downloads_dir).unwrap_or_else(|err| {
        tracing::warn!("stale scratch sweep failed: {err:#}");
        0
    });
    if stale_scratch_removed > 0 {
        tracing::info!(removed = stale_scratch_removed, "removed scratch dirs left by an interrupted run");
    }
    let mut ledger = Ledger::open(&paths.ledger_file)?;
    let mut deletions = DeletionLog::open(&paths.deletions_file);

    let mut zoom = ZoomClient::from_config(cfg)?;
    zoom.authenticate()?;
    let mut drive = DriveClient::from_config(cfg, &paths.home)?;
    drive.authenticate()?;

    let summary = Reconciler::new(
        &mut zoom,
        &mut drive,
        &mut ledger,
        &mut deletions,
        settings,
        &paths.downloads_dir,
    )
    .run(run_number, Utc::now())?;

    for outcome in &summary.outcomes {
        let status = match outcome.state {
            RecordingState::Failed => "failed",
            RecordingState::Deferred => "deferred",
            _ if outcome.delete_error.is_some() => "degraded",
            _ => "ok",
        };
        let message = match (&outcome.reason, &outcome.delete_error) {
            (Some(reason), _) => format!("state={} reason={reason}", outcome.state),
            (None, Some(delete_error)) => format!("state={} delete_error={delete_error}", outcome.state),
            (None, None) => format!(
                "state={} files={} destination={}",
                outcome.state,
                outcome.uploaded_files,
                outcome.destination.as_deref().unwrap_or("-")
            ),
        };
        audit::append_event_lossy(&paths.audit_file, "recording", status, Some(&outcome.recording_id), &message);
    }

    let ledger_pruned = match housekeeping::prune_ledger(&mut ledger, &mut deletions, Utc::now(), settings) {
        Ok(pruned) => pruned.len(),
        Err(err) => {
            tracing::warn!("ledger pruning failed: {err:#}");
            0
        }
    };

    let housekeeping = housekeeping::run(paths, cfg.retention.log_retention_days, Utc::now());

    tracing::info!(
        run = summary.run_number,
        listed = summary.listed,
        already_processed = summary.already_processed,
        processed = summary.processed,
        deferred = summary.deferred,
        failed = summary.failed,
        deleted = summary.deleted,
        delete_failed = summary.delete_failed,
        ledger_pruned,
        "run complete"
    );
    let status = if summary.failed > 0 || summary.delete_failed > 0 {
        "degraded"
    } else {
        "ok"
    };
    audit::append_event_lossy(
        &paths.audit_file,
        "sync",
        status,
        None,
        &format!(
            "run={} listed={} processed={} deferred={} failed={} deleted={} delete_failed={} ledger_pruned={ledger_pruned}",
            summary.run_number,
            summary.listed,
            summary.processed,
            summary.deferred,
            summary.failed,
            summary.deleted,
            summary.delete_failed
        ),
    );

    Ok(SyncOutcome {
        paths: paths.clone(),
        ledger_entries: ledger.len(),
        summary,
        housekeeping,
        stale_scratch_removed,
        ledger_pruned,
    })
}
