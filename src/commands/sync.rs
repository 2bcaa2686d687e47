use anyhow::Result;

use crate::commands::CommandReport;
use crate::migrate::engine::RecordingState;
use crate::migrate::run;

pub fn run() -> Result<CommandReport> {
    let mut report = CommandReport::new("sync");

    let outcome = run::run_once()?;
    let summary = &outcome.summary;
    report.detail("sync run completed");
    report.detail(format!("run_number={}", summary.run_number));
    report.detail(format!(
        "window={}..{}{}",
        summary.window.from.to_rfc3339(),
        summary.window.to.to_rfc3339(),
        if summary.window.backfill { " (backfill)" } else { "" }
    ));
    report.detail(format!("ledger_file={}", outcome.paths.ledger_file.display()));
    report.detail(format!("listed={}", summary.listed));
    report.detail(format!("already_processed={}", summary.already_processed));
    report.detail(format!("processed={}", summary.processed));
    report.detail(format!("deferred={}", summary.deferred));
    report.detail(format!("failed={}", summary.failed));
    report.detail(format!("deleted={}", summary.deleted));
    report.detail(format!("delete_failed={}", summary.delete_failed));
    report.detail(format!("ledger_entries={}", outcome.ledger_entries));
    report.detail(format!("ledger_pruned={}", outcome.ledger_pruned));
    report.detail(format!("stale_scratch_removed={}", outcome.stale_scratch_removed));
    report.detail(format!("housekeeping={}", outcome.housekeeping.summary()));

    // Per-recording failures are retried next run; they do not fail the command.
    for item in &summary.outcomes {
        match item.state {
            RecordingState::Failed | RecordingState::Deferred => report.detail(format!(
                "recording={} state={} reason={}",
                item.recording_id,
                item.state,
                item.reason.as_deref().unwrap_or("-")
            )),
            _ if item.delete_error.is_some() => report.detail(format!(
                "recording={} state={} delete_error={}",
                item.recording_id,
                item.state,
                item.delete_error.as_deref().unwrap_or("-")
            )),
            _ => {}
        }
    }

    Ok(report)
}
