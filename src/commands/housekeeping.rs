use anyhow::Result;
use chrono::Utc;

use crate::commands::CommandReport;
use crate::logging;
use crate::migrate::audit;
use crate::migrate::config::load_config;
use crate::migrate::housekeeping;
use crate::migrate::lock::RunLock;
use crate::migrate::paths::resolve_paths;

pub fn run() -> Result<CommandReport> {
    let mut report = CommandReport::new("housekeeping");
    let paths = resolve_paths()?;
    let cfg = load_config(&paths.home)?;
    logging::init(&paths.log_file)?;

    // Shares the run lock so a rewrite never races a sync appending to the log.
    let _lock = RunLock::acquire(&paths.lock_file)?;
    let outcome = housekeeping::run(&paths, cfg.retention.log_retention_days, Utc::now());

    report.detail(format!("log_file={}", paths.log_file.display()));
    report.detail(format!("audit_file={}", paths.audit_file.display()));
    report.detail(format!("log_retention_days={}", cfg.retention.log_retention_days));
    report.detail(format!("log.kept={} log.removed={}", outcome.log.kept, outcome.log.removed));
    report.detail(format!(
        "audit.kept={} audit.removed={}",
        outcome.audit.kept, outcome.audit.removed
    ));
    for failure in &outcome.failures {
        report.detail(format!("skipped: {failure}"));
    }

    let status = if outcome.failures.is_empty() { "ok" } else { "degraded" };
    audit::append_event_lossy(&paths.audit_file, "housekeeping", status, None, &outcome.summary());
    Ok(report)
}
