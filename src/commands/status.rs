use anyhow::Result;
use std::env;

use crate::commands::CommandReport;
use crate::error::SyncError;
use crate::migrate::config::{load_config, resolve_config_path};
use crate::migrate::deletions::DeletionLog;
use crate::migrate::ledger::Ledger;
use crate::migrate::lock::read_holder;
use crate::migrate::paths::{SyncPaths, resolve_paths};
use crate::migrate::run_counter::RunCounter;
use crate::migrate::util::pid_alive;

mod generated {
    include!(concat!(env!("OUT_DIR"), "/recsync_env_allowlist.rs"));
}

fn lock_report(paths: &SyncPaths) -> CommandReport {
    let mut report = CommandReport::new("status.lock");
    let Some(holder) = read_holder(&paths.lock_file) else {
        report.detail("lock=free");
        return report;
    };

    let alive = pid_alive(holder.pid);
    report.detail(format!(
        "lock=held pid={} alive={} started_at={}",
        holder.pid, alive, holder.started_at
    ));
    let current = env!("BUILD_UUID");
    if holder.build_id == current {
        report.detail("lock.build_match=ok");
    } else {
        report.detail(format!(
            "lock.build_mismatch=found (lock={} current={current})",
            holder.build_id
        ));
    }
    report
}

/// Names of recognized keys that are set; values are never printed.
fn env_keys_set() -> Vec<&'static str> {
    generated::GENERATED_ENV_ALLOWLIST
        .iter()
        .copied()
        .filter(|key| env::var_os(key).is_some_and(|v| !v.is_empty()))
        .collect()
}

pub fn run() -> Result<CommandReport> {
    let mut report = CommandReport::new("status");
    let paths = resolve_paths()?;

    report.detail(format!("home={}", paths.home.display()));
    report.detail(format!("state_dir={}", paths.state_dir.display()));
    report.detail(format!("logs_dir={}", paths.logs_dir.display()));
    report.detail(format!("downloads_dir={}", paths.downloads_dir.display()));
    let config_path = resolve_config_path(&paths.home);
    report.detail(format!(
        "config_file={} ({})",
        config_path.display(),
        if config_path.exists() { "present" } else { "absent" }
    ));

    report.detail(format!("run_count={}", RunCounter::new(&paths.run_count_file).current()));
    match Ledger::open(&paths.ledger_file) {
        Ok(ledger) => report.detail(format!("ledger_entries={}", ledger.len())),
        Err(err) => match err.downcast_ref::<SyncError>() {
            Some(typed) => report.issue(format!("ledger[{}]: {err:#}", typed.code().as_str())),
            None => report.issue(format!("ledger: {err:#}")),
        },
    }
    report.detail(format!(
        "source_deletions={}",
        DeletionLog::open(&paths.deletions_file).len()
    ));
    report.merge(lock_report(&paths));

    match load_config(&paths.home) {
        Ok(cfg) => {
            report.detail(format!("window.processing_days={}", cfg.window.processing_days));
            report.detail(format!("window.backfill_from={}", cfg.window.backfill_from));
            report.detail(format!("window.force_backfill={}", cfg.window.force_backfill));
            report.detail(format!("retention.delete_after_days={}", cfg.retention.delete_after_days));
            report.detail(format!("retention.delete_source={}", cfg.retention.delete_source));
            report.detail(format!("retention.delete_action={}", cfg.retention.delete_action));
            report.detail(format!("retention.log_retention_days={}", cfg.retention.log_retention_days));
            report.detail(format!("network.max_attempts={}", cfg.network.max_attempts));
            let missing = cfg.missing_credentials();
            if missing.is_empty() {
                report.detail("credentials=complete");
            } else {
                report.detail(format!("credentials.missing={}", missing.join(",")));
            }
        }
        Err(err) => report.detail(format!("config.error={err:#}")),
    }

    let keys = env_keys_set();
    report.detail(format!(
        "env.set={}",
        if keys.is_empty() { "-".to_string() } else { keys.join(",") }
    ));

    Ok(report)
}
