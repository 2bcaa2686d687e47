use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::commands::{self, CommandReport};

#[derive(Debug, Parser)]
#[command(
    name = "recsync",
    version,
    about = "Move cloud meeting recordings into a Drive folder tree"
)]
struct Cli {
    /// Print the command report as JSON.
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Clone, Copy, Subcommand)]
enum Command {
    /// Reconcile new recordings, then delete aged ones at the source (default).
    Sync,
    /// Show local state without touching the network.
    Status,
    /// Prune old log and audit entries.
    Housekeeping,
}

fn render(report: &CommandReport, json: bool) -> Result<String> {
    if json {
        return Ok(serde_json::to_string_pretty(report)?);
    }
    let mut out = format!("{}: {}\n", report.command, if report.ok { "ok" } else { "FAILED" });
    for detail in &report.details {
        out.push_str(&format!("  {detail}\n"));
    }
    for issue in &report.issues {
        out.push_str(&format!("  issue: {issue}\n"));
    }
    Ok(out.trim_end().to_string())
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let report = match cli.command.unwrap_or(Command::Sync) {
        Command::Sync => commands::sync::run()?,
        Command::Status => commands::status::run()?,
        Command::Housekeeping => commands::housekeeping::run()?,
    };

    println!("{}", render(&report, cli.json)?);
    if !report.ok {
        anyhow::bail!("{} reported {} issue(s)", report.command, report.issues.len());
    }
    Ok(())
}
