use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Prefix format of every log line. Housekeeping parses the first 19 chars.
pub const LOG_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Local::now().format(LOG_TIMESTAMP_FORMAT))
    }
}

enum LogSink {
    File(File),
    Discard(io::Sink),
}

impl Write for LogSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::File(file) => file.write(buf),
            Self::Discard(sink) => sink.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::File(file) => file.flush(),
            Self::Discard(sink) => sink.flush(),
        }
    }
}

/// Opens the log file per event, so a rewrite by housekeeping never strands
/// later lines in an unlinked inode.
struct AppendFileWriter {
    path: PathBuf,
}

impl<'a> MakeWriter<'a> for AppendFileWriter {
    type Writer = LogSink;

    fn make_writer(&'a self) -> Self::Writer {
        match OpenOptions::new().create(true).append(true).open(&self.path) {
            Ok(file) => LogSink::File(file),
            Err(_) => LogSink::Discard(io::sink()),
        }
    }
}

pub fn init(log_file: &Path) -> Result<()> {
    if let Some(parent) = log_file.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let filter = EnvFilter::try_from_env("RECSYNC_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_timer(LocalTimer)
        .with_target(false)
        .with_writer(io::stderr);
    let file_layer = tracing_subscriber::fmt::layer()
        .with_timer(LocalTimer)
        .with_target(false)
        .with_ansi(false)
        .with_writer(AppendFileWriter {
            path: log_file.to_path_buf(),
        });

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .context("failed to install log subscriber")?;
    Ok(())
}
