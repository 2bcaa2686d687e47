use crate::migrate::util::write_json_atomic;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RunCountFile {
    run_count: u64,
}

/// Persisted count of invocations. A value of 1 marks the first-ever run.
#[derive(Debug, Clone)]
pub struct RunCounter {
    path: PathBuf,
}

impl RunCounter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Count persisted so far. Unreadable or malformed state counts as 0.
    pub fn current(&self) -> u64 {
        if !self.path.exists() {
            return 0;
        }
        let parsed = fs::read_to_string(&self.path)
            .map_err(anyhow::Error::from)
            .and_then(|raw| parse_run_count(&raw));
        match parsed {
            Ok(count) => count,
            Err(err) => {
                tracing::warn!(
                    path = %self.path.display(),
                    "run count unreadable, restarting count from 0: {err:#}"
                );
                0
            }
        }
    }

    /// Bump the count and make it durable before returning the new value.
    pub fn increment_and_get(&self) -> Result<u64> {
        let next = self.current().saturating_add(1);
        write_json_atomic(&self.path, &RunCountFile { run_count: next })?;
        Ok(next)
    }
}

fn parse_run_count(raw: &str) -> Result<u64> {
    let trimmed = raw.trim();
    if let Ok(bare) = trimmed.parse::<u64>() {
        return Ok(bare);
    }
    let parsed: RunCountFile = serde_json::from_str(trimmed)?;
    Ok(parsed.run_count)
}
