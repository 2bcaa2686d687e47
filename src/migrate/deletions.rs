use crate::migrate::ledger::lenient_timestamp;
use crate::migrate::util::write_json_atomic;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
struct DeletedAt(#[serde(with = "lenient_timestamp")] DateTime<Utc>);

/// Confirmed source-side deletions, kept apart from the ledger so processed
/// entries are never rewritten. Losing this file only costs a few redundant
/// delete calls, which the source answers with "not found".
#[derive(Debug)]
pub struct DeletionLog {
    path: PathBuf,
    deleted: BTreeMap<String, DeletedAt>,
}

impl DeletionLog {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let deleted = match fs::read_to_string(&path) {
            Ok(raw) if raw.trim().is_empty() => BTreeMap::new(),
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|err| {
                tracing::warn!(
                    path = %path.display(),
                    "source deletion log malformed, starting empty: {err}"
                );
                BTreeMap::new()
            }),
            Err(_) => BTreeMap::new(),
        };
        Self { path, deleted }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, recording_id: &str) -> bool {
        self.deleted.contains_key(recording_id)
    }

    pub fn len(&self) -> usize {
        self.deleted.len()
    }

    pub fn record(&mut self, recording_id: &str, at: DateTime<Utc>) -> Result<()> {
        self.deleted.insert(recording_id.to_string(), DeletedAt(at));
        write_json_atomic(&self.path, &self.deleted)
    }

    pub fn forget(&mut self, recording_ids: &[String]) -> Result<usize> {
        let before = self.deleted.len();
        for id in recording_ids {
            self.deleted.remove(id);
        }
        let removed = before - self.deleted.len();
        if removed > 0 {
            write_json_atomic(&self.path, &self.deleted)?;
        }
        Ok(removed)
    }
}
