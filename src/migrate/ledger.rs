use crate::error::SyncError;
use crate::migrate::util::write_json_atomic;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// One migrated recording. Written once, never edited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedEntry {
    #[serde(with = "lenient_timestamp")]
    pub processed_at: DateTime<Utc>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "lenient_timestamp::optional"
    )]
    pub recording_start: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
}

impl ProcessedEntry {
    pub fn at(processed_at: DateTime<Utc>) -> Self {
        Self {
            processed_at,
            recording_start: None,
            topic: None,
            destination: None,
        }
    }
}

/// Durable set of recording ids that already reached the destination.
/// Presence means: never download or upload this recording again.
#[derive(Debug)]
pub struct Ledger {
    path: PathBuf,
    entries: BTreeMap<String, ProcessedEntry>,
}

impl Ledger {
    /// A missing file is an empty ledger. A malformed one aborts the run.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Ok(Self {
                    path,
                    entries: BTreeMap::new(),
                });
            }
            Err(err) => {
                return Err(SyncError::LedgerCorrupt {
                    path: path.display().to_string(),
                    reason: format!("unreadable: {err}"),
                }
                .into());
            }
        };

        // Every write leaves at least `{}`, so an empty file is a torn write.
        if raw.trim().is_empty() {
            return Err(SyncError::LedgerCorrupt {
                path: path.display().to_string(),
                reason: "file is empty".to_string(),
            }
            .into());
        }
        let entries = serde_json::from_str(&raw).map_err(|err| SyncError::LedgerCorrupt {
            path: path.display().to_string(),
            reason: err.to_string(),
        })?;
        Ok(Self { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, recording_id: &str) -> bool {
        self.entries.contains_key(recording_id)
    }

    pub fn get(&self, recording_id: &str) -> Option<&ProcessedEntry> {
        self.entries.get(recording_id)
    }

    /// Entries keyed by the numeric meeting id come from older tooling and
    /// carry no recording start. Such an entry covers instances that started
    /// before it was written; later instances of the same meeting are new.
    pub fn covers_legacy(&self, meeting_id: &str, start: DateTime<Utc>) -> bool {
        self.entries
            .get(meeting_id)
            .is_some_and(|entry| entry.recording_start.is_none() && start <= entry.processed_at)
    }

    /// Snapshot of every processed id, for filtering a whole listing at once.
    pub fn all_ids(&self) -> BTreeSet<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&String, &ProcessedEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add `entry` and flush it to disk before returning. Returns false when
    /// the id was already present (the existing entry is left untouched).
    pub fn mark_processed(&mut self, recording_id: &str, entry: ProcessedEntry) -> Result<bool> {
        if self.entries.contains_key(recording_id) {
            return Ok(false);
        }
        self.entries.insert(recording_id.to_string(), entry);
        if let Err(err) = write_json_atomic(&self.path, &self.entries) {
            self.entries.remove(recording_id);
            return Err(err);
        }
        Ok(true)
    }

    /// Drop every entry matching `should_prune`; persists only if anything changed.
    pub fn prune<F>(&mut self, mut should_prune: F) -> Result<Vec<String>>
    where
        F: FnMut(&str, &ProcessedEntry) -> bool,
    {
        let doomed = self
            .entries
            .iter()
            .filter(|(id, entry)| should_prune(id, entry))
            .map(|(id, _)| id.clone())
            .collect::<Vec<_>>();
        if doomed.is_empty() {
            return Ok(doomed);
        }

        let mut next = self.entries.clone();
        for id in &doomed {
            next.remove(id);
        }
        write_json_atomic(&self.path, &next)?;
        self.entries = next;
        Ok(doomed)
    }
}

/// RFC 3339 on write; on read also naive ISO-8601 (taken as UTC), which is
/// what older ledgers carry.
pub mod lenient_timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        let trimmed = raw.trim();
        if let Ok(ts) = DateTime::parse_from_rfc3339(trimmed) {
            return Some(ts.with_timezone(&Utc));
        }
        ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
            .map(|naive| naive.and_utc())
    }

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&ts.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp `{raw}`")))
    }

    pub mod optional {
        use chrono::{DateTime, Utc};
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            ts: &Option<DateTime<Utc>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match ts {
                Some(ts) => serializer.serialize_some(&ts.to_rfc3339()),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            let raw = Option::<String>::deserialize(deserializer)?;
            match raw {
                None => Ok(None),
                Some(raw) => super::parse(&raw)
                    .map(Some)
                    .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp `{raw}`"))),
            }
        }
    }
}
