use crate::error::SyncError;
use crate::migrate::config::SyncConfig;
use crate::migrate::deletions::DeletionLog;
use crate::migrate::destination::DestinationPath;
use crate::migrate::ledger::{Ledger, ProcessedEntry};
use crate::migrate::recording::{DownloadedFile, Recording};
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Per-recording scratch directories are created with this prefix so a later
/// run can sweep the ones a killed process left behind.
pub const SCRATCH_PREFIX: &str = "recsync-rec-";

pub trait RecordingSource {
    /// Recordings whose start falls in `window`, fetched page by page as the
    /// iterator is consumed.
    fn list_recordings<'a>(
        &'a mut self,
        window: &Window,
    ) -> Box<dyn Iterator<Item = Result<Recording>> + 'a>;

    /// Fetch every file of `recording` into `dest_dir`. All or nothing.
    fn download_files(&mut self, recording: &Recording, dest_dir: &Path) -> Result<Vec<DownloadedFile>>;

    fn delete_recording(&mut self, recording_id: &str) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FolderHandle(pub String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub file_id: String,
    pub name: String,
}

pub trait DestinationStore {
    /// Walk `segments` below the root, reusing folders that already exist.
    fn ensure_folder_path(&mut self, segments: &[String]) -> Result<FolderHandle>;

    fn upload_file(
        &mut self,
        folder: &FolderHandle,
        local_path: &Path,
        remote_name: &str,
    ) -> Result<UploadedFile>;
}

#[derive(Debug, Clone)]
pub struct ReconcileSettings {
    pub processing_days: i64,
    pub delete_after_days: i64,
    pub delete_source: bool,
    pub backfill_from: DateTime<Utc>,
    pub force_backfill: bool,
}

impl ReconcileSettings {
    pub fn from_config(cfg: &SyncConfig) -> Result<Self> {
        let backfill_from = cfg.backfill_from_date()?.and_time(NaiveTime::MIN).and_utc();
        Ok(Self {
            processing_days: i64::try_from(cfg.window.processing_days)
                .context("processing days out of range")?,
            delete_after_days: i64::try_from(cfg.retention.delete_after_days)
                .context("delete-after days out of range")?,
            delete_source: cfg.retention.delete_source,
            backfill_from,
            force_backfill: cfg.window.force_backfill,
        })
    }
}

/// Inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Window {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub backfill: bool,
}

impl Window {
    pub fn for_run(run_number: u64, now: DateTime<Utc>, settings: &ReconcileSettings) -> Self {
        if run_number <= 1 || settings.force_backfill {
            return Self {
                from: settings.backfill_from.min(now),
                to: now,
                backfill: true,
            };
        }
        Self {
            from: now - Duration::days(settings.processing_days),
            to: now,
            backfill: false,
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.from <= at && at <= self.to
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingState {
    Candidate,
    Downloading,
    Uploading,
    Recorded,
    SourceDeleted,
    Deferred,
    Failed,
}

impl RecordingState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Candidate => "candidate",
            Self::Downloading => "downloading",
            Self::Uploading => "uploading",
            Self::Recorded => "recorded",
            Self::SourceDeleted => "source_deleted",
            Self::Deferred => "deferred",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for RecordingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordingOutcome {
    pub recording_id: String,
    pub topic: String,
    pub state: RecordingState,
    /// True when this run moved the recording into the ledger.
    pub newly_processed: bool,
    pub destination: Option<String>,
    pub uploaded_files: usize,
    pub reason: Option<String>,
    pub delete_error: Option<String>,
}

impl RecordingOutcome {
    fn new(recording_id: &str, topic: &str) -> Self {
        Self {
            recording_id: recording_id.to_string(),
            topic: topic.to_string(),
            state: RecordingState::Candidate,
            newly_processed: false,
            destination: None,
            uploaded_files: 0,
            reason: None,
            delete_error: None,
        }
    }

    fn fail(&mut self, err: &anyhow::Error) {
        self.reason = Some(format!("{} failed: {err:#}", self.state));
        self.state = RecordingState::Failed;
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_number: u64,
    pub window: Window,
    pub listed: usize,
    pub already_processed: usize,
    pub processed: usize,
    pub deferred: usize,
    pub failed: usize,
    pub deleted: usize,
    pub delete_failed: usize,
    pub outcomes: Vec<RecordingOutcome>,
}

impl RunSummary {
    fn new(run_number: u64, window: Window) -> Self {
        Self {
            run_number,
            window,
            listed: 0,
            already_processed: 0,
            processed: 0,
            deferred: 0,
            failed: 0,
            deleted: 0,
            delete_failed: 0,
            outcomes: Vec::new(),
        }
    }

    fn tally(&mut self, outcome: RecordingOutcome) {
        if outcome.newly_processed {
            self.processed += 1;
        }
        match outcome.state {
            RecordingState::Deferred => self.deferred += 1,
            RecordingState::Failed => self.failed += 1,
            RecordingState::SourceDeleted => self.deleted += 1,
            _ => {}
        }
        if outcome.delete_error.is_some() {
            self.delete_failed += 1;
        }
        self.outcomes.push(outcome);
    }
}

/// Drives one run: window → enumerate → filter by ledger → per-recording
/// download/upload/record/delete.
pub struct Reconciler<'a, S: RecordingSource, D: DestinationStore> {
    source: &'a mut S,
    store: &'a mut D,
    ledger: &'a mut Ledger,
    deletions: &'a mut DeletionLog,
    settings: &'a ReconcileSettings,
    scratch_root: PathBuf,
}

impl<'a, S: RecordingSource, D: DestinationStore> Reconciler<'a, S, D> {
    pub fn new(
        source: &'a mut S,
        store: &'a mut D,
        ledger: &'a mut Ledger,
        deletions: &'a mut DeletionLog,
        settings: &'a ReconcileSettings,
        scratch_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            source,
            store,
            ledger,
            deletions,
            settings,
            scratch_root: scratch_root.into(),
        }
    }

    pub fn run(&mut self, run_number: u64, now: DateTime<Utc>) -> Result<RunSummary> {
        let window = Window::for_run(run_number, now, self.settings);
        if window.backfill {
            tracing::info!(run = run_number, from = %window.from, "full backfill: processing all available recordings");
        } else {
            tracing::info!(
                run = run_number,
                from = %window.from,
                days = self.settings.processing_days,
                "incremental run"
            );
        }

        let listed = self.enumerate(&window)?;
        let mut summary = RunSummary::new(run_number, window);
        summary.listed = listed.len();
        if listed.is_empty() {
            tracing::info!("no recordings found in window");
        }

        let processed = self.ledger.all_ids();
        let mut delete_attempted = BTreeSet::new();
        for recording in &listed {
            let legacy = recording
                .meeting_id
                .as_deref()
                .is_some_and(|meeting_id| self.ledger.covers_legacy(meeting_id, recording.start_time));
            if processed.contains(&recording.id) || legacy {
                summary.already_processed += 1;
                tracing::debug!(
                    recording = %recording.id,
                    processed_at = ?self.ledger.get(&recording.id).map(|e| e.processed_at),
                    "skipping already processed recording"
                );
                if self.deletion_due(recording.start_time, now) && !self.deletions.contains(&recording.id) {
                    delete_attempted.insert(recording.id.clone());
                    let mut outcome = RecordingOutcome::new(&recording.id, &recording.topic);
                    outcome.state = RecordingState::Recorded;
                    self.attempt_delete(&mut outcome, now);
                    summary.tally(outcome);
                }
                continue;
            }

            let outcome = self.process_candidate(recording, now)?;
            if outcome.state == RecordingState::SourceDeleted || outcome.delete_error.is_some() {
                delete_attempted.insert(recording.id.clone());
            }
            summary.tally(outcome);
        }

        self.sweep_aged_entries(now, &delete_attempted, &mut summary);
        Ok(summary)
    }

    fn enumerate(&mut self, window: &Window) -> Result<Vec<Recording>> {
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        for item in self.source.list_recordings(window) {
            let recording = item.map_err(|err| match err.downcast::<SyncError>() {
                Ok(typed) => anyhow::Error::from(typed),
                Err(other) => SyncError::Listing(format!("{other:#}")).into(),
            })?;
            if !window.contains(recording.start_time) {
                continue;
            }
            if !seen.insert(recording.id.clone()) {
                continue;
            }
            out.push(recording);
        }
        Ok(out)
    }

    fn deletion_due(&self, start: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        self.settings.delete_source && now - start >= Duration::days(self.settings.delete_after_days)
    }

    /// Only a failed ledger write escapes as an error; everything else is a
    /// per-recording outcome.
    fn process_candidate(&mut self, recording: &Recording, now: DateTime<Utc>) -> Result<RecordingOutcome> {
        let destination = DestinationPath::for_recording(recording);
        let mut outcome = RecordingOutcome::new(&recording.id, &recording.topic);
        outcome.destination = Some(destination.to_string());

        if !recording.is_ready() {
            outcome.state = RecordingState::Deferred;
            outcome.reason = Some(if recording.files.is_empty() {
                "no files attached".to_string()
            } else {
                "files still processing at source".to_string()
            });
            tracing::info!(
                recording = %recording.id,
                topic = %recording.topic,
                "deferred: {}",
                outcome.reason.as_deref().unwrap_or_default()
            );
            return Ok(outcome);
        }

        match self.transfer(recording, &destination, &mut outcome) {
            Ok(uploaded) => outcome.uploaded_files = uploaded,
            Err(err) => {
                outcome.fail(&err);
                tracing::error!(
                    recording = %recording.id,
                    topic = %recording.topic,
                    "{}",
                    outcome.reason.as_deref().unwrap_or_default()
                );
                return Ok(outcome);
            }
        }

        let entry = ProcessedEntry {
            recording_start: Some(recording.start_time),
            topic: Some(recording.topic.clone()),
            destination: Some(destination.to_string()),
            ..ProcessedEntry::at(now)
        };
        self.ledger.mark_processed(&recording.id, entry).with_context(|| {
            format!(
                "uploaded recording {} but could not record it in {}",
                recording.id,
                self.ledger.path().display()
            )
        })?;
        outcome.state = RecordingState::Recorded;
        outcome.newly_processed = true;
        tracing::info!(
            recording = %recording.id,
            files = outcome.uploaded_files,
            destination = %destination,
            "recorded"
        );

        if self.deletion_due(recording.start_time, now) {
            self.attempt_delete(&mut outcome, now);
        }
        Ok(outcome)
    }

    fn transfer(
        &mut self,
        recording: &Recording,
        destination: &DestinationPath,
        outcome: &mut RecordingOutcome,
    ) -> Result<usize> {
        fs::create_dir_all(&self.scratch_root)
            .with_context(|| format!("failed to create {}", self.scratch_root.display()))?;
        let scratch = tempfile::Builder::new()
            .prefix(SCRATCH_PREFIX)
            .tempdir_in(&self.scratch_root)
            .with_context(|| format!("failed to create scratch dir in {}", self.scratch_root.display()))?;

        outcome.state = RecordingState::Downloading;
        let files = self.source.download_files(recording, scratch.path())?;

        outcome.state = RecordingState::Uploading;
        let folder = self.store.ensure_folder_path(&destination.segments())?;
        for file in &files {
            let uploaded = self.store.upload_file(&folder, &file.local_path, &file.remote_name)?;
            tracing::debug!(recording = %recording.id, file = %uploaded.name, id = %uploaded.file_id, "uploaded");
        }

        let scratch_path = scratch.path().to_path_buf();
        if let Err(err) = scratch.close() {
            tracing::warn!(path = %scratch_path.display(), "failed to remove scratch dir: {err}");
        }
        Ok(files.len())
    }

    fn attempt_delete(&mut self, outcome: &mut RecordingOutcome, now: DateTime<Utc>) {
        let id = outcome.recording_id.clone();
        match self.source.delete_recording(&id) {
            Ok(()) => {
                outcome.state = RecordingState::SourceDeleted;
                tracing::info!(recording = %id, "deleted from source");
                if let Err(err) = self.deletions.record(&id, now) {
                    tracing::warn!(
                        recording = %id,
                        path = %self.deletions.path().display(),
                        "deleted but could not note it: {err:#}"
                    );
                }
            }
            Err(err) => {
                outcome.delete_error = Some(format!("{err:#}"));
                tracing::warn!(recording = %id, "source deletion failed, will retry next run: {err:#}");
            }
        }
    }

    /// Ledger entries that aged past the deletion threshold outside the
    /// current window still get their source copy removed.
    fn sweep_aged_entries(
        &mut self,
        now: DateTime<Utc>,
        already_attempted: &BTreeSet<String>,
        summary: &mut RunSummary,
    ) {
        if !self.settings.delete_source {
            return;
        }
        let due = self
            .ledger
            .entries()
            .filter(|(id, _)| !already_attempted.contains(id.as_str()))
            .filter(|(id, _)| !self.deletions.contains(id))
            .filter_map(|(id, entry)| {
                let start = entry.recording_start?;
                self.deletion_due(start, now)
                    .then(|| (id.clone(), entry.topic.clone().unwrap_or_default()))
            })
            .collect::<Vec<_>>();

        for (id, topic) in due {
            let mut outcome = RecordingOutcome::new(&id, &topic);
            outcome.state = RecordingState::Recorded;
            self.attempt_delete(&mut outcome, now);
            summary.tally(outcome);
        }
    }
}
