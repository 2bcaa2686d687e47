use crate::migrate::recording::{Recording, RecordingFile};
use chrono::{DateTime, Datelike, Utc};
use std::fmt;

/// `root / year / month / "{title}_{host}_{date}"`, derived purely from the
/// recording so repeated runs resolve the same folders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationPath {
    pub year: String,
    pub month: String,
    pub folder: String,
}

impl DestinationPath {
    pub fn compute(title: &str, host: &str, start: DateTime<Utc>) -> Self {
        let date = start.format("%Y-%m-%d");
        Self {
            year: format!("{:04}", start.year()),
            month: format!("{:02}", start.month()),
            folder: sanitize_name(&format!("{title}_{host}_{date}")),
        }
    }

    pub fn for_recording(recording: &Recording) -> Self {
        Self::compute(&recording.topic, &recording.host, recording.start_time)
    }

    /// Folder names below the root, outermost first.
    pub fn segments(&self) -> Vec<String> {
        vec![self.year.clone(), self.month.clone(), self.folder.clone()]
    }

    pub fn file_name(&self, file: &RecordingFile) -> String {
        sanitize_name(&format!("{}_{}.{}", self.folder, file.file_id, file.extension))
    }
}

impl fmt::Display for DestinationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.year, self.month, self.folder)
    }
}

/// Strip characters that are unsafe in file and folder names and collapse
/// spaces to underscores.
pub fn sanitize_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.trim().chars() {
        match ch {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' | '\'' => {}
            '&' => out.push_str("and"),
            '%' => out.push_str("percent"),
            ' ' => out.push('_'),
            c if c.is_control() => {}
            c => out.push(c),
        }
    }
    if out.is_empty() { "untitled".to_string() } else { out }
}
