use crate::migrate::destination::DestinationPath;
use chrono::{DateTime, Utc};
use std::path::PathBuf;

/// A meeting capture as seen by the reconciliation core, independent of the
/// source API's wire shape.
#[derive(Debug, Clone, PartialEq)]
pub struct Recording {
    pub id: String,
    /// Numeric meeting id shared by every instance of a recurring meeting.
    pub meeting_id: Option<String>,
    pub topic: String,
    pub host: String,
    pub start_time: DateTime<Utc>,
    pub files: Vec<RecordingFile>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordingFile {
    pub file_id: String,
    pub extension: String,
    pub download_url: Option<String>,
    pub ready: bool,
}

impl Recording {
    /// Every file is finished on the source side and can be fetched.
    pub fn is_ready(&self) -> bool {
        !self.files.is_empty()
            && self
                .files
                .iter()
                .all(|f| f.ready && f.download_url.as_deref().is_some_and(|u| !u.is_empty()))
    }

    /// Destination-side file name for each file, in source order.
    pub fn named_files(&self) -> Vec<(&RecordingFile, String)> {
        let destination = DestinationPath::for_recording(self);
        self.files
            .iter()
            .map(|file| (file, destination.file_name(file)))
            .collect()
    }
}

/// A file fetched into the per-recording scratch directory.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadedFile {
    pub local_path: PathBuf,
    pub remote_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn file(id: &str, url: Option<&str>, ready: bool) -> RecordingFile {
        RecordingFile {
            file_id: id.to_string(),
            extension: "mp4".to_string(),
            download_url: url.map(str::to_string),
            ready,
        }
    }

    fn recording(files: Vec<RecordingFile>) -> Recording {
        Recording {
            id: "u1".to_string(),
            meeting_id: None,
            topic: "Demo".to_string(),
            host: "h@x.io".to_string(),
            start_time: Utc.with_ymd_and_hms(2025, 2, 3, 4, 5, 6).single().expect("ts"),
            files,
        }
    }

    #[test]
    fn readiness_requires_every_file() {
        assert!(!recording(Vec::new()).is_ready());
        assert!(recording(vec![file("a", Some("https://x/a"), true)]).is_ready());
        assert!(
            !recording(vec![
                file("a", Some("https://x/a"), true),
                file("b", Some("https://x/b"), false),
            ])
            .is_ready()
        );
        assert!(!recording(vec![file("a", None, true)]).is_ready());
    }

    #[test]
    fn named_files_follow_destination_folder() {
        let rec = recording(vec![file("a", Some("https://x/a"), true)]);
        let names = rec.named_files();
        assert_eq!(names[0].1, "Demo_h@x.io_2025-02-03_a.mp4");
    }
}
