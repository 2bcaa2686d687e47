use crate::migrate::ledger::lenient_timestamp;
use crate::migrate::recording::{Recording, RecordingFile};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default = "default_expires_in")]
    pub expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecordingsPage {
    #[serde(default)]
    pub meetings: Vec<MeetingRecording>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

impl RecordingsPage {
    pub fn next_token(&self) -> Option<&str> {
        self.next_page_token.as_deref().filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MeetingRecording {
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub host_email: Option<String>,
    #[serde(default)]
    pub host_id: Option<String>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub recording_files: Vec<MeetingFile>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MeetingFile {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub file_type: Option<String>,
    #[serde(default)]
    pub file_extension: Option<String>,
    #[serde(default)]
    pub download_url: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

impl MeetingFile {
    fn into_recording_file(self) -> RecordingFile {
        let extension = non_empty(self.file_extension.as_deref())
            .or_else(|| non_empty(self.file_type.as_deref()))
            .map(str::to_ascii_lowercase)
            .unwrap_or_else(|| "bin".to_string());
        let completed = self
            .status
            .as_deref()
            .is_none_or(|status| status.eq_ignore_ascii_case("completed"));
        let download_url = non_empty(self.download_url.as_deref()).map(str::to_string);
        let file_id = non_empty(self.id.as_deref()).map(str::to_string);

        RecordingFile {
            ready: completed && download_url.is_some() && file_id.is_some(),
            file_id: file_id.unwrap_or_default(),
            extension,
            download_url,
        }
    }
}

impl MeetingRecording {
    /// `None` when the entry lacks an identifier or a parsable start time;
    /// such entries cannot be placed in the window or the ledger.
    pub fn into_recording(self) -> Option<Recording> {
        let meeting_id = self.id.as_ref().and_then(|v| match v {
            serde_json::Value::Number(n) => Some(n.to_string()),
            serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            _ => None,
        });
        let id = non_empty(self.uuid.as_deref())
            .map(str::to_string)
            .or_else(|| meeting_id.clone())?;
        let start_time = lenient_timestamp::parse(self.start_time.as_deref()?)?;
        let host = non_empty(self.host_email.as_deref())
            .or_else(|| non_empty(self.host_id.as_deref()))
            .unwrap_or("unknown-host")
            .to_string();

        Some(Recording {
            id,
            meeting_id,
            topic: self.topic.unwrap_or_default(),
            host,
            start_time,
            files: self
                .recording_files
                .into_iter()
                .map(MeetingFile::into_recording_file)
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"{
        "from": "2025-01-01",
        "to": "2025-02-01",
        "page_size": 300,
        "next_page_token": "",
        "meetings": [
            {
                "uuid": "4444AAAiAAAAAiAiAiiAii==",
                "id": 81234567890,
                "host_id": "z8yCxjabcdEFGHfp8uQ",
                "host_email": "john.doe@example.com",
                "topic": "Team Meeting",
                "start_time": "2025-01-14T09:30:00Z",
                "recording_files": [
                    {
                        "id": "a1b2",
                        "file_type": "MP4",
                        "file_extension": "MP4",
                        "download_url": "https://zoom.us/rec/download/a1b2",
                        "status": "completed"
                    },
                    {
                        "id": "c3d4",
                        "file_type": "TRANSCRIPT",
                        "file_extension": "VTT",
                        "download_url": "https://zoom.us/rec/download/c3d4",
                        "status": "processing"
                    }
                ]
            }
        ]
    }"#;

    #[test]
    fn listing_page_maps_to_domain_recordings() {
        let page: RecordingsPage = serde_json::from_str(PAGE).expect("page");
        assert!(page.next_token().is_none());

        let recording = page.meetings[0].clone().into_recording().expect("recording");
        assert_eq!(recording.id, "4444AAAiAAAAAiAiAiiAii==");
        assert_eq!(recording.meeting_id.as_deref(), Some("81234567890"));
        assert_eq!(recording.host, "john.doe@example.com");
        assert_eq!(recording.files.len(), 2);
        assert_eq!(recording.files[0].extension, "mp4");
        assert_eq!(recording.files[1].extension, "vtt");
        assert!(recording.files[0].ready);
        assert!(!recording.files[1].ready);
        assert!(!recording.is_ready());
    }

    #[test]
    fn extension_falls_back_to_file_type_then_bin() {
        let typed = MeetingFile {
            id: Some("x".into()),
            file_type: Some("M4A".into()),
            download_url: Some("https://zoom.us/x".into()),
            ..Default::default()
        }
        .into_recording_file();
        assert_eq!(typed.extension, "m4a");
        assert!(typed.ready);

        let bare = MeetingFile {
            id: Some("y".into()),
            ..Default::default()
        }
        .into_recording_file();
        assert_eq!(bare.extension, "bin");
        assert!(!bare.ready);
    }

    #[test]
    fn host_id_stands_in_for_missing_email() {
        let meeting = MeetingRecording {
            uuid: Some("u1".into()),
            host_id: Some("host-123".into()),
            start_time: Some("2025-03-01T08:00:00Z".into()),
            ..Default::default()
        };
        let recording = meeting.into_recording().expect("recording");
        assert_eq!(recording.host, "host-123");
        assert!(recording.files.is_empty());
    }

    #[test]
    fn entries_without_identity_or_start_are_dropped() {
        let no_start = MeetingRecording {
            uuid: Some("u1".into()),
            ..Default::default()
        };
        assert!(no_start.into_recording().is_none());

        let numeric_only = MeetingRecording {
            id: Some(serde_json::json!(987654321)),
            start_time: Some("2025-03-01 08:00:00".into()),
            ..Default::default()
        };
        assert_eq!(numeric_only.into_recording().expect("recording").id, "987654321");
    }
}
