use crate::migrate::config::SyncConfig;
use crate::migrate::engine::{RecordingSource, Window};
use crate::migrate::recording::{DownloadedFile, Recording};
use crate::remote::retry::{RetryPolicy, with_backoff};
use crate::remote::token::BearerSource;
use crate::remote::{check_status, http_client, send_authorized, transport};
use crate::zoom::auth::ZoomAuth;
use crate::zoom::models::RecordingsPage;
use anyhow::{Context, Result};
use chrono::{Days, Months, NaiveDate};
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use std::collections::VecDeque;
use std::fs::File;
use std::path::Path;
use std::time::Duration;

const QUERY_DATE_FORMAT: &str = "%Y-%m-%d";

pub struct ZoomClient {
    http: Client,
    transfer: Client,
    auth: ZoomAuth,
    api_base: String,
    page_size: u32,
    delete_action: String,
    retry: RetryPolicy,
}

impl ZoomClient {
    pub fn from_config(cfg: &SyncConfig) -> Result<Self> {
        let http = http_client(Duration::from_secs(cfg.network.request_timeout_secs))?;
        let transfer = http_client(Duration::from_secs(cfg.network.transfer_timeout_secs))?;
        let retry = RetryPolicy::from_config(&cfg.network);
        Ok(Self {
            auth: ZoomAuth::new(http.clone(), &cfg.zoom, retry),
            http,
            transfer,
            api_base: cfg.zoom.api_base.trim_end_matches('/').to_string(),
            page_size: cfg.zoom.page_size,
            delete_action: cfg.retention.delete_action.clone(),
            retry,
        })
    }

    /// Fetch a token now so bad credentials fail the run before any work.
    pub fn authenticate(&mut self) -> Result<()> {
        self.auth.token().map(|_| ())
    }

    fn download_one(&mut self, url: &str, path: &Path) -> Result<u64> {
        let transfer = self.transfer.clone();
        let retry = self.retry;
        with_backoff(&retry, &format!("download {}", path.display()), || {
            let response = send_authorized(&mut self.auth, |token| transfer.get(url).bearer_auth(token))?;
            let mut response = check_status("zoom", response)?;
            let mut file =
                File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
            let written = response.copy_to(&mut file).map_err(transport("zoom"))?;
            file.sync_all()
                .with_context(|| format!("failed to flush {}", path.display()))?;
            Ok(written)
        })
    }
}

pub type DateChunk = (NaiveDate, NaiveDate);

/// One page of the listing for a date chunk, continuing from `page_token`.
trait PageSource {
    fn fetch_page(&mut self, chunk: DateChunk, page_token: Option<&str>) -> Result<RecordingsPage>;
}

impl PageSource for ZoomClient {
    fn fetch_page(&mut self, chunk: DateChunk, page_token: Option<&str>) -> Result<RecordingsPage> {
        let url = format!("{}/accounts/me/recordings", self.api_base);
        let from = chunk.0.format(QUERY_DATE_FORMAT).to_string();
        let to = chunk.1.format(QUERY_DATE_FORMAT).to_string();
        let page_size = self.page_size.to_string();
        let page_token = page_token.unwrap_or_default().to_string();
        let http = self.http.clone();
        let retry = self.retry;

        with_backoff(&retry, &format!("zoom listing {from}..{to}"), || {
            let response = send_authorized(&mut self.auth, |token| {
                let mut query = vec![
                    ("from", from.as_str()),
                    ("to", to.as_str()),
                    ("page_size", page_size.as_str()),
                ];
                if !page_token.is_empty() {
                    query.push(("next_page_token", page_token.as_str()));
                }
                http.get(&url).bearer_auth(token).query(&query)
            })?;
            let response = check_status("zoom", response)?;
            Ok(response.json::<RecordingsPage>().map_err(transport("zoom"))?)
        })
    }
}

/// Consecutive `[start, start + 1 month]` ranges covering `from..=to`; each
/// range starts the day after the previous one ended.
pub fn monthly_chunks(from: NaiveDate, to: NaiveDate) -> Vec<DateChunk> {
    let mut chunks = Vec::new();
    let mut start = from;
    while start <= to {
        let end = start
            .checked_add_months(Months::new(1))
            .map_or(to, |end| end.min(to));
        chunks.push((start, end));
        match end.checked_add_days(Days::new(1)) {
            Some(next) => start = next,
            None => break,
        }
    }
    chunks
}

/// Meeting UUIDs that begin with `/` or contain `//` must be encoded twice,
/// otherwise the API resolves them as a different path.
pub fn encode_meeting_uuid(uuid: &str) -> String {
    let once = utf8_percent_encode(uuid, NON_ALPHANUMERIC).to_string();
    if uuid.starts_with('/') || uuid.contains("//") {
        utf8_percent_encode(&once, NON_ALPHANUMERIC).to_string()
    } else {
        once
    }
}

/// Pages are requested only as the caller pulls recordings.
struct RecordingPages<'a, P: PageSource> {
    pages: &'a mut P,
    chunks: VecDeque<DateChunk>,
    current: Option<DateChunk>,
    page_token: Option<String>,
    buffer: VecDeque<Recording>,
    finished: bool,
}

impl<'a, P: PageSource> RecordingPages<'a, P> {
    fn new(pages: &'a mut P, chunks: Vec<DateChunk>) -> Self {
        Self {
            pages,
            chunks: chunks.into(),
            current: None,
            page_token: None,
            buffer: VecDeque::new(),
            finished: false,
        }
    }
}

impl<P: PageSource> Iterator for RecordingPages<'_, P> {
    type Item = Result<Recording>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(recording) = self.buffer.pop_front() {
                return Some(Ok(recording));
            }
            if self.finished {
                return None;
            }
            let chunk = match self.current {
                Some(chunk) => chunk,
                None => match self.chunks.pop_front() {
                    Some(chunk) => {
                        self.current = Some(chunk);
                        chunk
                    }
                    None => {
                        self.finished = true;
                        return None;
                    }
                },
            };

            let page = match self.pages.fetch_page(chunk, self.page_token.as_deref()) {
                Ok(page) => page,
                Err(err) => {
                    self.finished = true;
                    return Some(Err(err));
                }
            };
            tracing::debug!(
                from = %chunk.0,
                to = %chunk.1,
                meetings = page.meetings.len(),
                "fetched recordings page"
            );
            self.page_token = page.next_token().map(str::to_string);
            if self.page_token.is_none() {
                self.current = None;
            }
            for meeting in page.meetings {
                let label = meeting.uuid.clone().unwrap_or_default();
                match meeting.into_recording() {
                    Some(recording) => self.buffer.push_back(recording),
                    None => tracing::warn!(uuid = %label, "skipping listing entry without id or start time"),
                }
            }
        }
    }
}

impl RecordingSource for ZoomClient {
    fn list_recordings<'a>(
        &'a mut self,
        window: &Window,
    ) -> Box<dyn Iterator<Item = Result<Recording>> + 'a> {
        let chunks = monthly_chunks(window.from.date_naive(), window.to.date_naive());
        tracing::debug!(chunks = chunks.len(), "listing zoom recordings");
        Box::new(RecordingPages::new(self, chunks))
    }

    fn download_files(&mut self, recording: &Recording, dest_dir: &Path) -> Result<Vec<DownloadedFile>> {
        let mut downloaded = Vec::with_capacity(recording.files.len());
        for (file, remote_name) in recording.named_files() {
            let url = file
                .download_url
                .as_deref()
                .with_context(|| format!("file {} has no download url", file.file_id))?;
            let local_path = dest_dir.join(&remote_name);
            let bytes = self.download_one(url, &local_path)?;
            tracing::debug!(recording = %recording.id, file = %remote_name, bytes, "downloaded");
            downloaded.push(DownloadedFile {
                local_path,
                remote_name,
            });
        }
        Ok(downloaded)
    }

    fn delete_recording(&mut self, recording_id: &str) -> Result<()> {
        let url = format!(
            "{}/meetings/{}/recordings",
            self.api_base,
            encode_meeting_uuid(recording_id)
        );
        let action = self.delete_action.clone();
        let http = self.http.clone();
        let retry = self.retry;

        with_backoff(&retry, &format!("zoom delete {recording_id}"), || {
            let response = send_authorized(&mut self.auth, |token| {
                http.delete(&url).bearer_auth(token).query(&[("action", action.as_str())])
            })?;
            if response.status() == StatusCode::NOT_FOUND {
                tracing::info!(recording = %recording_id, "already gone at source");
                return Ok(());
            }
            check_status("zoom", response)?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemoteError;
    use crate::zoom::models::MeetingRecording;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("date")
    }

    #[test]
    fn chunks_cover_the_range_month_by_month() {
        let chunks = monthly_chunks(date(2025, 1, 15), date(2025, 3, 20));
        assert_eq!(
            chunks,
            vec![
                (date(2025, 1, 15), date(2025, 2, 15)),
                (date(2025, 2, 16), date(2025, 3, 16)),
                (date(2025, 3, 17), date(2025, 3, 20)),
            ]
        );
    }

    #[test]
    fn single_day_window_is_one_chunk() {
        let day = date(2025, 6, 1);
        assert_eq!(monthly_chunks(day, day), vec![(day, day)]);
        assert!(monthly_chunks(date(2025, 6, 2), day).is_empty());
    }

    #[test]
    fn month_end_start_clamps_like_calendar_months() {
        let chunks = monthly_chunks(date(2025, 1, 31), date(2025, 3, 1));
        assert_eq!(chunks[0], (date(2025, 1, 31), date(2025, 2, 28)));
        assert_eq!(chunks[1], (date(2025, 3, 1), date(2025, 3, 1)));
    }

    #[test]
    fn plain_uuids_are_encoded_once() {
        assert_eq!(encode_meeting_uuid("abc123=="), "abc123%3D%3D");
    }

    #[test]
    fn slash_uuids_are_encoded_twice() {
        assert_eq!(encode_meeting_uuid("/ajXp112QmuoKj4854875=="), "%252FajXp112QmuoKj4854875%253D%253D");
        assert_eq!(encode_meeting_uuid("ab//cd"), "ab%252F%252Fcd");
        assert_eq!(encode_meeting_uuid("ab/cd"), "ab%2Fcd");
    }

    fn meeting(uuid: &str, start: &str) -> MeetingRecording {
        MeetingRecording {
            uuid: Some(uuid.to_string()),
            start_time: Some(start.to_string()),
            ..Default::default()
        }
    }

    fn page(meetings: Vec<MeetingRecording>, next: &str) -> RecordingsPage {
        RecordingsPage {
            meetings,
            next_page_token: Some(next.to_string()),
        }
    }

    #[derive(Default)]
    struct CannedPages {
        pages: VecDeque<Result<RecordingsPage>>,
        calls: Vec<(DateChunk, Option<String>)>,
    }

    impl PageSource for CannedPages {
        fn fetch_page(&mut self, chunk: DateChunk, page_token: Option<&str>) -> Result<RecordingsPage> {
            self.calls.push((chunk, page_token.map(str::to_string)));
            self.pages.pop_front().unwrap_or_else(|| Ok(RecordingsPage::default()))
        }
    }

    #[test]
    fn listing_follows_page_tokens_then_moves_to_the_next_chunk() {
        let january = (date(2025, 1, 1), date(2025, 2, 1));
        let february = (date(2025, 2, 2), date(2025, 3, 1));
        let mut canned = CannedPages {
            pages: VecDeque::from([
                Ok(page(vec![meeting("u1", "2025-01-03T10:00:00Z")], "tok-2")),
                Ok(page(vec![meeting("u2", "2025-01-20T10:00:00Z")], "")),
                Ok(page(vec![meeting("u3", "2025-02-10T10:00:00Z")], "")),
            ]),
            ..Default::default()
        };

        let ids = RecordingPages::new(&mut canned, vec![january, february])
            .map(|item| item.map(|r| r.id))
            .collect::<Result<Vec<_>>>()
            .expect("listing");

        assert_eq!(ids, vec!["u1", "u2", "u3"]);
        assert_eq!(
            canned.calls,
            vec![
                (january, None),
                (january, Some("tok-2".to_string())),
                (february, None),
            ]
        );
    }

    #[test]
    fn pages_are_fetched_only_as_items_are_pulled() {
        let mut canned = CannedPages {
            pages: VecDeque::from([Ok(page(vec![meeting("u1", "2025-01-03T10:00:00Z")], "tok-2"))]),
            ..Default::default()
        };
        let first = RecordingPages::new(&mut canned, vec![(date(2025, 1, 1), date(2025, 2, 1))])
            .next()
            .expect("item")
            .expect("recording");
        assert_eq!(first.id, "u1");
        assert_eq!(canned.calls.len(), 1);
    }

    #[test]
    fn page_error_ends_the_listing() {
        let mut canned = CannedPages {
            pages: VecDeque::from([Err(RemoteError::Status {
                service: "zoom",
                status: 403,
                body: "forbidden".to_string(),
            }
            .into())]),
            ..Default::default()
        };
        let mut pages = RecordingPages::new(
            &mut canned,
            vec![(date(2025, 1, 1), date(2025, 2, 1)), (date(2025, 2, 2), date(2025, 3, 1))],
        );
        assert!(pages.next().expect("item").is_err());
        assert!(pages.next().is_none());
        drop(pages);
        assert_eq!(canned.calls.len(), 1);
    }
}
