use crate::drive::auth::{DriveAuth, ServiceAccountKey};
use crate::migrate::config::SyncConfig;
use crate::migrate::engine::{DestinationStore, FolderHandle, UploadedFile};
use crate::remote::retry::{RetryPolicy, with_backoff};
use crate::remote::token::BearerSource;
use crate::remote::{check_status, http_client, send_authorized, transport};
use anyhow::{Context, Result};
use reqwest::blocking::{Body, Client};
use reqwest::header::LOCATION;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use std::time::Duration;

pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

#[derive(Debug, Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
}

#[derive(Debug, Deserialize)]
struct DriveFile {
    id: String,
    #[serde(default)]
    name: String,
}

struct DriveApi {
    http: Client,
    auth: DriveAuth,
    api_base: String,
    upload_base: String,
}

/// Escape a value for a single-quoted literal in a `files.list` query.
pub fn escape_query_literal(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

pub fn folder_query(parent_id: &str, name: &str) -> String {
    format!(
        "name='{}' and mimeType='{FOLDER_MIME_TYPE}' and trashed=false and '{}' in parents",
        escape_query_literal(name),
        escape_query_literal(parent_id)
    )
}

/// Folder search and creation below a known parent.
trait FolderApi {
    fn find_folder(&mut self, parent_id: &str, name: &str) -> Result<Option<String>>;
    fn create_folder(&mut self, parent_id: &str, name: &str) -> Result<String>;
}

impl FolderApi for DriveApi {
    fn find_folder(&mut self, parent_id: &str, name: &str) -> Result<Option<String>> {
        let url = format!("{}/files", self.api_base);
        let query = folder_query(parent_id, name);
        let http = self.http.clone();
        let response = send_authorized(&mut self.auth, |token| {
            http.get(&url).bearer_auth(token).query(&[
                ("q", query.as_str()),
                ("spaces", "drive"),
                ("fields", "files(id,name)"),
                ("supportsAllDrives", "true"),
                ("includeItemsFromAllDrives", "true"),
                ("pageSize", "10"),
            ])
        })?;
        let listing = check_status("drive", response)?
            .json::<FileList>()
            .map_err(transport("drive"))?;
        Ok(listing.files.into_iter().next().map(|f| f.id))
    }

    fn create_folder(&mut self, parent_id: &str, name: &str) -> Result<String> {
        let url = format!("{}/files", self.api_base);
        let metadata = json!({
            "name": name,
            "mimeType": FOLDER_MIME_TYPE,
            "parents": [parent_id],
        });
        let http = self.http.clone();
        let response = send_authorized(&mut self.auth, |token| {
            http.post(&url)
                .bearer_auth(token)
                .query(&[("supportsAllDrives", "true"), ("fields", "id")])
                .json(&metadata)
        })?;
        let created = check_status("drive", response)?
            .json::<DriveFile>()
            .map_err(transport("drive"))?;
        Ok(created.id)
    }
}

impl DriveApi {
    fn start_session(&mut self, folder_id: &str, remote_name: &str, len: u64) -> Result<String> {
        let url = format!("{}/files", self.upload_base);
        let metadata = json!({ "name": remote_name, "parents": [folder_id] });
        let http = self.http.clone();
        let response = send_authorized(&mut self.auth, |token| {
            http.post(&url)
                .bearer_auth(token)
                .query(&[
                    ("uploadType", "resumable"),
                    ("supportsAllDrives", "true"),
                ])
                .header("X-Upload-Content-Length", len.to_string())
                .json(&metadata)
        })?;
        let response = check_status("drive", response)?;
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .context("drive did not return a resumable session location")?;
        Ok(location.to_string())
    }
}

/// Resolved `(parent, name) -> folder id` pairs for the life of the process.
#[derive(Debug, Default)]
struct FolderCache {
    known: HashMap<(String, String), String>,
}

impl FolderCache {
    /// Search before create on every attempt so a retried create after a lost
    /// response does not leave a duplicate folder.
    fn find_or_create<A: FolderApi>(
        &mut self,
        api: &mut A,
        retry: &RetryPolicy,
        parent_id: &str,
        name: &str,
    ) -> Result<String> {
        let key = (parent_id.to_string(), name.to_string());
        if let Some(id) = self.known.get(&key) {
            return Ok(id.clone());
        }
        let id = with_backoff(retry, &format!("drive folder {name}"), || {
            if let Some(existing) = api.find_folder(parent_id, name)? {
                tracing::debug!(folder = %name, id = %existing, "reusing folder");
                return Ok(existing);
            }
            let created = api.create_folder(parent_id, name)?;
            tracing::info!(folder = %name, parent = %parent_id, id = %created, "created folder");
            Ok(created)
        })?;
        self.known.insert(key, id.clone());
        Ok(id)
    }

    fn ensure_path<A: FolderApi>(
        &mut self,
        api: &mut A,
        retry: &RetryPolicy,
        root_id: &str,
        segments: &[String],
    ) -> Result<String> {
        let mut parent = root_id.to_string();
        for name in segments {
            parent = self.find_or_create(api, retry, &parent, name)?;
        }
        Ok(parent)
    }
}

/// A 2xx on the upload PUT means the file exists; an unreadable reply only
/// loses its id.
fn uploaded_file(reply: Option<&str>, remote_name: &str) -> UploadedFile {
    match reply.and_then(|raw| serde_json::from_str::<DriveFile>(raw).ok()) {
        Some(file) => UploadedFile {
            file_id: file.id,
            name: if file.name.is_empty() {
                remote_name.to_string()
            } else {
                file.name
            },
        },
        None => {
            tracing::warn!(file = %remote_name, "upload committed but its reply was unreadable");
            UploadedFile {
                file_id: String::new(),
                name: remote_name.to_string(),
            }
        }
    }
}

pub struct DriveClient {
    api: DriveApi,
    transfer: Client,
    root_folder_id: String,
    retry: RetryPolicy,
    folders: FolderCache,
}

impl DriveClient {
    pub fn from_config(cfg: &SyncConfig, home: &Path) -> Result<Self> {
        let http = http_client(Duration::from_secs(cfg.network.request_timeout_secs))?;
        let transfer = http_client(Duration::from_secs(cfg.network.transfer_timeout_secs))?;
        let retry = RetryPolicy::from_config(&cfg.network);
        let key = ServiceAccountKey::load(&cfg.service_account_path(home))?;
        Ok(Self {
            api: DriveApi {
                auth: DriveAuth::new(http.clone(), key, &cfg.drive.scope, retry),
                http,
                api_base: cfg.drive.api_base.trim_end_matches('/').to_string(),
                upload_base: cfg.drive.upload_base.trim_end_matches('/').to_string(),
            },
            transfer,
            root_folder_id: cfg.drive.root_folder_id.clone(),
            retry,
            folders: FolderCache::default(),
        })
    }

    pub fn authenticate(&mut self) -> Result<()> {
        self.api.auth.token().map(|_| ())
    }
}

impl DestinationStore for DriveClient {
    fn ensure_folder_path(&mut self, segments: &[String]) -> Result<FolderHandle> {
        let id = self
            .folders
            .ensure_path(&mut self.api, &self.retry, &self.root_folder_id, segments)?;
        Ok(FolderHandle(id))
    }

    /// Transient failures before the bytes are accepted restart the session.
    /// Once the PUT succeeds the upload is never repeated.
    fn upload_file(
        &mut self,
        folder: &FolderHandle,
        local_path: &Path,
        remote_name: &str,
    ) -> Result<UploadedFile> {
        let len = local_path
            .metadata()
            .with_context(|| format!("failed to stat {}", local_path.display()))?
            .len();
        let retry = self.retry;
        let response = with_backoff(&retry, &format!("upload {remote_name}"), || {
            let session = self.api.start_session(&folder.0, remote_name, len)?;
            let file = File::open(local_path)
                .with_context(|| format!("failed to open {}", local_path.display()))?;
            let response = self
                .transfer
                .put(&session)
                .query(&[("fields", "id,name")])
                .body(Body::sized(file, len))
                .send()
                .map_err(transport("drive"))?;
            Ok(check_status("drive", response)?)
        })?;
        Ok(uploaded_file(response.text().ok().as_deref(), remote_name))
    }
}
