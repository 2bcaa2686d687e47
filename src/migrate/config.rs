use crate::error::SyncError;
use anyhow::{Result, anyhow};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub const DATE_FORMAT: &str = "%Y-%m-%d";
/// Upper bound on every day-count setting; keeps date arithmetic in range.
pub const MAX_DAYS: u64 = 36_500;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub processing_days: u64,
    pub backfill_from: String,
    pub force_backfill: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            processing_days: 60,
            backfill_from: "1970-01-01".to_string(),
            force_backfill: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub delete_after_days: u64,
    pub delete_source: bool,
    pub delete_action: String,
    pub log_retention_days: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            delete_after_days: 365,
            delete_source: true,
            delete_action: "trash".to_string(),
            log_retention_days: 180,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoomConfig {
    pub account_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub api_base: String,
    pub oauth_url: String,
    pub page_size: u32,
}

impl Default for ZoomConfig {
    fn default() -> Self {
        Self {
            account_id: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            api_base: "https://api.zoom.us/v2".to_string(),
            oauth_url: "https://zoom.us/oauth/token".to_string(),
            page_size: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveConfig {
    pub service_account_file: String,
    pub root_folder_id: String,
    pub api_base: String,
    pub upload_base: String,
    pub scope: String,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            service_account_file: String::new(),
            root_folder_id: String::new(),
            api_base: "https://www.googleapis.com/drive/v3".to_string(),
            upload_base: "https://www.googleapis.com/upload/drive/v3".to_string(),
            scope: "https://www.googleapis.com/auth/drive.file".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub request_timeout_secs: u64,
    pub transfer_timeout_secs: u64,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 60,
            transfer_timeout_secs: 3600,
            max_attempts: 3,
            backoff_base_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SyncConfig {
    pub window: WindowConfig,
    pub retention: RetentionConfig,
    pub zoom: ZoomConfig,
    pub drive: DriveConfig,
    pub network: NetworkConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialSyncConfig {
    window: Option<WindowConfig>,
    retention: Option<RetentionConfig>,
    zoom: Option<ZoomConfig>,
    drive: Option<DriveConfig>,
    network: Option<NetworkConfig>,
}

impl SyncConfig {
    pub fn backfill_from_date(&self) -> Result<NaiveDate> {
        NaiveDate::parse_from_str(self.window.backfill_from.trim(), DATE_FORMAT).map_err(|err| {
            anyhow!(
                "invalid backfill start `{}`: expected YYYY-MM-DD ({err})",
                self.window.backfill_from
            )
        })
    }

    /// Relative key paths resolve against the recsync home directory.
    pub fn service_account_path(&self, home: &Path) -> PathBuf {
        let raw = PathBuf::from(self.drive.service_account_file.trim());
        if raw.is_absolute() { raw } else { home.join(raw) }
    }

    pub fn missing_credentials(&self) -> Vec<String> {
        let required = [
            ("ZOOM_ACCOUNT_ID", &self.zoom.account_id),
            ("ZOOM_CLIENT_ID", &self.zoom.client_id),
            ("ZOOM_CLIENT_SECRET", &self.zoom.client_secret),
            ("SERVICE_ACCOUNT_FILE", &self.drive.service_account_file),
            ("GOOGLE_DRIVE_PARENT_ID", &self.drive.root_folder_id),
        ];
        required
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| (*name).to_string())
            .collect()
    }

    pub fn require_credentials(&self) -> Result<()> {
        let missing = self.missing_credentials();
        if missing.is_empty() {
            return Ok(());
        }
        Err(SyncError::MissingConfig(missing).into())
    }
}

fn parse_u64_setting(var: &str, raw: &str) -> Result<u64> {
    raw.trim().parse::<u64>().map_err(|_| {
        SyncError::InvalidConfig(format!("{var} must be a whole number, got `{}`", raw.trim())).into()
    })
}

fn parse_bool_setting(var: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(SyncError::InvalidConfig(format!("{var} must be true or false, got `{other}`")).into()),
    }
}

fn non_empty_env(var: &str) -> Option<String> {
    env::var(var).ok().filter(|v| !v.trim().is_empty())
}

fn env_or_u64(var: &str, fallback: u64) -> Result<u64> {
    match non_empty_env(var) {
        Some(raw) => parse_u64_setting(var, &raw),
        None => Ok(fallback),
    }
}

/// The first listed name that is set wins, even when it fails to parse.
fn env_or_u64_first(vars: &[&str], fallback: u64) -> Result<u64> {
    for var in vars {
        if let Some(raw) = non_empty_env(var) {
            return parse_u64_setting(var, &raw);
        }
    }
    Ok(fallback)
}

fn env_or_bool(var: &str, fallback: bool) -> Result<bool> {
    match non_empty_env(var) {
        Some(raw) => parse_bool_setting(var, &raw),
        None => Ok(fallback),
    }
}

fn env_or_string(var: &str, fallback: &str) -> String {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => fallback.to_string(),
    }
}

pub fn validate(cfg: &SyncConfig) -> Result<()> {
    let invalid = |msg: &str| -> Result<()> { Err(SyncError::InvalidConfig(msg.to_string()).into()) };

    if cfg.window.processing_days == 0 {
        return invalid("processing days must be >= 1");
    }
    if cfg.retention.delete_after_days == 0 {
        return invalid("delete-after days must be >= 1");
    }
    if cfg.retention.log_retention_days == 0 {
        return invalid("log retention days must be >= 1");
    }
    if [
        cfg.window.processing_days,
        cfg.retention.delete_after_days,
        cfg.retention.log_retention_days,
    ]
    .iter()
    .any(|days| *days > MAX_DAYS)
    {
        return invalid(&format!("day counts must be <= {MAX_DAYS}"));
    }
    if cfg.retention.delete_action != "trash" && cfg.retention.delete_action != "delete" {
        return invalid("delete action must be `trash` or `delete`");
    }
    if let Err(err) = cfg.backfill_from_date() {
        return invalid(&err.to_string());
    }
    if cfg.zoom.page_size == 0 || cfg.zoom.page_size > 300 {
        return invalid("zoom page size must be within 1..=300");
    }
    if cfg.network.max_attempts == 0 {
        return invalid("max attempts must be >= 1");
    }
    if cfg.network.request_timeout_secs == 0 || cfg.network.transfer_timeout_secs == 0 {
        return invalid("network timeouts must be >= 1 second");
    }
    Ok(())
}

pub fn resolve_config_path(home: &Path) -> PathBuf {
    match env::var("RECSYNC_CONFIG_PATH") {
        Ok(custom) if !custom.trim().is_empty() => PathBuf::from(custom.trim()),
        _ => home.join("recsync.toml"),
    }
}

fn merge_toml(base: &mut SyncConfig, raw: &str, origin: &Path) -> Result<()> {
    let parsed: PartialSyncConfig = toml::from_str(raw).map_err(|err| {
        SyncError::InvalidConfig(format!("failed to parse {}: {err}", origin.display()))
    })?;
    if let Some(window) = parsed.window {
        base.window = window;
    }
    if let Some(retention) = parsed.retention {
        base.retention = retention;
    }
    if let Some(zoom) = parsed.zoom {
        base.zoom = zoom;
    }
    if let Some(drive) = parsed.drive {
        base.drive = drive;
    }
    if let Some(network) = parsed.network {
        base.network = network;
    }
    Ok(())
}

fn merge_file_config(base: &mut SyncConfig, home: &Path) -> Result<()> {
    let path = resolve_config_path(home);
    if !path.exists() {
        return Ok(());
    }
    let raw = fs::read_to_string(&path)?;
    merge_toml(base, &raw, &path)
}

fn merge_env(cfg: &mut SyncConfig) -> Result<()> {
    cfg.window.processing_days = env_or_u64_first(
        &["RECSYNC_PROCESSING_DAYS", "PROCESSING_DAYS"],
        cfg.window.processing_days,
    )?;
    cfg.window.backfill_from = env_or_string("RECSYNC_BACKFILL_FROM", &cfg.window.backfill_from);
    cfg.window.force_backfill = env_or_bool("RECSYNC_FORCE_BACKFILL", cfg.window.force_backfill)?;

    cfg.retention.delete_after_days = env_or_u64_first(
        &["RECSYNC_DELETE_AFTER_DAYS", "DELETE_AFTER_DAYS"],
        cfg.retention.delete_after_days,
    )?;
    cfg.retention.log_retention_days = env_or_u64_first(
        &["RECSYNC_LOG_RETENTION_DAYS", "LOG_RETENTION_DAYS"],
        cfg.retention.log_retention_days,
    )?;
    cfg.retention.delete_source = env_or_bool("RECSYNC_DELETE_SOURCE", cfg.retention.delete_source)?;
    cfg.retention.delete_action = env_or_string("RECSYNC_DELETE_ACTION", &cfg.retention.delete_action);

    cfg.zoom.account_id = env_or_string("ZOOM_ACCOUNT_ID", &cfg.zoom.account_id);
    cfg.zoom.client_id = env_or_string("ZOOM_CLIENT_ID", &cfg.zoom.client_id);
    cfg.zoom.client_secret = env_or_string("ZOOM_CLIENT_SECRET", &cfg.zoom.client_secret);
    cfg.zoom.api_base = env_or_string("RECSYNC_ZOOM_API_BASE", &cfg.zoom.api_base);
    cfg.zoom.oauth_url = env_or_string("RECSYNC_ZOOM_OAUTH_URL", &cfg.zoom.oauth_url);

    cfg.drive.service_account_file =
        env_or_string("SERVICE_ACCOUNT_FILE", &cfg.drive.service_account_file);
    cfg.drive.root_folder_id = env_or_string("GOOGLE_DRIVE_PARENT_ID", &cfg.drive.root_folder_id);
    cfg.drive.api_base = env_or_string("RECSYNC_DRIVE_API_BASE", &cfg.drive.api_base);
    cfg.drive.upload_base = env_or_string("RECSYNC_DRIVE_UPLOAD_BASE", &cfg.drive.upload_base);

    cfg.network.request_timeout_secs =
        env_or_u64("RECSYNC_REQUEST_TIMEOUT_SECS", cfg.network.request_timeout_secs)?;
    cfg.network.transfer_timeout_secs =
        env_or_u64("RECSYNC_TRANSFER_TIMEOUT_SECS", cfg.network.transfer_timeout_secs)?;
    cfg.network.max_attempts = u32::try_from(env_or_u64(
        "RECSYNC_MAX_ATTEMPTS",
        u64::from(cfg.network.max_attempts),
    )?)
    .unwrap_or(u32::MAX);
    cfg.network.backoff_base_ms = env_or_u64("RECSYNC_BACKOFF_BASE_MS", cfg.network.backoff_base_ms)?;
    Ok(())
}

pub fn load_config(home: &Path) -> Result<SyncConfig> {
    let mut cfg = SyncConfig::default();
    merge_file_config(&mut cfg, home)?;
    merge_env(&mut cfg)?;
    validate(&cfg)?;
    Ok(cfg)
}
