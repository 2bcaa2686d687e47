use thiserror::Error;

/// Failures that stop a run before (or instead of) touching any recording.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("another run holds the lock {path} (pid {pid})")]
    Locked { path: String, pid: String },
    #[error("missing required configuration: {}", .0.join(", "))]
    MissingConfig(Vec<String>),
    #[error("configuration invalid: {0}")]
    InvalidConfig(String),
    #[error("processed ledger {path} is malformed: {reason}")]
    LedgerCorrupt { path: String, reason: String },
    #[error("{service} authentication failed: {reason}")]
    Auth { service: String, reason: String },
    #[error("listing recordings failed: {0}")]
    Listing(String),
}

impl SyncError {
    pub fn code(&self) -> SyncErrorCode {
        match self {
            Self::Locked { .. } => SyncErrorCode::E001Locked,
            Self::MissingConfig(_) => SyncErrorCode::E002ConfigMissing,
            Self::InvalidConfig(_) => SyncErrorCode::E003ConfigInvalid,
            Self::LedgerCorrupt { .. } => SyncErrorCode::E004LedgerCorrupt,
            Self::Auth { .. } => SyncErrorCode::E005AuthFailed,
            Self::Listing(_) => SyncErrorCode::E006ListingFailed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncErrorCode {
    E001Locked,
    E002ConfigMissing,
    E003ConfigInvalid,
    E004LedgerCorrupt,
    E005AuthFailed,
    E006ListingFailed,
}

impl SyncErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::E001Locked => "E001_LOCKED",
            Self::E002ConfigMissing => "E002_CONFIG_MISSING",
            Self::E003ConfigInvalid => "E003_CONFIG_INVALID",
            Self::E004LedgerCorrupt => "E004_LEDGER_CORRUPT",
            Self::E005AuthFailed => "E005_AUTH_FAILED",
            Self::E006ListingFailed => "E006_LISTING_FAILED",
        }
    }
}

/// A single failed exchange with one of the remote APIs.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("{service} returned HTTP {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },
    #[error("{service} transport error: {source}")]
    Transport {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },
}

impl RemoteError {
    /// Timeouts, connection failures, rate limiting and 5xx are worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Transport { .. } => true,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Transport { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16) -> RemoteError {
        RemoteError::Status {
            service: "zoom",
            status: code,
            body: String::new(),
        }
    }

    #[test]
    fn rate_limits_and_server_errors_are_transient() {
        assert!(status(429).is_transient());
        assert!(status(500).is_transient());
        assert!(status(503).is_transient());
    }

    #[test]
    fn client_errors_are_permanent() {
        assert!(!status(400).is_transient());
        assert!(!status(401).is_transient());
        assert!(!status(403).is_transient());
        assert!(!status(404).is_transient());
    }

    #[test]
    fn missing_config_lists_every_name() {
        let err = SyncError::MissingConfig(vec!["ZOOM_ACCOUNT_ID".into(), "GOOGLE_DRIVE_PARENT_ID".into()]);
        assert_eq!(err.code().as_str(), "E002_CONFIG_MISSING");
        assert_eq!(
            err.to_string(),
            "missing required configuration: ZOOM_ACCOUNT_ID, GOOGLE_DRIVE_PARENT_ID"
        );
    }
}
