use crate::error::SyncError;
use crate::remote::retry::{RetryPolicy, with_backoff};
use crate::remote::token::{BearerSource, CachedToken, TokenSlot};
use crate::remote::{check_status, transport};
use anyhow::{Context, Result};
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Instant;

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub private_key_id: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl ServiceAccountKey {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|err| SyncError::Auth {
            service: "drive".to_string(),
            reason: format!("cannot read service account file {}: {err}", path.display()),
        })?;
        let key = serde_json::from_str(&raw).map_err(|err| SyncError::Auth {
            service: "drive".to_string(),
            reason: format!("service account file {} is not valid: {err}", path.display()),
        })?;
        Ok(key)
    }
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

pub fn signed_assertion(key: &ServiceAccountKey, scope: &str, issued_at: i64) -> Result<String> {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = key.private_key_id.clone();
    let claims = AssertionClaims {
        iss: &key.client_email,
        scope,
        aud: &key.token_uri,
        iat: issued_at,
        exp: issued_at + ASSERTION_LIFETIME_SECS,
    };
    let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes()).map_err(|err| SyncError::Auth {
        service: "drive".to_string(),
        reason: format!("service account private key unusable: {err}"),
    })?;
    encode(&header, &claims, &signing_key).context("failed to sign service account assertion")
}

/// Service-account token exchange (JWT bearer grant).
pub struct DriveAuth {
    http: Client,
    key: ServiceAccountKey,
    scope: String,
    retry: RetryPolicy,
    slot: TokenSlot,
}

impl DriveAuth {
    pub fn new(http: Client, key: ServiceAccountKey, scope: &str, retry: RetryPolicy) -> Self {
        Self {
            http,
            key,
            scope: scope.to_string(),
            retry,
            slot: TokenSlot::default(),
        }
    }

    fn request_token(&self) -> Result<TokenResponse> {
        let assertion = signed_assertion(&self.key, &self.scope, Utc::now().timestamp())?;
        let response = self
            .http
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .map_err(transport("drive"))?;
        let response = check_status("drive", response).map_err(|err| match err.status() {
            Some(status) if (400..500).contains(&status) && status != 429 => {
                anyhow::Error::from(SyncError::Auth {
                    service: "drive".to_string(),
                    reason: err.to_string(),
                })
            }
            _ => err.into(),
        })?;
        Ok(response.json::<TokenResponse>().map_err(transport("drive"))?)
    }
}

impl BearerSource for DriveAuth {
    fn service(&self) -> &'static str {
        "drive"
    }

    fn token(&mut self) -> Result<String> {
        if let Some(token) = self.slot.fresh(Instant::now()) {
            return Ok(token.to_string());
        }
        let fetched = with_backoff(&self.retry, "drive token request", || self.request_token())?;
        tracing::debug!(expires_in = fetched.expires_in, "obtained drive access token");
        Ok(self
            .slot
            .store(CachedToken::new(fetched.access_token, fetched.expires_in, Instant::now())))
    }

    fn invalidate(&mut self) {
        self.slot.invalidate();
    }
}
