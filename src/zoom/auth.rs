use crate::error::SyncError;
use crate::migrate::config::ZoomConfig;
use crate::remote::retry::{RetryPolicy, with_backoff};
use crate::remote::token::{BearerSource, CachedToken, TokenSlot};
use crate::remote::{check_status, transport};
use crate::zoom::models::TokenResponse;
use anyhow::Result;
use reqwest::blocking::Client;
use std::time::Instant;

/// Server-to-server OAuth ("account credentials" grant).
pub struct ZoomAuth {
    http: Client,
    oauth_url: String,
    account_id: String,
    client_id: String,
    client_secret: String,
    retry: RetryPolicy,
    slot: TokenSlot,
}

impl ZoomAuth {
    pub fn new(http: Client, cfg: &ZoomConfig, retry: RetryPolicy) -> Self {
        Self {
            http,
            oauth_url: cfg.oauth_url.clone(),
            account_id: cfg.account_id.clone(),
            client_id: cfg.client_id.clone(),
            client_secret: cfg.client_secret.clone(),
            retry,
            slot: TokenSlot::default(),
        }
    }

    fn fetch(&mut self) -> Result<String> {
        if let Some(token) = self.slot.fresh(Instant::now()) {
            return Ok(token.to_string());
        }
        let fetched = with_backoff(&self.retry, "zoom token request", || self.request_token())?;
        tracing::debug!(expires_in = fetched.expires_in, "obtained zoom access token");
        Ok(self
            .slot
            .store(CachedToken::new(fetched.access_token, fetched.expires_in, Instant::now())))
    }

    fn request_token(&self) -> Result<TokenResponse> {
        let response = self
            .http
            .post(&self.oauth_url)
            .query(&[
                ("grant_type", "account_credentials"),
                ("account_id", self.account_id.as_str()),
            ])
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .send()
            .map_err(transport("zoom"))?;

        let response = check_status("zoom", response).map_err(|err| match err.status() {
            Some(status) if (400..500).contains(&status) && status != 429 => {
                anyhow::Error::from(SyncError::Auth {
                    service: "zoom".to_string(),
                    reason: err.to_string(),
                })
            }
            _ => err.into(),
        })?;
        Ok(response.json::<TokenResponse>().map_err(transport("zoom"))?)
    }
}

impl BearerSource for ZoomAuth {
    fn service(&self) -> &'static str {
        "zoom"
    }

    fn token(&mut self) -> Result<String> {
        self.fetch()
    }

    fn invalidate(&mut self) {
        self.slot.invalidate();
    }
}
