pub mod retry;
pub mod token;

use crate::error::RemoteError;
use crate::migrate::util::truncate_with_ellipsis;
use anyhow::{Context, Result};
use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use std::time::Duration;
use token::BearerSource;

const ERROR_BODY_MAX_CHARS: usize = 400;

pub fn http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(30))
        .user_agent(concat!("recsync/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build HTTP client")
}

/// Pass successful responses through; turn anything else into a
/// [`RemoteError::Status`] carrying a trimmed body for the log.
pub fn check_status(service: &'static str, response: Response) -> Result<Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    Err(RemoteError::Status {
        service,
        status: status.as_u16(),
        body: truncate_with_ellipsis(body.trim(), ERROR_BODY_MAX_CHARS),
    })
}

pub fn transport(service: &'static str) -> impl FnOnce(reqwest::Error) -> RemoteError {
    move |source| RemoteError::Transport { service, source }
}

/// Send with the cached bearer token; on 401 fetch a new token and send
/// once more. The status is left for the caller to judge.
pub fn send_authorized<A, F>(auth: &mut A, build: F) -> Result<Response>
where
    A: BearerSource,
    F: Fn(&str) -> RequestBuilder,
{
    let service = auth.service();
    let token = auth.token()?;
    let response = build(&token).send().map_err(transport(service))?;
    if response.status() != StatusCode::UNAUTHORIZED {
        return Ok(response);
    }
    tracing::warn!("{service} rejected the access token, refreshing");
    auth.invalidate();
    let token = auth.token()?;
    Ok(build(&token).send().map_err(transport(service))?)
}
