use crate::error::RemoteError;
use crate::migrate::config::NetworkConfig;
use anyhow::Result;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(network: &NetworkConfig) -> Self {
        Self {
            max_attempts: network.max_attempts.max(1),
            base_delay: Duration::from_millis(network.backoff_base_ms),
        }
    }

    /// Sleep before attempt `attempt + 1`: base, 2×base, 4×base, ...
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

/// Anything that is not a transient [`RemoteError`] is treated as permanent.
pub fn is_transient(err: &anyhow::Error) -> bool {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<RemoteError>())
        .is_some_and(RemoteError::is_transient)
}

pub fn with_backoff<T, F>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if attempt < policy.max_attempts && is_transient(&err) => {
                let delay = policy.delay_after(attempt);
                tracing::warn!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "{label} failed, retrying: {err:#}"
                );
                thread::sleep(delay);
                attempt += 1;
            }
            Err(err) => {
                return Err(err.context(format!("{label} failed after {attempt} attempt(s)")));
            }
        }
    }
}
