use anyhow::Result;
use std::time::{Duration, Instant};

/// Something that hands out bearer tokens and can be told one was rejected.
pub trait BearerSource {
    fn service(&self) -> &'static str;
    fn token(&mut self) -> Result<String>;
    fn invalidate(&mut self);
}

/// Refresh this long before the server-side expiry.
pub const REFRESH_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct CachedToken {
    value: String,
    expires_at: Instant,
}

impl CachedToken {
    pub fn new(value: impl Into<String>, expires_in_secs: u64, now: Instant) -> Self {
        Self {
            value: value.into(),
            expires_at: now + Duration::from_secs(expires_in_secs),
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn is_fresh(&self, now: Instant) -> bool {
        now + REFRESH_MARGIN < self.expires_at
    }
}

/// Holds at most one bearer token and knows when to fetch a new one.
#[derive(Debug, Default)]
pub struct TokenSlot {
    current: Option<CachedToken>,
}

impl TokenSlot {
    pub fn fresh(&self, now: Instant) -> Option<&str> {
        self.current
            .as_ref()
            .filter(|token| token.is_fresh(now))
            .map(CachedToken::value)
    }

    pub fn store(&mut self, token: CachedToken) -> String {
        let value = token.value.clone();
        self.current = Some(token);
        value
    }

    /// Forget the cached token, e.g. after the server rejected it.
    pub fn invalidate(&mut self) {
        self.current = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_goes_stale_inside_the_refresh_margin() {
        let now = Instant::now();
        let token = CachedToken::new("abc", 3600, now);
        assert!(token.is_fresh(now));
        assert!(token.is_fresh(now + Duration::from_secs(3500)));
        assert!(!token.is_fresh(now + Duration::from_secs(3540)));
    }

    #[test]
    fn short_lived_tokens_are_never_fresh() {
        let now = Instant::now();
        assert!(!CachedToken::new("abc", 30, now).is_fresh(now));
    }

    #[test]
    fn slot_invalidation_forces_refetch() {
        let now = Instant::now();
        let mut slot = TokenSlot::default();
        assert!(slot.fresh(now).is_none());
        assert_eq!(slot.store(CachedToken::new("t1", 3600, now)), "t1");
        assert_eq!(slot.fresh(now), Some("t1"));
        slot.invalidate();
        assert!(slot.fresh(now).is_none());
    }
}
