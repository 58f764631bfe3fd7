// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Expiration policy shared by every in-memory cache.

use std::time::Duration;

use tokio::time::Instant;

/// When a cached entry stops being served.
///
/// Either bound, both, or neither may be set. With neither, entries live
/// until they are invalidated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpirationPolicy {
    /// Expire once this long has passed since the last read.
    pub expire_after_access: Option<Duration>,
    /// Expire once this long has passed since the value was loaded or patched.
    pub expire_after_write: Option<Duration>,
}

impl ExpirationPolicy {
    #[must_use]
    pub fn never() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn after_access(ttl: Duration) -> Self {
        Self {
            expire_after_access: Some(ttl),
            expire_after_write: None,
        }
    }

    #[must_use]
    pub fn after_write(ttl: Duration) -> Self {
        Self {
            expire_after_access: None,
            expire_after_write: Some(ttl),
        }
    }

    #[must_use]
    pub fn with_access(mut self, ttl: Duration) -> Self {
        self.expire_after_access = Some(ttl);
        self
    }

    #[must_use]
    pub fn with_write(mut self, ttl: Duration) -> Self {
        self.expire_after_write = Some(ttl);
        self
    }

    /// Build from optional millisecond bounds, as found in config.
    #[must_use]
    pub fn from_millis(after_access_ms: Option<u64>, after_write_ms: Option<u64>) -> Self {
        Self {
            expire_after_access: after_access_ms.map(Duration::from_millis),
            expire_after_write: after_write_ms.map(Duration::from_millis),
        }
    }

    #[must_use]
    pub fn expires(&self) -> bool {
        self.expire_after_access.is_some() || self.expire_after_write.is_some()
    }

    pub fn is_expired(&self, written_at: Instant, last_access: Instant, now: Instant) -> bool {
        let elapsed = |since: Instant, ttl: Duration| now.saturating_duration_since(since) >= ttl;
        self.expire_after_write
            .is_some_and(|ttl| elapsed(written_at, ttl))
            || self
                .expire_after_access
                .is_some_and(|ttl| elapsed(last_access, ttl))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    #[test]
    fn test_never_expires() {
        let start = Instant::now();
        let later = start + Duration::from_secs(86_400 * 365);
        assert!(!ExpirationPolicy::never().is_expired(start, start, later));
        assert!(!ExpirationPolicy::never().expires());
    }

    #[test]
    fn test_access_window_slides() {
        let policy = ExpirationPolicy::after_access(MINUTE);
        let written = Instant::now();
        let touched = written + MINUTE * 5;
        assert!(!policy.is_expired(written, touched, touched + MINUTE / 2));
        assert!(policy.is_expired(written, touched, touched + MINUTE));
    }

    #[test]
    fn test_either_bound_expires() {
        let policy = ExpirationPolicy::after_access(MINUTE * 10).with_write(MINUTE);
        let written = Instant::now();
        // Recently read but written too long ago
        assert!(policy.is_expired(written, written + MINUTE, written + MINUTE));
        assert_eq!(
            ExpirationPolicy::from_millis(Some(600_000), Some(60_000)),
            policy
        );
    }
}
