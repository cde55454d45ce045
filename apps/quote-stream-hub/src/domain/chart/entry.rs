//! Time-bounded cache entry.

use std::time::Duration;

use tokio::time::Instant;

/// Cached payload stamped with its load time and time-to-live.
#[derive(Debug, Clone)]
pub struct CachedEntry<T> {
    /// Cached value.
    pub payload: T,
    /// When the payload was first loaded. Appends do not move it.
    pub cached_at: Instant,
    /// How long the payload stays fresh.
    pub ttl: Duration,
}

impl<T> CachedEntry<T> {
    /// Stamp `payload` with the current time.
    #[must_use]
    pub fn new(payload: T, ttl: Duration) -> Self {
        Self {
            payload,
            cached_at: Instant::now(),
            ttl,
        }
    }

    /// Whether more than `ttl` has passed since the entry was loaded.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    /// Expiry check against an explicit instant.
    #[must_use]
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.cached_at) > self.ttl
    }
}
