//! Cache Entry Module
//!
//! Defines the structure for individual cache entries with TTL support.

use std::time::{Duration, Instant};

// == Cache Entry ==
/// Represents a single cache entry with value and access metadata.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    /// The stored value
    pub value: V,
    /// Creation time, or the latest read when sliding expiration is on
    pub last_access: Instant,
    /// Lifetime measured from `last_access`
    pub time_to_live: Duration,
}

impl<V> CacheEntry<V> {
    // == Constructor ==
    /// Creates a new cache entry accessed at `now`.
    pub fn new(value: V, now: Instant, time_to_live: Duration) -> Self {
        Self {
            value,
            last_access: now,
            time_to_live,
        }
    }

    // == Is Expired ==
    /// Checks if the entry has expired.
    ///
    /// Boundary condition: an entry whose age equals its TTL is still live;
    /// it expires once the elapsed time is strictly greater than the TTL.
    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_access) > self.time_to_live
    }

    // == Touch ==
    /// Refreshes the last-access time in place.
    pub fn touch(&mut self, now: Instant) {
        self.last_access = now;
    }

    // == Time To Live ==
    /// Returns how long the entry has left, zero once expired.
    pub fn ttl_remaining(&self, now: Instant) -> Duration {
        self.time_to_live
            .saturating_sub(now.saturating_duration_since(self.last_access))
    }
}
