//! Configuration Module
//!
//! Handles loading and validating cache options from environment variables.

use std::env;
use std::time::Duration;

use tracing::warn;

use crate::error::{CacheError, Result};

/// Default time-to-live for cached entries (5 minutes).
pub const DEFAULT_TIME_TO_LIVE: Duration = Duration::from_secs(300);

/// Smallest eviction interval derived from the TTL.
const MIN_EVICTION_INTERVAL: Duration = Duration::from_millis(1);

/// Cache configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheOptions {
    /// Maximum number of entries, 0 = unbounded
    pub capacity: usize,
    /// How long an entry lives after its last access (or creation)
    pub time_to_live: Duration,
    /// Refresh the last-access time on every successful read
    pub sliding_expiration: bool,
    /// Sweeper period, None = 10% of `time_to_live`
    pub eviction_interval: Option<Duration>,
    /// Fail insertions at capacity instead of evicting
    pub throw_if_capacity_exceeded: bool,
}

impl CacheOptions {
    /// Creates options with all defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new CacheOptions by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_CAPACITY` - Maximum entries, 0 = unbounded (default: 0)
    /// - `CACHE_TTL_MS` - Time-to-live in milliseconds (default: 300000)
    /// - `CACHE_SLIDING_EXPIRATION` - `true`/`false` (default: false)
    /// - `CACHE_EVICTION_INTERVAL_MS` - Sweeper period in milliseconds (default: 10% of TTL)
    /// - `CACHE_THROW_IF_CAPACITY_EXCEEDED` - `true`/`false` (default: false)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            capacity: parse_env("CACHE_CAPACITY").unwrap_or(defaults.capacity),
            time_to_live: parse_env("CACHE_TTL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.time_to_live),
            sliding_expiration: parse_env("CACHE_SLIDING_EXPIRATION")
                .unwrap_or(defaults.sliding_expiration),
            eviction_interval: parse_env("CACHE_EVICTION_INTERVAL_MS").map(Duration::from_millis),
            throw_if_capacity_exceeded: parse_env("CACHE_THROW_IF_CAPACITY_EXCEEDED")
                .unwrap_or(defaults.throw_if_capacity_exceeded),
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_time_to_live(mut self, ttl: Duration) -> Self {
        self.time_to_live = ttl;
        self
    }

    pub fn with_sliding_expiration(mut self, sliding: bool) -> Self {
        self.sliding_expiration = sliding;
        self
    }

    pub fn with_eviction_interval(mut self, interval: Duration) -> Self {
        self.eviction_interval = Some(interval);
        self
    }

    pub fn with_throw_if_capacity_exceeded(mut self, throw: bool) -> Self {
        self.throw_if_capacity_exceeded = throw;
        self
    }

    // == Effective Eviction Interval ==
    /// Returns the sweeper period: the explicit interval, or 10% of the TTL.
    pub fn effective_eviction_interval(&self) -> Duration {
        self.eviction_interval
            .unwrap_or_else(|| (self.time_to_live / 10).max(MIN_EVICTION_INTERVAL))
    }

    // == Validate ==
    /// Rejects option combinations the cache cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.time_to_live.is_zero() {
            return Err(CacheError::InvalidConfig(
                "time_to_live must be greater than zero".to_string(),
            ));
        }
        if self.eviction_interval.is_some_and(|i| i.is_zero()) {
            return Err(CacheError::InvalidConfig(
                "eviction_interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            capacity: 0,
            time_to_live: DEFAULT_TIME_TO_LIVE,
            sliding_expiration: false,
            eviction_interval: None,
            throw_if_capacity_exceeded: false,
        }
    }
}

/// Reads and parses one variable; unparsable values fall back to the default.
fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(variable = name, value = %raw, "Ignoring unparsable value, using default");
            None
        }
    }
}
