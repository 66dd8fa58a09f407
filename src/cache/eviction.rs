//! Capacity Eviction Module
//!
//! Keeps the store within its configured capacity by removing the entries
//! with the oldest last-access time once a new entry has been inserted.

use std::collections::BinaryHeap;
use std::hash::Hash;
use std::time::Instant;

use tracing::{debug, warn};

use crate::cache::CacheStore;
use crate::config::CacheOptions;
use crate::error::{CacheError, Result};

// == Select Oldest ==
/// Picks the `count` entries with the smallest last-access time.
///
/// Runs one pass over `entries` with a max-heap bounded at `count`, so the
/// cost is O(n log count). Equal access times are ordered by key and the
/// smaller key is evicted first. The result is ordered oldest first.
pub fn select_oldest<K, I>(entries: I, count: usize) -> Vec<K>
where
    K: Ord,
    I: IntoIterator<Item = (K, Instant)>,
{
    if count == 0 {
        return Vec::new();
    }

    let mut heap: BinaryHeap<(Instant, K)> = BinaryHeap::with_capacity(count + 1);
    for (key, last_access) in entries {
        let candidate = (last_access, key);
        if heap.len() < count {
            heap.push(candidate);
        } else if heap.peek().is_some_and(|newest| candidate < *newest) {
            heap.pop();
            heap.push(candidate);
        }
    }

    heap.into_sorted_vec()
        .into_iter()
        .map(|(_, key)| key)
        .collect()
}

// == Capacity Evictor ==
/// Enforces the capacity bound around each insertion.
///
/// In throw mode [`admit`](CapacityEvictor::admit) refuses the insertion
/// up front. Otherwise the caller inserts first and then calls
/// [`trim`](CapacityEvictor::trim), so only a write that really happened
/// can cause an eviction. Decisions are taken on a scan without locking the
/// whole store, so under concurrent inserts the bound can be overshot briefly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityEvictor {
    capacity: usize,
    throw_if_exceeded: bool,
}

impl CapacityEvictor {
    pub fn new(capacity: usize, throw_if_exceeded: bool) -> Self {
        Self {
            capacity,
            throw_if_exceeded,
        }
    }

    pub fn from_options(options: &CacheOptions) -> Self {
        Self::new(options.capacity, options.throw_if_capacity_exceeded)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns true when a capacity is configured.
    pub fn is_bounded(&self) -> bool {
        self.capacity > 0
    }

    // == Admit ==
    /// Checks that one more entry fits, in throw mode only.
    ///
    /// Expired entries are dropped first since they are dead anyway. Fails
    /// with [`CacheError::CapacityExceeded`] if the live entries still fill
    /// the cache. Always succeeds in evict mode.
    pub fn admit<K, V>(&self, store: &CacheStore<K, V>) -> Result<()>
    where
        K: Hash + Eq + Clone,
        V: Clone,
    {
        if !self.throw_if_exceeded || !self.is_bounded() || store.len() < self.capacity {
            return Ok(());
        }

        let scan = store.scan();
        store.purge(&scan.expired);
        if scan.live.len() < self.capacity {
            return Ok(());
        }

        warn!(capacity = self.capacity, "Rejecting insertion, cache is full");
        Err(CacheError::CapacityExceeded {
            capacity: self.capacity,
        })
    }

    // == Trim ==
    /// Brings the store back within capacity after `kept` was inserted.
    ///
    /// A single scan drops expired entries and ranks the live ones; the
    /// least recently accessed entries other than `kept` are evicted until
    /// the count fits. Does nothing in throw mode.
    ///
    /// Returns the number of entries evicted for capacity.
    pub fn trim<K, V>(&self, store: &CacheStore<K, V>, kept: &K) -> usize
    where
        K: Hash + Eq + Ord + Clone,
        V: Clone,
    {
        if self.throw_if_exceeded || !self.is_bounded() || store.len() <= self.capacity {
            return 0;
        }

        let scan = store.scan();
        let expired = store.purge(&scan.expired);
        if expired > 0 {
            debug!(expired, "Dropped expired entries before capacity check");
        }

        let excess = scan.live.len().saturating_sub(self.capacity);
        if excess == 0 {
            return 0;
        }

        let candidates = scan.live.into_iter().filter(|(key, _)| key != kept);
        let victims = select_oldest(candidates, excess);
        let evicted = store.evict(&victims);
        debug!(evicted, capacity = self.capacity, "Evicted oldest entries");
        evicted
    }
}
