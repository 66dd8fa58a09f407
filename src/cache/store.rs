//! Cache Store Module
//!
//! Concurrent key to entry map with lazy TTL expiry. Every mutation is atomic
//! at single-entry granularity; nothing here takes a lock over the whole map
//! except [`CacheStore::clear`].

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use crate::cache::{CacheEntry, Clock, StatsRecorder};

/// Outcome of a single-slot read.
enum Lookup<V> {
    Hit(V),
    Expired,
    Missing,
}

// == Cache Store ==
/// Main cache storage with TTL support.
pub struct CacheStore<K, V> {
    /// Key-value storage
    entries: DashMap<K, CacheEntry<V>>,
    /// Time source for last-access bookkeeping
    clock: Arc<dyn Clock>,
    /// Lifetime applied to every entry
    time_to_live: Duration,
    /// Refresh last access on reads
    sliding_expiration: bool,
    /// Performance statistics
    stats: Arc<StatsRecorder>,
}

/// One pass over the store, split by expiry.
#[derive(Debug)]
pub struct AccessScan<K> {
    /// Keys whose entries had expired at scan time
    pub expired: Vec<K>,
    /// `(key, last_access)` of every live entry
    pub live: Vec<(K, Instant)>,
}

impl<K, V> fmt::Debug for CacheStore<K, V>
where
    K: Hash + Eq,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheStore")
            .field("len", &self.entries.len())
            .field("time_to_live", &self.time_to_live)
            .field("sliding_expiration", &self.sliding_expiration)
            .finish()
    }
}

impl<K, V> CacheStore<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    // == Constructor ==
    /// Creates a new CacheStore.
    ///
    /// # Arguments
    /// * `time_to_live` - Lifetime of every entry, measured from its last access
    /// * `sliding_expiration` - Whether reads refresh the last access time
    /// * `clock` - Time source
    /// * `stats` - Shared counters updated by every operation
    pub fn new(
        time_to_live: Duration,
        sliding_expiration: bool,
        clock: Arc<dyn Clock>,
        stats: Arc<StatsRecorder>,
    ) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
            time_to_live,
            sliding_expiration,
            stats,
        }
    }

    fn lookup(&self, key: &K, now: Instant) -> Lookup<V> {
        if self.sliding_expiration {
            // The slot stays write-locked between the expiry check and the
            // refresh, so a concurrent update cannot be overwritten.
            match self.entries.get_mut(key) {
                Some(mut slot) if !slot.is_expired(now) => {
                    slot.touch(now);
                    Lookup::Hit(slot.value.clone())
                }
                Some(_) => Lookup::Expired,
                None => Lookup::Missing,
            }
        } else {
            match self.entries.get(key) {
                Some(slot) if !slot.is_expired(now) => Lookup::Hit(slot.value.clone()),
                Some(_) => Lookup::Expired,
                None => Lookup::Missing,
            }
        }
    }

    /// Removes `key` only if it is still expired at `now`.
    ///
    /// An entry re-inserted after the expiry was observed is left alone.
    fn expire(&self, key: &K, now: Instant) -> bool {
        let removed = self
            .entries
            .remove_if(key, |_, entry| entry.is_expired(now))
            .is_some();
        if removed {
            self.stats.record_expirations(1);
        }
        removed
    }

    // == Try Get ==
    /// Retrieves a value by key.
    ///
    /// Returns the value if found and not expired. Expired entries are
    /// removed and counted as misses. With sliding expiration a hit refreshes
    /// the entry's last access time.
    pub fn try_get(&self, key: &K) -> Option<V> {
        let now = self.clock.now();
        match self.lookup(key, now) {
            Lookup::Hit(value) => {
                self.stats.record_hit();
                Some(value)
            }
            Lookup::Expired => {
                if self.expire(key, now) {
                    debug!("Lazy expiry removed an entry on read");
                }
                self.stats.record_miss();
                None
            }
            Lookup::Missing => {
                self.stats.record_miss();
                None
            }
        }
    }

    // == Peek ==
    /// Returns a live value without refreshing it or touching statistics.
    pub fn peek(&self, key: &K) -> Option<V> {
        let now = self.clock.now();
        self.entries
            .get(key)
            .filter(|slot| !slot.is_expired(now))
            .map(|slot| slot.value.clone())
    }

    /// Returns true if `key` holds an unexpired entry, without side effects.
    pub fn contains_live(&self, key: &K) -> bool {
        let now = self.clock.now();
        self.entries
            .get(key)
            .is_some_and(|slot| !slot.is_expired(now))
    }

    // == Try Add ==
    /// Inserts only if the key is absent (or holds an expired entry).
    ///
    /// Returns false without overwriting when a live entry exists.
    pub fn try_add(&self, key: K, value: V) -> bool {
        let now = self.clock.now();
        let fresh = CacheEntry::new(value, now, self.time_to_live);
        match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    occupied.insert(fresh);
                    self.stats.record_expirations(1);
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(fresh);
                true
            }
        }
    }

    // == Insert ==
    /// Stores a value, replacing whatever the key held.
    pub fn insert(&self, key: K, value: V) {
        let entry = CacheEntry::new(value, self.clock.now(), self.time_to_live);
        self.entries.insert(key, entry);
    }

    // == Try Update ==
    /// Replaces the value of a live entry.
    ///
    /// Fails for absent or expired keys. A successful write counts as an
    /// access, so the entry's last access becomes the write time.
    pub fn try_update(&self, key: &K, value: V) -> bool {
        let now = self.clock.now();
        let expired = match self.entries.get_mut(key) {
            Some(mut slot) if !slot.is_expired(now) => {
                *slot = CacheEntry::new(value, now, self.time_to_live);
                return true;
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            self.expire(key, now);
        }
        false
    }

    // == Try Remove ==
    /// Removes an entry by key, returning its value.
    ///
    /// An expired entry is removed too but reported as absent.
    pub fn try_remove(&self, key: &K) -> Option<V> {
        let now = self.clock.now();
        let (_, entry) = self.entries.remove(key)?;
        if entry.is_expired(now) {
            self.stats.record_expirations(1);
            None
        } else {
            Some(entry.value)
        }
    }

    // == Time To Live ==
    /// Returns the remaining lifetime of a live entry.
    pub fn ttl_remaining(&self, key: &K) -> Option<Duration> {
        let now = self.clock.now();
        self.entries
            .get(key)
            .filter(|slot| !slot.is_expired(now))
            .map(|slot| slot.ttl_remaining(now))
    }

    // == Scan ==
    /// Collects expired keys and the last access of live entries in one pass.
    ///
    /// Shards are read one at a time, so the result is a point-in-time view
    /// that may already be stale when returned.
    pub fn scan(&self) -> AccessScan<K> {
        let now = self.clock.now();
        let mut scan = AccessScan {
            expired: Vec::new(),
            live: Vec::with_capacity(self.entries.len()),
        };
        for slot in self.entries.iter() {
            if slot.is_expired(now) {
                scan.expired.push(slot.key().clone());
            } else {
                scan.live.push((slot.key().clone(), slot.last_access));
            }
        }
        scan
    }

    // == Evict ==
    /// Removes the given keys, returning how many were present.
    pub fn evict(&self, keys: &[K]) -> usize {
        let evicted = keys
            .iter()
            .filter(|key| self.entries.remove(*key).is_some())
            .count();
        self.stats.record_evictions(evicted);
        evicted
    }

    // == Remove Expired ==
    /// Removes all expired entries from the cache.
    ///
    /// Returns the number of entries removed.
    pub fn remove_expired(&self) -> usize {
        let expired = self.scan().expired;
        self.purge(&expired)
    }

    /// Removes the given keys if they are still expired.
    ///
    /// Each removal re-checks expiry so entries refreshed since a scan survive.
    pub fn purge(&self, keys: &[K]) -> usize {
        let now = self.clock.now();
        let removed = keys
            .iter()
            .filter(|key| {
                self.entries
                    .remove_if(*key, |_, entry| entry.is_expired(now))
                    .is_some()
            })
            .count();

        self.stats.record_expirations(removed);
        removed
    }

    // == Clear ==
    /// Removes every entry.
    pub fn clear(&self) {
        self.entries.clear();
    }

    // == Length ==
    /// Returns the current number of entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    // == Is Empty ==
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
