//! Memory Cache Module
//!
//! Public cache surface composing the store, the single-flight coordinator,
//! the capacity evictor and the background eviction sweeper.

use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cache::{
    Attach, CacheStats, CacheStore, CapacityEvictor, Clock, SingleFlightCoordinator,
    StatsRecorder, SystemClock,
};
use crate::config::CacheOptions;
use crate::error::{BoxError, CacheError, Result};
use crate::tasks::EvictionSweeper;

struct Inner<K, V> {
    options: CacheOptions,
    store: Arc<CacheStore<K, V>>,
    evictor: CapacityEvictor,
    flights: SingleFlightCoordinator<K, V>,
    sweeper: EvictionSweeper,
    stats: Arc<StatsRecorder>,
    shutdown: CancellationToken,
    disposed: AtomicBool,
}

impl<K, V> Inner<K, V>
where
    K: Hash + Eq + Ord + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Stores a freshly created value within the capacity bound.
    fn commit(&self, key: K, value: V) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(CacheError::Shutdown);
        }
        self.evictor.admit(&self.store)?;
        self.store.insert(key.clone(), value);
        self.settle(&key)
    }

    /// Finishes a write: trims to capacity, or undoes it if dispose ran
    /// since the write started.
    fn settle(&self, key: &K) -> Result<()> {
        if self.shutdown.is_cancelled() {
            self.store.clear();
            return Err(CacheError::Shutdown);
        }
        self.evictor.trim(&self.store, key);
        Ok(())
    }
}

// == Memory Cache ==
/// Concurrent, expiring, capacity-bounded in-memory cache.
///
/// Values are produced at most once per key at a time: concurrent
/// [`get_or_create`](MemoryCache::get_or_create) calls for an absent key share
/// a single factory execution and all observe its outcome.
///
/// # Example
/// ```
/// use memcache::{CacheOptions, MemoryCache};
/// use std::time::Duration;
///
/// # async fn example() -> memcache::error::Result<()> {
/// let options = CacheOptions::new()
///     .with_capacity(1_000)
///     .with_time_to_live(Duration::from_secs(60));
/// let cache: MemoryCache<String, u64> = MemoryCache::new(options)?;
///
/// let value = cache
///     .get_or_create("answer".to_string(), |_| async { Ok::<_, std::io::Error>(42) })
///     .await?;
/// assert_eq!(value, 42);
/// cache.dispose();
/// # Ok(())
/// # }
/// ```
pub struct MemoryCache<K, V>
where
    K: Hash + Eq + Ord + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    inner: Arc<Inner<K, V>>,
}

impl<K, V> MemoryCache<K, V>
where
    K: Hash + Eq + Ord + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    // == Constructor ==
    /// Creates a cache using the system clock.
    pub fn new(options: CacheOptions) -> Result<Self> {
        Self::with_clock(options, Arc::new(SystemClock))
    }

    /// Creates a cache with an explicit time source.
    ///
    /// The eviction sweeper starts here when a Tokio runtime is current,
    /// otherwise on the first [`get_or_create`](Self::get_or_create).
    pub fn with_clock(options: CacheOptions, clock: Arc<dyn Clock>) -> Result<Self> {
        options.validate()?;

        let stats = Arc::new(StatsRecorder::new());
        let store = Arc::new(CacheStore::new(
            options.time_to_live,
            options.sliding_expiration,
            clock,
            Arc::clone(&stats),
        ));
        let shutdown = CancellationToken::new();
        let sweeper = EvictionSweeper::new(
            options.effective_eviction_interval(),
            shutdown.child_token(),
        );

        let cache = Self {
            inner: Arc::new(Inner {
                evictor: CapacityEvictor::from_options(&options),
                options,
                store,
                flights: SingleFlightCoordinator::new(),
                sweeper,
                stats,
                shutdown,
                disposed: AtomicBool::new(false),
            }),
        };
        cache.ensure_sweeper();
        Ok(cache)
    }

    fn ensure_sweeper(&self) {
        self.inner.sweeper.start(&self.inner.store);
    }

    // == Get Or Create ==
    /// Returns the cached value for `key`, creating it with `factory` on a miss.
    ///
    /// See [`get_or_create_with_cancel`](Self::get_or_create_with_cancel).
    pub async fn get_or_create<F, Fut, E>(&self, key: K, factory: F) -> Result<V>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<V, E>> + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        self.get_or_create_with_cancel(key, factory, &CancellationToken::new())
            .await
    }

    /// Returns the cached value for `key`, creating it with `factory` on a miss.
    ///
    /// Concurrent callers for the same absent key share one factory run and
    /// all receive its value or its error. The factory receives a token that
    /// fires when the cache is disposed.
    ///
    /// # Errors
    /// - [`CacheError::Factory`] if the factory failed or panicked; nothing is cached
    /// - [`CacheError::CapacityExceeded`] in throw mode when the cache is full
    /// - [`CacheError::Cancelled`] if `cancel` fired first; the creation
    ///   keeps running for other callers
    /// - [`CacheError::Shutdown`] if the cache was or gets disposed
    pub async fn get_or_create_with_cancel<F, Fut, E>(
        &self,
        key: K,
        factory: F,
        cancel: &CancellationToken,
    ) -> Result<V>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<V, E>> + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        if self.is_disposed() {
            return Err(CacheError::Shutdown);
        }
        self.ensure_sweeper();

        if let Some(value) = self.inner.store.try_get(&key) {
            return Ok(value);
        }

        let inner = Arc::clone(&self.inner);
        let work_key = key.clone();
        let work = move |token: CancellationToken| async move {
            inner.stats.record_factory_run();
            match factory(token).await {
                Ok(value) => inner.commit(work_key, value.clone()).map(|()| value),
                Err(err) => {
                    let err = CacheError::factory(err);
                    inner.stats.record_factory_failure();
                    warn!(key = ?work_key, error = %err, "Cache factory failed");
                    Err(err)
                }
            }
        };

        let store = &self.inner.store;
        let creation = match self.inner.flights.attach(
            key,
            |key| store.peek(key),
            work,
            &self.inner.shutdown,
        ) {
            Attach::Ready(value) => return Ok(value),
            Attach::Started(creation) => creation,
            Attach::Joined(creation) => {
                self.inner.stats.record_coalesced();
                creation
            }
        };

        SingleFlightCoordinator::<K, V>::wait(creation, cancel, &self.inner.shutdown).await
    }

    // == Try Get ==
    /// Returns the live value for `key`; never runs a factory.
    pub fn try_get(&self, key: &K) -> Option<V> {
        if self.is_disposed() {
            return None;
        }
        self.inner.store.try_get(key)
    }

    // == Try Add ==
    /// Inserts `value` if `key` has no live entry.
    ///
    /// Returns `Ok(false)` when a live entry already exists; nothing is
    /// evicted in that case.
    pub fn try_add(&self, key: K, value: V) -> Result<bool> {
        if self.is_disposed() {
            return Err(CacheError::Shutdown);
        }
        if self.inner.store.contains_live(&key) {
            return Ok(false);
        }
        self.inner.evictor.admit(&self.inner.store)?;
        if !self.inner.store.try_add(key.clone(), value) {
            return Ok(false);
        }
        self.inner.settle(&key)?;
        Ok(true)
    }

    // == Try Update ==
    /// Replaces the value of a live entry; false for absent or expired keys.
    pub fn try_update(&self, key: &K, value: V) -> bool {
        if self.is_disposed() {
            return false;
        }
        self.inner.store.try_update(key, value)
    }

    // == Try Remove ==
    pub fn try_remove(&self, key: &K) -> Option<V> {
        if self.is_disposed() {
            return None;
        }
        self.inner.store.try_remove(key)
    }

    // == Contains Key ==
    /// Same as [`try_get`](Self::try_get) without returning the value.
    pub fn contains_key(&self, key: &K) -> bool {
        self.try_get(key).is_some()
    }

    /// Remaining lifetime of a live entry.
    pub fn ttl_remaining(&self, key: &K) -> Option<Duration> {
        if self.is_disposed() {
            return None;
        }
        self.inner.store.ttl_remaining(key)
    }

    // == Clear ==
    /// Empties the store. Creations in flight still complete and insert
    /// their results afterwards.
    pub fn clear(&self) {
        self.inner.store.clear();
    }

    // == Remove Expired ==
    /// Runs one eviction sweep now, returning how many entries it removed.
    pub fn remove_expired(&self) -> usize {
        self.inner.store.remove_expired()
    }

    /// Number of stored entries; a snapshot that may include expired ones.
    pub fn len(&self) -> usize {
        self.inner.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.store.is_empty()
    }

    /// Number of keys with a creation in flight.
    pub fn in_flight(&self) -> usize {
        self.inner.flights.len()
    }

    pub fn options(&self) -> &CacheOptions {
        &self.inner.options
    }

    // == Stats ==
    /// Returns current cache statistics.
    pub fn stats(&self) -> CacheStats {
        self.inner
            .stats
            .snapshot(self.inner.store.len(), self.inner.flights.len())
    }

    /// Returns true while the background eviction sweeper is alive.
    pub fn is_sweeper_running(&self) -> bool {
        self.inner.sweeper.is_running()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    // == Dispose ==
    /// Shuts the cache down.
    ///
    /// Stops the sweeper, cancels creations in flight (their waiters get
    /// [`CacheError::Shutdown`]) and clears the store. Idempotent and safe to
    /// call while other tasks are inside `get_or_create`.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.inner.shutdown.cancel();
        self.inner.sweeper.stop();
        self.inner.flights.clear();
        self.inner.store.clear();

        info!("Memory cache disposed");
    }
}

impl<K, V> Debug for MemoryCache<K, V>
where
    K: Hash + Eq + Ord + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCache")
            .field("options", &self.inner.options)
            .field("len", &self.len())
            .field("in_flight", &self.in_flight())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl<K, V> Drop for MemoryCache<K, V>
where
    K: Hash + Eq + Ord + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.dispose();
    }
}
