//! Eviction Sweeper Task
//!
//! Background task that periodically removes expired cache entries.

use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cache::CacheStore;

/// Spawns a background task that periodically removes expired cache entries.
///
/// The task loops until `stop` is cancelled, sleeping for `interval` between
/// sweeps. Each sweep removes entries one at a time, so it never holds a lock
/// over the whole store and can stop between any two removals.
///
/// # Arguments
/// * `store` - Shared reference to the cache store
/// * `interval` - Time between sweeps
/// * `stop` - Cancelling this token ends the loop
///
/// # Returns
/// A JoinHandle for the spawned task.
///
/// # Example
/// ```ignore
/// let stop = CancellationToken::new();
/// let handle = spawn_sweeper_task(store.clone(), Duration::from_secs(30), stop.clone());
/// // Later, during shutdown:
/// stop.cancel();
/// handle.await?;
/// ```
pub fn spawn_sweeper_task<K, V>(
    store: Arc<CacheStore<K, V>>,
    interval: Duration,
    stop: CancellationToken,
) -> JoinHandle<()>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    tokio::spawn(async move {
        info!(interval_ms = interval.as_millis() as u64, "Starting eviction sweeper");

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let removed = store.remove_expired();

            if removed > 0 {
                debug!(removed, "Eviction sweep removed expired entries");
            } else {
                debug!("Eviction sweep found no expired entries");
            }
        }

        info!("Eviction sweeper stopped");
    })
}

// == Eviction Sweeper ==
/// Owns the sweeper task and its start/stop lifecycle.
///
/// The task is started at most once; [`EvictionSweeper::start`] is safe to
/// call from any number of callers.
#[derive(Debug)]
pub struct EvictionSweeper {
    interval: Duration,
    started: AtomicBool,
    stop: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl EvictionSweeper {
    /// Creates a stopped sweeper; `stop` is usually a child of the cache's
    /// shutdown token.
    pub fn new(interval: Duration, stop: CancellationToken) -> Self {
        Self {
            interval,
            started: AtomicBool::new(false),
            stop,
            handle: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    // == Start ==
    /// Spawns the sweep loop if it is not running yet.
    ///
    /// Returns true if this call started it. Without a current Tokio runtime
    /// nothing is spawned and a later call may try again.
    pub fn start<K, V>(&self, store: &Arc<CacheStore<K, V>>) -> bool
    where
        K: Hash + Eq + Clone + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        if self.stop.is_cancelled() || self.started.load(Ordering::Acquire) {
            return false;
        }
        if Handle::try_current().is_err() {
            debug!("No Tokio runtime yet, deferring eviction sweeper start");
            return false;
        }
        if self.started.swap(true, Ordering::AcqRel) {
            return false;
        }

        let handle = spawn_sweeper_task(Arc::clone(store), self.interval, self.stop.clone());
        *self.handle.lock() = Some(handle);
        true
    }

    // == Stop ==
    /// Stops the sweep loop. Idempotent.
    pub fn stop(&self) {
        self.stop.cancel();
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
        }
    }

    /// Returns true while the sweep loop is alive.
    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}
