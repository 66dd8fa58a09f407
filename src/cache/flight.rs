//! Single-Flight Coordination Module
//!
//! Collapses concurrent creations of the same key into one execution. The
//! first caller to miss registers a shared, one-shot creation for the key;
//! every later caller for that key attaches to it and receives a clone of
//! the same outcome. The creation runs on its own Tokio task, so a caller
//! that stops waiting does not stop the work other callers depend on.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt as _;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{CacheError, Result};

/// Outcome of a creation, cloneable so every waiter gets the same one.
pub type SharedCreation<V> = Shared<BoxFuture<'static, Result<V>>>;

struct Flight<V> {
    id: u64,
    creation: SharedCreation<V>,
}

/// Unregisters a flight when its task ends, unwinding included.
struct FlightGuard<K: Hash + Eq, V> {
    flights: Arc<DashMap<K, Flight<V>>>,
    key: K,
    id: u64,
}

impl<K: Hash + Eq, V> Drop for FlightGuard<K, V> {
    fn drop(&mut self) {
        self.flights.remove_if(&self.key, |_, flight| flight.id == self.id);
    }
}

/// How a caller got attached to a key.
pub enum Attach<V> {
    /// The value showed up in the store while registering
    Ready(V),
    /// This caller started the creation
    Started(SharedCreation<V>),
    /// This caller joined a creation already in flight
    Joined(SharedCreation<V>),
}

// == Single-Flight Coordinator ==
/// Per-key registry of in-flight creations.
pub struct SingleFlightCoordinator<K, V> {
    flights: Arc<DashMap<K, Flight<V>>>,
    next_id: AtomicU64,
}

impl<K: Hash + Eq, V> fmt::Debug for SingleFlightCoordinator<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleFlightCoordinator")
            .field("in_flight", &self.flights.len())
            .finish()
    }
}

impl<K, V> Default for SingleFlightCoordinator<K, V>
where
    K: Hash + Eq,
{
    fn default() -> Self {
        Self {
            flights: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }
}

impl<K, V> SingleFlightCoordinator<K, V>
where
    K: Hash + Eq + Clone + fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    // == Attach ==
    /// Joins the creation in flight for `key`, or starts one.
    ///
    /// `recheck` runs while the key's registry slot is locked and no flight
    /// exists for it; if the store gained the value since the caller's miss,
    /// the value is returned instead of starting a second creation.
    ///
    /// `work` receives a child of `shutdown` and must commit its own result
    /// to the store. The flight is unregistered only after `work` finishes
    /// or panics, so a caller arriving later either sees the stored value,
    /// joins, or starts a fresh creation after a failure.
    pub fn attach<R, W, Fut>(
        &self,
        key: K,
        recheck: R,
        work: W,
        shutdown: &CancellationToken,
    ) -> Attach<V>
    where
        R: FnOnce(&K) -> Option<V>,
        W: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        match self.flights.entry(key) {
            Entry::Occupied(occupied) => Attach::Joined(occupied.get().creation.clone()),
            Entry::Vacant(vacant) => {
                if let Some(value) = recheck(vacant.key()) {
                    return Attach::Ready(value);
                }

                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let token = shutdown.child_token();
                let work = work(token.clone());
                let flights = Arc::clone(&self.flights);
                let task_key = vacant.key().clone();

                debug!(key = ?task_key, id, "Starting creation");
                let handle = tokio::spawn(async move {
                    let guard = FlightGuard {
                        flights,
                        key: task_key,
                        id,
                    };
                    let outcome = tokio::select! {
                        biased;
                        _ = token.cancelled() => Err(CacheError::Shutdown),
                        outcome = work => outcome,
                    };
                    debug!(key = ?guard.key, id, ok = outcome.is_ok(), "Creation finished");
                    drop(guard);
                    outcome
                });

                let creation = async move { handle.await.unwrap_or_else(join_failure) }
                    .boxed()
                    .shared();
                vacant.insert(Flight {
                    id,
                    creation: creation.clone(),
                });
                Attach::Started(creation)
            }
        }
    }

    // == Wait ==
    /// Waits for a creation on behalf of one caller.
    ///
    /// Only this caller's wait is affected by `cancel`; the creation keeps
    /// running for anyone else attached to it.
    pub async fn wait(
        creation: SharedCreation<V>,
        cancel: &CancellationToken,
        shutdown: &CancellationToken,
    ) -> Result<V> {
        tokio::select! {
            biased;
            outcome = creation => outcome,
            _ = shutdown.cancelled() => Err(CacheError::Shutdown),
            _ = cancel.cancelled() => Err(CacheError::Cancelled),
        }
    }

    /// Number of keys with a creation in flight.
    pub fn len(&self) -> usize {
        self.flights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flights.is_empty()
    }

    /// Forgets every registered flight.
    ///
    /// Running creations are stopped through their shutdown token, not here.
    pub fn clear(&self) {
        self.flights.clear();
    }
}

fn join_failure<V>(err: JoinError) -> Result<V> {
    if err.is_panic() {
        let message = panic_message(err.into_panic());
        warn!(%message, "Cache factory panicked");
        Err(CacheError::factory(format!("factory panicked: {message}")))
    } else {
        Err(CacheError::Shutdown)
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "unknown panic".to_string()),
    }
}
