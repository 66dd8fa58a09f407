//! Integration Tests for the Memory Cache
//!
//! Exercises the public surface with real time and real concurrency.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use memcache::{CacheError, CacheOptions, MemoryCache};
use tokio::sync::{Barrier, Notify};
use tokio::time::sleep;
use tokio_test::{assert_err, assert_ok, assert_pending, assert_ready_ok};
use tokio_util::sync::CancellationToken;

// == Helper Functions ==

type Cache = MemoryCache<String, u64>;

fn create_cache(options: CacheOptions) -> Arc<Cache> {
    Arc::new(MemoryCache::new(options).unwrap())
}

fn key(s: &str) -> String {
    s.to_string()
}

/// Factory that counts its runs and returns `value` after `delay`.
fn counting_factory(
    runs: Arc<AtomicUsize>,
    delay: Duration,
    value: u64,
) -> impl FnOnce(CancellationToken) -> BoxFuture<'static, anyhow::Result<u64>> + Send + 'static {
    move |_| {
        Box::pin(async move {
            runs.fetch_add(1, Ordering::SeqCst);
            sleep(delay).await;
            Ok(value)
        })
    }
}

// == Single-Flight Tests ==

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_thousand_concurrent_callers_run_factory_once() {
    let cache = create_cache(CacheOptions::default());
    let runs = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(1000));

    let mut handles = Vec::with_capacity(1000);
    for _ in 0..1000 {
        let cache = cache.clone();
        let runs = runs.clone();
        let barrier = barrier.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            cache
                .get_or_create(
                    key("hot"),
                    counting_factory(runs, Duration::from_millis(50), 42),
                )
                .await
        }));
    }

    for handle in handles {
        assert_eq!(assert_ok!(handle.await.unwrap()), 42);
    }
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(cache.in_flight(), 0);
    assert_eq!(cache.stats().factory_runs, 1);
}

#[tokio::test]
async fn test_follower_waits_for_leader() {
    let cache = create_cache(CacheOptions::default());
    let release = Arc::new(Notify::new());

    let gate = release.clone();
    let leader = cache.get_or_create(key("slow"), move |_| async move {
        gate.notified().await;
        Ok::<_, anyhow::Error>(7)
    });
    let mut leader = tokio_test::task::spawn(leader);
    assert_pending!(leader.poll());

    let mut follower = tokio_test::task::spawn(cache.get_or_create(key("slow"), |_| async {
        Ok::<_, anyhow::Error>(99)
    }));
    assert_pending!(follower.poll());
    assert_eq!(cache.stats().coalesced, 1);

    release.notify_one();
    sleep(Duration::from_millis(20)).await;

    assert_eq!(assert_ready_ok!(leader.poll()), 7);
    assert_eq!(assert_ready_ok!(follower.poll()), 7);
}

#[tokio::test]
async fn test_late_caller_gets_store_hit() {
    let cache = create_cache(CacheOptions::default());
    let runs = Arc::new(AtomicUsize::new(0));

    let first = cache
        .get_or_create(key("k"), counting_factory(runs.clone(), Duration::ZERO, 1))
        .await;
    assert_eq!(assert_ok!(first), 1);
    assert_eq!(cache.in_flight(), 0);

    let second = cache
        .get_or_create(key("k"), counting_factory(runs.clone(), Duration::ZERO, 2))
        .await;
    assert_eq!(assert_ok!(second), 1);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_distinct_keys_run_independently() {
    let cache = create_cache(CacheOptions::default());
    let runs = Arc::new(AtomicUsize::new(0));

    let (a, b) = tokio::join!(
        cache.get_or_create(key("a"), counting_factory(runs.clone(), Duration::from_millis(20), 1)),
        cache.get_or_create(key("b"), counting_factory(runs.clone(), Duration::from_millis(20), 2)),
    );

    assert_eq!((assert_ok!(a), assert_ok!(b)), (1, 2));
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

// == Factory Error Tests ==

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_factory_error_reaches_every_waiter() {
    let cache = create_cache(CacheOptions::default());
    let runs = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(20));

    let mut handles = Vec::new();
    for _ in 0..20 {
        let cache = cache.clone();
        let runs = runs.clone();
        let barrier = barrier.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            cache
                .get_or_create(key("bad"), move |_| async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    sleep(Duration::from_millis(50)).await;
                    Err::<u64, _>(anyhow::anyhow!("backend unavailable"))
                })
                .await
        }));
    }

    let mut messages = Vec::new();
    for handle in handles {
        let err = assert_err!(handle.await.unwrap());
        assert!(err.is_factory(), "unexpected error: {err}");
        messages.push(err.to_string());
    }
    assert!(messages.iter().all(|m| m.contains("backend unavailable")));
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(cache.stats().factory_failures, 1);

    // Nothing cached, the next call retries
    assert!(!cache.contains_key(&key("bad")));
    let retried = cache
        .get_or_create(key("bad"), |_| async { Ok::<_, anyhow::Error>(5) })
        .await;
    assert_eq!(assert_ok!(retried), 5);
}

#[tokio::test]
async fn test_factory_panic_is_reported_and_not_cached() {
    let cache = create_cache(CacheOptions::default());

    async fn explode() -> anyhow::Result<u64> {
        panic!("factory exploded")
    }

    let err = assert_err!(cache.get_or_create(key("p"), |_| explode()).await);
    assert!(err.is_factory());
    assert!(err.to_string().contains("factory exploded"));
    assert!(cache.is_empty());
    assert_eq!(cache.in_flight(), 0);

    // The key is not poisoned, the next call runs a new factory
    let retried = cache
        .get_or_create(key("p"), |_| async { Ok::<_, anyhow::Error>(5) })
        .await;
    assert_eq!(assert_ok!(retried), 5);
    assert_eq!(cache.try_get(&key("p")), Some(5));
}

// == Expiration Tests ==

#[tokio::test]
async fn test_absolute_ttl_expiry() {
    let cache = create_cache(CacheOptions::new().with_time_to_live(Duration::from_millis(300)));

    assert!(assert_ok!(cache.try_add(key("k"), 1)));
    assert_eq!(cache.try_get(&key("k")), Some(1));

    sleep(Duration::from_millis(500)).await;

    assert_eq!(cache.try_get(&key("k")), None);
}

#[tokio::test]
async fn test_absolute_ttl_ignores_reads() {
    let cache = create_cache(CacheOptions::new().with_time_to_live(Duration::from_millis(300)));
    assert_ok!(cache.try_add(key("k"), 1));

    sleep(Duration::from_millis(200)).await;
    assert!(cache.contains_key(&key("k")));
    sleep(Duration::from_millis(200)).await;

    assert!(!cache.contains_key(&key("k")));
}

#[tokio::test]
async fn test_sliding_expiration() {
    let options = CacheOptions::new()
        .with_time_to_live(Duration::from_millis(300))
        .with_sliding_expiration(true);
    let cache = create_cache(options);
    assert_ok!(cache.try_add(key("k"), 1));

    // Accessed every 150ms, the entry outlives its TTL several times over
    for _ in 0..4 {
        sleep(Duration::from_millis(150)).await;
        assert_eq!(cache.try_get(&key("k")), Some(1));
    }

    // Idle past the TTL
    sleep(Duration::from_millis(450)).await;
    assert_eq!(cache.try_get(&key("k")), None);
}

#[tokio::test]
async fn test_sweeper_removes_expired_entries_without_reads() {
    let options = CacheOptions::new()
        .with_time_to_live(Duration::from_millis(100))
        .with_eviction_interval(Duration::from_millis(25));
    let cache = create_cache(options);
    for i in 0..10 {
        assert_ok!(cache.try_add(format!("key{i}"), i));
    }
    assert_eq!(cache.len(), 10);

    sleep(Duration::from_millis(300)).await;

    assert_eq!(cache.len(), 0);
    assert_eq!(cache.stats().expirations, 10);
}

// == Capacity Tests ==

#[tokio::test]
async fn test_capacity_evicts_oldest_accessed() {
    let cache = create_cache(CacheOptions::new().with_capacity(2));

    for (i, name) in ["key1", "key2", "key3"].iter().enumerate() {
        let value = i as u64;
        let created = cache
            .get_or_create(key(name), move |_| async move { Ok::<_, anyhow::Error>(value) })
            .await;
        assert_ok!(created);
        sleep(Duration::from_millis(5)).await;
    }

    assert!(!cache.contains_key(&key("key1")));
    assert!(cache.contains_key(&key("key2")));
    assert!(cache.contains_key(&key("key3")));
    assert_eq!(cache.len(), 2);
    assert_eq!(cache.stats().evictions, 1);
}

#[tokio::test]
async fn test_capacity_exceeded_throw_mode() {
    let options = CacheOptions::new()
        .with_capacity(1)
        .with_throw_if_capacity_exceeded(true);
    let cache = create_cache(options);

    assert!(assert_ok!(cache.try_add(key("key1"), 1)));

    let err = assert_err!(cache.try_add(key("key2"), 2));
    assert!(matches!(err, CacheError::CapacityExceeded { capacity: 1 }));

    let err = assert_err!(
        cache
            .get_or_create(key("key3"), |_| async { Ok::<_, anyhow::Error>(3) })
            .await
    );
    assert!(matches!(err, CacheError::CapacityExceeded { capacity: 1 }));

    assert_eq!(cache.try_get(&key("key1")), Some(1));
    assert!(!cache.contains_key(&key("key2")));
    assert!(!cache.contains_key(&key("key3")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_capacity_converges_after_concurrent_inserts() {
    let cache = create_cache(CacheOptions::new().with_capacity(10));

    let mut handles = Vec::new();
    for i in 0..200u64 {
        let cache = cache.clone();
        handles.push(tokio::spawn(async move { cache.try_add(format!("key{i}"), i) }));
    }
    for handle in handles {
        assert_ok!(handle.await.unwrap());
    }

    // The bound is soft under contention; one quiet insertion restores it
    assert_ok!(cache.try_add(key("settle"), 0));
    assert!(cache.len() <= 10, "len {} exceeds capacity", cache.len());
    assert!(cache.contains_key(&key("settle")));
}

// == Mutation Tests ==

#[tokio::test]
async fn test_try_update_and_remove() {
    let cache = create_cache(CacheOptions::default());

    assert!(!cache.try_update(&key("k"), 1));
    assert_ok!(cache.try_add(key("k"), 1));
    assert!(cache.try_update(&key("k"), 2));
    assert_eq!(cache.try_get(&key("k")), Some(2));

    assert_eq!(cache.try_remove(&key("k")), Some(2));
    assert_eq!(cache.try_remove(&key("k")), None);
    assert!(!cache.try_update(&key("k"), 3));
}

#[tokio::test]
async fn test_clear_empties_cache() {
    let cache = create_cache(CacheOptions::default());
    for i in 0..25 {
        assert_ok!(cache.try_add(format!("key{i}"), i));
    }

    cache.clear();

    assert_eq!(cache.len(), 0);
    for i in 0..25 {
        assert!(cache.try_get(&format!("key{i}")).is_none());
    }
}

#[tokio::test]
async fn test_clear_does_not_disturb_in_flight_creation() {
    let cache = create_cache(CacheOptions::default());
    let runs = Arc::new(AtomicUsize::new(0));

    let pending = {
        let cache = cache.clone();
        let runs = runs.clone();
        tokio::spawn(async move {
            cache
                .get_or_create(key("k"), counting_factory(runs, Duration::from_millis(50), 8))
                .await
        })
    };
    sleep(Duration::from_millis(10)).await;
    cache.clear();

    assert_eq!(assert_ok!(pending.await.unwrap()), 8);
    assert_eq!(cache.try_get(&key("k")), Some(8));
}

// == Cancellation Tests ==

#[tokio::test]
async fn test_cancelled_caller_unblocks_without_cancelling_others() {
    let cache = create_cache(CacheOptions::default());
    let runs = Arc::new(AtomicUsize::new(0));
    let cancel = CancellationToken::new();

    let waiting = {
        let cache = cache.clone();
        let runs = runs.clone();
        tokio::spawn(async move {
            cache
                .get_or_create(key("k"), counting_factory(runs, Duration::from_millis(200), 3))
                .await
        })
    };
    sleep(Duration::from_millis(10)).await;

    let impatient = {
        let cache = cache.clone();
        let runs = runs.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            cache
                .get_or_create_with_cancel(
                    key("k"),
                    counting_factory(runs, Duration::ZERO, 4),
                    &cancel,
                )
                .await
        })
    };
    sleep(Duration::from_millis(10)).await;
    cancel.cancel();

    let started = tokio::time::Instant::now();
    let err = assert_err!(impatient.await.unwrap());
    assert!(matches!(err, CacheError::Cancelled));
    assert!(started.elapsed() < Duration::from_millis(150), "cancellation must be prompt");

    assert_eq!(assert_ok!(waiting.await.unwrap()), 3);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

// == Lifecycle Tests ==

#[tokio::test]
async fn test_dispose_is_idempotent_and_stops_sweeper() {
    let cache = create_cache(CacheOptions::new().with_eviction_interval(Duration::from_millis(10)));
    assert!(cache.is_sweeper_running());
    assert_ok!(cache.try_add(key("k"), 1));

    cache.dispose();
    cache.dispose();
    sleep(Duration::from_millis(30)).await;

    assert!(cache.is_disposed());
    assert!(!cache.is_sweeper_running());
    assert!(cache.is_empty());
    assert!(cache.try_get(&key("k")).is_none());
}

#[tokio::test]
async fn test_dispose_unblocks_pending_waiters() {
    let cache = create_cache(CacheOptions::default());

    let mut waiters = Vec::new();
    for _ in 0..5 {
        let cache = cache.clone();
        waiters.push(tokio::spawn(async move {
            cache
                .get_or_create(key("forever"), |token| async move {
                    token.cancelled().await;
                    Ok::<u64, anyhow::Error>(0)
                })
                .await
        }));
    }
    sleep(Duration::from_millis(20)).await;
    assert_eq!(cache.in_flight(), 1);

    cache.dispose();

    for waiter in waiters {
        let err = assert_err!(waiter.await.unwrap());
        assert!(matches!(err, CacheError::Shutdown));
    }

    let after = cache
        .get_or_create(key("forever"), |_| async { Ok::<_, anyhow::Error>(1) })
        .await;
    assert!(matches!(after, Err(CacheError::Shutdown)));
    assert!(cache.is_empty());
}

#[tokio::test]
async fn test_reads_miss_after_dispose() {
    let cache = create_cache(CacheOptions::default());
    let created = cache
        .get_or_create(key("k"), |_| async { Ok::<_, anyhow::Error>(7) })
        .await;
    assert_eq!(assert_ok!(created), 7);

    cache.dispose();

    assert!(cache.try_get(&key("k")).is_none());
    assert!(!cache.contains_key(&key("k")));
    assert!(cache.ttl_remaining(&key("k")).is_none());
    assert!(!cache.try_update(&key("k"), 8));
    assert!(cache.try_remove(&key("k")).is_none());
}

#[tokio::test]
async fn test_drop_disposes() {
    let cache = MemoryCache::<String, u64>::new(CacheOptions::default()).unwrap();
    assert_ok!(cache.try_add(key("k"), 1));
    drop(cache);
}
