//! Memcache - stampede demo
//!
//! Drives many concurrent `get_or_create` calls against a handful of hot keys
//! and prints the resulting cache statistics as JSON. Every key's factory
//! should run exactly once no matter how many tasks ask for it.

use std::env;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::signal;
use tokio::task::JoinSet;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use memcache::{CacheOptions, MemoryCache};

/// Simulated cost of producing one value.
const FACTORY_LATENCY: Duration = Duration::from_millis(50);

/// Main entry point for the stampede demo.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load cache options from environment variables
/// 3. Spawn `STAMPEDE_TASKS` callers spread over `STAMPEDE_KEYS` keys
/// 4. Wait for all callers, or stop early on Ctrl+C
/// 5. Print statistics and dispose the cache
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "memcache=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let options = CacheOptions::from_env();
    info!(
        "Options loaded: capacity={}, ttl={:?}, sliding={}, eviction_interval={:?}",
        options.capacity,
        options.time_to_live,
        options.sliding_expiration,
        options.effective_eviction_interval()
    );

    let tasks: u64 = env_or("STAMPEDE_TASKS", 1000);
    let keys: u64 = env_or("STAMPEDE_KEYS", 8).max(1);

    let cache = Arc::new(
        MemoryCache::<String, u64>::new(options).context("failed to build the cache")?,
    );
    let factory_runs = Arc::new(AtomicU64::new(0));

    info!(tasks, keys, "Starting stampede");
    let mut callers = JoinSet::new();
    for i in 0..tasks {
        let cache = Arc::clone(&cache);
        let factory_runs = Arc::clone(&factory_runs);
        let slot = i % keys;
        callers.spawn(async move {
            cache
                .get_or_create(format!("key{slot}"), move |_| async move {
                    factory_runs.fetch_add(1, Ordering::Relaxed);
                    tokio::time::sleep(FACTORY_LATENCY).await;
                    Ok::<_, anyhow::Error>(slot)
                })
                .await
        });
    }

    let mut failures = 0u64;
    let drain = async {
        while let Some(joined) = callers.join_next().await {
            match joined {
                Ok(Ok(_)) => {}
                Ok(Err(err)) => {
                    failures += 1;
                    warn!(error = %err, "Caller failed");
                }
                Err(err) => {
                    failures += 1;
                    warn!(error = %err, "Caller task aborted");
                }
            }
        }
    };

    tokio::select! {
        _ = drain => info!("Stampede finished"),
        _ = shutdown_signal() => warn!("Interrupted, shutting down early"),
    }

    let stats = cache.stats();
    println!("{}", serde_json::to_string_pretty(&stats)?);
    info!(
        factory_runs = factory_runs.load(Ordering::Relaxed),
        failures,
        hit_rate = stats.hit_rate(),
        "Stampede summary"
    );

    cache.dispose();
    Ok(())
}

fn env_or(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }
}
