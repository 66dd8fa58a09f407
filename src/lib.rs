//! Memcache - A concurrent in-memory cache engine
//!
//! Provides single-flight value creation, TTL expiration (absolute or
//! sliding) and oldest-access capacity eviction.

pub mod cache;
pub mod config;
pub mod error;
pub mod tasks;

pub use cache::{CacheStats, MemoryCache};
pub use config::CacheOptions;
pub use error::{CacheError, Result};
pub use tasks::spawn_sweeper_task;
