//! Cache Module
//!
//! Provides a concurrent in-memory cache with single-flight creation, TTL
//! expiration and capacity eviction.

mod clock;
mod entry;
mod eviction;
mod flight;
mod memory;
mod stats;
mod store;


// Re-export public types
pub use clock::{Clock, ManualClock, SystemClock};
pub use entry::CacheEntry;
pub use eviction::{select_oldest, CapacityEvictor};
pub use flight::{Attach, SharedCreation, SingleFlightCoordinator};
pub use memory::MemoryCache;
pub use stats::{CacheStats, StatsRecorder};
pub use store::{AccessScan, CacheStore};
