//! Error types for the cache
//!
//! Provides unified error handling using thiserror.

use std::error::Error as StdError;
use std::sync::Arc;

use thiserror::Error;

/// Boxed error produced by a user-supplied factory.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

// == Cache Error Enum ==
/// Unified error type for the cache.
///
/// The type is `Clone` so a single creation outcome can be handed to every
/// caller waiting on the same key.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    /// The value-producing factory failed (or panicked)
    #[error("cache factory failed: {0}")]
    Factory(#[source] Arc<dyn StdError + Send + Sync + 'static>),

    /// Insertion would exceed the configured capacity
    #[error("cache capacity of {capacity} entries exceeded")]
    CapacityExceeded { capacity: usize },

    /// The caller's own cancellation token fired while waiting
    #[error("operation cancelled")]
    Cancelled,

    /// The cache was disposed while the caller was waiting, or before the call
    #[error("cache has been shut down")]
    Shutdown,

    /// Invalid configuration value
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl CacheError {
    /// Wraps a factory failure.
    pub fn factory(err: impl Into<BoxError>) -> Self {
        CacheError::Factory(Arc::from(err.into()))
    }

    /// Returns true for a wrapped factory failure.
    pub fn is_factory(&self) -> bool {
        matches!(self, CacheError::Factory(_))
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache.
pub type Result<T> = std::result::Result<T, CacheError>;
