//! Background Tasks Module
//!
//! Contains background tasks that run independently of request traffic.
//!
//! # Tasks
//! - Eviction sweep: Removes TTL-expired cache entries at configured intervals

mod sweeper;

pub use sweeper::{spawn_sweeper_task, EvictionSweeper};
