//! Buffer pool management for MeridianDB.
//!
//! This crate provides in-memory page caching with:
//! - Fixed-size buffer pool with configurable page count
//! - Clock eviction policy for cache management
//! - Pin counting so resident pages stay addressable
//! - Dirty page tracking with write-back hand-off on eviction

mod frame;
mod pool;
mod replacer;

pub use frame::{BufferFrame, FrameId};
pub use pool::{BufferPool, BufferPoolConfig, BufferPoolStats, EvictedPage};
pub use replacer::{ClockReplacer, Replacer};
