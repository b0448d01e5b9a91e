//! imgpipe cache library
//!
//! Two-tier resource-reuse cache for the image loading pipeline: LRU reuse
//! pools for scratch arrays and decoded pixel buffers, a generic LRU cache
//! for whole decoded resources, and a journaled disk cache that persists
//! named binary values across restarts.

pub mod array_pool;
pub mod buffer;
pub mod buffer_pool;
pub mod config;
pub mod disk;
pub mod grouped;
pub mod pressure;
pub mod resource_cache;
pub mod strategy;

pub use array_pool::{ArrayKind, LruArrayPool, PooledArray, STANDARD_BUFFER_SIZE};
pub use buffer::{PixelBuffer, PixelFormat};
pub use buffer_pool::{BufferPoolStats, LruBufferPool};
pub use config::{CacheConfig, ConfigError};
pub use disk::{DiskCacheError, DiskLruCache, Editor, Snapshot};
pub use pressure::PressureLevel;
pub use resource_cache::{EvictionListener, LruResourceCache, ResourceSizer};
pub use strategy::{DimensionStrategy, PoolStrategy, SizeFormatStrategy};
