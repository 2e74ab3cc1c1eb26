//! # shelfcache
//!
//! Persistent memoization cache on top of shelfstore.
//!
//! ## Architecture
//! - **Eviction cache**: bounded in-memory map (LRU by default) that reports
//!   every eviction to a removal listener
//! - **PersistentCache**: mirrors the eviction cache to a shelf file, so a
//!   restarted process starts warm
//! - **Memoization wrappers**: `Cached`, `CachedMethod` and their async
//!   counterparts, parameterized by key builder and lock
//!
//! ```
//! use std::sync::Arc;
//! use shelfcache::{CallKey, Cached, PersistentCache};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let cache: Arc<PersistentCache<CallKey<(u64, u64)>, u64>> =
//!     Arc::new(PersistentCache::lru(Some(dir.path().join("add")), 1024));
//!
//! let add = Cached::new("add", cache, |(a, b): (u64, u64)| a + b);
//! assert_eq!(add.call((2, 3)).unwrap(), 5);
//! ```

#![warn(missing_docs)]

mod cache;
mod error;
mod eviction;
mod keys;
mod lock;
mod lru;
mod map;
mod memoize;
mod stats;

pub use cache::PersistentCache;
pub use error::{CacheError, Result};
pub use eviction::{EvictionCache, RemovalCause, RemovalListener};
pub use keys::{hash_key, ArgKey, AutoTupleKey, CallKey, HashKey, KeyBuilder, MixedArgs};
pub use lock::{CacheLock, NoLock};
pub use lru::LruCache;
pub use map::CacheMap;
pub use memoize::{AsyncCached, AsyncCachedMethod, Cached, CachedMethod};
pub use shelfstore::StoreConfig;
pub use stats::{CacheStats, StatsSnapshot};
