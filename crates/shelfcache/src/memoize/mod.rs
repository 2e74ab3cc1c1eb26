//! Memoizing wrappers around functions and methods
//!
//! A wrapper builds a key from the call arguments, returns the cached value
//! on a hit, and otherwise calls through and stores the result. The lock is
//! held for the lookup and for the store, never while the wrapped callable
//! runs, so concurrent misses for one key may both compute.
//!
//! | wrapper | callable | on store |
//! |---|---|---|
//! | [`Cached`] | `Fn(A) -> V` | overwrite |
//! | [`CachedMethod`] | `Fn(&R, A) -> V` | keep existing |
//! | [`AsyncCached`] | `Fn(A) -> Future<V>` | overwrite |
//! | [`AsyncCachedMethod`] | `Fn(Arc<R>, A) -> Future<V>` | keep existing |
//!
//! A value the cache refuses to hold (see [`CacheError::ValueRejected`]) is
//! still returned to the caller.

mod asynchronous;
mod sync;

use std::sync::Arc;

use tracing::debug;

use crate::error::{CacheError, Result};
use crate::map::CacheMap;

pub use asynchronous::{AsyncCached, AsyncCachedMethod};
pub use sync::{Cached, CachedMethod};

/// Picks the lock guarding one receiver's cache
enum LockSelector<R, L> {
    Shared(Arc<L>),
    PerReceiver(Box<dyn Fn(&R) -> Arc<L> + Send + Sync>),
}

impl<R, L> LockSelector<R, L> {
    fn select(&self, receiver: &R) -> Arc<L> {
        match self {
            LockSelector::Shared(lock) => Arc::clone(lock),
            LockSelector::PerReceiver(select) => select(receiver),
        }
    }
}

type CacheSelector<R, C> = Box<dyn Fn(&R) -> Option<Arc<C>> + Send + Sync>;

fn lookup<K, V, C>(cache: &C, key: &K) -> Result<Option<V>>
where
    C: CacheMap<K, V> + ?Sized,
{
    match cache.get(key) {
        Ok(value) => Ok(Some(value)),
        Err(CacheError::KeyNotFound) => Ok(None),
        Err(e) => Err(e),
    }
}

fn store<K, V, C>(cache: &C, qualifier: &str, key: K, value: V) -> Result<V>
where
    C: CacheMap<K, V> + ?Sized,
    V: Clone,
{
    match cache.set(key, value.clone()) {
        Ok(()) => Ok(value),
        Err(CacheError::ValueRejected(reason)) => {
            debug!("Not caching result of {}: {}", qualifier, reason);
            Ok(value)
        }
        Err(e) => Err(e),
    }
}

fn store_default<K, V, C>(cache: &C, qualifier: &str, key: K, value: V) -> Result<V>
where
    C: CacheMap<K, V> + ?Sized,
    V: Clone,
{
    match cache.set_default(key, value.clone()) {
        Ok(existing) => Ok(existing),
        Err(CacheError::ValueRejected(reason)) => {
            debug!("Not caching result of {}: {}", qualifier, reason);
            Ok(value)
        }
        Err(e) => Err(e),
    }
}
