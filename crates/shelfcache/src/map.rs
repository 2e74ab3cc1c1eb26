//! Mapping interface consumed by the memoization wrappers

use parking_lot::Mutex;

use crate::error::{CacheError, Result};
use crate::eviction::EvictionCache;

/// Minimal cache mapping: lookup, store, store-unless-present
///
/// Implemented by [`PersistentCache`](crate::PersistentCache) and by a
/// `parking_lot::Mutex` around any [`EvictionCache`], so plain in-memory
/// caches can be memoized against too.
pub trait CacheMap<K, V> {
    /// Get the value for `key`, or [`CacheError::KeyNotFound`]
    fn get(&self, key: &K) -> Result<V>;

    /// Insert or replace `key`
    fn set(&self, key: K, value: V) -> Result<()>;

    /// Return the cached value for `key` if there is one, otherwise store
    /// `value` and return it
    fn set_default(&self, key: K, value: V) -> Result<V>;
}

impl<K, V, E> CacheMap<K, V> for Mutex<E>
where
    E: EvictionCache<K, V>,
    V: Clone,
{
    fn get(&self, key: &K) -> Result<V> {
        self.lock().get(key).cloned().ok_or(CacheError::KeyNotFound)
    }

    fn set(&self, key: K, value: V) -> Result<()> {
        self.lock().insert(key, value)
    }

    fn set_default(&self, key: K, value: V) -> Result<V> {
        let mut cache = self.lock();
        if let Some(existing) = cache.get(&key) {
            return Ok(existing.clone());
        }
        cache.insert(key, value.clone())?;
        Ok(value)
    }
}
