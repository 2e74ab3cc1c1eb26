//! Eviction cache capability consumed by [`PersistentCache`](crate::PersistentCache)

use crate::error::Result;

/// Why an entry left an eviction cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalCause {
    /// Dropped by the replacement policy to make room
    Evicted,
    /// Removed through [`EvictionCache::remove`]
    Explicit,
}

/// Observer notified after an entry leaves an eviction cache
pub type RemovalListener<K, V> = Box<dyn Fn(&K, &V, RemovalCause) + Send + Sync>;

/// Bounded in-memory map with a replacement policy
///
/// Implementations take an optional [`RemovalListener`] at construction and
/// must call it for every eviction and explicit removal. [`clear`](Self::clear)
/// drops entries silently.
pub trait EvictionCache<K, V> {
    /// Look up `key`, updating its standing with the policy
    fn get(&mut self, key: &K) -> Option<&V>;

    /// Look up `key` without touching the policy
    fn peek(&self, key: &K) -> Option<&V>;

    /// Insert or replace `key`, evicting as needed
    ///
    /// Fails with [`CacheError::ValueRejected`](crate::CacheError::ValueRejected)
    /// if the entry can never fit; the cache is left unchanged in that case.
    fn insert(&mut self, key: K, value: V) -> Result<()>;

    /// Remove `key`, notifying the listener
    fn remove(&mut self, key: &K) -> Option<V>;

    /// Check membership without touching the policy
    fn contains(&self, key: &K) -> bool;

    /// Number of resident entries
    fn len(&self) -> usize;

    /// Check if the cache is empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Capacity bound
    fn capacity(&self) -> usize;

    /// Drop every entry without notifying the listener
    fn clear(&mut self);

    /// Resident keys, next eviction candidate first
    fn keys(&self) -> Vec<K>;
}
