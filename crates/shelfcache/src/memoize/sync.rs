//! Blocking memoization wrappers

use std::sync::Arc;

use super::{lookup, store, store_default, CacheSelector, LockSelector};
use crate::error::Result;
use crate::keys::{HashKey, KeyBuilder};
use crate::lock::{CacheLock, NoLock};
use crate::map::CacheMap;

/// Memoized function
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use shelfcache::{CallKey, Cached, PersistentCache};
///
/// let cache: Arc<PersistentCache<CallKey<u64>, u64>> =
///     Arc::new(PersistentCache::lru(None::<&str>, 128));
/// let square = Cached::new("square", cache, |x: u64| x * x);
///
/// assert_eq!(square.call(12).unwrap(), 144);
/// assert_eq!(square.call(12).unwrap(), 144);
/// ```
pub struct Cached<F, C, L = NoLock, B = HashKey> {
    qualifier: String,
    func: F,
    cache: Arc<C>,
    lock: L,
    key_builder: B,
}

impl<F, C> Cached<F, C> {
    /// Wrap `func`, storing results in `cache`
    ///
    /// `qualifier` names the function in its cache keys; wrappers sharing a
    /// cache need distinct qualifiers.
    pub fn new(qualifier: impl Into<String>, cache: Arc<C>, func: F) -> Self {
        Self {
            qualifier: qualifier.into(),
            func,
            cache,
            lock: NoLock,
            key_builder: HashKey,
        }
    }
}

impl<F, C, L, B> Cached<F, C, L, B> {
    /// Guard cache access with `lock`
    pub fn with_lock<L2: CacheLock>(self, lock: L2) -> Cached<F, C, L2, B> {
        Cached {
            qualifier: self.qualifier,
            func: self.func,
            cache: self.cache,
            lock,
            key_builder: self.key_builder,
        }
    }

    /// Build keys with `key_builder` instead of [`HashKey`]
    pub fn with_key<B2>(self, key_builder: B2) -> Cached<F, C, L, B2> {
        Cached {
            qualifier: self.qualifier,
            func: self.func,
            cache: self.cache,
            lock: self.lock,
            key_builder,
        }
    }

    /// Name used in cache keys
    pub fn qualifier(&self) -> &str {
        &self.qualifier
    }

    /// Backing cache
    pub fn cache(&self) -> &Arc<C> {
        &self.cache
    }

    /// Call the function, or return the cached result for `args`
    ///
    /// A fresh result overwrites whatever another caller stored meanwhile.
    pub fn call<A, K, V>(&self, args: A) -> Result<V>
    where
        F: Fn(A) -> V,
        B: KeyBuilder<A, K>,
        C: CacheMap<K, V>,
        L: CacheLock,
        V: Clone,
    {
        let key = self.key_builder.build_key(&self.qualifier, &args)?;

        {
            let _guard = self.lock.acquire();
            if let Some(value) = lookup(&*self.cache, &key)? {
                return Ok(value);
            }
        }

        let value = (self.func)(args);

        let _guard = self.lock.acquire();
        store(&*self.cache, &self.qualifier, key, value)
    }
}

/// Memoized method with a per-receiver cache
///
/// The receiver picks the cache (or opts out by returning `None`) and is not
/// part of the key.
pub struct CachedMethod<R, F, C, L = NoLock, B = HashKey> {
    qualifier: String,
    func: F,
    select_cache: CacheSelector<R, C>,
    select_lock: LockSelector<R, L>,
    key_builder: B,
}

impl<R, F, C> CachedMethod<R, F, C> {
    /// Wrap `func`, storing results in the cache `select_cache` picks
    pub fn new<S>(qualifier: impl Into<String>, select_cache: S, func: F) -> Self
    where
        S: Fn(&R) -> Option<Arc<C>> + Send + Sync + 'static,
    {
        Self {
            qualifier: qualifier.into(),
            func,
            select_cache: Box::new(select_cache),
            select_lock: LockSelector::Shared(Arc::new(NoLock)),
            key_builder: HashKey,
        }
    }
}

impl<R, F, C, L, B> CachedMethod<R, F, C, L, B> {
    /// Guard each receiver's cache with the lock `select_lock` picks
    pub fn with_lock<L2, S>(self, select_lock: S) -> CachedMethod<R, F, C, L2, B>
    where
        L2: CacheLock,
        S: Fn(&R) -> Arc<L2> + Send + Sync + 'static,
    {
        self.with_selector(LockSelector::PerReceiver(Box::new(select_lock)))
    }

    /// Guard every receiver's cache with one `lock`
    pub fn with_shared_lock<L2: CacheLock>(self, lock: Arc<L2>) -> CachedMethod<R, F, C, L2, B> {
        self.with_selector(LockSelector::Shared(lock))
    }

    fn with_selector<L2>(self, select_lock: LockSelector<R, L2>) -> CachedMethod<R, F, C, L2, B> {
        CachedMethod {
            qualifier: self.qualifier,
            func: self.func,
            select_cache: self.select_cache,
            select_lock,
            key_builder: self.key_builder,
        }
    }

    /// Build keys with `key_builder` instead of [`HashKey`]
    pub fn with_key<B2>(self, key_builder: B2) -> CachedMethod<R, F, C, L, B2> {
        CachedMethod {
            qualifier: self.qualifier,
            func: self.func,
            select_cache: self.select_cache,
            select_lock: self.select_lock,
            key_builder,
        }
    }

    /// Name used in cache keys
    pub fn qualifier(&self) -> &str {
        &self.qualifier
    }

    /// Call the method on `receiver`, or return the cached result for `args`
    ///
    /// If another caller stored a result for the same key while this one
    /// was computing, the stored result wins.
    pub fn call<A, K, V>(&self, receiver: &R, args: A) -> Result<V>
    where
        F: Fn(&R, A) -> V,
        B: KeyBuilder<A, K>,
        C: CacheMap<K, V>,
        L: CacheLock,
        V: Clone,
    {
        let Some(cache) = (self.select_cache)(receiver) else {
            return Ok((self.func)(receiver, args));
        };
        let lock = self.select_lock.select(receiver);
        let key = self.key_builder.build_key(&self.qualifier, &args)?;

        {
            let _guard = lock.acquire();
            if let Some(value) = lookup(&*cache, &key)? {
                return Ok(value);
            }
        }

        let value = (self.func)(receiver, args);

        let _guard = lock.acquire();
        store_default(&*cache, &self.qualifier, key, value)
    }
}
