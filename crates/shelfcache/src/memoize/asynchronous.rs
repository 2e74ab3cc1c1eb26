//! Memoization wrappers for async functions and methods

use std::future::Future;
use std::sync::Arc;

use super::{lookup, store, store_default, CacheSelector, LockSelector};
use crate::error::Result;
use crate::keys::{HashKey, KeyBuilder};
use crate::lock::{CacheLock, NoLock};
use crate::map::CacheMap;

/// Memoized async function
///
/// Cache operations run inline on the calling task. With a
/// [`PersistentCache`](crate::PersistentCache) that includes the fsync of
/// each store.
pub struct AsyncCached<F, C, L = NoLock, B = HashKey> {
    qualifier: String,
    func: F,
    cache: Arc<C>,
    lock: L,
    key_builder: B,
}

impl<F, C> AsyncCached<F, C> {
    /// Wrap `func`, storing results in `cache`
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

impl<F, C, L, B> AsyncCached<F, C, L, B> {
    /// Guard cache access with `lock`, typically a `tokio::sync::Mutex<()>`
    pub fn with_lock<L2: CacheLock>(self, lock: L2) -> AsyncCached<F, C, L2, B> {
        AsyncCached {
            qualifier: self.qualifier,
            func: self.func,
            cache: self.cache,
            lock,
            key_builder: self.key_builder,
        }
    }

    /// Build keys with `key_builder` instead of [`HashKey`]
    pub fn with_key<B2>(self, key_builder: B2) -> AsyncCached<F, C, L, B2> {
        AsyncCached {
            qualifier: self.qualifier,
            func: self.func,
            cache: self.cache,
            lock: self.lock,
            key_builder,
        }
    }

    /// Backing cache
    pub fn cache(&self) -> &Arc<C> {
        &self.cache
    }

    /// Await the function, or return the cached result for `args`
    pub async fn call<A, K, V, Fut>(&self, args: A) -> Result<V>
    where
        F: Fn(A) -> Fut,
        Fut: Future<Output = V>,
        B: KeyBuilder<A, K>,
        C: CacheMap<K, V>,
        L: CacheLock,
        V: Clone,
    {
        let key = self.key_builder.build_key(&self.qualifier, &args)?;

        {
            let _guard = self.lock.acquire_async().await;
            if let Some(value) = lookup(&*self.cache, &key)? {
                return Ok(value);
            }
        }

        let value = (self.func)(args).await;

        let _guard = self.lock.acquire_async().await;
        store(&*self.cache, &self.qualifier, key, value)
    }
}

/// Memoized async method with a per-receiver cache
///
/// The method receives its own `Arc` to the receiver so the returned future
/// can outlive the borrow taken by [`call`](Self::call).
pub struct AsyncCachedMethod<R, F, C, L = NoLock, B = HashKey> {
    qualifier: String,
    func: F,
    select_cache: CacheSelector<R, C>,
    select_lock: LockSelector<R, L>,
    key_builder: B,
}

impl<R, F, C> AsyncCachedMethod<R, F, C> {
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

impl<R, F, C, L, B> AsyncCachedMethod<R, F, C, L, B> {
    /// Guard each receiver's cache with the lock `select_lock` picks
    pub fn with_lock<L2, S>(self, select_lock: S) -> AsyncCachedMethod<R, F, C, L2, B>
    where
        L2: CacheLock,
        S: Fn(&R) -> Arc<L2> + Send + Sync + 'static,
    {
        AsyncCachedMethod {
            qualifier: self.qualifier,
            func: self.func,
            select_cache: self.select_cache,
            select_lock: LockSelector::PerReceiver(Box::new(select_lock)),
            key_builder: self.key_builder,
        }
    }

    /// Build keys with `key_builder` instead of [`HashKey`]
    pub fn with_key<B2>(self, key_builder: B2) -> AsyncCachedMethod<R, F, C, L, B2> {
        AsyncCachedMethod {
            qualifier: self.qualifier,
            func: self.func,
            select_cache: self.select_cache,
            select_lock: self.select_lock,
            key_builder,
        }
    }

    /// Await the method on `receiver`, or return the cached result for `args`
    ///
    /// When two calls for one key race, both return the result stored first.
    pub async fn call<A, K, V, Fut>(&self, receiver: &Arc<R>, args: A) -> Result<V>
    where
        F: Fn(Arc<R>, A) -> Fut,
        Fut: Future<Output = V>,
        B: KeyBuilder<A, K>,
        C: CacheMap<K, V>,
        L: CacheLock,
        V: Clone,
    {
        let Some(cache) = (self.select_cache)(receiver) else {
            return Ok((self.func)(Arc::clone(receiver), args).await);
        };
        let lock = self.select_lock.select(receiver);
        let key = self.key_builder.build_key(&self.qualifier, &args)?;

        {
            let _guard = lock.acquire_async().await;
            if let Some(value) = lookup(&*cache, &key)? {
                return Ok(value);
            }
        }

        let value = (self.func)(Arc::clone(receiver), args).await;

        let _guard = lock.acquire_async().await;
        store_default(&*cache, &self.qualifier, key, value)
    }
}
