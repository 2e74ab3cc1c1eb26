//! Locks guarding cache access in the memoization wrappers
//!
//! One interface covers both thread-style blocking locks and cooperative
//! async locks. Guards release the lock when dropped.

use std::future::Future;
use std::sync::Arc;

/// Scoped lock with a blocking and a suspending acquire
pub trait CacheLock {
    /// Held while the lock is acquired
    type Guard<'a>
    where
        Self: 'a;

    /// Block the current thread until the lock is held
    fn acquire(&self) -> Self::Guard<'_>;

    /// Suspend the current task until the lock is held
    fn acquire_async(&self) -> impl Future<Output = Self::Guard<'_>>;
}

/// Lock that always succeeds immediately
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLock;

impl CacheLock for NoLock {
    type Guard<'a> = ();

    fn acquire(&self) -> Self::Guard<'_> {}

    async fn acquire_async(&self) -> Self::Guard<'_> {}
}

/// Thread-style mutual exclusion
///
/// `acquire_async` blocks the executor thread while waiting; prefer
/// `tokio::sync::Mutex` for async callers.
impl CacheLock for parking_lot::Mutex<()> {
    type Guard<'a> = parking_lot::MutexGuard<'a, ()>;

    fn acquire(&self) -> Self::Guard<'_> {
        self.lock()
    }

    async fn acquire_async(&self) -> Self::Guard<'_> {
        self.lock()
    }
}

/// Cooperative mutual exclusion
///
/// `acquire` must not be called from within an async runtime.
impl CacheLock for tokio::sync::Mutex<()> {
    type Guard<'a> = tokio::sync::MutexGuard<'a, ()>;

    fn acquire(&self) -> Self::Guard<'_> {
        self.blocking_lock()
    }

    async fn acquire_async(&self) -> Self::Guard<'_> {
        self.lock().await
    }
}

impl<L: CacheLock> CacheLock for Arc<L> {
    type Guard<'a> = L::Guard<'a>
    where
        Self: 'a;

    fn acquire(&self) -> Self::Guard<'_> {
        (**self).acquire()
    }

    fn acquire_async(&self) -> impl Future<Output = Self::Guard<'_>> {
        (**self).acquire_async()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parking_lot_guard_releases_on_drop() {
        let lock = parking_lot::Mutex::new(());
        {
            let _guard = lock.acquire();
            assert!(lock.try_lock().is_none());
        }
        assert!(lock.try_lock().is_some());
    }

    #[test]
    fn test_shared_lock_is_the_same_lock() {
        let lock = Arc::new(parking_lot::Mutex::new(()));
        let other = Arc::clone(&lock);

        let _guard = lock.acquire();
        assert!(other.try_lock().is_none());
    }

    #[test]
    fn test_tokio_blocking_acquire_outside_runtime() {
        let lock = tokio::sync::Mutex::new(());
        let guard = lock.acquire();
        assert!(lock.try_lock().is_err());
        drop(guard);
        assert!(lock.try_lock().is_ok());
    }

    #[tokio::test]
    async fn test_tokio_async_acquire() {
        let lock = tokio::sync::Mutex::new(());
        {
            let _guard = lock.acquire_async().await;
            assert!(lock.try_lock().is_err());
        }
        assert!(lock.try_lock().is_ok());
    }

    #[tokio::test]
    async fn test_no_lock_never_blocks() {
        let lock = NoLock;
        let _outer = lock.acquire_async().await;
        let _inner = lock.acquire_async().await;
        lock.acquire();
    }
}
