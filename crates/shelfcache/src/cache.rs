//! PersistentCache: eviction cache mirrored to a shelf store

use std::hash::Hash;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::Serialize;
use shelfstore::{ShelfStore, StoreConfig};
use tracing::{debug, warn};

use crate::error::{CacheError, Result};
use crate::eviction::{EvictionCache, RemovalCause, RemovalListener};
use crate::keys::hash_key;
use crate::lru::LruCache;
use crate::map::CacheMap;
use crate::stats::CacheStats;

/// State of the disk tier
enum DiskSlot {
    /// No path configured, never touches the filesystem
    Disabled,
    /// Not opened yet, or closed since
    Uninitialized,
    Open(ShelfStore),
}

/// Eviction cache whose contents are mirrored to a file on disk
///
/// Every insert is written through to disk before it becomes visible in
/// memory, and every eviction or removal from the in-memory cache deletes
/// the matching disk record. The file is opened lazily on first access, at
/// which point its records are loaded back into the eviction cache.
///
/// Use one instance per memoized function. Keys are not scoped to a
/// function unless the key builder adds a qualifier.
pub struct PersistentCache<K, V, E = LruCache<K, V>> {
    /// Base path of the store; `None` disables persistence
    path: Option<PathBuf>,

    config: StoreConfig,

    /// In-memory eviction cache
    memory: Mutex<E>,

    /// Disk tier, shared with the removal listener registered on `memory`
    disk: Arc<Mutex<DiskSlot>>,

    /// Cache statistics
    stats: Arc<CacheStats>,

    _entries: PhantomData<fn() -> (K, V)>,
}

impl<K, V> PersistentCache<K, V, LruCache<K, V>>
where
    K: Hash + Eq + Clone + Serialize + DeserializeOwned + 'static,
    V: Clone + Serialize + DeserializeOwned + 'static,
{
    /// Create a persistent LRU cache
    ///
    /// # Arguments
    /// * `path` - Base path of the backing file, `None` to keep it in memory only
    /// * `capacity` - Maximum number of items held in memory
    pub fn lru<P: AsRef<Path>>(path: Option<P>, capacity: usize) -> Self {
        Self::new(path, |listener| LruCache::with_listener(capacity, listener))
    }
}

impl<K, V, E> PersistentCache<K, V, E>
where
    K: Hash + Eq + Clone + Serialize + DeserializeOwned + 'static,
    V: Clone + Serialize + DeserializeOwned + 'static,
    E: EvictionCache<K, V>,
{
    /// Create a persistent cache around the eviction cache built by `build`
    ///
    /// `build` receives the listener the eviction cache must notify on every
    /// eviction and removal (`None` when persistence is disabled).
    pub fn new<P, F>(path: Option<P>, build: F) -> Self
    where
        P: AsRef<Path>,
        F: FnOnce(Option<RemovalListener<K, V>>) -> E,
    {
        Self::with_config(path, StoreConfig::default(), build)
    }

    /// Create a persistent cache with an explicit store configuration
    pub fn with_config<P, F>(path: Option<P>, config: StoreConfig, build: F) -> Self
    where
        P: AsRef<Path>,
        F: FnOnce(Option<RemovalListener<K, V>>) -> E,
    {
        let path = path
            .map(|p| p.as_ref().to_path_buf())
            .filter(|p| !p.as_os_str().is_empty());
        let stats = Arc::new(CacheStats::new());

        let (disk, listener) = match path {
            Some(_) => {
                let disk = Arc::new(Mutex::new(DiskSlot::Uninitialized));
                let listener = Self::removal_listener(Arc::clone(&disk), Arc::clone(&stats));
                (disk, Some(listener))
            }
            None => (Arc::new(Mutex::new(DiskSlot::Disabled)), None),
        };

        Self {
            path,
            config,
            memory: Mutex::new(build(listener)),
            disk,
            stats,
            _entries: PhantomData,
        }
    }

    fn removal_listener(disk: Arc<Mutex<DiskSlot>>, stats: Arc<CacheStats>) -> RemovalListener<K, V> {
        Box::new(move |key: &K, _value: &V, cause: RemovalCause| {
            if cause == RemovalCause::Evicted {
                stats.record_eviction();
            }

            let mut slot = disk.lock();
            let DiskSlot::Open(store) = &mut *slot else {
                return;
            };

            let id = hash_key(key);
            match store.delete(&id) {
                Ok(()) => {}
                Err(shelfstore::Error::NotFound) => {
                    warn!("Key '{}' not in persistent cache.", id);
                }
                Err(e) => {
                    warn!("Failed to delete key '{}' from persistent cache: {}", id, e);
                }
            }
        })
    }

    /// Disk id of `key`
    pub fn hash_key(key: &K) -> String {
        hash_key(key)
    }

    /// Base path of the backing store, if persistence is enabled
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Get cache statistics
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Open the backing store and load it into memory, once
    ///
    /// Must be called with the memory lock held; the disk lock is released
    /// before loaded entries are inserted because insertion may evict.
    fn initialize_if_not_initialized(&self, memory: &mut E) -> Result<()> {
        let loaded = {
            let mut slot = self.disk.lock();
            if !matches!(*slot, DiskSlot::Uninitialized) {
                return Ok(());
            }
            let Some(path) = self.path.as_deref() else {
                *slot = DiskSlot::Disabled;
                return Ok(());
            };

            match ShelfStore::open_with(path, self.config.clone()) {
                Ok(mut store) => match Self::read_entries(&mut store) {
                    Ok(entries) => {
                        *slot = DiskSlot::Open(store);
                        Some(entries)
                    }
                    Err(CacheError::Serialization(e)) => {
                        debug!("Undecodable entry in cache database file {:?}: {}", path, e);
                        drop(store);
                        *slot = DiskSlot::Open(self.recreate(path)?);
                        None
                    }
                    Err(e) => return Err(e),
                },
                Err(e) if e.is_recoverable() => {
                    debug!("Unreadable cache database file {:?}: {}", path, e);
                    *slot = DiskSlot::Open(self.recreate(path)?);
                    None
                }
                Err(e) => return Err(e.into()),
            }
        };

        match loaded {
            Some(entries) => {
                let count = entries.len();
                for (key, value) in entries {
                    if let Err(e) = memory.insert(key.clone(), value) {
                        if !e.is_rejected() {
                            return Err(e);
                        }
                        self.discard_record(&key);
                    }
                }
                self.stats.record_loaded(count as u64);
                debug!(
                    "Loaded {} cache entries from {:?} (in cache: {}).",
                    count,
                    self.path,
                    memory.len()
                );
            }
            None => memory.clear(),
        }

        Ok(())
    }

    /// Decode every record, re-keying records whose id no longer matches
    fn read_entries(store: &mut ShelfStore) -> Result<Vec<(K, V)>> {
        let mut entries = Vec::with_capacity(store.len());
        let mut stale = Vec::new();

        for record in store.scan() {
            let (id, payload) = record?;
            let (key, value): (K, V) = serde_json::from_slice(&payload)?;
            let current = hash_key(&key);
            if current != id {
                stale.push((id, current, payload));
            }
            entries.push((key, value));
        }

        if !stale.is_empty() {
            debug!("Re-keying {} cache records", stale.len());
            for (old, new, payload) in &stale {
                store.delete(old)?;
                store.put(new, payload)?;
            }
            store.sync()?;
        }

        Ok(entries)
    }

    fn recreate(&self, path: &Path) -> Result<ShelfStore> {
        warn!(
            "Failed to open cache database file {:?}. Overwriting with a new one.",
            path
        );
        Ok(ShelfStore::create_with(path, self.config.clone())?)
    }

    fn discard_record(&self, key: &K) {
        if let DiskSlot::Open(store) = &mut *self.disk.lock() {
            if let Err(e) = store.delete(&hash_key(key)) {
                warn!("Failed to discard rejected cache record: {}", e);
            }
        }
    }

    fn encode(key: &K, value: &V) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&(key, value))?)
    }

    /// Write `(key, value)` to disk, then insert it into memory
    fn write_through(&self, memory: &mut E, key: K, value: V) -> Result<()> {
        let id = hash_key(&key);

        let persisted = match &mut *self.disk.lock() {
            DiskSlot::Open(store) => {
                store.put(&id, &Self::encode(&key, &value)?)?;
                store.sync()?;
                true
            }
            _ => false,
        };

        let previous = if persisted {
            memory.peek(&key).cloned()
        } else {
            None
        };

        if let Err(e) = memory.insert(key.clone(), value) {
            if persisted {
                self.roll_back(&id, &key, previous.as_ref());
            }
            return Err(e);
        }

        self.stats.record_insert();
        Ok(())
    }

    /// Restore the disk record for `key` after memory refused an insert
    fn roll_back(&self, id: &str, key: &K, previous: Option<&V>) {
        let mut slot = self.disk.lock();
        let DiskSlot::Open(store) = &mut *slot else {
            return;
        };

        let result = match previous {
            Some(value) => Self::encode(key, value).and_then(|payload| {
                store.put(id, &payload)?;
                Ok(())
            }),
            None => store.delete(id).map_err(CacheError::from),
        };
        if let Err(e) = result.and_then(|()| Ok(store.sync()?)) {
            warn!("Failed to roll back cache record '{}': {}", id, e);
        }
    }

    /// Get a value from the in-memory cache
    ///
    /// # Errors
    /// * [`CacheError::KeyNotFound`] if `key` is not resident
    pub fn get(&self, key: &K) -> Result<V> {
        let mut memory = self.memory.lock();
        self.initialize_if_not_initialized(&mut memory)?;

        match memory.get(key) {
            Some(value) => {
                self.stats.record_hit();
                Ok(value.clone())
            }
            None => {
                self.stats.record_miss();
                Err(CacheError::KeyNotFound)
            }
        }
    }

    /// Store a value on disk and in memory
    ///
    /// The disk write is synced before the in-memory insert.
    ///
    /// # Errors
    /// * [`CacheError::ValueRejected`] if the store or the eviction cache refuses the entry
    pub fn set(&self, key: K, value: V) -> Result<()> {
        let mut memory = self.memory.lock();
        self.initialize_if_not_initialized(&mut memory)?;
        self.write_through(&mut memory, key, value)
    }

    /// Return the in-memory value for `key`, or store and return `value`
    pub fn set_default(&self, key: K, value: V) -> Result<V> {
        let mut memory = self.memory.lock();
        self.initialize_if_not_initialized(&mut memory)?;

        if let Some(existing) = memory.get(&key) {
            self.stats.record_hit();
            return Ok(existing.clone());
        }

        self.write_through(&mut memory, key, value.clone())?;
        Ok(value)
    }

    /// Delete the disk record for `key`
    ///
    /// Only the disk tier is touched; a resident in-memory entry stays until
    /// it is evicted or removed with [`PersistentCache::remove`].
    ///
    /// # Errors
    /// * [`CacheError::KeyNotFound`] if there is no disk record (always, without persistence)
    pub fn delete(&self, key: &K) -> Result<()> {
        let mut memory = self.memory.lock();
        self.initialize_if_not_initialized(&mut memory)?;

        let mut slot = self.disk.lock();
        let DiskSlot::Open(store) = &mut *slot else {
            return Err(CacheError::KeyNotFound);
        };

        match store.delete(&hash_key(key)) {
            Ok(()) => Ok(store.sync()?),
            Err(shelfstore::Error::NotFound) => Err(CacheError::KeyNotFound),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove `key` from memory; the removal listener deletes its disk record
    pub fn remove(&self, key: &K) -> Result<Option<V>> {
        let mut memory = self.memory.lock();
        self.initialize_if_not_initialized(&mut memory)?;

        let removed = memory.remove(key);
        if removed.is_some() {
            if let DiskSlot::Open(store) = &*self.disk.lock() {
                store.sync()?;
            }
        }
        Ok(removed)
    }

    /// Check whether `key` is resident in memory
    pub fn contains(&self, key: &K) -> Result<bool> {
        let mut memory = self.memory.lock();
        self.initialize_if_not_initialized(&mut memory)?;
        Ok(memory.contains(key))
    }

    /// Number of entries stored on disk (in memory without persistence)
    pub fn len(&self) -> Result<usize> {
        let mut memory = self.memory.lock();
        self.initialize_if_not_initialized(&mut memory)?;

        match &*self.disk.lock() {
            DiskSlot::Open(store) => Ok(store.len()),
            _ => Ok(memory.len()),
        }
    }

    /// Check if the cache holds no entries
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Keys stored on disk in store order (in memory without persistence)
    pub fn keys(&self) -> Result<Vec<K>> {
        let mut memory = self.memory.lock();
        self.initialize_if_not_initialized(&mut memory)?;

        match &*self.disk.lock() {
            DiskSlot::Open(store) => store
                .scan()
                .map(|record| -> Result<K> {
                    let (_, payload) = record?;
                    let (key, _): (K, IgnoredAny) = serde_json::from_slice(&payload)?;
                    Ok(key)
                })
                .collect(),
            _ => Ok(memory.keys()),
        }
    }

    /// Number of entries resident in memory
    pub fn memory_len(&self) -> usize {
        self.memory.lock().len()
    }

    /// Close the backing store
    ///
    /// Idempotent. A later access reopens the store and reloads it.
    pub fn close(&self) -> Result<()> {
        let mut slot = self.disk.lock();
        if let DiskSlot::Open(store) = &mut *slot {
            let result = store.close();
            *slot = DiskSlot::Uninitialized;
            result?;
        }
        Ok(())
    }
}

impl<K, V, E> CacheMap<K, V> for PersistentCache<K, V, E>
where
    K: Hash + Eq + Clone + Serialize + DeserializeOwned + 'static,
    V: Clone + Serialize + DeserializeOwned + 'static,
    E: EvictionCache<K, V>,
{
    fn get(&self, key: &K) -> Result<V> {
        PersistentCache::get(self, key)
    }

    fn set(&self, key: K, value: V) -> Result<()> {
        PersistentCache::set(self, key, value)
    }

    fn set_default(&self, key: K, value: V) -> Result<V> {
        PersistentCache::set_default(self, key, value)
    }
}

impl<K, V, E> std::fmt::Debug for PersistentCache<K, V, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let disk = match self.disk.try_lock().as_deref() {
            Some(DiskSlot::Disabled) => "disabled",
            Some(DiskSlot::Uninitialized) => "uninitialized",
            Some(DiskSlot::Open(_)) => "open",
            None => "busy",
        };
        f.debug_struct("PersistentCache")
            .field("path", &self.path)
            .field("disk", &disk)
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn cache_path(dir: &TempDir) -> PathBuf {
        dir.path().join("cache")
    }

    fn on_disk(path: &Path) -> ShelfStore {
        ShelfStore::open(path).unwrap()
    }

    fn key(name: &str) -> String {
        name.to_string()
    }

    #[test]
    fn test_get_set() {
        let dir = TempDir::new().unwrap();
        let pc = PersistentCache::lru(Some(cache_path(&dir)), 3);

        pc.set(key("a"), 42).unwrap();

        assert_eq!(pc.get(&"a".to_string()).unwrap(), 42);
        assert!(pc.contains(&"a".to_string()).unwrap());
        assert_eq!(pc.stats().hits(), 1);
        assert_eq!(pc.stats().inserts(), 1);
    }

    #[test]
    fn test_get_missing() {
        let dir = TempDir::new().unwrap();
        let pc: PersistentCache<String, i32> = PersistentCache::lru(Some(cache_path(&dir)), 3);

        assert!(pc.get(&"nope".to_string()).unwrap_err().is_miss());
        assert_eq!(pc.stats().misses(), 1);
    }

    #[test]
    fn test_lazy_initialization() {
        let dir = TempDir::new().unwrap();
        let pc: PersistentCache<String, i32> = PersistentCache::lru(Some(cache_path(&dir)), 3);

        let file = ShelfStore::file_path(cache_path(&dir));
        assert!(!file.exists());

        pc.contains(&"a".to_string()).unwrap();
        assert!(file.exists());
    }

    #[test]
    fn test_creates_missing_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("deeper").join("cache");
        let pc = PersistentCache::lru(Some(&path), 3);

        pc.set(1, 1).unwrap();
        assert!(ShelfStore::file_path(&path).exists());
    }

    #[test]
    fn test_set_default() {
        let dir = TempDir::new().unwrap();
        let pc = PersistentCache::lru(Some(cache_path(&dir)), 3);
        let id = hash_key(&key("a"));

        // insert
        assert_eq!(pc.set_default(key("a"), 42).unwrap(), 42);
        // retrieve
        assert_eq!(pc.set_default(key("a"), 99).unwrap(), 42);
        pc.close().unwrap();

        let store = on_disk(&cache_path(&dir));
        let (stored_key, value): (String, i32) =
            serde_json::from_slice(&store.get(&id).unwrap()).unwrap();
        assert_eq!((stored_key.as_str(), value), ("a", 42));
    }

    #[test]
    fn test_eviction() {
        let dir = TempDir::new().unwrap();
        let pc = PersistentCache::lru(Some(cache_path(&dir)), 2);

        pc.set(key("a"), 42).unwrap();
        pc.set(key("b"), 43).unwrap();
        pc.set(key("c"), 44).unwrap();

        // "a" should be evicted now
        assert!(!pc.contains(&key("a")).unwrap());
        assert!(pc.contains(&key("b")).unwrap());
        assert!(pc.contains(&key("c")).unwrap());
        assert_eq!(pc.stats().evictions(), 1);
        pc.close().unwrap();

        let store = on_disk(&cache_path(&dir));
        assert!(!store.contains(&hash_key(&key("a"))));
        assert!(store.contains(&hash_key(&key("b"))));
        assert!(store.contains(&hash_key(&key("c"))));
    }

    #[test]
    fn test_non_string_keys() {
        let dir = TempDir::new().unwrap();
        let pc = PersistentCache::lru(Some(cache_path(&dir)), 3);

        pc.set(23, 42).unwrap();
        assert_eq!(pc.get(&23).unwrap(), 42);
    }

    #[test]
    fn test_persistency() {
        let dir = TempDir::new().unwrap();

        let pc = PersistentCache::lru(Some(cache_path(&dir)), 2);
        pc.set(key("a"), 42).unwrap();
        pc.set(key("b"), 43).unwrap();
        pc.set(key("c"), 44).unwrap();
        // "a" should be evicted now
        assert!(!pc.contains(&"a".to_string()).unwrap());
        assert!(pc.contains(&"b".to_string()).unwrap());
        pc.close().unwrap();

        let pc2: PersistentCache<String, i32> = PersistentCache::lru(Some(cache_path(&dir)), 2);
        assert!(!pc2.contains(&"a".to_string()).unwrap());
        assert_eq!(pc2.get(&"b".to_string()).unwrap(), 43);
        assert_eq!(pc2.get(&"c".to_string()).unwrap(), 44);
        assert_eq!(pc2.stats().loaded(), 2);
    }

    #[test]
    fn test_no_persistency() {
        let pc = PersistentCache::lru(None::<&Path>, 2);
        pc.set(key("a"), 42).unwrap();
        pc.set(key("b"), 43).unwrap();
        pc.set(key("c"), 44).unwrap();
        // "a" should be evicted now
        assert!(!pc.contains(&key("a")).unwrap());
        assert!(pc.contains(&key("b")).unwrap());
        assert_eq!(pc.len().unwrap(), 2);
        pc.close().unwrap();

        let pc2: PersistentCache<String, i32> = PersistentCache::lru(None::<&Path>, 2);
        assert!(!pc2.contains(&key("a")).unwrap());
        assert!(!pc2.contains(&key("b")).unwrap());
        assert!(pc2.path().is_none());
    }

    #[test]
    fn test_empty_path_disables_persistency() {
        let pc = PersistentCache::lru(Some(""), 2);
        pc.set(1, 1).unwrap();

        assert!(pc.path().is_none());
        assert_eq!(pc.get(&1).unwrap(), 1);
        // Nothing on disk to delete
        assert!(pc.delete(&1).unwrap_err().is_miss());
    }

    #[test]
    fn test_non_str_key_persistency() {
        let dir = TempDir::new().unwrap();

        let pc = PersistentCache::lru(Some(cache_path(&dir)), 2);
        pc.set(23, 42).unwrap();
        pc.set(24, 43).unwrap();
        pc.close().unwrap();

        let pc2: PersistentCache<i32, i32> = PersistentCache::lru(Some(cache_path(&dir)), 2);
        assert_eq!(pc2.get(&23).unwrap(), 42);
        assert_eq!(pc2.get(&24).unwrap(), 43);
    }

    #[test]
    fn test_tuple_keys_and_structured_values() {
        let dir = TempDir::new().unwrap();

        let pc = PersistentCache::lru(Some(cache_path(&dir)), 4);
        pc.set(("square".to_string(), 3u32), vec![9u64, 81]).unwrap();
        pc.close().unwrap();

        let pc2: PersistentCache<(String, u32), Vec<u64>> =
            PersistentCache::lru(Some(cache_path(&dir)), 4);
        assert_eq!(pc2.get(&("square".to_string(), 3)).unwrap(), vec![9, 81]);
    }

    #[test]
    fn test_reload_into_smaller_cache_trims_disk() {
        let dir = TempDir::new().unwrap();

        let pc = PersistentCache::lru(Some(cache_path(&dir)), 4);
        for i in 0..4 {
            pc.set(i, i * 10).unwrap();
        }
        pc.close().unwrap();

        let pc2: PersistentCache<i32, i32> = PersistentCache::lru(Some(cache_path(&dir)), 2);
        // Last written entries survive the load
        assert!(pc2.contains(&2).unwrap());
        assert!(pc2.contains(&3).unwrap());
        assert!(!pc2.contains(&0).unwrap());
        assert_eq!(pc2.len().unwrap(), 2);
    }

    #[test]
    fn test_len_and_keys_reflect_disk() {
        let dir = TempDir::new().unwrap();
        let pc = PersistentCache::lru(Some(cache_path(&dir)), 3);

        pc.set(key("x"), 1).unwrap();
        pc.set(key("y"), 2).unwrap();

        assert_eq!(pc.len().unwrap(), 2);
        assert_eq!(pc.keys().unwrap(), vec![key("x"), key("y")]);

        // Disk-only delete leaves the in-memory entry alone
        pc.delete(&key("x")).unwrap();
        assert_eq!(pc.len().unwrap(), 1);
        assert_eq!(pc.keys().unwrap(), vec![key("y")]);
        assert_eq!(pc.get(&key("x")).unwrap(), 1);
        assert!(pc.delete(&key("x")).unwrap_err().is_miss());
    }

    #[test]
    fn test_remove_deletes_disk_record() {
        let dir = TempDir::new().unwrap();
        let pc = PersistentCache::lru(Some(cache_path(&dir)), 3);

        pc.set(key("a"), 1).unwrap();
        assert_eq!(pc.remove(&key("a")).unwrap(), Some(1));
        assert_eq!(pc.remove(&key("a")).unwrap(), None);

        assert!(pc.is_empty().unwrap());
        assert_eq!(pc.stats().evictions(), 0);
    }

    #[test]
    fn test_corrupt_file_recovery() {
        let dir = TempDir::new().unwrap();
        let file = ShelfStore::file_path(cache_path(&dir));
        fs::write(&file, b"\x00\x01 this is not a shelf \xff\xfe").unwrap();

        let pc = PersistentCache::lru(Some(cache_path(&dir)), 2);
        assert!(pc.is_empty().unwrap());

        pc.set(key("a"), 1).unwrap();
        assert_eq!(pc.get(&key("a")).unwrap(), 1);
        pc.close().unwrap();

        let pc2: PersistentCache<String, i32> = PersistentCache::lru(Some(cache_path(&dir)), 2);
        assert_eq!(pc2.get(&key("a")).unwrap(), 1);
    }

    #[test]
    fn test_incompatible_entries_recovery() {
        let dir = TempDir::new().unwrap();

        let pc = PersistentCache::lru(Some(cache_path(&dir)), 2);
        pc.set(key("a"), "text".to_string()).unwrap();
        pc.close().unwrap();

        // Same file, different value type
        let pc2: PersistentCache<String, u64> = PersistentCache::lru(Some(cache_path(&dir)), 2);
        assert!(pc2.is_empty().unwrap());
        pc2.set(key("b"), 7).unwrap();
        assert_eq!(pc2.get(&"b".to_string()).unwrap(), 7);
    }

    #[test]
    fn test_recovery_clears_memory() {
        let dir = TempDir::new().unwrap();
        let pc = PersistentCache::lru(Some(cache_path(&dir)), 4);

        pc.set(1, 1).unwrap();
        pc.close().unwrap();
        fs::write(ShelfStore::file_path(cache_path(&dir)), b"garbage garbage garbage").unwrap();

        // Reopening finds the file unreadable and starts over in memory too
        assert!(!pc.contains(&1).unwrap());
        assert_eq!(pc.memory_len(), 0);
    }

    #[test]
    fn test_same_file_twice_is_busy() {
        let dir = TempDir::new().unwrap();

        let pc = PersistentCache::lru(Some(cache_path(&dir)), 2);
        pc.set(1, 1).unwrap();

        let pc2: PersistentCache<i32, i32> = PersistentCache::lru(Some(cache_path(&dir)), 2);
        assert!(matches!(pc2.get(&1), Err(CacheError::Busy(_))));

        pc.close().unwrap();
        assert_eq!(pc2.get(&1).unwrap(), 1);
    }

    const OTHER_PROCESS_BASE: &str = "SHELFCACHE_OTHER_PROCESS_BASE";

    #[test]
    fn test_cache_in_other_process() {
        // Only does work when spawned by test_other_process_is_busy
        let Ok(base) = std::env::var(OTHER_PROCESS_BASE) else {
            return;
        };
        let pc: PersistentCache<i32, i32> = PersistentCache::lru(Some(base), 2);
        assert!(matches!(pc.get(&1), Err(CacheError::Busy(_))));
        assert!(matches!(pc.set(2, 2), Err(CacheError::Busy(_))));
    }

    #[test]
    fn test_other_process_is_busy() {
        let dir = TempDir::new().unwrap();
        let pc = PersistentCache::lru(Some(cache_path(&dir)), 2);
        pc.set(1, 1).unwrap();

        let status = std::process::Command::new(std::env::current_exe().unwrap())
            .args(["cache::tests::test_cache_in_other_process", "--exact"])
            .env(OTHER_PROCESS_BASE, cache_path(&dir))
            .status()
            .unwrap();
        assert!(status.success());

        assert_eq!(pc.len().unwrap(), 1);
        pc.close().unwrap();
        let store = on_disk(&cache_path(&dir));
        assert_eq!(store.len(), 1);
        assert!(!store.contains(&hash_key(&2)));
    }

    #[test]
    fn test_zero_capacity_caches_nothing() {
        let dir = TempDir::new().unwrap();
        let pc = PersistentCache::lru(Some(cache_path(&dir)), 0);

        let result = pc.set(1, 1);
        assert!(matches!(result, Err(CacheError::ValueRejected(_))));
        assert!(pc.get(&1).unwrap_err().is_miss());
        // Disk write rolled back
        assert!(pc.is_empty().unwrap());
    }

    #[test]
    fn test_close_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let pc = PersistentCache::lru(Some(cache_path(&dir)), 2);

        pc.close().unwrap();
        pc.set(1, 1).unwrap();
        pc.close().unwrap();
        pc.close().unwrap();

        // Reopens on demand
        assert_eq!(pc.get(&1).unwrap(), 1);
    }

    #[test]
    fn test_value_too_large_for_store() {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig::new().with_max_value_size(16);
        let pc = PersistentCache::with_config(Some(cache_path(&dir)), config, |listener| {
            LruCache::with_listener(4, listener)
        });

        let result = pc.set(1, "x".repeat(64));
        assert!(matches!(result, Err(CacheError::ValueRejected(_))));
        assert!(!pc.contains(&1).unwrap());
        assert!(pc.is_empty().unwrap());
    }

    #[test]
    fn test_rejected_by_memory_rolls_back_disk() {
        let dir = TempDir::new().unwrap();
        let pc = PersistentCache::new(Some(cache_path(&dir)), |listener| {
            LruCache::with_listener(8, listener).weighted_by(|v: &String| v.len())
        });

        pc.set(1, "short".to_string()).unwrap();
        let result = pc.set(1, "far too long".to_string());
        assert!(matches!(result, Err(CacheError::ValueRejected(_))));

        assert_eq!(pc.get(&1).unwrap(), "short");
        pc.close().unwrap();

        let pc2: PersistentCache<i32, String> = PersistentCache::lru(Some(cache_path(&dir)), 8);
        assert_eq!(pc2.get(&1).unwrap(), "short");
    }

    #[test]
    fn test_concurrent_first_access() {
        let dir = TempDir::new().unwrap();
        let pc = PersistentCache::lru(Some(cache_path(&dir)), 64);

        std::thread::scope(|s| {
            for t in 0..4 {
                let pc = &pc;
                s.spawn(move || {
                    for i in 0..8 {
                        pc.set(t * 8 + i, i).unwrap();
                    }
                });
            }
        });

        assert_eq!(pc.len().unwrap(), 32);
        assert_eq!(pc.memory_len(), 32);
    }
}
