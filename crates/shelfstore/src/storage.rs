//! Storage engine implementation
//!
//! File layout: a single `<base>.shelf` append-only log (see [`crate::parser`]).
//! The in-memory index maps each live id to the offset of its latest payload.

use std::collections::HashMap;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::claim::{lock_file, FileClaim};
use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::parser::{create_header, encode_delete, encode_put, scan_records, Record, HEADER_LEN};

/// Extension appended to the base path given to [`ShelfStore::open`]
pub const SHELF_EXTENSION: &str = "shelf";

/// Location of one live record
#[derive(Debug, Clone, Copy)]
struct Slot {
    /// Write order of the latest put, drives iteration order
    seq: u64,
    payload_offset: u64,
    payload_len: u32,
    record_len: u64,
}

fn put_record_len(id: &str, payload_len: usize) -> u64 {
    (1 + 4 + id.len() + 4 + payload_len) as u64
}

fn delete_record_len(id: &str) -> u64 {
    (1 + 4 + id.len()) as u64
}

/// ShelfStore is the on-disk key-value handle
///
/// Ids are strings, payloads are opaque bytes. Iteration follows the order
/// in which each live id was last written, which is stable across reopens.
pub struct ShelfStore {
    /// Canonical path of the `.shelf` file
    path: PathBuf,

    config: StoreConfig,

    /// `None` once closed
    file: Option<Mutex<File>>,

    /// In-memory index: id -> latest payload location
    index: HashMap<String, Slot>,

    next_seq: u64,

    /// Length of the log
    end: u64,

    /// Bytes taken by superseded puts and tombstones
    dead_bytes: u64,

    claim: Option<FileClaim>,
}

impl ShelfStore {
    /// Path of the file backing a store opened at `base`
    pub fn file_path<P: AsRef<Path>>(base: P) -> PathBuf {
        let mut name: OsString = base.as_ref().as_os_str().to_owned();
        name.push(".");
        name.push(SHELF_EXTENSION);
        PathBuf::from(name)
    }

    /// Open or create a store at `base` with the default configuration
    pub fn open<P: AsRef<Path>>(base: P) -> Result<Self> {
        Self::open_with(base, StoreConfig::default())
    }

    /// Open or create a store at `base`
    ///
    /// Missing parent directories are created. A file holding a truncated
    /// final record is cut back to its last complete record.
    ///
    /// # Errors
    /// * [`Error::Corrupt`] / [`Error::IncompatibleVersion`] if the file exists but cannot be read
    /// * [`Error::Busy`] if another open store in this process owns the file
    pub fn open_with<P: AsRef<Path>>(base: P, config: StoreConfig) -> Result<Self> {
        let path = Self::resolve(base.as_ref())?;
        let claim = FileClaim::acquire(&path)?;

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        lock_file(&file, &path)?;

        let mut store = Self::detached(path, config, claim);
        if file.metadata()?.len() == 0 {
            file.write_all(&create_header())?;
            file.sync_all()?;
            store.end = HEADER_LEN as u64;
        } else {
            let truncated = store.load_index(&file)?;
            if truncated {
                warn!(
                    "Discarding incomplete trailing record in {:?} (keeping {} bytes)",
                    store.path, store.end
                );
                file.set_len(store.end)?;
                file.sync_all()?;
            }
        }
        store.file = Some(Mutex::new(file));

        if store.should_compact() {
            store.compact()?;
        }

        debug!(
            "Opened shelf store {:?} ({} records, {} dead bytes)",
            store.path,
            store.len(),
            store.dead_bytes
        );
        Ok(store)
    }

    /// Create a store at `base`, discarding any existing file content
    pub fn create<P: AsRef<Path>>(base: P) -> Result<Self> {
        Self::create_with(base, StoreConfig::default())
    }

    /// Create a store at `base` with `config`, truncating any existing file
    pub fn create_with<P: AsRef<Path>>(base: P, config: StoreConfig) -> Result<Self> {
        let path = Self::resolve(base.as_ref())?;
        let claim = FileClaim::acquire(&path)?;

        // Truncate only once the lock is held, another process may own the file
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        lock_file(&file, &path)?;
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&create_header())?;
        file.sync_all()?;

        let mut store = Self::detached(path, config, claim);
        store.end = HEADER_LEN as u64;
        store.file = Some(Mutex::new(file));
        Ok(store)
    }

    fn detached(path: PathBuf, config: StoreConfig, claim: FileClaim) -> Self {
        Self {
            path,
            config,
            file: None,
            index: HashMap::new(),
            next_seq: 0,
            end: 0,
            dead_bytes: 0,
            claim: Some(claim),
        }
    }

    fn resolve(base: &Path) -> Result<PathBuf> {
        let path = Self::file_path(base);
        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)?;

        let file_name = path.file_name().ok_or_else(|| {
            Error::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "store path has no file name",
            ))
        })?;
        Ok(fs::canonicalize(&parent)?.join(file_name))
    }

    /// Rebuild the index from the file, returning whether the tail was truncated
    fn load_index(&mut self, file: &File) -> Result<bool> {
        // SAFETY: the file is claimed by this handle and the map is dropped
        // before any write goes through `file`.
        let map = unsafe { Mmap::map(file)? };
        let scan = scan_records(&map)?;

        for (offset, record) in scan.records {
            match record {
                Record::Put { id, payload } => {
                    let record_len = put_record_len(id, payload.len());
                    let slot = Slot {
                        seq: self.next_seq,
                        payload_offset: offset + record_len - payload.len() as u64,
                        payload_len: payload.len() as u32,
                        record_len,
                    };
                    self.next_seq += 1;
                    if let Some(old) = self.index.insert(id.to_string(), slot) {
                        self.dead_bytes += old.record_len;
                    }
                }
                Record::Delete { id } => {
                    self.dead_bytes += delete_record_len(id);
                    if let Some(old) = self.index.remove(id) {
                        self.dead_bytes += old.record_len;
                    }
                }
            }
        }

        self.end = scan.valid_len;
        Ok(scan.truncated)
    }

    fn append(&self, record: &[u8]) -> Result<u64> {
        let file = self.file.as_ref().ok_or(Error::Closed)?;
        let mut file = file.lock();
        let offset = file.seek(SeekFrom::End(0))?;
        file.write_all(record)?;
        Ok(offset)
    }

    /// Insert or replace the payload stored under `id`
    ///
    /// The write is not durable until [`ShelfStore::sync`] is called.
    pub fn put(&mut self, id: &str, payload: &[u8]) -> Result<()> {
        if self.file.is_none() {
            return Err(Error::Closed);
        }

        if payload.len() > self.config.max_value_size {
            return Err(Error::ValueTooLarge(payload.len()));
        }

        let record = encode_put(id, payload);
        let offset = self.append(&record)?;
        let record_len = record.len() as u64;

        let slot = Slot {
            seq: self.next_seq,
            payload_offset: offset + record_len - payload.len() as u64,
            payload_len: payload.len() as u32,
            record_len,
        };
        self.next_seq += 1;
        self.end = offset + record_len;

        if let Some(old) = self.index.insert(id.to_string(), slot) {
            self.dead_bytes += old.record_len;
        }
        Ok(())
    }

    /// Get the payload stored under `id`
    pub fn get(&self, id: &str) -> Result<Vec<u8>> {
        let file = self.file.as_ref().ok_or(Error::Closed)?;
        let slot = self.index.get(id).ok_or(Error::NotFound)?;

        let mut file = file.lock();
        file.seek(SeekFrom::Start(slot.payload_offset))?;
        let mut payload = vec![0u8; slot.payload_len as usize];
        file.read_exact(&mut payload)?;

        Ok(payload)
    }

    /// Delete the record stored under `id`
    pub fn delete(&mut self, id: &str) -> Result<()> {
        if self.file.is_none() {
            return Err(Error::Closed);
        }

        let Some(&old) = self.index.get(id) else {
            return Err(Error::NotFound);
        };

        let record = encode_delete(id);
        let offset = self.append(&record)?;
        self.end = offset + record.len() as u64;
        self.dead_bytes += old.record_len + record.len() as u64;
        self.index.remove(id);
        Ok(())
    }

    /// Check whether `id` has a live record
    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Flush pending writes and fsync the file
    pub fn sync(&self) -> Result<()> {
        let file = self.file.as_ref().ok_or(Error::Closed)?;
        let mut file = file.lock();
        file.flush()?;
        file.sync_data()?;
        Ok(())
    }

    /// Live ids in write order
    pub fn ids(&self) -> Vec<&str> {
        let mut slots: Vec<(&str, u64)> = self
            .index
            .iter()
            .map(|(id, slot)| (id.as_str(), slot.seq))
            .collect();
        slots.sort_unstable_by_key(|(_, seq)| *seq);
        slots.into_iter().map(|(id, _)| id).collect()
    }

    /// Scan all live records in write order
    ///
    /// # Returns
    /// * Iterator over (id, payload) pairs
    pub fn scan(&self) -> impl Iterator<Item = Result<(String, Vec<u8>)>> + '_ {
        self.ids()
            .into_iter()
            .map(move |id| self.get(id).map(|payload| (id.to_string(), payload)))
    }

    /// Get the number of live records
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Canonical path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes in the log that no longer back a live record
    pub fn dead_bytes(&self) -> u64 {
        self.dead_bytes
    }

    /// Whether the store has been closed
    pub fn is_closed(&self) -> bool {
        self.file.is_none()
    }

    fn should_compact(&self) -> bool {
        let live_bytes = self.end.saturating_sub(HEADER_LEN as u64 + self.dead_bytes);
        self.dead_bytes > live_bytes && self.end >= self.config.compact_min_bytes
    }

    /// Write `buf` to a locked temporary file and move it over the log
    fn write_compacted(&self, tmp_path: &Path, buf: &[u8]) -> Result<File> {
        let mut tmp = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(tmp_path)?;
        lock_file(&tmp, tmp_path)?;
        tmp.write_all(buf)?;
        tmp.sync_all()?;
        fs::rename(tmp_path, &self.path)?;
        Ok(tmp)
    }

    /// Rewrite the log with only live records, preserving iteration order
    pub fn compact(&mut self) -> Result<()> {
        if self.file.is_none() {
            return Err(Error::Closed);
        }

        let live: Vec<(String, Vec<u8>)> = self.scan().collect::<Result<_>>()?;
        let reclaimed = self.dead_bytes;

        let mut buf = create_header();
        let mut index = HashMap::with_capacity(live.len());
        for (seq, (id, payload)) in live.iter().enumerate() {
            let record = encode_put(id, payload);
            let record_len = record.len() as u64;
            let offset = buf.len() as u64;
            index.insert(
                id.clone(),
                Slot {
                    seq: seq as u64,
                    payload_offset: offset + record_len - payload.len() as u64,
                    payload_len: payload.len() as u32,
                    record_len,
                },
            );
            buf.extend_from_slice(&record);
        }

        let tmp_path = self.path.with_extension("shelf.compact");
        let tmp = match self.write_compacted(&tmp_path, &buf) {
            Ok(tmp) => tmp,
            Err(e) => {
                let _ = fs::remove_file(&tmp_path);
                return Err(e);
            }
        };

        // The old handle stays in place until the new file is live
        self.file = Some(Mutex::new(tmp));

        self.index = index;
        self.next_seq = live.len() as u64;
        self.end = buf.len() as u64;
        self.dead_bytes = 0;

        debug!(
            "Compacted shelf store {:?}: {} live records, {} bytes reclaimed",
            self.path,
            live.len(),
            reclaimed
        );
        Ok(())
    }

    /// Close the store and fsync all changes
    ///
    /// Closing twice is a no-op. The file claim is released so the same file
    /// can be opened again.
    pub fn close(&mut self) -> Result<()> {
        let Some(file) = self.file.take() else {
            return Ok(());
        };

        let result = file.into_inner().sync_all();
        self.claim = None;
        result.map_err(Error::from)
    }
}

impl Drop for ShelfStore {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl std::fmt::Debug for ShelfStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShelfStore")
            .field("path", &self.path)
            .field("records", &self.index.len())
            .field("dead_bytes", &self.dead_bytes)
            .field("closed", &self.file.is_none())
            .finish()
    }
}
