//! Store configuration

/// Default maximum payload size (1 MB)
pub const DEFAULT_MAX_VALUE_SIZE: usize = 1024 * 1024;

/// Default minimum file size before automatic compaction (64 KB)
pub const DEFAULT_COMPACT_MIN_BYTES: u64 = 64 * 1024;

/// Tunables for a [`ShelfStore`](crate::ShelfStore)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Largest payload accepted by `put`
    pub max_value_size: usize,

    /// Files smaller than this are never compacted on open
    pub compact_min_bytes: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_value_size: DEFAULT_MAX_VALUE_SIZE,
            compact_min_bytes: DEFAULT_COMPACT_MIN_BYTES,
        }
    }
}

impl StoreConfig {
    /// Create the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum payload size
    pub fn with_max_value_size(mut self, bytes: usize) -> Self {
        self.max_value_size = bytes;
        self
    }

    /// Set the minimum file size for automatic compaction
    pub fn with_compact_min_bytes(mut self, bytes: u64) -> Self {
        self.compact_min_bytes = bytes;
        self
    }
}
