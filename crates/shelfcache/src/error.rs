//! Error types for shelfcache

use std::fmt;
use std::path::PathBuf;

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

/// Error types for cache operations
#[derive(Debug)]
pub enum CacheError {
    /// Key is not in the in-memory cache
    KeyNotFound,

    /// Entry is not eligible for caching (e.g. too large)
    ValueRejected(String),

    /// Backing file is owned by another live cache
    Busy(PathBuf),

    /// A call argument cannot be turned into a cache key
    UnhashableArgument(String),

    /// Entry could not be encoded or decoded
    Serialization(serde_json::Error),

    /// Disk store failure
    Store(shelfstore::Error),
}

impl CacheError {
    /// Whether this is an ordinary cache miss
    pub fn is_miss(&self) -> bool {
        matches!(self, CacheError::KeyNotFound)
    }

    /// Whether the value was refused by the cache
    pub fn is_rejected(&self) -> bool {
        matches!(self, CacheError::ValueRejected(_))
    }
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::KeyNotFound => write!(f, "Key not found"),
            CacheError::ValueRejected(reason) => write!(f, "Value rejected: {}", reason),
            CacheError::Busy(path) => write!(
                f,
                "Resource temporarily unavailable: {:?}. Did you try to use the same file for multiple caches?",
                path
            ),
            CacheError::UnhashableArgument(arg) => write!(f, "Unhashable argument: {}", arg),
            CacheError::Serialization(e) => write!(f, "Serialization error: {}", e),
            CacheError::Store(e) => write!(f, "Store error: {}", e),
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CacheError::Serialization(e) => Some(e),
            CacheError::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<shelfstore::Error> for CacheError {
    fn from(err: shelfstore::Error) -> Self {
        match err {
            shelfstore::Error::Busy(path) => CacheError::Busy(path),
            shelfstore::Error::ValueTooLarge(size) => {
                CacheError::ValueRejected(format!("{} bytes exceeds the store limit", size))
            }
            other => CacheError::Store(other),
        }
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serialization(err)
    }
}
