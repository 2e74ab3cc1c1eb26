//! Error types for shelfstore

use std::fmt;
use std::io;
use std::path::PathBuf;

/// Result type alias for shelfstore operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for store operations
#[derive(Debug)]
pub enum Error {
    /// I/O error
    Io(io::Error),

    /// Parse error
    Parse(String),

    /// File content is not a valid shelf log
    Corrupt(String),

    /// File was written with an unsupported format version
    IncompatibleVersion(u32),

    /// Payload exceeds the configured maximum size
    ValueTooLarge(usize),

    /// Id not found
    NotFound,

    /// File is already owned by another open store, in this or another process
    Busy(PathBuf),

    /// Store is closed
    Closed,
}

impl Error {
    /// Whether the file content itself is unusable and must be recreated
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Corrupt(_) | Error::IncompatibleVersion(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Parse(msg) => write!(f, "Parse error: {}", msg),
            Error::Corrupt(msg) => write!(f, "Corrupt store file: {}", msg),
            Error::IncompatibleVersion(v) => {
                write!(f, "Incompatible store format version: {}", v)
            }
            Error::ValueTooLarge(size) => write!(f, "Value too large: {} bytes", size),
            Error::NotFound => write!(f, "Id not found"),
            Error::Busy(path) => write!(
                f,
                "Store file {:?} is already in use. Did you try to use the same file for multiple caches?",
                path
            ),
            Error::Closed => write!(f, "Store is closed"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<nom::Err<nom::error::Error<&[u8]>>> for Error {
    fn from(err: nom::Err<nom::error::Error<&[u8]>>) -> Self {
        Error::Parse(format!("{:?}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_variants() {
        assert!(Error::Corrupt("bad magic".into()).is_recoverable());
        assert!(Error::IncompatibleVersion(9).is_recoverable());
        assert!(!Error::Busy(PathBuf::from("x")).is_recoverable());
        assert!(!Error::NotFound.is_recoverable());
    }

    #[test]
    fn test_busy_message_mentions_path() {
        let msg = Error::Busy(PathBuf::from("/tmp/cache.shelf")).to_string();
        assert!(msg.contains("cache.shelf"));
    }
}
