//! Exclusive ownership of store files
//!
//! A shelf file has exactly one writer. Within a process a registry of open
//! paths rejects a second handle; across processes an advisory OS lock on
//! the open file does. Either way the second open fails with
//! [`Error::Busy`].

use std::collections::HashSet;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use fs2::FileExt;
use parking_lot::Mutex;

use crate::error::{Error, Result};

static OPEN_FILES: OnceLock<Mutex<HashSet<PathBuf>>> = OnceLock::new();

fn open_files() -> &'static Mutex<HashSet<PathBuf>> {
    OPEN_FILES.get_or_init(|| Mutex::new(HashSet::new()))
}

/// Exclusive claim on a store file, released on drop
#[derive(Debug)]
pub(crate) struct FileClaim {
    path: PathBuf,
}

impl FileClaim {
    /// Claim `path`, which must already be absolute and canonical
    pub(crate) fn acquire(path: &Path) -> Result<Self> {
        let mut open = open_files().lock();
        if !open.insert(path.to_path_buf()) {
            return Err(Error::Busy(path.to_path_buf()));
        }
        Ok(Self {
            path: path.to_path_buf(),
        })
    }
}

/// Take the exclusive OS lock on `file` without blocking
///
/// The lock lives as long as the file descriptor.
pub(crate) fn lock_file(file: &File, path: &Path) -> Result<()> {
    match file.try_lock_exclusive() {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
            Err(Error::Busy(path.to_path_buf()))
        }
        Err(e) => Err(e.into()),
    }
}

impl Drop for FileClaim {
    fn drop(&mut self) {
        open_files().lock().remove(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_claim_is_busy() {
        let path = PathBuf::from("/claim-test/a.shelf");
        let first = FileClaim::acquire(&path).unwrap();

        assert!(matches!(FileClaim::acquire(&path), Err(Error::Busy(_))));

        drop(first);
        assert!(FileClaim::acquire(&path).is_ok());
    }

    #[test]
    fn test_second_file_lock_is_busy() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("locked.shelf");
        let first = File::create(&path).unwrap();
        let second = File::open(&path).unwrap();

        lock_file(&first, &path).unwrap();
        assert!(matches!(lock_file(&second, &path), Err(Error::Busy(_))));

        drop(first);
        lock_file(&second, &path).unwrap();
    }

    #[test]
    fn test_distinct_paths_do_not_conflict() {
        let _a = FileClaim::acquire(Path::new("/claim-test/b.shelf")).unwrap();
        let _b = FileClaim::acquire(Path::new("/claim-test/c.shelf")).unwrap();
    }
}
