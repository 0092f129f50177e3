//! on-disk state directory: blob store, index document, lock

mod blob;
mod index;

pub use blob::BlobStore;
pub use index::Index;

use std::fs::File;
use std::path::{Path, PathBuf};

use nix::fcntl::{Flock, FlockArg};

use crate::error::{Error, IoResultExt, Result};

/// layout of a statekit state directory
///
/// ```text
/// <state_dir>/
///   blobs/<hash>   raw layer archives
///   index.json     catalog: head, layers, tags
///   tmp/           scratch for atomic writes
///   .lock          writer exclusion
/// ```
#[derive(Clone, Debug)]
pub struct StateDir {
    root: PathBuf,
}

impl StateDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn blobs_path(&self) -> PathBuf {
        self.root.join("blobs")
    }

    pub fn index_path(&self) -> PathBuf {
        self.root.join("index.json")
    }

    pub fn tmp_path(&self) -> PathBuf {
        self.root.join("tmp")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.root.join(".lock")
    }

    /// create the directory skeleton if missing
    pub fn ensure(&self) -> Result<()> {
        std::fs::create_dir_all(self.blobs_path()).with_path(self.blobs_path())?;
        std::fs::create_dir_all(self.tmp_path()).with_path(self.tmp_path())?;
        Ok(())
    }

    /// acquire the exclusive writer lock, failing fast on contention
    ///
    /// returns a guard that releases the lock on drop. read-only operations
    /// do not take the lock.
    pub fn lock(&self) -> Result<StoreLock> {
        let lock_path = self.lock_path();
        let file = File::create(&lock_path).with_path(&lock_path)?;

        let flock =
            Flock::lock(file, FlockArg::LockExclusiveNonblock).map_err(|_| Error::StoreLocked)?;

        Ok(StoreLock { _flock: flock })
    }
}

/// guard holding the writer lock until dropped
pub struct StoreLock {
    _flock: Flock<File>,
}
// lock is released automatically when the Flock is dropped

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_layout_paths() {
        let state = StateDir::new("/tmp/s");
        assert_eq!(state.blobs_path(), PathBuf::from("/tmp/s/blobs"));
        assert_eq!(state.index_path(), PathBuf::from("/tmp/s/index.json"));
        assert_eq!(state.tmp_path(), PathBuf::from("/tmp/s/tmp"));
    }

    #[test]
    fn test_ensure_creates_skeleton() {
        let dir = tempdir().unwrap();
        let state = StateDir::new(dir.path().join("state"));
        state.ensure().unwrap();

        assert!(state.blobs_path().is_dir());
        assert!(state.tmp_path().is_dir());
    }

    #[test]
    fn test_lock_exclusion() {
        let dir = tempdir().unwrap();
        let state = StateDir::new(dir.path().join("state"));
        state.ensure().unwrap();

        let lock = state.lock().unwrap();
        assert!(matches!(state.lock(), Err(Error::StoreLocked)));

        drop(lock);
        assert!(state.lock().is_ok());
    }
}
