use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Error, IoResultExt, Result};
use crate::hash::Hash;

/// write-once key-to-bytes store, one file per blob
///
/// blobs are small (per-layer change archives), so a flat directory keyed by
/// the full hex hash is sufficient; no sharding.
pub struct BlobStore {
    dir: PathBuf,
    tmp_dir: PathBuf,
}

impl BlobStore {
    /// store over `dir`, staging atomic writes in `tmp_dir`
    ///
    /// both directories must exist (see `StateDir::ensure`).
    pub fn new(dir: impl Into<PathBuf>, tmp_dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            tmp_dir: tmp_dir.into(),
        }
    }

    /// filesystem path of a blob
    pub fn path(&self, hash: &Hash) -> PathBuf {
        self.dir.join(hash.to_hex())
    }

    /// is the blob present
    pub fn has(&self, hash: &Hash) -> bool {
        self.path(hash).exists()
    }

    /// read a blob's bytes
    pub fn get(&self, hash: &Hash) -> Result<Vec<u8>> {
        let path = self.path(hash);
        fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::BlobNotFound(hash.to_hex())
            } else {
                Error::Io { path, source: e }
            }
        })
    }

    /// byte length of a stored blob without reading it
    pub fn size(&self, hash: &Hash) -> Result<u64> {
        let path = self.path(hash);
        let meta = fs::metadata(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::BlobNotFound(hash.to_hex())
            } else {
                Error::Io { path, source: e }
            }
        })?;
        Ok(meta.len())
    }

    /// store bytes under the given hash
    ///
    /// idempotent: a blob that already exists is left untouched. the write is
    /// atomic (temp file, fsync, rename) so readers never observe a partial
    /// blob.
    pub fn put(&self, hash: &Hash, bytes: &[u8]) -> Result<()> {
        let blob_path = self.path(hash);
        if blob_path.exists() {
            return Ok(());
        }

        let tmp_path = self.tmp_dir.join(uuid::Uuid::new_v4().to_string());
        {
            let mut tmp_file = File::create(&tmp_path).with_path(&tmp_path)?;
            tmp_file.write_all(bytes).with_path(&tmp_path)?;
            tmp_file.sync_all().with_path(&tmp_path)?;
        }

        fs::rename(&tmp_path, &blob_path).with_path(&blob_path)?;
        fsync_dir(&self.dir)?;

        debug!(hash = %hash.short(), bytes = bytes.len(), "blob stored");
        Ok(())
    }
}

/// fsync a directory
fn fsync_dir(path: &Path) -> Result<()> {
    let dir = File::open(path).with_path(path)?;
    dir.sync_all().with_path(path)?;
    Ok(())
}
