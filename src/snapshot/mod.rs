//! filesystem snapshotting: walk, fingerprint, pack and replay layer deltas

mod archive;

pub use archive::{pack, unpack};

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use tracing::debug;
use walkdir::WalkDir;

use crate::error::{Error, IoResultExt, Result};
use crate::hash::{sha256, sha256_concat, Hash};
use crate::store::BlobStore;
use crate::types::{DiffReport, Fingerprint, PathState, WorkState};

/// one captured layer payload: identity hash plus the archive to store
///
/// for non-root layers the deleted-file list is folded into `hash` but is
/// not part of `archive`; deletions replay only through full rebuilds.
#[derive(Clone, Debug)]
pub struct Delta {
    pub hash: Hash,
    pub archive: Vec<u8>,
}

/// fingerprint every entry under `root`
///
/// paths are relative with forward slashes, sorted by the map; symlinks are
/// not followed, hidden files are included.
pub fn state(root: &Path) -> Result<WorkState> {
    let mut out = WorkState::new();

    for entry in WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .sort_by(|a, b| a.path().cmp(b.path()))
    {
        let entry = entry.map_err(|e| {
            let path = e
                .path()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| root.to_path_buf());
            match e.into_io_error() {
                Some(source) => Error::Io { path, source },
                None => Error::Io {
                    path,
                    source: std::io::Error::other("walk cycle"),
                },
            }
        })?;

        let path = entry.path();
        let rel = path
            .strip_prefix(root)
            .expect("walked path is under root")
            .to_string_lossy()
            .into_owned();

        let meta = fs::symlink_metadata(path).with_path(path)?;
        let mode = meta.permissions().mode() & 0o7777;
        let file_type = meta.file_type();

        let fingerprint = if file_type.is_symlink() {
            let target = fs::read_link(path).with_path(path)?;
            Fingerprint::Symlink(target.to_string_lossy().into_owned())
        } else if file_type.is_dir() {
            Fingerprint::Dir
        } else if file_type.is_file() {
            let content = fs::read(path).with_path(path)?;
            Fingerprint::File(sha256(&content))
        } else {
            // device nodes, fifos and sockets are not snapshottable
            continue;
        };

        out.insert(rel, PathState::new(fingerprint, mode));
    }

    Ok(out)
}

/// capture the entire workdir as a root layer
///
/// returns None when the workdir is empty: no layer is created.
pub fn capture(workdir: &Path) -> Result<Option<Delta>> {
    let current = state(workdir)?;
    if current.is_empty() {
        return Ok(None);
    }

    let archive = pack(workdir, current.iter())?;
    let hash = sha256(&archive);
    debug!(entries = current.len(), hash = %hash.short(), "captured root layer");

    Ok(Some(Delta { hash, archive }))
}

/// capture the workdir's changes relative to a base state
///
/// the archive holds added-or-modified paths only (empty bytes when the
/// instruction only deleted files); the deleted list participates in the
/// identity hash alone. returns None when nothing changed.
pub fn diff(workdir: &Path, base: &WorkState) -> Result<Option<Delta>> {
    let current = state(workdir)?;

    let changed: Vec<(&String, &PathState)> = current
        .iter()
        .filter(|(rel, st)| st.differs_from(base.get(*rel)))
        .collect();
    let deleted: Vec<&String> = base.keys().filter(|rel| !current.contains_key(*rel)).collect();

    if changed.is_empty() && deleted.is_empty() {
        return Ok(None);
    }

    let archive = if changed.is_empty() {
        Vec::new()
    } else {
        pack(workdir, changed.iter().map(|(rel, st)| (*rel, *st)))?
    };

    // the deleted manifest is identity, not payload
    let deleted_json =
        serde_json::to_vec(&deleted).expect("deleted path list serializes");
    let hash = sha256_concat(&archive, &deleted_json);
    debug!(
        changed = changed.len(),
        deleted = deleted.len(),
        hash = %hash.short(),
        "captured delta layer"
    );

    Ok(Some(Delta { hash, archive }))
}

/// classify differences between two states
pub fn compare(base: &WorkState, current: &WorkState) -> DiffReport {
    let mut report = DiffReport::default();

    for (rel, st) in current {
        match base.get(rel) {
            None => report.added.push(rel.clone()),
            Some(base_st) => {
                if st.differs_from(Some(base_st)) {
                    report.modified.push(rel.clone());
                }
            }
        }
    }
    for rel in base.keys() {
        if !current.contains_key(rel) {
            report.deleted.push(rel.clone());
        }
    }

    report
}

/// unpack one layer's blob over the workdir
///
/// a zero-byte blob (deletions-only layer) is a no-op.
pub fn restore(store: &BlobStore, workdir: &Path, hash: &Hash) -> Result<()> {
    let bytes = store.get(hash)?;
    fs::create_dir_all(workdir).with_path(workdir)?;
    unpack(hash, &bytes, workdir)
}

/// reset the workdir and replay a chain of layers, root first
pub fn rebuild(store: &BlobStore, workdir: &Path, chain: &[Hash]) -> Result<()> {
    if workdir.exists() {
        fs::remove_dir_all(workdir).with_path(workdir)?;
    }
    fs::create_dir_all(workdir).with_path(workdir)?;

    for hash in chain {
        restore(store, workdir, hash)?;
    }
    debug!(layers = chain.len(), "rebuilt workdir");

    Ok(())
}

/// materialize a chain into a scratch directory and fingerprint it
///
/// used to compute a parent layer's state without touching the user's
/// workdir. the scratch directory is removed on every exit path.
pub fn state_of_chain(store: &BlobStore, chain: &[Hash]) -> Result<WorkState> {
    if chain.is_empty() {
        return Ok(WorkState::new());
    }

    let scratch = tempfile::tempdir().map_err(|source| Error::Io {
        path: std::env::temp_dir(),
        source,
    })?;

    for hash in chain {
        restore(store, scratch.path(), hash)?;
    }
    state(scratch.path())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;
    use tempfile::tempdir;

    fn test_store() -> (tempfile::TempDir, BlobStore) {
        let dir = tempdir().unwrap();
        let blobs = dir.path().join("blobs");
        let tmp = dir.path().join("tmp");
        fs::create_dir_all(&blobs).unwrap();
        fs::create_dir_all(&tmp).unwrap();
        (dir, BlobStore::new(blobs, tmp))
    }

    #[test]
    fn test_state_fingerprints() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("root");
        fs::create_dir_all(root.join("sub")).unwrap();
        fs::write(root.join("file.txt"), "content").unwrap();
        symlink("file.txt", root.join("link")).unwrap();

        let st = state(&root).unwrap();

        assert_eq!(st.len(), 3);
        assert_eq!(
            st.get("file.txt").unwrap().fingerprint,
            Fingerprint::File(sha256(b"content"))
        );
        assert_eq!(st.get("sub").unwrap().fingerprint, Fingerprint::Dir);
        assert_eq!(
            st.get("link").unwrap().fingerprint,
            Fingerprint::Symlink("file.txt".to_string())
        );
    }

    #[test]
    fn test_state_includes_hidden() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("root");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join(".hidden"), "x").unwrap();

        let st = state(&root).unwrap();
        assert!(st.contains_key(".hidden"));
    }

    #[test]
    fn test_state_does_not_follow_symlinks() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("root");
        let outside = dir.path().join("outside");
        fs::create_dir_all(&root).unwrap();
        fs::create_dir_all(&outside).unwrap();
        fs::write(outside.join("secret"), "s").unwrap();
        symlink(&outside, root.join("door")).unwrap();

        let st = state(&root).unwrap();
        assert_eq!(st.len(), 1);
        assert!(matches!(
            st.get("door").unwrap().fingerprint,
            Fingerprint::Symlink(_)
        ));
    }

    #[test]
    fn test_capture_empty_workdir() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("root");
        fs::create_dir_all(&root).unwrap();

        assert!(capture(&root).unwrap().is_none());
    }

    #[test]
    fn test_capture_hash_is_archive_hash() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("root");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("f"), "x").unwrap();

        let delta = capture(&root).unwrap().unwrap();
        assert_eq!(delta.hash, sha256(&delta.archive));
        assert!(!delta.archive.is_empty());
    }

    #[test]
    fn test_capture_deterministic() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("root");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("a"), "1").unwrap();
        fs::write(root.join("b"), "2").unwrap();

        let d1 = capture(&root).unwrap().unwrap();
        let d2 = capture(&root).unwrap().unwrap();
        assert_eq!(d1.hash, d2.hash);
        assert_eq!(d1.archive, d2.archive);
    }

    #[test]
    fn test_diff_no_changes() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("root");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("f"), "x").unwrap();

        let base = state(&root).unwrap();
        assert!(diff(&root, &base).unwrap().is_none());
    }

    #[test]
    fn test_diff_modification() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("root");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("f"), "v1").unwrap();
        let base = state(&root).unwrap();

        fs::write(root.join("f"), "v2").unwrap();
        let delta = diff(&root, &base).unwrap().unwrap();

        // archive carries the changed file; identity includes empty deletions
        assert_eq!(delta.hash, sha256_concat(&delta.archive, b"[]"));
        assert!(!delta.archive.is_empty());
    }

    #[test]
    fn test_diff_deletion_only_has_empty_archive() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("root");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("f"), "x").unwrap();
        let base = state(&root).unwrap();

        fs::remove_file(root.join("f")).unwrap();
        let delta = diff(&root, &base).unwrap().unwrap();

        assert!(delta.archive.is_empty());
        assert_eq!(delta.hash, sha256_concat(b"", br#"["f"]"#));
    }

    #[test]
    fn test_diff_deletion_affects_identity() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("root");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("keep"), "k").unwrap();
        fs::write(root.join("gone"), "g").unwrap();
        let base = state(&root).unwrap();

        fs::write(root.join("keep"), "k2").unwrap();
        let with_delete = {
            fs::remove_file(root.join("gone")).unwrap();
            diff(&root, &base).unwrap().unwrap()
        };
        let without_delete = {
            fs::write(root.join("gone"), "g").unwrap();
            diff(&root, &base).unwrap().unwrap()
        };

        assert_eq!(with_delete.archive, without_delete.archive);
        assert_ne!(with_delete.hash, without_delete.hash);
    }

    #[test]
    fn test_compare_classification() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("root");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("kept"), "same").unwrap();
        fs::write(root.join("changed"), "v1").unwrap();
        fs::write(root.join("removed"), "r").unwrap();
        let base = state(&root).unwrap();

        fs::write(root.join("changed"), "v2").unwrap();
        fs::remove_file(root.join("removed")).unwrap();
        fs::write(root.join("fresh"), "new").unwrap();
        let current = state(&root).unwrap();

        let report = compare(&base, &current);
        assert_eq!(report.added, vec!["fresh"]);
        assert_eq!(report.modified, vec!["changed"]);
        assert_eq!(report.deleted, vec!["removed"]);
        assert!(!report.is_clean());
    }

    #[test]
    fn test_restore_roundtrip() {
        let (_dir, store) = test_store();
        let dir = tempdir().unwrap();
        let root = dir.path().join("root");
        fs::create_dir_all(root.join("sub")).unwrap();
        fs::write(root.join("sub/f"), "payload").unwrap();

        let delta = capture(&root).unwrap().unwrap();
        store.put(&delta.hash, &delta.archive).unwrap();

        let target = dir.path().join("target");
        restore(&store, &target, &delta.hash).unwrap();
        assert_eq!(fs::read_to_string(target.join("sub/f")).unwrap(), "payload");
    }

    #[test]
    fn test_rebuild_replays_chain_in_order() {
        let (_dir, store) = test_store();
        let dir = tempdir().unwrap();
        let root = dir.path().join("root");
        fs::create_dir_all(&root).unwrap();

        // layer 1: f=v1
        fs::write(root.join("f"), "v1").unwrap();
        let l1 = capture(&root).unwrap().unwrap();
        store.put(&l1.hash, &l1.archive).unwrap();
        let base = state(&root).unwrap();

        // layer 2: f=v2
        fs::write(root.join("f"), "v2").unwrap();
        let l2 = diff(&root, &base).unwrap().unwrap();
        store.put(&l2.hash, &l2.archive).unwrap();

        let target = dir.path().join("target");
        fs::create_dir_all(&target).unwrap();
        fs::write(target.join("stale"), "old").unwrap();

        rebuild(&store, &target, &[l1.hash, l2.hash]).unwrap();

        assert_eq!(fs::read_to_string(target.join("f")).unwrap(), "v2");
        assert!(!target.join("stale").exists());
    }

    #[test]
    fn test_rebuild_idempotent() {
        let (_dir, store) = test_store();
        let dir = tempdir().unwrap();
        let root = dir.path().join("root");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("f"), "x").unwrap();

        let delta = capture(&root).unwrap().unwrap();
        store.put(&delta.hash, &delta.archive).unwrap();

        let target = dir.path().join("target");
        rebuild(&store, &target, &[delta.hash]).unwrap();
        let first = state(&target).unwrap();
        rebuild(&store, &target, &[delta.hash]).unwrap();
        let second = state(&target).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn test_state_of_chain_matches_workdir() {
        let (_dir, store) = test_store();
        let dir = tempdir().unwrap();
        let root = dir.path().join("root");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("f"), "content").unwrap();

        let delta = capture(&root).unwrap().unwrap();
        store.put(&delta.hash, &delta.archive).unwrap();

        let reconstructed = state_of_chain(&store, &[delta.hash]).unwrap();
        assert_eq!(reconstructed, state(&root).unwrap());
    }

    #[test]
    fn test_state_of_chain_empty() {
        let (_dir, store) = test_store();
        assert!(state_of_chain(&store, &[]).unwrap().is_empty());
    }
}
