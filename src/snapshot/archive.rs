use std::fs::{self, File};
use std::path::{Component, Path};

use tar::{Builder, EntryType, Header};

use crate::error::{Error, IoResultExt, Result};
use crate::hash::Hash;
use crate::types::{Fingerprint, PathState};

/// build a portable uncompressed tar of the given workdir entries
///
/// entries must arrive in sorted path order (parents before children) and
/// carry paths relative to `root`. headers are normalized: mtime, uid and
/// gid are zeroed so identical content always yields identical bytes.
pub fn pack<'a>(
    root: &Path,
    entries: impl IntoIterator<Item = (&'a String, &'a PathState)>,
) -> Result<Vec<u8>> {
    let mut builder = Builder::new(Vec::new());

    for (rel, state) in entries {
        let full = root.join(rel);
        let mut header = Header::new_gnu();
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);
        header.set_mode(state.mode & 0o7777);

        match &state.fingerprint {
            Fingerprint::Dir => {
                header.set_entry_type(EntryType::Directory);
                header.set_size(0);
                builder
                    .append_data(&mut header, rel, std::io::empty())
                    .with_path(&full)?;
            }
            Fingerprint::File(_) => {
                header.set_entry_type(EntryType::Regular);
                let meta = fs::symlink_metadata(&full).with_path(&full)?;
                header.set_size(meta.len());
                let file = File::open(&full).with_path(&full)?;
                builder.append_data(&mut header, rel, file).with_path(&full)?;
            }
            Fingerprint::Symlink(target) => {
                header.set_entry_type(EntryType::Symlink);
                header.set_size(0);
                builder
                    .append_link(&mut header, rel, target)
                    .with_path(&full)?;
            }
        }
    }

    builder.finish().with_path(root)?;
    builder.into_inner().with_path(root)
}

/// extract an archive into `dest` with strict member validation
///
/// member paths must be relative and free of `..`; anything else is a
/// corrupt blob. empty input is a no-op (a deletions-only layer stores an
/// empty archive).
pub fn unpack(hash: &Hash, bytes: &[u8], dest: &Path) -> Result<()> {
    if bytes.is_empty() {
        return Ok(());
    }

    let corrupt = |message: String| Error::CorruptBlob {
        hash: hash.to_hex(),
        message,
    };

    let mut archive = tar::Archive::new(bytes);
    archive.set_preserve_permissions(true);
    archive.set_preserve_mtime(false);

    for entry in archive.entries().map_err(|e| corrupt(e.to_string()))? {
        let mut entry = entry.map_err(|e| corrupt(e.to_string()))?;

        {
            let path = entry.path().map_err(|e| corrupt(e.to_string()))?;
            for component in path.components() {
                match component {
                    Component::ParentDir => {
                        return Err(corrupt(format!(
                            "member path escapes workdir: {}",
                            path.display()
                        )))
                    }
                    Component::RootDir | Component::Prefix(_) => {
                        return Err(corrupt(format!(
                            "member path is absolute: {}",
                            path.display()
                        )))
                    }
                    _ => {}
                }
            }
        }

        let unpacked = entry
            .unpack_in(dest)
            .map_err(|e| corrupt(e.to_string()))?;
        if !unpacked {
            let path = entry.path().map_err(|e| corrupt(e.to_string()))?;
            return Err(corrupt(format!(
                "member refused extraction: {}",
                path.display()
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::sha256;
    use std::collections::BTreeMap;
    use std::os::unix::fs::{symlink, PermissionsExt};
    use tempfile::tempdir;

    fn entry_for(root: &Path, rel: &str) -> PathState {
        let full = root.join(rel);
        let meta = fs::symlink_metadata(&full).unwrap();
        let mode = meta.permissions().mode() & 0o7777;
        let fingerprint = if meta.file_type().is_symlink() {
            Fingerprint::Symlink(fs::read_link(&full).unwrap().to_string_lossy().into_owned())
        } else if meta.is_dir() {
            Fingerprint::Dir
        } else {
            Fingerprint::File(sha256(&fs::read(&full).unwrap()))
        };
        PathState::new(fingerprint, mode)
    }

    fn pack_tree(root: &Path, rels: &[&str]) -> Vec<u8> {
        let mut entries = BTreeMap::new();
        for rel in rels {
            entries.insert(rel.to_string(), entry_for(root, rel));
        }
        pack(root, entries.iter()).unwrap()
    }

    #[test]
    fn test_pack_unpack_roundtrip() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("sub")).unwrap();
        fs::write(src.join("top.txt"), "top").unwrap();
        fs::write(src.join("sub/inner.txt"), "inner").unwrap();
        symlink("top.txt", src.join("link")).unwrap();

        let bytes = pack_tree(&src, &["link", "sub", "sub/inner.txt", "top.txt"]);

        let dest = dir.path().join("dest");
        fs::create_dir_all(&dest).unwrap();
        unpack(&sha256(&bytes), &bytes, &dest).unwrap();

        assert_eq!(fs::read_to_string(dest.join("top.txt")).unwrap(), "top");
        assert_eq!(
            fs::read_to_string(dest.join("sub/inner.txt")).unwrap(),
            "inner"
        );
        assert_eq!(
            fs::read_link(dest.join("link")).unwrap().to_string_lossy(),
            "top.txt"
        );
    }

    #[test]
    fn test_pack_deterministic() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("a.txt"), "a").unwrap();
        fs::write(src.join("b.txt"), "b").unwrap();

        let first = pack_tree(&src, &["a.txt", "b.txt"]);
        let second = pack_tree(&src, &["a.txt", "b.txt"]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_pack_preserves_mode() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("tool.sh"), "#!/bin/sh\n").unwrap();
        fs::set_permissions(src.join("tool.sh"), fs::Permissions::from_mode(0o755)).unwrap();

        let bytes = pack_tree(&src, &["tool.sh"]);

        let dest = dir.path().join("dest");
        fs::create_dir_all(&dest).unwrap();
        unpack(&sha256(&bytes), &bytes, &dest).unwrap();

        let mode = fs::metadata(dest.join("tool.sh"))
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(mode, 0o755);
    }

    #[test]
    fn test_unpack_empty_is_noop() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("dest");
        fs::create_dir_all(&dest).unwrap();

        unpack(&sha256(b""), &[], &dest).unwrap();
        assert!(fs::read_dir(&dest).unwrap().next().is_none());
    }

    #[test]
    fn test_unpack_rejects_traversal() {
        let mut builder = Builder::new(Vec::new());
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Regular);
        header.set_size(4);
        header.set_mode(0o644);
        builder
            .append_data(&mut header, "../escape.txt", &b"oops"[..])
            .unwrap();
        builder.finish().unwrap();
        let bytes = builder.into_inner().unwrap();

        let dir = tempdir().unwrap();
        let dest = dir.path().join("dest");
        fs::create_dir_all(&dest).unwrap();

        let result = unpack(&sha256(&bytes), &bytes, &dest);
        assert!(matches!(result, Err(Error::CorruptBlob { .. })));
        assert!(!dir.path().join("escape.txt").exists());
    }

    #[test]
    fn test_unpack_garbage_is_corrupt() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("dest");
        fs::create_dir_all(&dest).unwrap();

        let bytes = vec![0xffu8; 1024];
        let result = unpack(&sha256(&bytes), &bytes, &dest);
        assert!(matches!(result, Err(Error::CorruptBlob { .. })));
    }

    #[test]
    fn test_pack_decodable_by_plain_tar_reader() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("file.txt"), "payload").unwrap();

        let bytes = pack_tree(&src, &["file.txt"]);

        let mut archive = tar::Archive::new(&bytes[..]);
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| {
                e.unwrap()
                    .path()
                    .unwrap()
                    .to_string_lossy()
                    .into_owned()
            })
            .collect();
        assert_eq!(names, vec!["file.txt"]);
    }
}
