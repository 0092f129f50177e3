use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, IoResultExt, Result};
use crate::hash::{cache_key, Hash};
use crate::types::Layer;

/// the persisted catalog document
///
/// `layers` is append-only and in append order; the logical history is the
/// parent chain hanging off `head`. entries no longer reachable from head
/// are dead but stay addressable by hash.
#[derive(Debug, Default, Serialize, Deserialize)]
struct IndexDoc {
    head: Option<Hash>,
    layers: Vec<Layer>,
    tags: BTreeMap<String, Hash>,
}

/// persistent catalog of layers, head pointer and tags
///
/// loaded fully into memory at open; every mutation rewrites `index.json`
/// atomically (temp file, fsync, rename).
pub struct Index {
    path: PathBuf,
    tmp_dir: PathBuf,
    doc: IndexDoc,
}

impl Index {
    /// open the index at `path`, treating a missing file as empty
    pub fn open(path: impl Into<PathBuf>, tmp_dir: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let tmp_dir = tmp_dir.into();

        let doc = match fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content)
                .map_err(|e| Error::CorruptIndex(format!("{}: {}", path.display(), e)))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => IndexDoc::default(),
            Err(e) => return Err(Error::Io { path, source: e }),
        };

        Ok(Self { path, tmp_dir, doc })
    }

    /// current head hash, absent when the chain is empty
    pub fn head(&self) -> Option<Hash> {
        self.doc.head
    }

    /// all layer records in append order (not chain order)
    pub fn layers(&self) -> &[Layer] {
        &self.doc.layers
    }

    /// tag mapping
    pub fn tags(&self) -> &BTreeMap<String, Hash> {
        &self.doc.tags
    }

    /// look up a layer record by exact hash
    pub fn get(&self, hash: &Hash) -> Option<&Layer> {
        self.doc.layers.iter().find(|l| l.hash == *hash)
    }

    /// append a layer and advance head to it
    pub fn append(&mut self, layer: Layer) -> Result<()> {
        self.doc.head = Some(layer.hash);
        self.doc.layers.push(layer);
        self.save()
    }

    /// move head to an existing layer
    pub fn set_head(&mut self, hash: Hash) -> Result<()> {
        self.doc.head = Some(hash);
        self.save()
    }

    /// create or replace a tag
    pub fn set_tag(&mut self, name: impl Into<String>, hash: Hash) -> Result<()> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::InvalidTag("empty tag name".to_string()));
        }
        self.doc.tags.insert(name, hash);
        self.save()
    }

    /// remove a tag
    pub fn remove_tag(&mut self, name: &str) -> Result<()> {
        if self.doc.tags.remove(name).is_none() {
            return Err(Error::UnresolvedRef(name.to_string()));
        }
        self.save()
    }

    /// find the first layer matching an (instruction, parent) pair
    ///
    /// linear scan in append order; first match wins, so post-hoc edits that
    /// duplicate a cache key cannot change which layer is replayed.
    pub fn find_by_cache_key(&self, instruction: &str, parent: Option<&Hash>) -> Option<&Layer> {
        let key = cache_key(instruction, parent);
        self.doc
            .layers
            .iter()
            .find(|l| cache_key(&l.instruction, l.parent.as_ref()) == key)
    }

    /// chain from the root to the given layer, following parent pointers
    ///
    /// stops silently at a dangling parent and yields whatever prefix is
    /// intact. an unknown hash yields an empty chain.
    pub fn chain_to(&self, hash: &Hash) -> Vec<&Layer> {
        let mut chain = Vec::new();
        let mut cursor = Some(*hash);

        while let Some(h) = cursor {
            match self.get(&h) {
                Some(layer) => {
                    cursor = layer.parent;
                    chain.push(layer);
                }
                None => break,
            }
        }

        chain.reverse();
        chain
    }

    /// chain from the root to head
    pub fn ancestry(&self) -> Vec<&Layer> {
        match self.doc.head {
            Some(head) => self.chain_to(&head),
            None => Vec::new(),
        }
    }

    /// resolve a user-supplied ref to a hash
    ///
    /// resolution order: tag name, then hash prefix (unique match across
    /// recorded layers), then exact 64-char hex. an ambiguous prefix or a
    /// miss on all three is `UnresolvedRef`.
    pub fn resolve(&self, r: &str) -> Result<Hash> {
        if r.is_empty() {
            return Err(Error::UnresolvedRef(r.to_string()));
        }

        if let Some(hash) = self.doc.tags.get(r) {
            return Ok(*hash);
        }

        let mut found: Option<Hash> = None;
        for layer in &self.doc.layers {
            if layer.hash.matches_prefix(r) {
                match found {
                    None => found = Some(layer.hash),
                    Some(prev) if prev == layer.hash => {}
                    Some(_) => {
                        return Err(Error::UnresolvedRef(format!("ambiguous prefix: {}", r)))
                    }
                }
            }
        }
        if let Some(hash) = found {
            return Ok(hash);
        }

        // full hex still resolves even if the layer is not recorded here;
        // dead entries remain addressable by hash
        if r.len() == 64 && r.chars().all(|c| c.is_ascii_hexdigit()) {
            return Hash::from_hex(r);
        }

        Err(Error::UnresolvedRef(r.to_string()))
    }

    /// rewrite index.json atomically
    fn save(&self) -> Result<()> {
        let content = serde_json::to_string_pretty(&self.doc)
            .map_err(|e| Error::CorruptIndex(e.to_string()))?;

        let tmp_path = self.tmp_dir.join(uuid::Uuid::new_v4().to_string());
        {
            let mut tmp_file = File::create(&tmp_path).with_path(&tmp_path)?;
            tmp_file.write_all(content.as_bytes()).with_path(&tmp_path)?;
            tmp_file.write_all(b"\n").with_path(&tmp_path)?;
            tmp_file.sync_all().with_path(&tmp_path)?;
        }
        fs::rename(&tmp_path, &self.path).with_path(&self.path)?;

        debug!(layers = self.doc.layers.len(), "index saved");
        Ok(())
    }
}
