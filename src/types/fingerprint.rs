use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::hash::Hash;

/// per-path content summary used to compare filesystem states
///
/// tagged variant instead of strings so comparisons are structural: a file
/// and a symlink never compare equal even if the link target happens to
/// collide with a hex digest.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Fingerprint {
    /// regular file, SHA-256 of its contents
    File(Hash),
    /// directory
    Dir,
    /// symbolic link with its literal target
    Symlink(String),
}

/// fingerprint plus POSIX mode bits for one walked path
///
/// the mode is recorded for archive packing but excluded from change
/// detection: equality between states follows the fingerprint alone.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathState {
    pub fingerprint: Fingerprint,
    pub mode: u32,
}

impl PathState {
    pub fn new(fingerprint: Fingerprint, mode: u32) -> Self {
        Self { fingerprint, mode }
    }

    /// does this path count as changed relative to a base entry
    pub fn differs_from(&self, base: Option<&PathState>) -> bool {
        match base {
            Some(base) => self.fingerprint != base.fingerprint,
            None => true,
        }
    }
}

/// mapping from relative forward-slash path to its fingerprint record
///
/// BTreeMap keeps iteration in sorted path order, which the archive and the
/// deleted-list hash both rely on.
pub type WorkState = BTreeMap<String, PathState>;
