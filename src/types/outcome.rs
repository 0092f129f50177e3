use crate::hash::Hash;
use crate::types::Layer;

/// result of `Engine::run`
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    /// a new layer was recorded and head advanced to it
    Created { hash: Hash },
    /// a cached layer was replayed into the workdir; head is untouched
    Cached { hash: Hash },
    /// the instruction changed nothing; head is untouched
    Empty { head: Option<Hash> },
}

impl RunOutcome {
    /// the layer hash this outcome refers to, if any
    pub fn hash(&self) -> Option<Hash> {
        match self {
            RunOutcome::Created { hash } | RunOutcome::Cached { hash } => Some(*hash),
            RunOutcome::Empty { head } => *head,
        }
    }

    pub fn is_cached(&self) -> bool {
        matches!(self, RunOutcome::Cached { .. })
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, RunOutcome::Empty { .. })
    }
}

/// classified differences between two filesystem states
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DiffReport {
    /// paths present only in the newer state
    pub added: Vec<String>,
    /// paths present in both with differing fingerprints
    pub modified: Vec<String>,
    /// paths present only in the base state
    pub deleted: Vec<String>,
}

impl DiffReport {
    pub fn is_clean(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }
}

/// one layer's metadata plus its stored blob size
#[derive(Clone, Debug)]
pub struct LayerInfo {
    pub layer: Layer,
    /// byte length of the stored archive
    pub size: u64,
}
