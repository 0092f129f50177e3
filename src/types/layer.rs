use serde::{Deserialize, Serialize};

use crate::hash::Hash;

/// one immutable record of what a single instruction changed in the workdir
///
/// the hash identifies the layer's archive payload; for non-root layers the
/// deleted-file manifest is folded into the hash as well.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layer {
    /// SHA-256 identity of the layer payload
    pub hash: Hash,
    /// the shell instruction that produced this layer
    pub instruction: String,
    /// preceding layer, absent for the root layer
    pub parent: Option<Hash>,
    /// creation instant, milliseconds since epoch
    pub time: i64,
}

impl Layer {
    /// create a layer record stamped with the current time
    pub fn new(hash: Hash, instruction: impl Into<String>, parent: Option<Hash>) -> Self {
        Self {
            hash,
            instruction: instruction.into(),
            parent,
            time: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_millis() as i64)
                .unwrap_or(0),
        }
    }

    /// is this the first layer in a chain
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}
