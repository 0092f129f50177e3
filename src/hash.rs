use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::Error;

/// number of hex characters in the short display form
pub const SHORT_LEN: usize = 12;

/// SHA-256 hash used for content addressing
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash([u8; 32]);

impl Hash {
    /// create from raw bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// parse from hex string
    pub fn from_hex(s: &str) -> crate::Result<Self> {
        let bytes = hex::decode(s).map_err(|_| Error::InvalidHashHex(s.to_string()))?;
        if bytes.len() != 32 {
            return Err(Error::InvalidHashHex(s.to_string()));
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// get raw bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// convert to lowercase hex string (64 chars)
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// short display form (first 12 hex chars)
    pub fn short(&self) -> String {
        self.to_hex()[..SHORT_LEN].to_string()
    }

    /// does the hex form start with the given prefix
    pub fn matches_prefix(&self, prefix: &str) -> bool {
        self.to_hex().starts_with(prefix)
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.short())
    }
}

impl Serialize for Hash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// hash a byte slice
pub fn sha256(data: &[u8]) -> Hash {
    Hash(Sha256::digest(data).into())
}

/// hash the concatenation of two byte slices without copying
pub fn sha256_concat(a: &[u8], b: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(a);
    hasher.update(b);
    Hash(hasher.finalize().into())
}

/// canonical key material for cache lookups
///
/// field order is the canonical JSON key order; serde_json emits no
/// whitespace, so the bytes are stable across runs and platforms.
#[derive(Serialize)]
struct KeyMaterial<'a> {
    instruction: &'a str,
    parent: Option<String>,
}

/// compute the cache key for an (instruction, parent) pair
///
/// K = SHA-256(canonical-json({instruction, parent})), parent null for a
/// root lookup. never depends on system time.
pub fn cache_key(instruction: &str, parent: Option<&Hash>) -> Hash {
    let material = KeyMaterial {
        instruction,
        parent: parent.map(Hash::to_hex),
    };
    // serialization of a two-field struct cannot fail
    let bytes = serde_json::to_vec(&material).expect("cache key material serializes");
    sha256(&bytes)
}
