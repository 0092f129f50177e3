use std::path::PathBuf;

/// error type for statekit operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("command failed with exit code {code}: {instruction}")]
    CommandFailed { code: i32, instruction: String },

    #[error("unresolved ref: {0}")]
    UnresolvedRef(String),

    #[error("layer not on current chain: {0}")]
    LayerNotOnChain(String),

    #[error("nothing to tag: history is empty")]
    NothingToTag,

    #[error("store is locked by another process")]
    StoreLocked,

    #[error("corrupt index: {0}")]
    CorruptIndex(String),

    #[error("corrupt blob {hash}: {message}")]
    CorruptBlob { hash: String, message: String },

    #[error("blob not found: {0}")]
    BlobNotFound(String),

    #[error("invalid hash hex: {0}")]
    InvalidHashHex(String),

    #[error("invalid tag name: {0}")]
    InvalidTag(String),

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// helper to wrap io errors with path context
pub trait IoResultExt<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|source| Error::Io {
            path: path.into(),
            source,
        })
    }
}
