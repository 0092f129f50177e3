//! statekit - persistent, content-addressed compute
//!
//! shell instructions execute against a working directory and each
//! instruction's effect on the filesystem is captured as an immutable,
//! hash-identified **layer**. a linear chain of layers is the history;
//! re-issuing an instruction from the same parent state is a pure cache
//! hit: no subprocess runs, the stored effect is replayed.
//!
//! # Core concepts
//!
//! - **Layer**: what one instruction changed, identified by the SHA-256 of
//!   its change archive (plus the deleted-file manifest for non-root layers)
//! - **Blob**: the raw uncompressed tar of a layer's changed files
//! - **Index**: the catalog of layers, the head pointer, and tags
//! - **Cache key**: SHA-256 of `{"instruction": ..., "parent": ...}` in
//!   canonical JSON; the lookup key for memoized execution
//!
//! # Example usage
//!
//! ```no_run
//! use statekit::{Engine, EngineConfig};
//!
//! let mut engine = Engine::new(EngineConfig::new(".statekit")).unwrap();
//!
//! // execute and capture as a layer
//! let outcome = engine.run("echo hello > greeting.txt").unwrap();
//!
//! // same instruction from the same parent: replayed from the store
//! println!("{:?}", outcome.hash());
//! ```

mod config;
mod engine;
mod error;
mod hash;
mod runner;
mod snapshot;
mod store;
mod types;

pub use config::{EngineConfig, DEFAULT_STATE_DIR};
pub use engine::{Engine, VerifyReport};
pub use error::{Error, IoResultExt, Result};
pub use hash::{cache_key, sha256, Hash, SHORT_LEN};
pub use runner::{Runner, ShellRunner};
pub use snapshot::{capture, compare, diff, rebuild, restore, state, state_of_chain, Delta};
pub use store::{BlobStore, Index, StateDir, StoreLock};
pub use types::{DiffReport, Fingerprint, Layer, LayerInfo, PathState, RunOutcome, WorkState};
