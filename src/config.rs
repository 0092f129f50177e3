use std::path::{Path, PathBuf};

use crate::error::{IoResultExt, Result};

/// default state directory name
pub const DEFAULT_STATE_DIR: &str = ".statekit";

/// engine configuration
///
/// both paths are resolved to absolute form at engine construction.
/// environment variables are a CLI concern; the core only sees these options.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// directory holding the blob store and index
    pub state_dir: PathBuf,
    /// directory instructions execute in and whose state is snapshotted
    pub workdir: PathBuf,
}

impl EngineConfig {
    /// config rooted at the given state directory, workdir defaulting
    /// to `<state_dir>/work`
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        let state_dir = state_dir.into();
        let workdir = state_dir.join("work");
        Self { state_dir, workdir }
    }

    /// override the workdir
    pub fn with_workdir(mut self, workdir: impl Into<PathBuf>) -> Self {
        self.workdir = workdir.into();
        self
    }

    /// resolve both paths to absolute form
    pub fn absolute(mut self) -> Result<Self> {
        self.state_dir = absolutize(&self.state_dir)?;
        self.workdir = absolutize(&self.workdir)?;
        Ok(self)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new(DEFAULT_STATE_DIR)
    }
}

fn absolutize(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().with_path(path)?;
    Ok(cwd.join(path))
}
