use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::error::{Error, IoResultExt, Result};
use crate::hash::{sha256, sha256_concat, Hash};
use crate::runner::{Runner, ShellRunner};
use crate::snapshot;
use crate::store::{BlobStore, Index, StateDir};
use crate::types::{DiffReport, Layer, LayerInfo, RunOutcome, WorkState};

/// orchestrates instruction execution against the layered store
///
/// owns nothing persistent itself: the blob store holds layer archives, the
/// index holds the catalog, and the workdir belongs to whatever the last
/// materialized chain put there. mutating operations hold the store lock;
/// read-only ones do not.
pub struct Engine {
    config: EngineConfig,
    state: StateDir,
    blobs: BlobStore,
    index: Index,
    runner: Box<dyn Runner>,
}

impl Engine {
    /// open (or initialize) an engine over the configured directories
    pub fn new(config: EngineConfig) -> Result<Self> {
        Self::with_runner(config, Box::new(ShellRunner))
    }

    /// open with a custom instruction runner
    pub fn with_runner(config: EngineConfig, runner: Box<dyn Runner>) -> Result<Self> {
        let config = config.absolute()?;
        let state = StateDir::new(&config.state_dir);
        state.ensure()?;
        fs::create_dir_all(&config.workdir).with_path(&config.workdir)?;

        let blobs = BlobStore::new(state.blobs_path(), state.tmp_path());
        let index = Index::open(state.index_path(), state.tmp_path())?;

        Ok(Self {
            config,
            state,
            blobs,
            index,
            runner,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn workdir(&self) -> &Path {
        &self.config.workdir
    }

    /// current head hash
    pub fn head(&self) -> Option<Hash> {
        self.index.head()
    }

    /// execute an instruction, capturing its effect as a layer
    ///
    /// a cache hit replays the stored layer into the workdir without
    /// spawning a subprocess and without moving head. a no-op instruction
    /// records nothing. a failing instruction propagates and records
    /// nothing, leaving the workdir as the subprocess left it.
    pub fn run(&mut self, instruction: &str) -> Result<RunOutcome> {
        let _lock = self.state.lock()?;
        self.run_locked(instruction)
    }

    fn run_locked(&mut self, instruction: &str) -> Result<RunOutcome> {
        let parent = self.index.head();

        if let Some(hit) = self.index.find_by_cache_key(instruction, parent.as_ref()) {
            let hash = hit.hash;
            info!(hash = %hash.short(), %instruction, "cache hit");
            snapshot::restore(&self.blobs, &self.config.workdir, &hash)?;
            return Ok(RunOutcome::Cached { hash });
        }

        debug!(%instruction, parent = ?parent.map(|h| h.short()), "cache miss");
        self.runner.exec(instruction, &self.config.workdir)?;

        let delta = match parent {
            Some(_) => {
                let base = self.layer_state_of(self.ancestry_hashes())?;
                snapshot::diff(&self.config.workdir, &base)?
            }
            None => snapshot::capture(&self.config.workdir)?,
        };

        match delta {
            None => {
                debug!(%instruction, "no filesystem effect, head unchanged");
                Ok(RunOutcome::Empty { head: parent })
            }
            Some(delta) => {
                self.blobs.put(&delta.hash, &delta.archive)?;
                self.index
                    .append(Layer::new(delta.hash, instruction, parent))?;
                info!(hash = %delta.hash.short(), %instruction, "layer created");
                Ok(RunOutcome::Created { hash: delta.hash })
            }
        }
    }

    /// execute an instruction without touching the store
    ///
    /// for queries that must not create layers.
    pub fn exec(&self, instruction: &str) -> Result<()> {
        self.runner.exec(instruction, &self.config.workdir)
    }

    /// run each instruction in order, stopping at the first failure
    pub fn batch(&mut self, instructions: &[String]) -> Result<Vec<RunOutcome>> {
        let _lock = self.state.lock()?;
        let mut outcomes = Vec::with_capacity(instructions.len());
        for instruction in instructions {
            outcomes.push(self.run_locked(instruction)?);
        }
        Ok(outcomes)
    }

    /// reconstruct the workdir from the current chain, returning its length
    pub fn rebuild(&self) -> Result<usize> {
        let _lock = self.state.lock()?;
        let chain = self.ancestry_hashes();
        snapshot::rebuild(&self.blobs, &self.config.workdir, &chain)?;
        info!(layers = chain.len(), "workdir rebuilt");
        Ok(chain.len())
    }

    /// delete the state directory and start over with an empty store
    pub fn reset(&mut self) -> Result<()> {
        let _lock = self.state.lock()?;

        remove_dir_if_present(&self.config.state_dir)?;
        remove_dir_if_present(&self.config.workdir)?;
        self.state.ensure()?;
        fs::create_dir_all(&self.config.workdir).with_path(&self.config.workdir)?;
        self.index = Index::open(self.state.index_path(), self.state.tmp_path())?;

        info!("store reset");
        Ok(())
    }

    /// materialize an ancestor layer's state and move head to it
    ///
    /// the target must be on the current chain.
    pub fn checkout(&mut self, r: &str) -> Result<Hash> {
        let _lock = self.state.lock()?;

        let hash = self.index.resolve(r)?;
        let prefix: Vec<Hash> = {
            let chain = self.index.ancestry();
            let idx = chain
                .iter()
                .position(|l| l.hash == hash)
                .ok_or_else(|| Error::LayerNotOnChain(hash.to_hex()))?;
            chain[..=idx].iter().map(|l| l.hash).collect()
        };

        snapshot::rebuild(&self.blobs, &self.config.workdir, &prefix)?;
        self.index.set_head(hash)?;

        info!(hash = %hash.short(), layers = prefix.len(), "checked out");
        Ok(hash)
    }

    /// uncommitted workdir changes relative to head
    pub fn status(&self) -> Result<DiffReport> {
        let current = snapshot::state(&self.config.workdir)?;
        let base = self.layer_state_of(self.ancestry_hashes())?;
        Ok(snapshot::compare(&base, &current))
    }

    /// differences between two layer states
    ///
    /// `from` defaults to the empty state, `to` to head.
    pub fn diff(&self, from: Option<&str>, to: Option<&str>) -> Result<DiffReport> {
        let from_state = match from {
            Some(r) => self.resolved_layer_state(r)?,
            None => WorkState::new(),
        };
        let to_state = match to {
            Some(r) => self.resolved_layer_state(r)?,
            None => self.layer_state_of(self.ancestry_hashes())?,
        };
        Ok(snapshot::compare(&from_state, &to_state))
    }

    /// create or replace a tag; `r` defaults to head
    pub fn tag(&mut self, name: &str, r: Option<&str>) -> Result<Hash> {
        let _lock = self.state.lock()?;

        let hash = match r {
            Some(r) => self.index.resolve(r)?,
            None => self.index.head().ok_or(Error::NothingToTag)?,
        };
        self.index.set_tag(name, hash)?;
        Ok(hash)
    }

    /// remove a tag
    pub fn untag(&mut self, name: &str) -> Result<()> {
        let _lock = self.state.lock()?;
        self.index.remove_tag(name)
    }

    /// tag mapping
    pub fn tags(&self) -> &BTreeMap<String, Hash> {
        self.index.tags()
    }

    /// one layer's metadata plus its stored blob size
    pub fn inspect(&self, r: &str) -> Result<LayerInfo> {
        let hash = self.index.resolve(r)?;
        let layer = self
            .index
            .get(&hash)
            .ok_or_else(|| Error::UnresolvedRef(r.to_string()))?
            .clone();
        let size = self.blobs.size(&hash)?;
        Ok(LayerInfo { layer, size })
    }

    /// the chain from root to head
    pub fn history(&self) -> Vec<Layer> {
        self.index.ancestry().into_iter().cloned().collect()
    }

    /// integrity check over every recorded layer and tag
    pub fn verify(&self) -> Result<VerifyReport> {
        let mut report = VerifyReport::default();

        for layer in self.index.layers() {
            report.layers_checked += 1;

            if let Some(parent) = &layer.parent {
                if self.index.get(parent).is_none() {
                    report.dangling_parents.push(layer.hash);
                }
            }

            if !self.blobs.has(&layer.hash) {
                report.missing_blobs.push(layer.hash);
                continue;
            }
            let bytes = self.blobs.get(&layer.hash)?;

            match layer.parent {
                // root identity is the plain archive hash
                None => {
                    if sha256(&bytes) != layer.hash {
                        report.corrupt_blobs.push(layer.hash);
                    }
                }
                // non-root identity folds in the deleted manifest, which is
                // not persisted; only the empty-manifest case is checkable
                Some(_) => {
                    if sha256_concat(&bytes, b"[]") != layer.hash {
                        report.unverified.push(layer.hash);
                    }
                }
            }
        }

        for (name, hash) in self.index.tags() {
            if self.index.get(hash).is_none() {
                report.broken_tags.push(name.clone());
            }
        }

        Ok(report)
    }

    fn ancestry_hashes(&self) -> Vec<Hash> {
        self.index.ancestry().iter().map(|l| l.hash).collect()
    }

    fn resolved_layer_state(&self, r: &str) -> Result<WorkState> {
        let hash = self.index.resolve(r)?;
        let chain: Vec<Hash> = self.index.chain_to(&hash).iter().map(|l| l.hash).collect();
        self.layer_state_of(chain)
    }

    fn layer_state_of(&self, chain: Vec<Hash>) -> Result<WorkState> {
        snapshot::state_of_chain(&self.blobs, &chain)
    }
}

/// integrity report produced by `Engine::verify`
#[derive(Debug, Default)]
pub struct VerifyReport {
    pub layers_checked: usize,
    /// layers whose blob file is absent
    pub missing_blobs: Vec<Hash>,
    /// layers whose recomputed identity does not match
    pub corrupt_blobs: Vec<Hash>,
    /// non-root layers whose identity cannot be recomputed because the
    /// deleted manifest is folded into the hash but not stored
    pub unverified: Vec<Hash>,
    /// layers referencing a parent missing from the catalog
    pub dangling_parents: Vec<Hash>,
    /// tags pointing at unrecorded layers
    pub broken_tags: Vec<String>,
}

impl VerifyReport {
    pub fn is_ok(&self) -> bool {
        self.missing_blobs.is_empty()
            && self.corrupt_blobs.is_empty()
            && self.dangling_parents.is_empty()
            && self.broken_tags.is_empty()
    }
}

fn remove_dir_if_present(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}
