use std::path::Path;
use std::process::Command;

use tracing::debug;

use crate::error::{Error, IoResultExt, Result};

/// contract for executing one instruction in the workdir
///
/// the engine only cares that the instruction ran to completion and whether
/// it succeeded; output streams belong to the caller.
pub trait Runner {
    fn exec(&self, instruction: &str, workdir: &Path) -> Result<()>;
}

/// runs instructions through `sh -c`
///
/// the environment is inherited except HOME, which is pointed at the workdir
/// so tools writing under `~/` land inside the snapshot. stdout and stderr
/// pass straight through.
pub struct ShellRunner;

impl Runner for ShellRunner {
    fn exec(&self, instruction: &str, workdir: &Path) -> Result<()> {
        debug!(%instruction, workdir = %workdir.display(), "spawning shell");

        let status = Command::new("sh")
            .arg("-c")
            .arg(instruction)
            .current_dir(workdir)
            .env("HOME", workdir)
            .status()
            .with_path(workdir)?;

        if !status.success() {
            return Err(Error::CommandFailed {
                code: status.code().unwrap_or(-1),
                instruction: instruction.to_string(),
            });
        }
        Ok(())
    }
}
