//! Sleep hooks: every executable file in the pre or post directory, run in
//! lexical order with the phase and the sleep verb as arguments.

use crate::command::CommandRunner;
use log::{debug, warn};
use luksuspend_core::config::LuksuspendConfig;
use luksuspend_core::device::SuspendMode;
use luksuspend_core::error::{LuksError, LuksResult};
use luksuspend_core::provider::{HookPhase, HookRunner};
use std::fs;
use std::io::ErrorKind;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct HookDirs {
    pre_dir: PathBuf,
    post_dir: PathBuf,
    timeout: Duration,
}

impl HookDirs {
    pub fn new(
        pre_dir: impl Into<PathBuf>,
        post_dir: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Self {
        Self {
            pre_dir: pre_dir.into(),
            post_dir: post_dir.into(),
            timeout,
        }
    }

    pub fn from_config(config: &LuksuspendConfig) -> Self {
        Self::new(
            &config.hooks.pre_dir,
            &config.hooks.post_dir,
            config.command_timeout(),
        )
    }

    fn dir(&self, phase: HookPhase) -> &Path {
        match phase {
            HookPhase::Pre => &self.pre_dir,
            HookPhase::Post => &self.post_dir,
        }
    }

    /// Executable regular files in `dir`, sorted by name. A missing
    /// directory has no hooks.
    fn scripts(dir: &Path) -> LuksResult<Vec<PathBuf>> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut scripts = Vec::new();
        for entry in entries {
            let entry = entry?;
            let meta = fs::metadata(entry.path())?;
            if meta.is_file() && meta.permissions().mode() & 0o111 != 0 {
                scripts.push(entry.path());
            } else {
                debug!("skipping non-executable hook {}", entry.path().display());
            }
        }
        scripts.sort();
        Ok(scripts)
    }
}

impl HookRunner for HookDirs {
    fn run(&self, phase: HookPhase, mode: SuspendMode) -> LuksResult<()> {
        let args = [phase.as_str(), mode.verb()];
        let mut first_failure: Option<LuksError> = None;

        for script in Self::scripts(self.dir(phase))? {
            debug!("running {} hook {}", phase.as_str(), script.display());
            let runner = CommandRunner::new(script.clone(), self.timeout);
            if let Err(err) = runner.run_checked(&args) {
                warn!("hook {} failed: {err}", script.display());
                first_failure.get_or_insert(err);
            }
        }

        match first_failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
