use crate::power::SysfsPower;
use log::{error, warn};
use luksuspend_core::error::LuksError;
use luksuspend_core::policy::Escalation;
use luksuspend_core::provider::PowerController;
use std::path::PathBuf;
use std::process::Command;

/// Exit status of the recovery shell that lets the transaction carry on.
const PROCEED_STATUS: i32 = 42;

const SHELL_PROMPT: &str = "[\\w \\u\\$] ";

/// Recovery shell on the terminal, power off through sysrq.
#[derive(Debug, Clone)]
pub struct SystemEscalation {
    shell: PathBuf,
    power: SysfsPower,
}

impl SystemEscalation {
    pub fn new(power: SysfsPower) -> Self {
        Self {
            shell: PathBuf::from("/bin/sh"),
            power,
        }
    }

    pub fn with_shell(mut self, shell: impl Into<PathBuf>) -> Self {
        self.shell = shell.into();
        self
    }
}

impl Escalation for SystemEscalation {
    fn recovery_shell(&self, step: &str, err: &LuksError) -> bool {
        warn!("==========================================================");
        warn!("  DEBUG SHELL: {step} failed: {err}");
        warn!("  `exit {PROCEED_STATUS}` to resume, any other exit aborts");
        warn!("==========================================================");

        match Command::new(&self.shell)
            .env_clear()
            .env("PS1", SHELL_PROMPT)
            .status()
        {
            Ok(status) => status.code() == Some(PROCEED_STATUS),
            Err(spawn_err) => {
                error!("unable to start {}: {spawn_err}", self.shell.display());
                false
            }
        }
    }

    fn power_off(&self) {
        self.power.power_off()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fake_binary, test_lock};
    use std::time::Duration;
    use tempfile::tempdir;

    fn escalation(shell: PathBuf) -> SystemEscalation {
        let power = SysfsPower::new("/nonexistent", "/nonexistent", 1, Duration::ZERO);
        SystemEscalation::new(power).with_shell(shell)
    }

    #[test]
    fn shell_exit_42_means_proceed() {
        let _guard = test_lock();
        let dir = tempdir().unwrap();
        let err = LuksError::Protocol("x".into());

        let checks_prompt = "[ \"$PS1\" = '[\\w \\u\\$] ' ] && exit 42\nexit 1\n";
        let proceed = fake_binary(dir.path(), "proceed", checks_prompt);
        assert!(escalation(proceed).recovery_shell("lock", &err));

        let abort = fake_binary(dir.path(), "abort", "exit 0\n");
        assert!(!escalation(abort).recovery_shell("lock", &err));

        assert!(!escalation(dir.path().join("missing")).recovery_shell("lock", &err));
    }
}
