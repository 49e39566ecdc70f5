//! `cryptsetup luksSuspend` / `luksResume` wrapper.

use crate::command::CommandRunner;
use log::debug;
use luksuspend_core::config::LuksuspendConfig;
use luksuspend_core::device::CryptDevice;
use luksuspend_core::error::{LuksError, LuksResult};
use luksuspend_core::provider::CryptController;

pub const DEFAULT_CRYPTSETUP_PATHS: &[&str] = &[
    "/usr/bin/cryptsetup",
    "/sbin/cryptsetup",
    "/usr/sbin/cryptsetup",
    "/bin/cryptsetup",
];

#[derive(Debug, Clone)]
pub struct Cryptsetup {
    runner: CommandRunner,
}

impl Cryptsetup {
    pub fn new(runner: CommandRunner) -> Self {
        Self { runner }
    }

    pub fn from_config(config: &LuksuspendConfig) -> LuksResult<Self> {
        let runner = CommandRunner::locate(
            "cryptsetup",
            config.commands.cryptsetup_path.as_deref(),
            DEFAULT_CRYPTSETUP_PATHS,
            config.command_timeout(),
        )?;
        Ok(Self::new(runner))
    }

    fn resume_args(device: &CryptDevice) -> Vec<String> {
        let mut args = vec!["luksResume".to_string(), device.name.clone()];
        if let Some(keyfile) = &device.keyfile {
            args.push("--key-file".into());
            args.push(keyfile.path.to_string_lossy().into_owned());
            if let Some(offset) = keyfile.offset {
                args.push("--keyfile-offset".into());
                args.push(offset.to_string());
            }
        }
        args
    }
}

impl CryptController for Cryptsetup {
    fn suspend(&self, name: &str) -> LuksResult<()> {
        self.runner.run_checked(&["luksSuspend", name]).map(|_| ())
    }

    fn resume(&self, device: &CryptDevice) -> LuksResult<()> {
        let args = Self::resume_args(device);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();

        if device.keyfile.is_some() {
            debug!("resuming {} with key file", device.name);
            let out = self.runner.run(&args)?;
            if out.status != 0 {
                return Err(LuksError::Unlock {
                    device: device.name.clone(),
                    reason: out.diagnostic().to_string(),
                });
            }
            return Ok(());
        }

        // passphrase prompt goes straight to the terminal
        match self.runner.run_interactive(&args)? {
            0 => Ok(()),
            code => Err(LuksError::Unlock {
                device: device.name.clone(),
                reason: format!("cryptsetup exited with code {code}"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fake_binary, test_lock};
    use luksuspend_core::device::Keyfile;
    use std::fs;
    use std::time::Duration;
    use tempfile::tempdir;

    const FAKE_CRYPTSETUP: &str = r#"echo "$*" >> "$(dirname "$0")/calls"
[ "$1" = luksResume ] && [ "$2" = bad ] && { echo "No key available with this passphrase." >&2; exit 2; }
exit 0
"#;

    #[test]
    fn resume_passes_keyfile_and_offset() {
        let device = CryptDevice::new("data")
            .with_keyfile(Keyfile::new("/etc/keys/data.key").with_offset(4096));
        assert_eq!(
            Cryptsetup::resume_args(&device),
            vec![
                "luksResume",
                "data",
                "--key-file",
                "/etc/keys/data.key",
                "--keyfile-offset",
                "4096"
            ]
        );
        assert_eq!(
            Cryptsetup::resume_args(&CryptDevice::root("root")),
            vec!["luksResume", "root"]
        );
    }

    #[test]
    fn keyfile_resume_and_suspend_hit_cryptsetup() {
        let _guard = test_lock();
        let dir = tempdir().unwrap();
        let bin = fake_binary(dir.path(), "cryptsetup", FAKE_CRYPTSETUP);
        let crypt = Cryptsetup::new(CommandRunner::new(bin, Duration::from_secs(5)));

        crypt.suspend("data").unwrap();
        crypt
            .resume(&CryptDevice::new("data").with_keyfile(Keyfile::new("/k")))
            .unwrap();

        let calls = fs::read_to_string(dir.path().join("calls")).unwrap();
        assert_eq!(calls, "luksSuspend data\nluksResume data --key-file /k\n");
    }

    #[test]
    fn failed_keyfile_resume_is_an_unlock_error() {
        let _guard = test_lock();
        let dir = tempdir().unwrap();
        let bin = fake_binary(dir.path(), "cryptsetup", FAKE_CRYPTSETUP);
        let crypt = Cryptsetup::new(CommandRunner::new(bin, Duration::from_secs(5)));

        let err = crypt
            .resume(&CryptDevice::new("bad").with_keyfile(Keyfile::new("/k")))
            .unwrap_err();
        match err {
            LuksError::Unlock { device, reason } => {
                assert_eq!(device, "bad");
                assert!(reason.contains("No key available"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
