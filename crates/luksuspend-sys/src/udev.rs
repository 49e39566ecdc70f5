use crate::command::CommandRunner;
use luksuspend_core::config::LuksuspendConfig;
use luksuspend_core::error::LuksResult;
use luksuspend_core::provider::DeviceEventDaemon;

pub const DEFAULT_UDEVD_PATHS: &[&str] = &[
    "/usr/lib/systemd/systemd-udevd",
    "/lib/systemd/systemd-udevd",
    "/usr/bin/systemd-udevd",
    "/sbin/udevd",
];

pub const DEFAULT_UDEVADM_PATHS: &[&str] = &["/usr/bin/udevadm", "/bin/udevadm", "/sbin/udevadm"];

/// udevd inside the initramfs, so a key on removable media can show up.
#[derive(Debug, Clone)]
pub struct Udev {
    udevd: CommandRunner,
    udevadm: CommandRunner,
}

impl Udev {
    pub fn new(udevd: CommandRunner, udevadm: CommandRunner) -> Self {
        Self { udevd, udevadm }
    }

    pub fn from_config(config: &LuksuspendConfig) -> LuksResult<Self> {
        let timeout = config.command_timeout();
        let udevd = CommandRunner::locate(
            "systemd-udevd",
            config.commands.udevd_path.as_deref(),
            DEFAULT_UDEVD_PATHS,
            timeout,
        )?;
        let udevadm = CommandRunner::locate(
            "udevadm",
            config.commands.udevadm_path.as_deref(),
            DEFAULT_UDEVADM_PATHS,
            timeout,
        )?;
        Ok(Self::new(udevd, udevadm))
    }
}

impl DeviceEventDaemon for Udev {
    fn start(&self) -> LuksResult<()> {
        self.udevd.run_checked(&["--daemon"]).map(|_| ())
    }

    fn stop(&self) -> LuksResult<()> {
        self.udevadm.run_checked(&["control", "--exit"]).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fake_binary, test_lock};
    use std::fs;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn start_and_stop_invoke_udev_tools() {
        let _guard = test_lock();
        let dir = tempdir().unwrap();
        let recorder = "echo \"$(basename \"$0\") $*\" >> \"$(dirname \"$0\")/calls\"\n";
        let timeout = Duration::from_secs(5);
        let udev = Udev::new(
            CommandRunner::new(fake_binary(dir.path(), "systemd-udevd", recorder), timeout),
            CommandRunner::new(fake_binary(dir.path(), "udevadm", recorder), timeout),
        );

        udev.start().unwrap();
        udev.stop().unwrap();

        let calls = fs::read_to_string(dir.path().join("calls")).unwrap();
        assert_eq!(calls, "systemd-udevd --daemon\nudevadm control --exit\n");
    }
}
