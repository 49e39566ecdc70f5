//! Sleep, power-off and freeze-timeout control through sysfs and procfs.

use log::{debug, error, warn};
use luksuspend_core::config::LuksuspendConfig;
use luksuspend_core::device::SuspendMode;
use luksuspend_core::error::LuksResult;
use luksuspend_core::provider::PowerController;
use luksuspend_core::retry::with_retries;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

pub const SYSRQ_TRIGGER: &str = "/proc/sysrq-trigger";

#[derive(Debug, Clone)]
pub struct SysfsPower {
    sysfs_root: PathBuf,
    sysrq_trigger: PathBuf,
    retries: u32,
    retry_delay: Duration,
}

impl SysfsPower {
    pub fn new(
        sysfs_root: impl Into<PathBuf>,
        sysrq_trigger: impl Into<PathBuf>,
        retries: u32,
        retry_delay: Duration,
    ) -> Self {
        Self {
            sysfs_root: sysfs_root.into(),
            sysrq_trigger: sysrq_trigger.into(),
            retries,
            retry_delay,
        }
    }

    pub fn from_config(config: &LuksuspendConfig) -> Self {
        Self::new(
            &config.registry.sysfs_root,
            SYSRQ_TRIGGER,
            config.power.retries,
            config.power_retry_delay(),
        )
    }

    fn attr(&self, name: &str) -> PathBuf {
        self.sysfs_root.join("power").join(name)
    }

    /// Ask the kernel for an immediate power off. Returns if the kernel did not.
    fn trigger_poweroff(&self) -> LuksResult<()> {
        write_attr(&self.sysrq_trigger, b"o")
    }

    fn poweroff_attempt(&self) {
        if let Err(err) = self.trigger_poweroff() {
            error!("sysrq power off failed: {err}");
        }
        thread::sleep(self.retry_delay);
    }

    fn enter(&self, state: &[u8]) -> LuksResult<()> {
        let path = self.attr("state");
        with_retries("write power state", self.retries, self.retry_delay, || {
            write_attr(&path, state)
        })
    }
}

impl PowerController for SysfsPower {
    fn suspend(&self, mode: SuspendMode) -> LuksResult<()> {
        match mode {
            SuspendMode::None => {
                warn!("sleep disabled, continuing without suspending");
                Ok(())
            }
            SuspendMode::Ram => self.enter(b"mem"),
            SuspendMode::Disk => self.enter(b"disk"),
            SuspendMode::Both => {
                write_attr(&self.attr("disk"), b"suspend")?;
                self.enter(b"disk")
            }
        }
    }

    /// Hammer the sysrq trigger until the kernel takes the machine down.
    /// Write failures are logged and retried.
    fn power_off(&self) -> ! {
        warn!("powering off");
        loop {
            self.poweroff_attempt();
        }
    }

    fn set_freeze_timeout(&self, value: &[u8]) -> LuksResult<Vec<u8>> {
        let path = self.attr("pm_freeze_timeout");
        let previous = fs::read(&path)?;
        debug!(
            "pm_freeze_timeout: {} -> {}",
            String::from_utf8_lossy(&previous).trim(),
            String::from_utf8_lossy(value)
        );
        write_attr(&path, value)?;
        Ok(previous)
    }
}

/// Single write to an existing sysfs/procfs attribute.
fn write_attr(path: &Path, value: &[u8]) -> LuksResult<()> {
    let mut file = OpenOptions::new().write(true).truncate(true).open(path)?;
    file.write_all(value)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use luksuspend_core::error::LuksError;
    use tempfile::{tempdir, TempDir};

    fn fake_sysfs() -> (TempDir, SysfsPower) {
        let dir = tempdir().unwrap();
        let power = dir.path().join("sys/power");
        fs::create_dir_all(&power).unwrap();
        fs::write(power.join("state"), "").unwrap();
        fs::write(power.join("disk"), "[platform] shutdown reboot suspend").unwrap();
        fs::write(power.join("pm_freeze_timeout"), "20000\n").unwrap();
        fs::write(dir.path().join("sysrq-trigger"), "").unwrap();
        let ctl = SysfsPower::new(
            dir.path().join("sys"),
            dir.path().join("sysrq-trigger"),
            5,
            Duration::ZERO,
        );
        (dir, ctl)
    }

    fn read(dir: &TempDir, rel: &str) -> String {
        fs::read_to_string(dir.path().join(rel)).unwrap()
    }

    #[test]
    fn suspend_writes_the_state_for_each_mode() {
        let (dir, ctl) = fake_sysfs();

        ctl.suspend(SuspendMode::Ram).unwrap();
        assert_eq!(read(&dir, "sys/power/state"), "mem");

        ctl.suspend(SuspendMode::Disk).unwrap();
        assert_eq!(read(&dir, "sys/power/state"), "disk");

        ctl.suspend(SuspendMode::Both).unwrap();
        assert_eq!(read(&dir, "sys/power/disk"), "suspend");
        assert_eq!(read(&dir, "sys/power/state"), "disk");
    }

    #[test]
    fn dry_run_touches_nothing() {
        let (dir, ctl) = fake_sysfs();
        ctl.suspend(SuspendMode::None).unwrap();
        assert_eq!(read(&dir, "sys/power/state"), "");
    }

    #[test]
    fn suspend_gives_up_after_retries() {
        let dir = tempdir().unwrap();
        let ctl = SysfsPower::new(dir.path(), dir.path().join("sysrq"), 5, Duration::ZERO);
        match ctl.suspend(SuspendMode::Ram).unwrap_err() {
            LuksError::RetryExhausted { attempts, .. } => assert_eq!(attempts, 5),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn freeze_timeout_returns_exact_previous_bytes() {
        let (dir, ctl) = fake_sysfs();
        let previous = ctl.set_freeze_timeout(b"1000").unwrap();
        assert_eq!(previous, b"20000\n".to_vec());
        assert_eq!(read(&dir, "sys/power/pm_freeze_timeout"), "1000");

        ctl.set_freeze_timeout(&previous).unwrap();
        assert_eq!(read(&dir, "sys/power/pm_freeze_timeout"), "20000\n");
    }

    #[test]
    fn poweroff_trigger_writes_o() {
        let (dir, ctl) = fake_sysfs();
        ctl.trigger_poweroff().unwrap();
        assert_eq!(read(&dir, "sysrq-trigger"), "o");
    }

    #[test]
    fn power_off_keeps_writing_through_failures() {
        let dir = tempdir().unwrap();
        let trigger = dir.path().join("sysrq-trigger");
        let ctl = SysfsPower::new(dir.path(), &trigger, 1, Duration::from_millis(5));

        let spinning = ctl.clone();
        let handle = thread::spawn(move || spinning.power_off());

        thread::sleep(Duration::from_millis(50));
        assert!(!handle.is_finished());

        // the trigger appearing late still gets the request
        fs::write(&trigger, "").unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while fs::read_to_string(&trigger).unwrap() != "o" {
            assert!(std::time::Instant::now() < deadline, "sysrq never written");
            thread::sleep(Duration::from_millis(5));
        }
        assert!(!handle.is_finished());
    }
}
