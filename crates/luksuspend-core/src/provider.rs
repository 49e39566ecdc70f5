//! Collaborator interfaces the orchestrators drive.
//!
//! Implementations are expected to be thin wrappers over the host (sysfs,
//! `systemctl`, `cryptsetup`, `mount`), so both orchestrators can be exercised
//! without touching a real machine.

use crate::device::{CryptDevice, SuspendMode};
use crate::error::LuksResult;
use crate::mounts::MountEntry;
use std::path::Path;

/// Sleep and power-state writes.
pub trait PowerController {
    /// Put the machine to sleep; returns once it has resumed. `SuspendMode::None`
    /// returns immediately.
    fn suspend(&self, mode: SuspendMode) -> LuksResult<()>;

    /// Take the machine offline. Keeps trying until the kernel complies.
    fn power_off(&self) -> !;

    /// Write a new task freeze timeout and return the previous raw value.
    fn set_freeze_timeout(&self, value: &[u8]) -> LuksResult<Vec<u8>>;
}

/// Units that must not touch the root device while it is locked.
pub trait ServiceController {
    /// Stop the running subset of `units`, appending each unit to `stopped`
    /// as soon as it is down. On error `stopped` still lists every unit
    /// that has to be started again.
    fn stop(&self, units: &[String], stopped: &mut Vec<String>) -> LuksResult<()>;

    /// Start `units`, typically the ones collected by [`stop`](Self::stop).
    fn start(&self, units: &[String]) -> LuksResult<()>;
}

/// Locking and unlocking of mapped devices.
pub trait CryptController {
    /// Purge the key of `name` and freeze its I/O.
    fn suspend(&self, name: &str) -> LuksResult<()>;

    /// Re-supply the key of `device`: through its key file when it has one,
    /// interactively otherwise.
    fn resume(&self, device: &CryptDevice) -> LuksResult<()>;
}

/// Mounted filesystem manipulation.
pub trait FilesystemController {
    /// Flush dirty pages to disk.
    fn sync(&self);

    fn mounted(&self) -> LuksResult<Vec<MountEntry>>;

    /// Remount `mountpoint` with barriers on or off.
    fn set_barrier(&self, mountpoint: &str, enabled: bool) -> LuksResult<()>;

    fn bind(&self, source: &Path, target: &Path) -> LuksResult<()>;

    fn unbind(&self, target: &Path) -> LuksResult<()>;
}

/// udev inside the initramfs, needed when the root key lives on removable media.
pub trait DeviceEventDaemon {
    fn start(&self) -> LuksResult<()>;

    fn stop(&self) -> LuksResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPhase {
    Pre,
    Post,
}

impl HookPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            HookPhase::Pre => "pre",
            HookPhase::Post => "post",
        }
    }
}

/// External sleep hook scripts.
pub trait HookRunner {
    fn run(&self, phase: HookPhase, mode: SuspendMode) -> LuksResult<()>;
}

/// Spawns the inner binary in the re-rooted initramfs.
pub trait ContextLauncher {
    /// Check that the inner binary is present before anything is changed.
    fn preflight(&self) -> LuksResult<()>;

    /// Run the inner binary with `payload` on its handoff channel and block
    /// until it exits. A non-zero exit status is an error.
    fn launch(&self, payload: &[u8]) -> LuksResult<()>;
}

/// Controlling terminal.
pub trait Terminal {
    /// Stop Ctrl-C and friends from interrupting the transaction.
    fn suppress_interrupts(&self) -> LuksResult<()>;

    /// Put the terminal back the way `suppress_interrupts` found it.
    fn restore(&self) -> LuksResult<()>;
}
