//! Host-backed implementations of the collaborator traits in
//! `luksuspend_core::provider`. Everything here touches the real machine:
//! sysfs writes, `systemctl`, `cryptsetup`, `mount`, the terminal and the
//! chroot into the initramfs.

mod channel;
mod command;
mod cryptsetup;
mod escalation;
mod filesystems;
mod hooks;
mod launcher;
mod power;
mod services;
mod terminal;
mod udev;

pub use channel::{HandoffChannel, HandoffReceiver, HandoffSender, HANDOFF_FD};
pub use command::{CommandRunner, Output};
pub use cryptsetup::{Cryptsetup, DEFAULT_CRYPTSETUP_PATHS};
pub use escalation::SystemEscalation;
pub use filesystems::{HostFilesystems, DEFAULT_MOUNT_PATHS, DEFAULT_UMOUNT_PATHS, PROC_MOUNTS};
pub use hooks::HookDirs;
pub use launcher::ChrootLauncher;
pub use power::{SysfsPower, SYSRQ_TRIGGER};
pub use services::{SystemdServices, DEFAULT_SYSTEMCTL_PATHS};
pub use terminal::TtyTerminal;
pub use udev::{Udev, DEFAULT_UDEVADM_PATHS, DEFAULT_UDEVD_PATHS};
