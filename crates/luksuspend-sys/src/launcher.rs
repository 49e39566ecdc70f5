//! Runs the inner binary chrooted into the unpacked initramfs.

use crate::channel::{HandoffChannel, HandoffSender, HANDOFF_FD};
use log::debug;
use luksuspend_core::config::LuksuspendConfig;
use luksuspend_core::error::{LuksError, LuksResult};
use luksuspend_core::provider::ContextLauncher;
use std::ffi::CString;
use std::fs;
use std::io;
use std::os::fd::AsRawFd;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus};

#[derive(Debug, Clone)]
pub struct ChrootLauncher {
    root: PathBuf,
    /// Inner binary, as seen from inside `root`.
    binary: String,
    args: Vec<String>,
}

impl ChrootLauncher {
    pub fn new(root: impl Into<PathBuf>, binary: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            binary: binary.into(),
            args: Vec::new(),
        }
    }

    pub fn from_config(config: &LuksuspendConfig) -> Self {
        Self::new(config.initramfs_dir(), config.initramfs.binary.clone())
    }

    /// Flags forwarded to the inner binary.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Host-side location of the inner binary.
    pub fn binary_on_host(&self) -> PathBuf {
        self.root.join(self.binary.trim_start_matches('/'))
    }
}

impl ContextLauncher for ChrootLauncher {
    fn preflight(&self) -> LuksResult<()> {
        let path = self.binary_on_host();
        let meta = fs::metadata(&path).map_err(|err| LuksError::Unreadable {
            path: path.clone(),
            reason: err.to_string(),
        })?;
        if !meta.is_file() || meta.permissions().mode() & 0o111 == 0 {
            return Err(LuksError::InvalidConfig(format!(
                "{} is not an executable file",
                path.display()
            )));
        }
        Ok(())
    }

    fn launch(&self, payload: &[u8]) -> LuksResult<()> {
        let root = chroot_path(&self.root)?;
        let (sender, receiver) = HandoffChannel::open()?;
        let read_fd = receiver.as_raw_fd();

        let mut command = Command::new(&self.binary);
        command.args(&self.args);
        // SAFETY: only async-signal-safe libc calls between fork and exec.
        unsafe {
            command.pre_exec(move || {
                if libc::chroot(root.as_ptr()) != 0 {
                    return Err(io::Error::last_os_error());
                }
                if libc::chdir(b"/\0".as_ptr().cast()) != 0 {
                    return Err(io::Error::last_os_error());
                }
                if read_fd == HANDOFF_FD {
                    // already in place, just let it survive exec
                    let flags = libc::fcntl(read_fd, libc::F_GETFD);
                    if flags < 0 {
                        return Err(io::Error::last_os_error());
                    }
                    if libc::fcntl(read_fd, libc::F_SETFD, flags & !libc::FD_CLOEXEC) < 0 {
                        return Err(io::Error::last_os_error());
                    }
                } else if libc::dup2(read_fd, HANDOFF_FD) < 0 {
                    return Err(io::Error::last_os_error());
                }
                Ok(())
            });
        }

        debug!(
            "chroot {} {} {}",
            self.root.display(),
            self.binary,
            self.args.join(" ")
        );
        let child = command.spawn()?;
        drop(receiver);

        let status = deliver(child, sender, payload)?;
        if !status.success() {
            return Err(LuksError::ExternalCommand {
                command: format!("chroot {} {}", self.root.display(), self.binary),
                status: status.code().unwrap_or(-1),
                diagnostic: "initramfs suspend program failed".into(),
            });
        }
        Ok(())
    }
}

/// Write `payload` to a running child and wait for it. The child is reaped
/// before a send error is reported, so one that exits early is not left behind.
fn deliver(mut child: Child, sender: HandoffSender, payload: &[u8]) -> LuksResult<ExitStatus> {
    let sent = sender.send_payload(payload);
    let status = child.wait()?;
    sent?;
    Ok(status)
}

fn chroot_path(root: &Path) -> LuksResult<CString> {
    CString::new(root.as_os_str().as_bytes()).map_err(|_| {
        LuksError::InvalidConfig(format!("initramfs path {} contains NUL", root.display()))
    })
}
