//! Single-use pipe carrying the working set into the initramfs process.

use luksuspend_core::device::CryptDevice;
use luksuspend_core::error::LuksResult;
use luksuspend_core::handoff;
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

/// Descriptor the inner binary finds the payload on.
pub const HANDOFF_FD: RawFd = 3;

pub struct HandoffChannel;

impl HandoffChannel {
    /// Create a close-on-exec pipe. The launcher is responsible for mapping
    /// the read end to [`HANDOFF_FD`] in the child.
    pub fn open() -> LuksResult<(HandoffSender, HandoffReceiver)> {
        let mut fds: [RawFd; 2] = [-1; 2];
        if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) } != 0 {
            return Err(io::Error::last_os_error().into());
        }
        // SAFETY: pipe2 succeeded, both descriptors are fresh and owned here.
        let (read, write) = unsafe {
            (
                OwnedFd::from_raw_fd(fds[0]),
                OwnedFd::from_raw_fd(fds[1]),
            )
        };
        Ok((
            HandoffSender {
                file: File::from(write),
            },
            HandoffReceiver {
                file: File::from(read),
            },
        ))
    }
}

/// Write end. Consumed by sending, which closes it.
pub struct HandoffSender {
    file: File,
}

impl HandoffSender {
    pub fn send(self, devices: &[CryptDevice]) -> LuksResult<()> {
        let payload = handoff::encode(devices)?;
        self.send_payload(&payload)
    }

    pub fn send_payload(mut self, payload: &[u8]) -> LuksResult<()> {
        self.file.write_all(payload)?;
        Ok(())
    }
}

/// Read end. Also usable as a plain reader so the inner orchestrator can
/// consume it directly.
pub struct HandoffReceiver {
    file: File,
}

impl HandoffReceiver {
    /// Adopt the descriptor inherited from the outer process.
    pub fn inherited() -> LuksResult<Self> {
        if unsafe { libc::fcntl(HANDOFF_FD, libc::F_GETFD) } < 0 {
            return Err(io::Error::last_os_error().into());
        }
        // SAFETY: the descriptor is open and nothing else in this process
        // claims it; the launcher placed it there for us alone.
        let file = unsafe { File::from_raw_fd(HANDOFF_FD) };
        Ok(Self { file })
    }

    /// Read to end of file, close, and decode.
    pub fn receive(mut self) -> LuksResult<Vec<CryptDevice>> {
        let mut payload = Vec::new();
        self.file.read_to_end(&mut payload)?;
        drop(self);
        handoff::decode(&payload)
    }
}

impl Read for HandoffReceiver {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl AsRawFd for HandoffReceiver {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn devices_cross_the_pipe_root_first() {
        let (sender, receiver) = HandoffChannel::open().unwrap();
        sender
            .send(&[CryptDevice::new("swap"), CryptDevice::root("root")])
            .unwrap();

        let devices = receiver.receive().unwrap();
        assert_eq!(devices, vec![CryptDevice::root("root"), CryptDevice::new("swap")]);
    }

    #[test]
    fn both_ends_are_close_on_exec() {
        let (sender, receiver) = HandoffChannel::open().unwrap();
        for fd in [sender.file.as_raw_fd(), receiver.as_raw_fd()] {
            let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
            assert!(flags & libc::FD_CLOEXEC != 0);
        }
    }

    #[test]
    fn dropped_sender_yields_empty_set() {
        let (sender, receiver) = HandoffChannel::open().unwrap();
        drop(sender);
        assert!(receiver.receive().unwrap().is_empty());
    }
}
