use luksuspend_core::error::LuksResult;
use luksuspend_core::provider::Terminal;
use std::cell::Cell;
use std::io;
use std::os::fd::RawFd;

/// Controlling terminal on stdin. Clearing `ISIG` keeps Ctrl-C and Ctrl-Z
/// from reaching the process while devices are locked.
pub struct TtyTerminal {
    fd: RawFd,
    saved: Cell<Option<libc::termios>>,
}

impl TtyTerminal {
    pub fn stdin() -> Self {
        Self::new(libc::STDIN_FILENO)
    }

    pub fn new(fd: RawFd) -> Self {
        Self {
            fd,
            saved: Cell::new(None),
        }
    }

    fn attributes(&self) -> LuksResult<libc::termios> {
        // SAFETY: termios is plain data; tcgetattr fills it in.
        let mut attrs: libc::termios = unsafe { std::mem::zeroed() };
        if unsafe { libc::tcgetattr(self.fd, &mut attrs) } != 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(attrs)
    }

    fn apply(&self, attrs: &libc::termios) -> LuksResult<()> {
        if unsafe { libc::tcsetattr(self.fd, libc::TCSANOW, attrs) } != 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(())
    }
}

impl Terminal for TtyTerminal {
    fn suppress_interrupts(&self) -> LuksResult<()> {
        let original = self.attributes()?;
        let mut quiet = original;
        quiet.c_lflag &= !libc::ISIG;
        self.apply(&quiet)?;
        self.saved.set(Some(original));
        Ok(())
    }

    fn restore(&self) -> LuksResult<()> {
        match self.saved.take() {
            Some(original) => self.apply(&original),
            None => Ok(()),
        }
    }
}
