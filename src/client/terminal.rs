//! Local terminal mode switching for the full-screen passthrough.

use std::io;
use std::os::unix::io::{AsRawFd, RawFd};

use tracing::{debug, warn};

use crate::Result;

/// Key that leaves the full-screen passthrough (Ctrl-]).
pub const DETACH_KEY: u8 = 0x1d;

/// Whether `fd` refers to a terminal.
pub fn is_terminal(fd: RawFd) -> bool {
    unsafe { libc::isatty(fd) == 1 }
}

/// Guard that turns off line buffering and echo on a terminal and puts the
/// original settings back when dropped.
pub struct RawModeGuard {
    fd: RawFd,
    original: libc::termios,
}

impl RawModeGuard {
    /// Switch standard input to raw mode.
    pub fn stdin() -> Result<Self> {
        Self::enter(io::stdin().as_raw_fd())
    }

    /// Switch `fd` to raw mode.
    ///
    /// Keystrokes are delivered one byte at a time without local echo. Signal
    /// characters are passed through as bytes so the remote program sees them.
    /// Output post-processing is left on since the remote side has no
    /// terminal of its own to translate newlines.
    pub fn enter(fd: RawFd) -> Result<Self> {
        let mut termios = std::mem::MaybeUninit::<libc::termios>::uninit();
        if unsafe { libc::tcgetattr(fd, termios.as_mut_ptr()) } != 0 {
            return Err(io::Error::last_os_error().into());
        }
        let original = unsafe { termios.assume_init() };

        let mut raw = original;
        raw.c_iflag &= !libc::IXON;
        raw.c_lflag &= !(libc::ECHO | libc::ICANON | libc::ISIG | libc::IEXTEN);
        raw.c_cc[libc::VMIN] = 1;
        raw.c_cc[libc::VTIME] = 0;

        if unsafe { libc::tcsetattr(fd, libc::TCSAFLUSH, &raw) } != 0 {
            return Err(io::Error::last_os_error().into());
        }

        debug!("entered raw terminal mode");
        Ok(Self { fd, original })
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if unsafe { libc::tcsetattr(self.fd, libc::TCSAFLUSH, &self.original) } != 0 {
            warn!(
                "failed to restore terminal settings: {}",
                io::Error::last_os_error()
            );
        } else {
            debug!("restored terminal mode");
        }
    }
}
