//! Scoped terminal raw-mode acquisition.
//!
//! While supervising, the relay's own terminal runs in raw mode so
//! keystrokes pass straight through to the child's PTY. The guard saves
//! the original termios on acquisition and restores it on drop, so every
//! exit path -- clean exit, error return, panic unwind -- puts the
//! terminal back.

use std::os::fd::AsFd;

use nix::sys::termios::{self, SetArg, Termios};
use tracing::debug;

use atlasbridge_types::BridgeError;

/// RAII guard over the supervising terminal's mode.
pub struct RawModeGuard {
    saved: Termios,
}

impl RawModeGuard {
    /// Put stdin into raw mode, remembering the current settings.
    ///
    /// Fails when stdin is not a terminal; callers skip the input relay in
    /// that case.
    pub fn acquire() -> Result<Self, BridgeError> {
        let stdin = std::io::stdin();
        let saved = termios::tcgetattr(stdin.as_fd())
            .map_err(|e| BridgeError::PilotError(format!("tcgetattr: {e}")))?;

        let mut raw = saved.clone();
        termios::cfmakeraw(&mut raw);
        termios::tcsetattr(stdin.as_fd(), SetArg::TCSANOW, &raw)
            .map_err(|e| BridgeError::PilotError(format!("tcsetattr raw: {e}")))?;

        debug!("terminal switched to raw mode");
        Ok(Self { saved })
    }

    /// Whether stdin is a terminal at all.
    pub fn stdin_is_tty() -> bool {
        nix::unistd::isatty(libc::STDIN_FILENO).unwrap_or(false)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let stdin = std::io::stdin();
        if let Err(e) = termios::tcsetattr(stdin.as_fd(), SetArg::TCSANOW, &self.saved) {
            eprintln!("atlasbridge: failed to restore terminal mode: {e}");
        } else {
            debug!("terminal mode restored");
        }
    }
}
