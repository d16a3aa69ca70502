//! Pseudo-terminal session management.
//!
//! Spawns the supervised child in a PTY so the relay can observe all
//! terminal output and inject keystrokes. The master end is non-blocking
//! and integrated with `poll()`; reads and writes go through the same fd
//! from different tasks, which is safe because each byte-level operation
//! is a single syscall.

use std::ffi::CString;
use std::os::fd::{AsFd, AsRawFd, OwnedFd, RawFd};
use std::path::Path;
use std::time::{Duration, Instant};

use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::poll::{PollFd, PollFlags, PollTimeout};
use nix::pty::openpty;
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{self, ForkResult, Pid};

use atlasbridge_types::BridgeError;

/// A child process running in a pseudo-terminal.
pub struct PtySession {
    master: OwnedFd,
    child_pid: Pid,
}

impl PtySession {
    /// Spawn a command in a new PTY.
    ///
    /// The child inherits the given environment additions and working
    /// directory. The master fd is set non-blocking for `poll()`.
    pub fn spawn(
        command: &str,
        args: &[String],
        working_dir: &Path,
        env: &[(String, String)],
    ) -> Result<Self, BridgeError> {
        let pty = openpty(None, None)
            .map_err(|e| BridgeError::PilotError(format!("openpty failed: {e}")))?;

        // Safety: fork is unsafe but standard Unix practice for PTY
        // management. The child immediately exec's.
        match unsafe { unistd::fork() } {
            Ok(ForkResult::Child) => {
                drop(pty.master);

                unistd::setsid()
                    .map_err(|e| BridgeError::PilotError(format!("setsid failed: {e}")))?;

                // Make the slave the controlling terminal.
                unsafe {
                    if libc::ioctl(pty.slave.as_raw_fd(), libc::TIOCSCTTY as _, 0) < 0 {
                        let err = std::io::Error::last_os_error();
                        eprintln!("atlasbridge: TIOCSCTTY failed: {err}");
                    }
                }

                unistd::dup2(pty.slave.as_raw_fd(), libc::STDIN_FILENO)
                    .map_err(|e| BridgeError::PilotError(format!("dup2 stdin: {e}")))?;
                unistd::dup2(pty.slave.as_raw_fd(), libc::STDOUT_FILENO)
                    .map_err(|e| BridgeError::PilotError(format!("dup2 stdout: {e}")))?;
                unistd::dup2(pty.slave.as_raw_fd(), libc::STDERR_FILENO)
                    .map_err(|e| BridgeError::PilotError(format!("dup2 stderr: {e}")))?;

                drop(pty.slave);

                unistd::chdir(working_dir)
                    .map_err(|e| BridgeError::PilotError(format!("chdir: {e}")))?;

                for (key, value) in env {
                    std::env::set_var(key, value);
                }

                let c_command = CString::new(command.to_string())
                    .map_err(|e| BridgeError::PilotError(format!("invalid command: {e}")))?;
                let mut c_args: Vec<CString> = vec![c_command.clone()];
                for arg in args {
                    c_args.push(
                        CString::new(arg.as_str())
                            .map_err(|e| BridgeError::PilotError(format!("invalid arg: {e}")))?,
                    );
                }

                unistd::execvp(&c_command, &c_args)
                    .map_err(|e| BridgeError::PilotError(format!("exec failed: {e}")))?;

                unreachable!("execvp returned Ok");
            }
            Ok(ForkResult::Parent { child }) => {
                drop(pty.slave);

                let flags = fcntl(pty.master.as_raw_fd(), FcntlArg::F_GETFL)
                    .map_err(|e| BridgeError::PilotError(format!("fcntl F_GETFL: {e}")))?;
                let flags = OFlag::from_bits_truncate(flags);
                fcntl(
                    pty.master.as_raw_fd(),
                    FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK),
                )
                .map_err(|e| BridgeError::PilotError(format!("fcntl F_SETFL: {e}")))?;

                Ok(Self {
                    master: pty.master,
                    child_pid: child,
                })
            }
            Err(e) => Err(BridgeError::PilotError(format!("fork failed: {e}"))),
        }
    }

    /// Non-blocking read from the master PTY.
    ///
    /// Returns `Ok(0)` when no data is available (EAGAIN) or the child has
    /// closed its side (EIO).
    pub fn read(&self, buf: &mut [u8]) -> Result<usize, BridgeError> {
        match unistd::read(self.master.as_raw_fd(), buf) {
            Ok(n) => Ok(n),
            Err(nix::errno::Errno::EAGAIN) => Ok(0),
            Err(nix::errno::Errno::EIO) => Ok(0),
            Err(e) => Err(BridgeError::PilotError(format!("pty read: {e}"))),
        }
    }

    /// Write all bytes to the child's stdin, retrying EAGAIN until
    /// `deadline` passes.
    pub fn write_all_deadline(
        &self,
        data: &[u8],
        deadline: Duration,
    ) -> Result<(), BridgeError> {
        let started = Instant::now();
        let mut written = 0;
        while written < data.len() {
            if started.elapsed() > deadline {
                return Err(BridgeError::PilotError(format!(
                    "pty write timed out after {deadline:?} ({written}/{} bytes)",
                    data.len()
                )));
            }
            match unistd::write(&self.master, &data[written..]) {
                Ok(n) => written += n,
                Err(nix::errno::Errno::EAGAIN) => {
                    std::thread::sleep(Duration::from_millis(1));
                }
                Err(e) => {
                    return Err(BridgeError::PilotError(format!("pty write: {e}")));
                }
            }
        }
        Ok(())
    }

    /// Write all bytes with a generous default deadline.
    pub fn write_all(&self, data: &[u8]) -> Result<(), BridgeError> {
        self.write_all_deadline(data, Duration::from_secs(10))
    }

    /// Check if the child process is still alive.
    pub fn is_alive(&self) -> bool {
        matches!(
            waitpid(self.child_pid, Some(WaitPidFlag::WNOHANG)),
            Ok(WaitStatus::StillAlive)
        )
    }

    /// Wait for the child to exit and return its exit code.
    ///
    /// Returns negative values for signal termination (-signum).
    pub fn wait(&self) -> Result<i32, BridgeError> {
        loop {
            match waitpid(self.child_pid, None) {
                Ok(WaitStatus::Exited(_, code)) => return Ok(code),
                Ok(WaitStatus::Signaled(_, sig, _)) => return Ok(-(sig as i32)),
                Ok(_) => continue,
                Err(nix::errno::Errno::ECHILD) => return Ok(0), // Already reaped
                Err(e) => {
                    return Err(BridgeError::PilotError(format!("waitpid: {e}")));
                }
            }
        }
    }

    /// The raw master fd (for poll integration).
    pub fn master_fd(&self) -> RawFd {
        self.master.as_raw_fd()
    }

    /// The child's process id.
    pub fn pid(&self) -> u32 {
        self.child_pid.as_raw() as u32
    }

    /// Poll the master fd for readability with a timeout in milliseconds.
    pub fn poll_readable(&self, timeout_ms: i32) -> Result<bool, BridgeError> {
        let borrowed = self.master.as_fd();
        let mut poll_fd = [PollFd::new(borrowed, PollFlags::POLLIN)];
        let timeout = if timeout_ms < 0 {
            PollTimeout::NONE
        } else {
            PollTimeout::try_from(timeout_ms as u32).unwrap_or(PollTimeout::MAX)
        };

        match nix::poll::poll(&mut poll_fd, timeout) {
            Ok(0) => Ok(false),
            Ok(_) => {
                let revents = poll_fd[0].revents().unwrap_or(PollFlags::empty());
                Ok(revents.contains(PollFlags::POLLIN) || revents.contains(PollFlags::POLLHUP))
            }
            Err(nix::errno::Errno::EINTR) => Ok(false),
            Err(e) => Err(BridgeError::PilotError(format!("poll: {e}"))),
        }
    }

    /// Send SIGTERM to the child process.
    pub fn terminate(&self) -> Result<(), BridgeError> {
        signal::kill(self.child_pid, Signal::SIGTERM)
            .map_err(|e| BridgeError::PilotError(format!("kill SIGTERM: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn read_until_quiet(session: &PtySession) -> String {
        std::thread::sleep(Duration::from_millis(100));
        let mut buf = [0u8; 1024];
        let mut output = Vec::new();
        loop {
            match session.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => output.extend_from_slice(&buf[..n]),
                Err(_) => break,
            }
        }
        String::from_utf8_lossy(&output).into_owned()
    }

    #[test]
    fn spawn_echo_and_read_output() {
        let session = PtySession::spawn(
            "/bin/echo",
            &["hello relay".to_string()],
            &PathBuf::from("/tmp"),
            &[],
        )
        .expect("spawn failed");

        let text = read_until_quiet(&session);
        assert!(text.contains("hello relay"), "output: {text:?}");
        assert_eq!(session.wait().expect("wait failed"), 0);
    }

    #[test]
    fn spawn_and_write_to_stdin() {
        let session =
            PtySession::spawn("/bin/cat", &[], &PathBuf::from("/tmp"), &[]).expect("spawn failed");

        std::thread::sleep(Duration::from_millis(50));
        session.write_all(b"test input\n").expect("write failed");
        let text = read_until_quiet(&session);
        assert!(text.contains("test input"), "output: {text:?}");

        session.write_all(&[0x04]).expect("EOF failed"); // Ctrl-D
        assert_eq!(session.wait().expect("wait failed"), 0);
    }

    #[test]
    fn poll_readable_returns_data() {
        let session = PtySession::spawn(
            "/bin/echo",
            &["poll test".to_string()],
            &PathBuf::from("/tmp"),
            &[],
        )
        .expect("spawn failed");

        let readable = session.poll_readable(1000).expect("poll failed");
        assert!(readable, "expected data to be readable");
        session.wait().ok();
    }

    #[test]
    fn exit_code_passthrough() {
        let session = PtySession::spawn(
            "/bin/sh",
            &["-c".to_string(), "exit 3".to_string()],
            &PathBuf::from("/tmp"),
            &[],
        )
        .expect("spawn failed");
        assert_eq!(session.wait().expect("wait failed"), 3);
    }

    #[test]
    fn terminate_sends_sigterm() {
        let session = PtySession::spawn(
            "/bin/sleep",
            &["30".to_string()],
            &PathBuf::from("/tmp"),
            &[],
        )
        .expect("spawn failed");
        std::thread::sleep(Duration::from_millis(50));
        session.terminate().expect("terminate failed");
        let code = session.wait().expect("wait failed");
        assert_eq!(code, -(Signal::SIGTERM as i32));
    }
}
