//! Daemon lifecycle: the advisory pid-file lock.
//!
//! `daemon.pid` (mode 0600) holds the daemon's pid. Acquisition fails if
//! the recorded process is still alive; a stale file from a crashed
//! daemon is replaced. The file is removed on drop.

use std::path::{Path, PathBuf};

use nix::sys::signal::kill;
use nix::unistd::Pid;
use tracing::{info, warn};

use atlasbridge_types::BridgeError;

/// Held pid-file lock. Dropping releases it.
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Acquire the lock for the current process.
    pub fn acquire(path: &Path) -> Result<Self, BridgeError> {
        if let Some(existing) = read_pid(path) {
            if process_alive(existing) {
                return Err(BridgeError::ConfigError(format!(
                    "daemon already running (pid {existing})"
                )));
            }
            warn!(pid = existing, "removing stale pid file");
        }

        let pid = std::process::id();
        std::fs::write(path, format!("{pid}\n")).map_err(|e| {
            BridgeError::ConfigError(format!("cannot write {}: {e}", path.display()))
        })?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600));
        }
        info!(pid, path = %path.display(), "pid file acquired");
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    /// The pid recorded at `path`, when the daemon is running.
    pub fn running_pid(path: &Path) -> Option<u32> {
        read_pid(path).filter(|&pid| process_alive(pid))
    }

    /// Ask a running daemon to shut down. Returns `false` when none runs.
    pub fn signal_stop(path: &Path) -> Result<bool, BridgeError> {
        match Self::running_pid(path) {
            Some(pid) => {
                kill(Pid::from_raw(pid as i32), nix::sys::signal::Signal::SIGTERM).map_err(
                    |e| BridgeError::ConfigError(format!("cannot signal pid {pid}: {e}")),
                )?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn read_pid(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|s| s.trim().parse().ok())
}

fn process_alive(pid: u32) -> bool {
    // Signal 0 probes existence without delivering anything.
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn acquire_writes_own_pid() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("daemon.pid");
        let lock = PidFile::acquire(&path).unwrap();
        assert_eq!(read_pid(&path), Some(std::process::id()));
        assert_eq!(PidFile::running_pid(&path), Some(std::process::id()));
        drop(lock);
        assert!(!path.exists());
    }

    #[test]
    fn second_acquire_fails_while_held() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("daemon.pid");
        let _lock = PidFile::acquire(&path).unwrap();
        // Our own pid is alive, so a second acquisition must fail.
        assert!(PidFile::acquire(&path).is_err());
    }

    #[test]
    fn stale_pid_file_is_replaced() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("daemon.pid");
        // A pid that certainly does not exist.
        std::fs::write(&path, "999999999\n").unwrap();
        let _lock = PidFile::acquire(&path).unwrap();
        assert_eq!(read_pid(&path), Some(std::process::id()));
    }

    #[test]
    fn pid_file_mode_is_0600() {
        use std::os::unix::fs::PermissionsExt;
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("daemon.pid");
        let _lock = PidFile::acquire(&path).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn signal_stop_without_daemon() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("daemon.pid");
        assert!(!PidFile::signal_stop(&path).unwrap());
    }
}
