//! `start` / `stop` -- background daemon lifecycle.
//!
//! The daemon hosts the channel receiver, restart recovery, and the TTL
//! sweeper for prompts left by crashed or detached runs. `start` spawns
//! the hidden `daemon-run` entry point detached from the terminal.

use std::process::{Command, Stdio};
use std::sync::atomic::Ordering;
use std::time::Duration;

use tracing::info;

use atlasbridge_daemon::{PidFile, Service};
use atlasbridge_types::paths::DataDir;
use atlasbridge_types::ExitCode;

use super::{fail, load_config};

pub fn start(data_dir: &DataDir) -> ExitCode {
    if let Some(pid) = PidFile::running_pid(&data_dir.pid_path()) {
        eprintln!("Daemon already running (pid {pid}).");
        return ExitCode::Success;
    }

    let exe = match std::env::current_exe() {
        Ok(exe) => exe,
        Err(e) => {
            return fail(
                &format!("Cannot locate the atlasbridge binary ({e})"),
                "Reinstall or run from an absolute path",
                ExitCode::Environment,
            )
        }
    };

    let child = Command::new(exe)
        .arg("--data-dir")
        .arg(data_dir.root())
        .arg("daemon-run")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn();

    match child {
        Ok(child) => {
            println!("Daemon starting (pid {}).", child.id());
            ExitCode::Success
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => fail(
            &format!("Cannot spawn the daemon ({e})"),
            "Check execute permission on the atlasbridge binary",
            ExitCode::Permission,
        ),
        Err(e) => fail(
            &format!("Cannot spawn the daemon ({e})"),
            "Run `atlasbridge doctor` to diagnose the environment",
            ExitCode::Config,
        ),
    }
}

pub fn stop(data_dir: &DataDir) -> ExitCode {
    match PidFile::signal_stop(&data_dir.pid_path()) {
        Ok(true) => {
            println!("Daemon stopping.");
            ExitCode::Success
        }
        Ok(false) => {
            eprintln!("No daemon is running.");
            ExitCode::Success
        }
        Err(e) => fail(
            &format!("Cannot stop the daemon ({e})"),
            "Check permission on the pid file and the daemon process owner",
            ExitCode::Permission,
        ),
    }
}

/// The hidden daemon entry point: acquire the pid lock, bootstrap the
/// service, and idle until signaled.
pub fn daemon_run(data_dir: &DataDir) -> ExitCode {
    if let Err(e) = data_dir.ensure() {
        return fail(
            &format!("Cannot prepare the data directory ({e})"),
            "Check ownership of the data directory",
            ExitCode::Environment,
        );
    }

    let _pid_lock = match PidFile::acquire(&data_dir.pid_path()) {
        Ok(lock) => lock,
        Err(e) => {
            return fail(
                &format!("Cannot acquire the daemon lock ({e})"),
                "Stop the other daemon first with `atlasbridge stop`",
                ExitCode::Config,
            )
        }
    };

    let config = match load_config(data_dir) {
        Ok(config) => config,
        Err(e) => {
            return fail(
                &format!("Configuration failed to load ({e})"),
                "Fix config.toml before starting the daemon",
                ExitCode::Config,
            )
        }
    };

    let service = match Service::bootstrap(config, data_dir) {
        Ok(service) => service,
        Err(e) => {
            let code = ExitCode::for_error(&e);
            return fail(
                &format!("Daemon bootstrap failed ({e})"),
                "Run `atlasbridge doctor` to diagnose state files",
                code,
            );
        }
    };

    // SIGTERM/SIGINT flip the static flag; the idle loop watches both it
    // and the service's own cancel token.
    unsafe {
        use nix::sys::signal::{self, SigHandler, Signal};
        let _ = signal::signal(Signal::SIGTERM, SigHandler::Handler(on_stop_signal));
        let _ = signal::signal(Signal::SIGINT, SigHandler::Handler(on_stop_signal));
    }

    info!("daemon running");
    let cancel = service.cancel_token();
    while !service.cancelled() {
        if STOP_REQUESTED.load(Ordering::SeqCst) {
            cancel.store(true, Ordering::SeqCst);
            break;
        }
        std::thread::sleep(Duration::from_millis(200));
    }

    // Distinguish a requested stop from a fatal halt (dead audit writer):
    // the latter exits non-zero so supervising init systems notice.
    let fatal = service.fatal_error();
    service.shutdown();
    if let Some(e) = fatal {
        let code = ExitCode::for_error(&e);
        return fail(
            &format!("Daemon halted ({e})"),
            "Check disk space and the audit log, then run `atlasbridge doctor --fix`",
            code,
        );
    }
    info!("daemon stopped");
    ExitCode::Success
}

static STOP_REQUESTED: std::sync::atomic::AtomicBool = std::sync::atomic::AtomicBool::new(false);

extern "C" fn on_stop_signal(_: libc::c_int) {
    STOP_REQUESTED.store(true, Ordering::SeqCst);
}
