//! `atlasbridge run <tool> [args...]` -- supervise a tool in the
//! foreground, relaying its prompts through the configured channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::{self, SigHandler, Signal};
use tracing::info;

use atlasbridge_daemon::Service;
use atlasbridge_types::paths::DataDir;
use atlasbridge_types::ExitCode;

use super::{fail, load_config};

/// Set from the SIGINT handler; watched by a helper thread.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_sigint(_: libc::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

pub fn execute(
    data_dir: &DataDir,
    adapter: &str,
    label: Option<String>,
    command: Vec<String>,
) -> ExitCode {
    let Some((program, args)) = command.split_first() else {
        return fail(
            "No command given",
            "Pass the tool to supervise, e.g. `atlasbridge run claude`",
            ExitCode::Config,
        );
    };

    let config = match load_config(data_dir) {
        Ok(config) => config,
        Err(e) => return fail(&format!("Configuration failed to load ({e})"), "Fix config.toml or the ATLASBRIDGE_* environment", ExitCode::Config),
    };

    let service = match Service::bootstrap(config, data_dir) {
        Ok(service) => service,
        Err(e) => {
            let code = ExitCode::for_error(&e);
            return fail(
                &format!("Cannot start the relay ({e})"),
                "Run `atlasbridge doctor` to diagnose the environment",
                code,
            );
        }
    };

    // Ctrl-C tears the session down cooperatively; the raw-mode guard
    // and PTY cleanup run on the normal exit path.
    let cancel = Arc::new(AtomicBool::new(false));
    unsafe {
        let _ = signal::signal(Signal::SIGINT, SigHandler::Handler(on_sigint));
        let _ = signal::signal(Signal::SIGTERM, SigHandler::Handler(on_sigint));
    }
    let watcher = {
        let cancel = Arc::clone(&cancel);
        std::thread::spawn(move || {
            while !cancel.load(Ordering::SeqCst) {
                if INTERRUPTED.load(Ordering::SeqCst) {
                    cancel.store(true, Ordering::SeqCst);
                    break;
                }
                std::thread::sleep(Duration::from_millis(100));
            }
        })
    };

    info!(command = %program, "starting supervised run");
    let interactive = true;
    let result = service.run_tool(
        adapter,
        program,
        args.to_vec(),
        label,
        interactive,
        Arc::clone(&cancel),
    );

    cancel.store(true, Ordering::SeqCst);
    let _ = watcher.join();
    let fatal = service.fatal_error();
    service.shutdown();

    // A dead audit writer outranks everything else: the relay ran without
    // a durable audit trail, which is a state-corruption exit.
    if let Some(e) = fatal {
        let code = ExitCode::for_error(&e);
        return fail(
            &format!("Relay halted ({e})"),
            "Check disk space and the audit log, then run `atlasbridge doctor --fix`",
            code,
        );
    }

    if INTERRUPTED.load(Ordering::SeqCst) {
        eprintln!("Interrupted.");
        return ExitCode::Interrupted;
    }

    match result {
        Ok(0) => ExitCode::Success,
        Ok(code) => {
            eprintln!("Child exited with status {code}.");
            ExitCode::Error
        }
        Err(e) => fail(
            &format!("Supervised run failed ({e})"),
            "Check that the command exists and the terminal is usable",
            ExitCode::Environment,
        ),
    }
}
