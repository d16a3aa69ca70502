//! `autopilot mode|pause|resume` -- mode control and the kill switch.
//!
//! These operate on the persisted state file; a running daemon picks the
//! change up on its next sweeper tick.

use atlasbridge_autopilot::AutopilotState;
use atlasbridge_types::paths::DataDir;
use atlasbridge_types::{AutopilotMode, ExitCode};

use super::fail;

pub fn set_mode(data_dir: &DataDir, mode: &str) -> ExitCode {
    let mode: AutopilotMode = match mode.parse() {
        Ok(mode) => mode,
        Err(e) => {
            return fail(
                &format!("Bad mode ({e})"),
                "Use one of: off, assist, full",
                ExitCode::Config,
            )
        }
    };
    mutate_state(data_dir, |state| state.mode = mode).map_or_else(
        |code| code,
        |_| {
            println!("Autopilot mode: {}", mode.as_str());
            ExitCode::Success
        },
    )
}

pub fn pause(data_dir: &DataDir) -> ExitCode {
    mutate_state(data_dir, |state| state.paused = true).map_or_else(
        |code| code,
        |_| {
            println!("Autopilot paused; all prompts go to the human.");
            ExitCode::Success
        },
    )
}

pub fn resume(data_dir: &DataDir) -> ExitCode {
    mutate_state(data_dir, |state| state.paused = false).map_or_else(
        |code| code,
        |_| {
            println!("Autopilot resumed.");
            ExitCode::Success
        },
    )
}

fn mutate_state(
    data_dir: &DataDir,
    change: impl FnOnce(&mut AutopilotState),
) -> Result<(), ExitCode> {
    if let Err(e) = data_dir.ensure() {
        return Err(fail(
            &format!("Cannot prepare the data directory ({e})"),
            "Check ownership of the data directory",
            ExitCode::Environment,
        ));
    }
    let path = data_dir.autopilot_state_path();
    let mut state = match AutopilotState::load(&path) {
        Ok(state) => state,
        Err(e) => {
            return Err(fail(
                &format!("Autopilot state is unreadable ({e})"),
                "Delete the autopilot.state file to reset it",
                ExitCode::StateCorruption,
            ))
        }
    };
    change(&mut state);
    state.save(&path).map_err(|e| {
        fail(
            &format!("Cannot save autopilot state ({e})"),
            "Check write permission on the data directory",
            ExitCode::Permission,
        )
    })
}
