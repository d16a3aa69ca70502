//! `sessions` -- list supervised runs, newest first.

use atlasbridge_store::StoreHandle;
use atlasbridge_types::paths::DataDir;
use atlasbridge_types::ExitCode;

use super::fail;

pub fn execute(data_dir: &DataDir) -> ExitCode {
    let db_path = data_dir.db_path();
    if !db_path.exists() {
        println!("No sessions recorded yet.");
        return ExitCode::Success;
    }

    let store = match StoreHandle::open(&db_path) {
        Ok(store) => store,
        Err(e) => {
            return fail(
                &format!("Cannot open the prompt store ({e})"),
                "Run `atlasbridge doctor` to check state files",
                ExitCode::StateCorruption,
            )
        }
    };

    let sessions = match store.list_sessions(50) {
        Ok(sessions) => sessions,
        Err(e) => {
            return fail(
                &format!("Cannot list sessions ({e})"),
                "Run `atlasbridge doctor` to check state files",
                ExitCode::StateCorruption,
            )
        }
    };

    if sessions.is_empty() {
        println!("No sessions recorded yet.");
        return ExitCode::Success;
    }

    println!("{:<38} {:<10} {:<8} {:<22} label", "session", "tool", "state", "started");
    for session in sessions {
        println!(
            "{:<38} {:<10} {:<8} {:<22} {}",
            session.session_id,
            session.tool,
            session.state.as_str(),
            session.started_at.format("%Y-%m-%d %H:%M:%S"),
            session.label.as_deref().unwrap_or("-"),
        );
    }
    ExitCode::Success
}
