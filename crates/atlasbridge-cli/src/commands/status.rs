//! `status [--json] [--watch]` -- sessions, queues, channel health.

use std::time::Duration;

use atlasbridge_daemon::PidFile;
use atlasbridge_store::StoreHandle;
use atlasbridge_types::paths::DataDir;
use atlasbridge_types::ExitCode;

use super::{fail, load_config};

pub fn execute(data_dir: &DataDir, json: bool, watch: bool) -> ExitCode {
    loop {
        let code = report_once(data_dir, json);
        if code != ExitCode::Success || !watch {
            return code;
        }
        std::thread::sleep(Duration::from_secs(2));
    }
}

fn report_once(data_dir: &DataDir, json: bool) -> ExitCode {
    let config = match load_config(data_dir) {
        Ok(config) => config,
        Err(e) => {
            return fail(
                &format!("Configuration failed to load ({e})"),
                "Fix config.toml before asking for status",
                ExitCode::Config,
            )
        }
    };

    let db_path = data_dir.db_path();
    let (sessions, counts) = if db_path.exists() {
        match StoreHandle::open(&db_path) {
            Ok(store) => (
                store.list_active_sessions().unwrap_or_default(),
                store.count_by_state().unwrap_or_default(),
            ),
            Err(e) => {
                return fail(
                    &format!("Cannot open the prompt store ({e})"),
                    "Run `atlasbridge doctor` to check state files",
                    ExitCode::StateCorruption,
                )
            }
        }
    } else {
        (Vec::new(), Vec::new())
    };

    let daemon_pid = PidFile::running_pid(&data_dir.pid_path());

    if json {
        let value = serde_json::json!({
            "daemon_pid": daemon_pid,
            "channel": config.channel.kind,
            "autopilot_mode": config.autopilot.mode.as_str(),
            "active_sessions": sessions
                .iter()
                .map(|s| serde_json::json!({
                    "session_id": s.session_id,
                    "tool": s.tool,
                    "label": s.label,
                    "started_at": s.started_at.to_rfc3339(),
                }))
                .collect::<Vec<_>>(),
            "prompts_by_state": counts
                .iter()
                .map(|(state, n)| serde_json::json!({ "state": state, "count": n }))
                .collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&value).expect("status serializes"));
        return ExitCode::Success;
    }

    match daemon_pid {
        Some(pid) => println!("daemon: running (pid {pid})"),
        None => println!("daemon: not running"),
    }
    println!("channel: {}", config.channel.kind);
    println!("autopilot: {}", config.autopilot.mode.as_str());
    println!("active sessions: {}", sessions.len());
    for session in &sessions {
        println!(
            "  {}  {}  {}",
            session.session_id,
            session.tool,
            session.label.as_deref().unwrap_or("-")
        );
    }
    if counts.is_empty() {
        println!("prompts: none recorded");
    } else {
        println!("prompts:");
        for (state, n) in &counts {
            println!("  {state:>15}  {n}");
        }
    }
    ExitCode::Success
}
