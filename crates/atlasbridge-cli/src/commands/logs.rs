//! `logs [--tail N] [--session ID] [--decisions]` -- inspect the audit
//! chain or the autopilot decision trace.

use atlasbridge_autopilot::DecisionTrace;
use atlasbridge_ledger::AuditLog;
use atlasbridge_types::paths::DataDir;
use atlasbridge_types::ExitCode;

use super::fail;

pub fn execute(
    data_dir: &DataDir,
    tail: Option<usize>,
    session: Option<&str>,
    decisions: bool,
) -> ExitCode {
    if decisions {
        return show_decisions(data_dir, tail);
    }
    show_audit(data_dir, tail, session)
}

fn show_audit(data_dir: &DataDir, tail: Option<usize>, session: Option<&str>) -> ExitCode {
    let path = data_dir.audit_path();
    if !path.exists() {
        println!("No audit log yet.");
        return ExitCode::Success;
    }

    let log = match AuditLog::open(&path) {
        Ok(log) => log,
        Err(e) => {
            return fail(
                &format!("Audit log failed verification ({e})"),
                "Run `atlasbridge doctor --fix` to reset the chain",
                ExitCode::StateCorruption,
            )
        }
    };
    let mut records = match log.read_all() {
        Ok(records) => records,
        Err(e) => {
            return fail(
                &format!("Cannot read the audit log ({e})"),
                "Run `atlasbridge doctor --fix` to reset the chain",
                ExitCode::StateCorruption,
            )
        }
    };

    if let Some(session) = session {
        records.retain(|r| r.data.get("session_id").and_then(|v| v.as_str()) == Some(session));
    }
    if let Some(n) = tail {
        let skip = records.len().saturating_sub(n);
        records.drain(..skip);
    }

    for record in records {
        println!(
            "{:>6}  {}  {:<18}  {}",
            record.seq,
            chrono::DateTime::<chrono::Utc>::from_timestamp_millis(record.ts)
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| record.ts.to_string()),
            record.kind.as_str(),
            record.data
        );
    }
    ExitCode::Success
}

fn show_decisions(data_dir: &DataDir, tail: Option<usize>) -> ExitCode {
    let path = data_dir.decision_trace_path();
    if !path.exists() {
        println!("No autopilot decisions recorded yet.");
        return ExitCode::Success;
    }

    let trace = match DecisionTrace::open(&path) {
        Ok(trace) => trace,
        Err(e) => {
            return fail(
                &format!("Decision trace failed verification ({e})"),
                "The trace file was modified; restore it from backup",
                ExitCode::StateCorruption,
            )
        }
    };
    let entries = match trace.tail(tail.unwrap_or(50)) {
        Ok(entries) => entries,
        Err(e) => {
            return fail(
                &format!("Cannot read the decision trace ({e})"),
                "The trace file was modified; restore it from backup",
                ExitCode::StateCorruption,
            )
        }
    };

    for entry in entries {
        println!(
            "{:>6}  {}  {}",
            entry.seq,
            chrono::DateTime::<chrono::Utc>::from_timestamp_millis(entry.ts)
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| entry.ts.to_string()),
            entry.data
        );
    }
    ExitCode::Success
}
