//! `doctor [--fix]` -- self-diagnose the environment and state files.
//!
//! Checks run in severity order: environment (exit 3), permissions
//! (exit 5), state corruption (exit 8). `--fix` repairs what can be
//! repaired: file modes, and an explicit chain reset for a corrupt audit
//! log (the reset writes a new chain-root marker).

use atlasbridge_ledger::AuditLog;
use atlasbridge_policy::Policy;
use atlasbridge_store::StoreHandle;
use atlasbridge_types::paths::DataDir;
use atlasbridge_types::ExitCode;

pub fn execute(data_dir: &DataDir, fix: bool) -> ExitCode {
    let mut worst = ExitCode::Success;

    // Environment: the data directory itself.
    if !data_dir.root().exists() {
        if fix {
            match data_dir.ensure() {
                Ok(()) => println!("fixed: created data directory {}", data_dir.root().display()),
                Err(e) => {
                    println!("FAIL: cannot create data directory ({e})");
                    return ExitCode::Environment;
                }
            }
        } else {
            println!(
                "FAIL: data directory {} does not exist (run with --fix)",
                data_dir.root().display()
            );
            return ExitCode::Environment;
        }
    }
    println!("ok: data directory {}", data_dir.root().display());

    // Permissions: secret-bearing files must be 0600.
    for path in [data_dir.config_path(), data_dir.pid_path()] {
        if !path.exists() {
            continue;
        }
        match file_mode(&path) {
            Some(mode) if mode & 0o077 != 0 => {
                if fix {
                    set_mode(&path, 0o600);
                    println!("fixed: {} -> 0600", path.display());
                } else {
                    println!(
                        "FAIL: {} is mode {:o}, expected 0600 (run with --fix)",
                        path.display(),
                        mode & 0o777
                    );
                    worst = worst_of(worst, ExitCode::Permission);
                }
            }
            Some(_) => println!("ok: {} permissions", path.display()),
            None => {}
        }
    }

    // State: the prompt store must open.
    let db_path = data_dir.db_path();
    if db_path.exists() {
        match StoreHandle::open(&db_path) {
            Ok(store) => match store.count_by_state() {
                Ok(_) => println!("ok: prompt store opens"),
                Err(e) => {
                    println!("FAIL: prompt store is unreadable ({e})");
                    worst = worst_of(worst, ExitCode::StateCorruption);
                }
            },
            Err(e) => {
                println!("FAIL: prompt store cannot open ({e})");
                worst = worst_of(worst, ExitCode::StateCorruption);
            }
        }
    } else {
        println!("ok: prompt store not created yet");
    }

    // State: the audit chain must verify.
    let audit_path = data_dir.audit_path();
    if audit_path.exists() {
        match AuditLog::open(&audit_path).and_then(|log| log.verify(None)) {
            Ok(report) if report.valid => {
                println!("ok: audit chain ({} records)", report.total_records)
            }
            Ok(report) => {
                println!("FAIL: audit chain broken ({})", report.message);
                worst = handle_audit_corruption(&audit_path, fix, worst);
            }
            Err(e) => {
                println!("FAIL: audit log unreadable ({e})");
                worst = handle_audit_corruption(&audit_path, fix, worst);
            }
        }
    } else {
        println!("ok: audit log not created yet");
    }

    // State: the decision trace chain must verify.
    let trace_path = data_dir.decision_trace_path();
    if trace_path.exists() {
        match atlasbridge_autopilot::DecisionTrace::open(&trace_path).and_then(|t| t.verify()) {
            Ok(true) => println!("ok: decision trace chain"),
            Ok(false) => {
                println!("FAIL: decision trace chain broken");
                worst = worst_of(worst, ExitCode::StateCorruption);
            }
            Err(e) => {
                println!("FAIL: decision trace unreadable ({e})");
                worst = worst_of(worst, ExitCode::StateCorruption);
            }
        }
    } else {
        println!("ok: decision trace not created yet");
    }

    // Config and policy parse problems are reported but are their own
    // commands' job to fix.
    if data_dir.policy_path().exists() {
        match std::fs::read_to_string(data_dir.policy_path()) {
            Ok(content) => match Policy::from_yaml(&content) {
                Ok(_) => println!("ok: policy parses"),
                Err(e) => println!("warn: policy invalid ({e}); run `atlasbridge policy validate`"),
            },
            Err(e) => println!("warn: policy unreadable ({e})"),
        }
    }

    if worst == ExitCode::Success {
        println!("All checks passed.");
    } else {
        eprintln!("Problems found.");
        eprintln!(
            "Re-run with --fix, or follow the FAIL lines above. (exit {})",
            worst.code()
        );
    }
    worst
}

fn handle_audit_corruption(
    path: &std::path::Path,
    fix: bool,
    worst: ExitCode,
) -> ExitCode {
    if fix {
        let backup = path.with_extension("log.corrupt");
        if std::fs::rename(path, &backup).is_ok() {
            println!("fixed: corrupt audit log moved to {}", backup.display());
        }
        match AuditLog::reset(path) {
            Ok(_) => {
                println!("fixed: new audit chain started (chain-root marker written)");
                worst
            }
            Err(e) => {
                println!("FAIL: cannot reset audit chain ({e})");
                worst_of(worst, ExitCode::StateCorruption)
            }
        }
    } else {
        worst_of(worst, ExitCode::StateCorruption)
    }
}

fn worst_of(a: ExitCode, b: ExitCode) -> ExitCode {
    // Corruption outranks permissions outranks environment.
    let rank = |c: ExitCode| match c {
        ExitCode::StateCorruption => 3,
        ExitCode::Permission => 2,
        ExitCode::Environment => 1,
        _ => 0,
    };
    if rank(b) > rank(a) {
        b
    } else {
        a
    }
}

fn file_mode(path: &std::path::Path) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path).ok().map(|m| m.permissions().mode())
}

fn set_mode(path: &std::path::Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;
    let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode));
}
