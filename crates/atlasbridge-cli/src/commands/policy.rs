//! `policy validate|test|migrate` -- policy tooling.

use std::path::Path;

use atlasbridge_policy::{evaluate, migrate_v0_to_v1, CompiledPolicy, Policy, PromptFacts};
use atlasbridge_types::paths::DataDir;
use atlasbridge_types::{ExitCode, PromptId, SessionId};

use super::fail;

pub fn validate(file: &Path) -> ExitCode {
    let content = match std::fs::read_to_string(file) {
        Ok(content) => content,
        Err(e) => {
            return fail(
                &format!("Cannot read {} ({e})", file.display()),
                "Check the path and its permissions",
                ExitCode::Config,
            )
        }
    };
    match CompiledPolicy::from_yaml(&content) {
        Ok(policy) => {
            println!(
                "Policy valid: {} rule(s), hash {}",
                policy.rules.len(),
                &policy.content_hash[..16]
            );
            ExitCode::Success
        }
        Err(e) => fail(
            &format!("Policy is invalid ({e})"),
            "Fix the rule listed above; `policy migrate` converts v0 files",
            ExitCode::Config,
        ),
    }
}

#[allow(clippy::too_many_arguments)]
pub fn test(
    data_dir: &DataDir,
    file: Option<&Path>,
    excerpt: &str,
    prompt_type: &str,
    confidence: &str,
    tool: &str,
) -> ExitCode {
    let path = file
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| data_dir.policy_path());
    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) => {
            return fail(
                &format!("Cannot read {} ({e})", path.display()),
                "Pass --file or create policy.yaml in the data directory",
                ExitCode::Config,
            )
        }
    };
    let policy = match CompiledPolicy::from_yaml(&content) {
        Ok(policy) => policy,
        Err(e) => {
            return fail(
                &format!("Policy is invalid ({e})"),
                "Run `atlasbridge policy validate` for details",
                ExitCode::Config,
            )
        }
    };

    let prompt_type = match prompt_type.parse() {
        Ok(t) => t,
        Err(e) => return fail(&format!("Bad prompt type ({e})"), "Use yes_no, confirm_enter, multiple_choice, or free_text", ExitCode::Config),
    };
    let confidence = match confidence.parse() {
        Ok(c) => c,
        Err(e) => return fail(&format!("Bad confidence ({e})"), "Use low, medium, or high", ExitCode::Config),
    };

    let prompt_id = PromptId::new("policy-test");
    let session_id = SessionId::new("policy-test");
    let decision = evaluate(
        &policy,
        &PromptFacts {
            prompt_id: &prompt_id,
            session_id: &session_id,
            prompt_type,
            confidence,
            excerpt,
            tool,
            session_label: None,
        },
    );

    match &decision.matched_rule_id {
        Some(rule) => println!("matched rule: {rule}"),
        None => println!("matched rule: (none)"),
    }
    println!("action: {}", decision.action.kind());
    if let Some(risk) = decision.risk_level {
        println!("risk level: {risk:?}");
    }
    println!("explanation: {}", decision.explanation);
    println!("policy hash: {}", &decision.policy_hash[..16]);
    ExitCode::Success
}

pub fn migrate(file: &Path) -> ExitCode {
    let content = match std::fs::read_to_string(file) {
        Ok(content) => content,
        Err(e) => {
            return fail(
                &format!("Cannot read {} ({e})", file.display()),
                "Check the path and its permissions",
                ExitCode::Config,
            )
        }
    };

    // Already v1: nothing to do.
    if Policy::from_yaml(&content).is_ok() {
        println!("Policy is already v1; no migration needed.");
        return ExitCode::Success;
    }

    let migrated = match migrate_v0_to_v1(&content) {
        Ok(policy) => policy,
        Err(e) => {
            return fail(
                &format!("Migration failed ({e})"),
                "Fix the v0 file or write a v1 policy from scratch",
                ExitCode::Config,
            )
        }
    };

    let backup = file.with_extension("yaml.bak");
    if let Err(e) = std::fs::copy(file, &backup) {
        return fail(
            &format!("Cannot back up the original ({e})"),
            "Ensure the directory is writable",
            ExitCode::Config,
        );
    }
    let yaml = match serde_yaml_to_string(&migrated) {
        Ok(yaml) => yaml,
        Err(e) => {
            return fail(
                &format!("Cannot serialize the migrated policy ({e})"),
                "Report this; the original file is untouched",
                ExitCode::Error,
            )
        }
    };
    if let Err(e) = std::fs::write(file, yaml) {
        return fail(
            &format!("Cannot write the migrated policy ({e})"),
            "Ensure the file is writable; the backup is next to it",
            ExitCode::Config,
        );
    }

    println!(
        "Migrated {} rule(s) to v1; original saved as {}",
        migrated.rules.len(),
        backup.display()
    );
    ExitCode::Success
}

fn serde_yaml_to_string(policy: &Policy) -> Result<String, String> {
    serde_yaml::to_string(policy).map_err(|e| e.to_string())
}
