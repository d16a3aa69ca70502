//! Decision-trace properties: every autopilot decision is chained, pins
//! the policy hash, and survives restarts.

mod common;

use std::time::{Duration, Instant};

use atlasbridge::autopilot::{AutopilotEngine, DecisionTrace};
use atlasbridge::policy::{CompiledPolicy, Policy};
use atlasbridge::types::{AutopilotMode, Confidence, PromptEvent, PromptType, SessionId, Signal};

const POLICY: &str = r#"
version: 1
rules:
  - id: deny-rm
    match:
      text_contains: "rm -rf"
    action:
      type: deny
      reason: destructive delete
      risk_level: high
"#;

fn engine(dir: &std::path::Path) -> AutopilotEngine {
    AutopilotEngine::new(
        CompiledPolicy::compile(Policy::from_yaml(POLICY).unwrap()).unwrap(),
        AutopilotMode::Full,
        Duration::from_secs(10),
        &dir.join("autopilot.state"),
        &dir.join("autopilot_decisions.jsonl"),
    )
    .unwrap()
}

fn event(excerpt: &str) -> PromptEvent {
    PromptEvent::create(
        SessionId::new("s1"),
        PromptType::YesNo,
        Confidence::High,
        Signal::Pattern,
        excerpt,
        300,
    )
}

#[test]
fn every_consideration_lands_in_the_trace() {
    let (tmp, _) = common::temp_data_dir();
    let engine = engine(tmp.path());

    engine.consider(&event("rm -rf build/? [y/N]"), "claude", None, Instant::now());
    engine.consider(&event("Deploy now? [y/N]"), "claude", None, Instant::now());

    let trace = DecisionTrace::open(&tmp.path().join("autopilot_decisions.jsonl")).unwrap();
    let entries = trace.read_all().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].data["matched_rule_id"], "deny-rm");
    assert_eq!(entries[0].data["action"], "deny");
    assert_eq!(entries[0].data["risk_level"], "high");
    assert_eq!(entries[1].data["action"], "require_human");
    assert!(trace.verify().unwrap());
}

#[test]
fn trace_pins_the_policy_hash() {
    let (tmp, _) = common::temp_data_dir();
    let engine = engine(tmp.path());
    let hash = engine.policy_hash();
    engine.consider(&event("rm -rf /? [y/N]"), "claude", None, Instant::now());

    let trace = DecisionTrace::open(&tmp.path().join("autopilot_decisions.jsonl")).unwrap();
    let entries = trace.read_all().unwrap();
    assert_eq!(entries[0].data["policy_hash"], hash.as_str());
}

#[test]
fn trace_chain_resumes_across_engine_restarts() {
    let (tmp, _) = common::temp_data_dir();
    {
        let engine = engine(tmp.path());
        engine.consider(&event("rm -rf a? [y/N]"), "claude", None, Instant::now());
    }
    {
        let engine = engine(tmp.path());
        engine.consider(&event("rm -rf b? [y/N]"), "claude", None, Instant::now());
    }

    let trace = DecisionTrace::open(&tmp.path().join("autopilot_decisions.jsonl")).unwrap();
    let entries = trace.read_all().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[1].prev_hash, entries[0].entry_hash);
    assert!(trace.verify().unwrap());
}

#[test]
fn audit_and_decision_chains_are_separate() {
    // The decision trace starts at the genesis hash regardless of what
    // the audit log contains; they are independent chains.
    let (tmp, data_dir) = common::temp_data_dir();
    data_dir.ensure().unwrap();
    {
        let mut log = atlasbridge::ledger::AuditLog::open(&data_dir.audit_path()).unwrap();
        log.append(
            atlasbridge::ledger::EventKind::Injected,
            serde_json::json!({}),
        )
        .unwrap();
    }

    let engine = engine(tmp.path());
    engine.consider(&event("rm -rf c? [y/N]"), "claude", None, Instant::now());

    let trace = DecisionTrace::open(&tmp.path().join("autopilot_decisions.jsonl")).unwrap();
    let entries = trace.read_all().unwrap();
    assert_eq!(entries[0].prev_hash, atlasbridge::ledger::GENESIS_HASH);
}
