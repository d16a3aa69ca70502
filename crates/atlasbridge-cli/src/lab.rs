//! The prompt lab: deterministic regression scenarios.
//!
//! Each scenario drives the real detector, store, and engine in-process
//! with fixed inputs, so a failure means behavior changed, not timing.
//! `lab run <name>` runs one; `lab run --all` runs the suite and exits
//! nonzero if anything fails.

use std::time::{Duration, Instant};

use chrono::Utc;

use atlasbridge_autopilot::{AutopilotEngine, Disposition};
use atlasbridge_pilot::adapters::claude::ClaudeAdapter;
use atlasbridge_pilot::adapters::generic::GenericAdapter;
use atlasbridge_pilot::Detector;
use atlasbridge_policy::{CompiledPolicy, Policy};
use atlasbridge_store::{CommitResult, Database};
use atlasbridge_types::{
    AutopilotMode, Confidence, ExitCode, PromptEvent, PromptStatus, PromptType, ReplySource,
    Session, Signal,
};

type Scenario = fn() -> Result<(), String>;

const SCENARIOS: &[(&str, Scenario)] = &[
    ("partial_line", qa_partial_line),
    ("ansi_escape", qa_ansi_escape),
    ("multiple_choice", qa_multiple_choice),
    ("echo_suppression", qa_echo_suppression),
    ("silence_fallback", qa_silence_fallback),
    ("duplicate_callback", qa_duplicate_callback),
    ("ttl_expiry", qa_ttl_expiry),
    ("autopilot_deny", qa_autopilot_deny),
];

pub fn execute(scenario: Option<&str>, all: bool) -> ExitCode {
    let selected: Vec<&(&str, Scenario)> = if all {
        SCENARIOS.iter().collect()
    } else {
        match scenario {
            Some(name) => {
                let found: Vec<_> = SCENARIOS.iter().filter(|(n, _)| *n == name).collect();
                if found.is_empty() {
                    eprintln!("Unknown scenario {name:?}.");
                    eprintln!(
                        "Known scenarios: {}. (exit {})",
                        SCENARIOS
                            .iter()
                            .map(|(n, _)| *n)
                            .collect::<Vec<_>>()
                            .join(", "),
                        ExitCode::Config.code()
                    );
                    return ExitCode::Config;
                }
                found
            }
            None => {
                eprintln!("Pass a scenario name or --all.");
                eprintln!(
                    "Known scenarios: {}. (exit {})",
                    SCENARIOS
                        .iter()
                        .map(|(n, _)| *n)
                        .collect::<Vec<_>>()
                        .join(", "),
                    ExitCode::Config.code()
                );
                return ExitCode::Config;
            }
        }
    };

    let mut failed = 0;
    for (name, run) in selected {
        match run() {
            Ok(()) => println!("PASS {name}"),
            Err(e) => {
                println!("FAIL {name}: {e}");
                failed += 1;
            }
        }
    }
    if failed > 0 {
        eprintln!("{failed} scenario(s) failed.");
        eprintln!("Inspect the FAIL lines above. (exit {})", ExitCode::Error.code());
        ExitCode::Error
    } else {
        ExitCode::Success
    }
}

// ---------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------

fn qa_partial_line() -> Result<(), String> {
    let adapter = ClaudeAdapter::new();
    let mut detector = Detector::new(2000, 500);
    let t0 = Instant::now();
    detector.feed(b"Continue? [y/N] ", t0);

    let detection = detector
        .check(&adapter, false, t0)
        .ok_or("no detection for a partial-line prompt")?;
    expect(detection.prompt_type == PromptType::YesNo, "type should be yes_no")?;
    expect(detection.confidence == Confidence::High, "confidence should be high")?;
    expect(detection.signal == Signal::Pattern, "signal should be pattern")?;
    Ok(())
}

fn qa_ansi_escape() -> Result<(), String> {
    let adapter = ClaudeAdapter::new();
    let mut detector = Detector::new(2000, 500);
    let t0 = Instant::now();
    detector.feed(b"\x1b[1mProceed?\x1b[0m \x1b[36m[y/N]\x1b[0m ", t0);

    let detection = detector
        .check(&adapter, false, t0)
        .ok_or("no detection behind ANSI styling")?;
    expect(detection.prompt_type == PromptType::YesNo, "type should be yes_no")?;
    expect(
        detection.excerpt.contains("Proceed?"),
        "excerpt should keep the stripped text",
    )?;
    Ok(())
}

fn qa_multiple_choice() -> Result<(), String> {
    let adapter = ClaudeAdapter::new();
    let mut detector = Detector::new(2000, 500);
    let t0 = Instant::now();
    detector.feed(
        "Do you want to proceed?\n\u{276f} 1. Yes\n  2. Yes, and don't ask again\n  3. No\n"
            .as_bytes(),
        t0,
    );

    let detection = detector
        .check(&adapter, false, t0)
        .ok_or("no detection for a numbered menu")?;
    expect(
        detection.prompt_type == PromptType::MultipleChoice,
        "type should be multiple_choice",
    )?;
    expect(detection.options.len() == 3, "three options should be extracted")?;
    expect(detection.options[2] == "No", "third option should be 'No'")?;
    Ok(())
}

fn qa_echo_suppression() -> Result<(), String> {
    let adapter = ClaudeAdapter::new();
    let mut detector = Detector::new(2000, 500);
    let t0 = Instant::now();

    detector.observe_injection(t0);
    // The child echoes the injected byte and a fresh prompt 200ms later.
    let t1 = t0 + Duration::from_millis(200);
    detector.feed(b"y\nContinue? [y/N] ", t1);
    expect(
        detector.check(&adapter, false, t1).is_none(),
        "detection must stay muted inside the suppression window",
    )?;

    let t2 = t0 + Duration::from_millis(600);
    expect(
        detector.check(&adapter, false, t2).is_some(),
        "detection should resume after the window",
    )?;
    Ok(())
}

fn qa_silence_fallback() -> Result<(), String> {
    let adapter = GenericAdapter::with_defaults();
    let mut detector = Detector::new(2000, 500);
    let t0 = Instant::now();
    detector.feed(b"What should I do about the failing test", t0);

    expect(
        detector
            .check(&adapter, false, t0 + Duration::from_millis(1500))
            .is_none(),
        "no signal before the silence threshold",
    )?;
    let detection = detector
        .check(&adapter, false, t0 + Duration::from_millis(2100))
        .ok_or("silence signal should fire")?;
    expect(detection.signal == Signal::Silence, "signal should be silence")?;
    expect(detection.confidence == Confidence::Low, "confidence should be low")?;
    Ok(())
}

fn qa_duplicate_callback() -> Result<(), String> {
    let db = Database::open_in_memory().map_err(|e| e.to_string())?;
    let session = Session::start("claude", None);
    db.insert_session(&session).map_err(|e| e.to_string())?;

    let prompt = PromptEvent::create(
        session.session_id.clone(),
        PromptType::YesNo,
        Confidence::High,
        Signal::Pattern,
        "Apply the change? [y/N]",
        300,
    );
    db.insert_prompt(&prompt).map_err(|e| e.to_string())?;
    db.transition(&prompt.prompt_id, PromptStatus::Created, PromptStatus::Routed)
        .map_err(|e| e.to_string())?;
    db.transition(&prompt.prompt_id, PromptStatus::Routed, PromptStatus::AwaitingReply)
        .map_err(|e| e.to_string())?;

    let now = Utc::now().timestamp_millis();
    let first = db
        .decide_prompt(&prompt.prompt_id, &session.session_id, "n", ReplySource::Human, now)
        .map_err(|e| e.to_string())?;
    let second = db
        .decide_prompt(&prompt.prompt_id, &session.session_id, "n", ReplySource::Human, now)
        .map_err(|e| e.to_string())?;
    expect(first == CommitResult::Accepted, "first callback should win")?;
    expect(
        second == CommitResult::AlreadyDecided,
        "second identical callback should be a no-op",
    )?;
    Ok(())
}

fn qa_ttl_expiry() -> Result<(), String> {
    let db = Database::open_in_memory().map_err(|e| e.to_string())?;
    let session = Session::start("claude", None);
    db.insert_session(&session).map_err(|e| e.to_string())?;

    let prompt = PromptEvent::create(
        session.session_id.clone(),
        PromptType::YesNo,
        Confidence::High,
        Signal::Pattern,
        "Keep waiting? [y/N]",
        30,
    );
    db.insert_prompt(&prompt).map_err(|e| e.to_string())?;
    db.transition(&prompt.prompt_id, PromptStatus::Created, PromptStatus::Routed)
        .map_err(|e| e.to_string())?;
    db.transition(&prompt.prompt_id, PromptStatus::Routed, PromptStatus::AwaitingReply)
        .map_err(|e| e.to_string())?;

    // T+31s: the sweeper fires.
    let later = prompt.created_at.timestamp_millis() + 31_000;
    let swept = db.sweep_expired(later).map_err(|e| e.to_string())?;
    expect(swept.len() == 1, "one prompt should expire")?;

    let result = db
        .decide_prompt(&prompt.prompt_id, &session.session_id, "y", ReplySource::Human, later)
        .map_err(|e| e.to_string())?;
    expect(result == CommitResult::Expired, "a late reply should classify as expired")?;
    Ok(())
}

fn qa_autopilot_deny() -> Result<(), String> {
    let tmp = std::env::temp_dir().join(format!("ab-lab-{}", std::process::id()));
    std::fs::create_dir_all(&tmp).map_err(|e| e.to_string())?;
    let policy = Policy::from_yaml(
        r#"
version: 1
rules:
  - id: deny-force-push
    match:
      text_contains: "force push"
    action:
      type: deny
      reason: force pushes are forbidden
"#,
    )
    .map_err(|e| e.to_string())?;
    let engine = AutopilotEngine::new(
        CompiledPolicy::compile(policy).map_err(|e| e.to_string())?,
        AutopilotMode::Full,
        Duration::from_secs(10),
        &tmp.join("autopilot.state"),
        &tmp.join("decisions.jsonl"),
    )
    .map_err(|e| e.to_string())?;

    let event = PromptEvent::create(
        atlasbridge_types::SessionId::new("lab"),
        PromptType::YesNo,
        Confidence::High,
        Signal::Pattern,
        "Force push? [y/N]",
        300,
    );
    let disposition = engine.consider(&event, "claude", None, Instant::now());
    let result = match disposition {
        Disposition::Inject { value, source, .. } => {
            expect(value == "n", "deny should inject the negative")?;
            expect(source == ReplySource::Synthetic, "source should be synthetic")
        }
        other => Err(format!("expected Inject, got {other:?}")),
    };
    let _ = std::fs::remove_dir_all(&tmp);
    result
}

fn expect(condition: bool, message: &str) -> Result<(), String> {
    if condition {
        Ok(())
    } else {
        Err(message.to_string())
    }
}
