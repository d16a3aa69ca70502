//! End-to-end scenarios through the full service: supervisor, detector,
//! router, console channel, store, and audit chain together.

mod common;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use atlasbridge::ledger::{AuditLog, EventKind};
use atlasbridge::types::{AutopilotMode, BridgeConfig, PromptStatus};

/// `Continue? [y/N] ` with no newline; the human answers `y`.
#[test]
fn partial_line_prompt_resolves_through_the_channel() {
    let (tmp, data_dir) = common::temp_data_dir();
    let (channel, service) = common::console_service(&data_dir);

    let answering = {
        let channel = Arc::clone(&channel);
        thread::spawn(move || {
            for _ in 0..200 {
                if let Some(delivery) = channel.deliveries().first().cloned() {
                    channel.push_reply(&delivery.prompt_id, &delivery.nonce, "y");
                    return Some(delivery.prompt_id);
                }
                thread::sleep(Duration::from_millis(50));
            }
            None
        })
    };

    let exit_code = service
        .run_tool(
            "generic",
            "/bin/sh",
            vec![
                "-c".into(),
                r#"printf 'Continue? [y/N] '; read ans; [ "$ans" = "y" ]"#.into(),
            ],
            Some("e2e".into()),
            false,
            Arc::new(AtomicBool::new(false)),
        )
        .expect("supervised run");
    assert_eq!(exit_code, 0);

    let prompt_id = answering.join().unwrap().expect("prompt delivered");
    wait_for_state(&service, &prompt_id, PromptStatus::Resolved);
    service.shutdown();

    // Audit: INJECTED precedes RESOLVED, chain verifies.
    let log = AuditLog::open(&tmp.path().join("audit.log")).unwrap();
    assert!(log.verify(None).unwrap().valid);
    let kinds: Vec<EventKind> = log.read_all().unwrap().iter().map(|r| r.kind).collect();
    let injected = kinds.iter().position(|k| *k == EventKind::Injected).unwrap();
    let resolved = kinds.iter().position(|k| *k == EventKind::Resolved).unwrap();
    assert!(injected < resolved);
}

/// The same channel callback twice: one injection, one silent drop.
#[test]
fn duplicate_callback_injects_exactly_once() {
    let (tmp, data_dir) = common::temp_data_dir();
    let (channel, service) = common::console_service(&data_dir);

    let answering = {
        let channel = Arc::clone(&channel);
        thread::spawn(move || {
            for _ in 0..200 {
                if let Some(delivery) = channel.deliveries().first().cloned() {
                    channel.push_reply(&delivery.prompt_id, &delivery.nonce, "n");
                    channel.push_reply(&delivery.prompt_id, &delivery.nonce, "n");
                    return;
                }
                thread::sleep(Duration::from_millis(50));
            }
            panic!("no delivery observed");
        })
    };

    let exit_code = service
        .run_tool(
            "generic",
            "/bin/sh",
            vec![
                "-c".into(),
                r#"printf 'Overwrite? [y/N] '; read ans; [ "$ans" = "n" ]"#.into(),
            ],
            None,
            false,
            Arc::new(AtomicBool::new(false)),
        )
        .expect("supervised run");
    assert_eq!(exit_code, 0);
    answering.join().unwrap();
    service.shutdown();

    let log = AuditLog::open(&tmp.path().join("audit.log")).unwrap();
    let injected = log
        .read_all()
        .unwrap()
        .iter()
        .filter(|r| r.kind == EventKind::Injected)
        .count();
    assert_eq!(injected, 1, "duplicate callback must not inject twice");
}

/// A reply from an identity off the allowlist is dropped and audited;
/// the allowlisted identity still wins afterwards.
#[test]
fn off_allowlist_identity_is_rejected() {
    let (tmp, data_dir) = common::temp_data_dir();
    let (channel, service) = common::console_service(&data_dir);

    let answering = {
        let channel = Arc::clone(&channel);
        thread::spawn(move || {
            for _ in 0..200 {
                if let Some(delivery) = channel.deliveries().first().cloned() {
                    channel.push_reply_from(
                        &delivery.prompt_id,
                        &delivery.nonce,
                        "telegram:9999",
                        "y",
                    );
                    // The legitimate identity answers afterwards.
                    channel.push_reply(&delivery.prompt_id, &delivery.nonce, "n");
                    return;
                }
                thread::sleep(Duration::from_millis(50));
            }
            panic!("no delivery observed");
        })
    };

    let exit_code = service
        .run_tool(
            "generic",
            "/bin/sh",
            vec![
                "-c".into(),
                r#"printf 'Dangerous? [y/N] '; read ans; [ "$ans" = "n" ]"#.into(),
            ],
            None,
            false,
            Arc::new(AtomicBool::new(false)),
        )
        .expect("supervised run");
    // The child saw "n", not the intruder's "y".
    assert_eq!(exit_code, 0);
    answering.join().unwrap();
    service.shutdown();

    let log = AuditLog::open(&tmp.path().join("audit.log")).unwrap();
    let rejected = log
        .read_all()
        .unwrap()
        .iter()
        .filter(|r| r.kind == EventKind::IdentityRejected)
        .count();
    assert_eq!(rejected, 1);
}

/// Autopilot full mode: a deny rule injects the synthetic negative with
/// no human involvement, and the channel only sees a notice.
#[test]
fn autopilot_deny_short_circuits_the_human() {
    let (tmp, data_dir) = common::temp_data_dir();
    data_dir.ensure().unwrap();
    std::fs::write(
        data_dir.policy_path(),
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
    .unwrap();

    let mut config = BridgeConfig::default();
    config.autopilot.mode = AutopilotMode::Full;
    let (channel, service) = common::console_service_with_config(&data_dir, config);

    let exit_code = service
        .run_tool(
            "generic",
            "/bin/sh",
            vec![
                "-c".into(),
                r#"printf 'Force push? [y/N] '; read ans; [ "$ans" = "n" ]"#.into(),
            ],
            None,
            false,
            Arc::new(AtomicBool::new(false)),
        )
        .expect("supervised run");
    assert_eq!(exit_code, 0, "the synthetic 'n' should reach the child");

    // No delivery happened; only the non-blocking deny notice.
    assert!(channel.deliveries().is_empty());
    assert!(channel
        .notices()
        .iter()
        .any(|n| n.contains("deny") && n.contains("deny-force-push")));
    service.shutdown();

    // The injection is attributed to the synthetic source in the audit.
    let log = AuditLog::open(&tmp.path().join("audit.log")).unwrap();
    let records = log.read_all().unwrap();
    let injected = records
        .iter()
        .find(|r| r.kind == EventKind::Injected)
        .expect("one injected record");
    assert_eq!(injected.data["source"], "synthetic");
}

fn wait_for_state(
    service: &atlasbridge::daemon::Service,
    prompt_id: &atlasbridge::types::PromptId,
    wanted: PromptStatus,
) {
    for _ in 0..100 {
        if service.store.get_prompt(prompt_id).unwrap().unwrap().status == wanted {
            return;
        }
        thread::sleep(Duration::from_millis(20));
    }
    panic!(
        "prompt never reached {wanted:?}, is {:?}",
        service.store.get_prompt(prompt_id).unwrap().unwrap().status
    );
}
