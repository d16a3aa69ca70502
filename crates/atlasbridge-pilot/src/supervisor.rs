//! The PTY supervisor and its four cooperating tasks.
//!
//! `run_supervised` spawns the child in a PTY and drives:
//!
//! - **output reader** (the calling thread): polls the PTY, feeds the
//!   detector, writes detected prompts through the store, and hands them
//!   to the router over the outbound queue;
//! - **reply injector**: consumes decided replies from the inbound queue,
//!   encodes them through the adapter, writes them into the PTY, and walks
//!   the prompt to its terminal state;
//! - **stall watchdog**: ticks at a quarter of the silence threshold so
//!   the silence signal fires even when the reader is blocked in poll;
//! - **input relay**: forwards the operator's own keystrokes to the PTY
//!   when attached to a terminal, gated during the suppression window.
//!
//! Teardown: when the child exits (or the shared cancel token trips), the
//! reader drains remaining output, peers drain their queues within a grace
//! period, and the terminal's original modes are restored by the raw-mode
//! guard on every exit path.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use atlasbridge_ledger::{AuditWriter, EventKind};
use atlasbridge_store::StoreHandle;
use atlasbridge_types::{is_terminal, BridgeError, PromptEvent, PromptStatus, Reply, Session};

use crate::adapter::ToolAdapter;
use crate::detector::Detector;
use crate::pty::PtySession;
use crate::termios_guard::RawModeGuard;

/// Deadline for a single injection write into the PTY.
const INJECT_WRITE_DEADLINE: Duration = Duration::from_secs(2);
/// How long mid-line output must be quiet before the blocked-read signal
/// is trusted (avoids firing between two write bursts).
const BLOCKED_READ_DEBOUNCE: Duration = Duration::from_millis(150);
/// Queue drain budget on shutdown.
const DRAIN_GRACE: Duration = Duration::from_secs(10);
/// Reader poll interval.
const POLL_INTERVAL_MS: i32 = 50;

/// Supervisor tuning, a slice of the startup config snapshot.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub command: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub ttl_seconds: u64,
    pub silence_ms: u64,
    pub post_inject_suppress_ms: u64,
    /// Mirror child output to stdout and relay operator keystrokes.
    pub interactive: bool,
}

/// The supervisor's two queue endpoints toward the router.
pub struct SupervisorHooks {
    /// Detected prompts flow out to the router.
    pub outbound: mpsc::SyncSender<PromptEvent>,
    /// Decided replies flow in for injection.
    pub replies: mpsc::Receiver<Reply>,
}

/// Injection coordination shared between the injector and the input relay.
///
/// The mutex is the per-session write lock on the PTY: the relay only
/// writes while no injection holds it.
struct InjectGate {
    last_injection_end: Option<Instant>,
    at_line_start: bool,
}

/// Run the supervisor until the child exits. Returns the child exit code.
pub fn run_supervised(
    session: &Session,
    adapter: Arc<dyn ToolAdapter>,
    store: StoreHandle,
    audit: AuditWriter,
    config: SupervisorConfig,
    hooks: SupervisorHooks,
    cancel: Arc<AtomicBool>,
) -> Result<i32, BridgeError> {
    let pty = Arc::new(PtySession::spawn(
        &config.command,
        &config.args,
        &config.cwd,
        &[],
    )?);
    info!(
        session_id = %session.session_id,
        command = %config.command,
        pid = pty.pid(),
        "child spawned under supervision"
    );
    audit.append(
        EventKind::SessionStarted,
        serde_json::json!({
            "session_id": session.session_id,
            "tool": session.tool,
            "command": config.command,
            "pid": pty.pid(),
        }),
    );

    let gate = Arc::new(Mutex::new(InjectGate {
        last_injection_end: None,
        at_line_start: true,
    }));

    // Raw mode only when we actually own a terminal; the guard restores it
    // on every exit path, including panics.
    let _raw_guard = if config.interactive && RawModeGuard::stdin_is_tty() {
        Some(RawModeGuard::acquire()?)
    } else {
        None
    };

    let injector = spawn_injector(
        session,
        Arc::clone(&adapter),
        Arc::clone(&pty),
        store.clone(),
        audit.clone(),
        hooks.replies,
        Arc::clone(&gate),
        Arc::clone(&cancel),
    );

    let (tick_tx, tick_rx) = mpsc::sync_channel::<()>(4);
    let watchdog = spawn_watchdog(config.silence_ms, tick_tx, Arc::clone(&cancel));

    let relay = if config.interactive && RawModeGuard::stdin_is_tty() {
        Some(spawn_input_relay(
            Arc::clone(&pty),
            Arc::clone(&gate),
            Arc::clone(&cancel),
            Duration::from_millis(config.post_inject_suppress_ms),
        ))
    } else {
        None
    };

    let read_result = reader_loop(
        session,
        adapter.as_ref(),
        &pty,
        &store,
        &audit,
        &config,
        &hooks.outbound,
        &tick_rx,
        &gate,
        &cancel,
    );

    // Cooperative teardown: peers observe the cancel token, drain, exit.
    cancel.store(true, Ordering::SeqCst);
    let _ = watchdog.join();
    let _ = injector.join();
    if let Some(relay) = relay {
        let _ = relay.join();
    }

    // An operator interrupt leaves the child running; end it before the
    // blocking wait.
    if pty.is_alive() {
        let _ = pty.terminate();
    }
    let exit_code = pty.wait()?;
    store.end_session(&session.session_id)?;
    audit.append(
        EventKind::SessionEnded,
        serde_json::json!({
            "session_id": session.session_id,
            "exit_code": exit_code,
        }),
    );
    info!(session_id = %session.session_id, exit_code, "session ended");

    read_result?;
    Ok(exit_code)
}

/// The output reader: poll, read, detect, store, enqueue.
#[allow(clippy::too_many_arguments)]
fn reader_loop(
    session: &Session,
    adapter: &dyn ToolAdapter,
    pty: &PtySession,
    store: &StoreHandle,
    audit: &AuditWriter,
    config: &SupervisorConfig,
    outbound: &mpsc::SyncSender<PromptEvent>,
    ticks: &mpsc::Receiver<()>,
    gate: &Mutex<InjectGate>,
    cancel: &AtomicBool,
) -> Result<(), BridgeError> {
    let mut detector = Detector::new(config.silence_ms, config.post_inject_suppress_ms);
    let mut read_buf = [0u8; 8192];
    let mut last_read_at: Option<Instant> = None;
    let mut seen_injection: Option<Instant> = None;

    loop {
        if cancel.load(Ordering::SeqCst) {
            break;
        }

        let readable = pty.poll_readable(POLL_INTERVAL_MS)?;
        let now = Instant::now();

        // Sync the suppression clock from the injector, once per injection.
        let injected_at = gate
            .lock()
            .map_err(|_| BridgeError::PilotError("inject gate poisoned".into()))?
            .last_injection_end;
        if injected_at != seen_injection {
            if let Some(at) = injected_at {
                detector.observe_injection(at);
            }
            seen_injection = injected_at;
        }

        if readable {
            let n = pty.read(&mut read_buf)?;
            if n == 0 {
                if !pty.is_alive() {
                    debug!("PTY read returned 0 and child exited");
                    break;
                }
            } else {
                let chunk = &read_buf[..n];
                if config.interactive {
                    use std::io::Write;
                    let _ = std::io::stdout().write_all(chunk);
                    let _ = std::io::stdout().flush();
                }
                detector.feed(chunk, now);
                last_read_at = Some(now);
            }
        }

        // Blocked-read inference: nothing to read, child alive, output
        // ended mid-line, and the quiet has lasted past the debounce.
        let blocked = !readable
            && pty.is_alive()
            && last_read_at.is_some_and(|at| now.duration_since(at) >= BLOCKED_READ_DEBOUNCE);

        let mut detection = detector.check(adapter, blocked, now);

        // Watchdog ticks drive the silence check even when poll kept
        // returning data-free wakeups.
        while ticks.try_recv().is_ok() {
            if detection.is_none() {
                detection = detector.check_silence(Instant::now());
            }
        }

        if let Some(found) = detection {
            let mut event = PromptEvent::create(
                session.session_id.clone(),
                found.prompt_type,
                found.confidence,
                found.signal,
                found.excerpt,
                config.ttl_seconds,
            );
            event.options = found.options;

            store.insert_prompt(&event)?;
            audit.append(
                EventKind::PromptCreated,
                serde_json::json!({
                    "prompt_id": event.prompt_id,
                    "session_id": event.session_id,
                    "type": event.prompt_type.as_str(),
                    "signal": event.signal.as_str(),
                    "confidence": event.confidence.as_str(),
                }),
            );
            info!(
                prompt_id = %event.prompt_id,
                signal = event.signal.as_str(),
                "prompt detected"
            );
            if outbound.send(event).is_err() {
                warn!("router hung up; stopping supervision");
                break;
            }
        }

        if !pty.is_alive() {
            // Final drain so trailing output is not lost.
            loop {
                let n = pty.read(&mut read_buf)?;
                if n == 0 {
                    break;
                }
                if config.interactive {
                    use std::io::Write;
                    let _ = std::io::stdout().write_all(&read_buf[..n]);
                }
            }
            break;
        }
    }
    Ok(())
}

/// The reply injector task.
#[allow(clippy::too_many_arguments)]
fn spawn_injector(
    session: &Session,
    adapter: Arc<dyn ToolAdapter>,
    pty: Arc<PtySession>,
    store: StoreHandle,
    audit: AuditWriter,
    replies: mpsc::Receiver<Reply>,
    gate: Arc<Mutex<InjectGate>>,
    cancel: Arc<AtomicBool>,
) -> thread::JoinHandle<()> {
    let session_id = session.session_id.clone();
    thread::Builder::new()
        .name(format!("injector-{}", &session_id.as_str()[..8.min(session_id.as_str().len())]))
        .spawn(move || {
            let mut draining_since: Option<Instant> = None;
            loop {
                let reply = match replies.recv_timeout(Duration::from_millis(100)) {
                    Ok(reply) => reply,
                    Err(mpsc::RecvTimeoutError::Timeout) => {
                        if cancel.load(Ordering::SeqCst) {
                            // Queue is empty and we are shutting down.
                            break;
                        }
                        continue;
                    }
                    Err(mpsc::RecvTimeoutError::Disconnected) => break,
                };
                if cancel.load(Ordering::SeqCst) {
                    let since = *draining_since.get_or_insert_with(Instant::now);
                    if since.elapsed() > DRAIN_GRACE {
                        warn!("drain grace elapsed; dropping remaining replies");
                        break;
                    }
                }
                inject_one(&adapter, &pty, &store, &audit, &gate, &reply);
            }
            debug!(session_id = %session_id, "reply injector exited");
        })
        .expect("failed to spawn reply injector")
}

/// Inject a single decided reply and walk the prompt to a terminal state.
fn inject_one(
    adapter: &Arc<dyn ToolAdapter>,
    pty: &PtySession,
    store: &StoreHandle,
    audit: &AuditWriter,
    gate: &Mutex<InjectGate>,
    reply: &Reply,
) {
    let prompt = match store.get_prompt(&reply.prompt_id) {
        Ok(Some(prompt)) => prompt,
        Ok(None) => {
            warn!(prompt_id = %reply.prompt_id, "reply for unknown prompt dropped");
            return;
        }
        Err(e) => {
            warn!(prompt_id = %reply.prompt_id, error = %e, "store lookup failed");
            return;
        }
    };

    // The router's decision guard already committed the reply; anything
    // else here means the prompt expired or failed in between.
    if prompt.status != PromptStatus::ReplyReceived {
        warn!(
            prompt_id = %reply.prompt_id,
            state = prompt.status.as_str(),
            "reply arrived for a prompt not in reply_received; skipping"
        );
        return;
    }

    let bytes = match adapter.encode(prompt.prompt_type, &reply.value) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(prompt_id = %reply.prompt_id, error = %e, "reply encoding rejected");
            fail_prompt(store, audit, reply, &format!("encode: {e}"));
            return;
        }
    };

    let write_result = {
        let mut gate = match gate.lock() {
            Ok(gate) => gate,
            Err(_) => {
                fail_prompt(store, audit, reply, "inject gate poisoned");
                return;
            }
        };
        let result = pty.write_all_deadline(&bytes, INJECT_WRITE_DEADLINE);
        if result.is_ok() {
            gate.last_injection_end = Some(Instant::now());
            gate.at_line_start = bytes.ends_with(b"\r") || bytes.ends_with(b"\n");
        }
        result
    };

    match write_result {
        Ok(()) => {
            // The audit record for each step is only written once the
            // store row actually recorded it; a lost CAS or store error
            // routes through the failed path instead.
            if !advance(store, audit, reply, PromptStatus::ReplyReceived, PromptStatus::Injected) {
                return;
            }
            audit.append(
                EventKind::Injected,
                serde_json::json!({
                    "prompt_id": reply.prompt_id,
                    "session_id": reply.session_id,
                    "source": reply.source.as_str(),
                    "value": reply.value,
                }),
            );
            if !advance(store, audit, reply, PromptStatus::Injected, PromptStatus::Resolved) {
                return;
            }
            audit.append(
                EventKind::Resolved,
                serde_json::json!({
                    "prompt_id": reply.prompt_id,
                    "session_id": reply.session_id,
                }),
            );
            info!(prompt_id = %reply.prompt_id, source = reply.source.as_str(), "reply injected");
        }
        Err(e) => {
            warn!(prompt_id = %reply.prompt_id, error = %e, "injection write failed");
            fail_prompt(store, audit, reply, &e.to_string());
        }
    }
}

/// Apply one lifecycle step for an injected reply. Returns `false` (after
/// failing the prompt) when the row was not in `from` anymore or the
/// store errored.
fn advance(
    store: &StoreHandle,
    audit: &AuditWriter,
    reply: &Reply,
    from: PromptStatus,
    to: PromptStatus,
) -> bool {
    match store.transition(&reply.prompt_id, from, to) {
        Ok(true) => true,
        Ok(false) => {
            warn!(
                prompt_id = %reply.prompt_id,
                from = from.as_str(),
                to = to.as_str(),
                "prompt left the expected state mid-injection"
            );
            fail_prompt(
                store,
                audit,
                reply,
                &format!("lost {} -> {} transition", from.as_str(), to.as_str()),
            );
            false
        }
        Err(e) => {
            warn!(
                prompt_id = %reply.prompt_id,
                from = from.as_str(),
                to = to.as_str(),
                error = %e,
                "store failed mid-injection"
            );
            fail_prompt(store, audit, reply, &format!("store: {e}"));
            false
        }
    }
}

fn fail_prompt(store: &StoreHandle, audit: &AuditWriter, reply: &Reply, reason: &str) {
    match store.get_prompt(&reply.prompt_id) {
        Ok(Some(prompt)) if !is_terminal(prompt.status) => {
            if let Err(e) = store.transition(&reply.prompt_id, prompt.status, PromptStatus::Failed)
            {
                warn!(prompt_id = %reply.prompt_id, error = %e, "failed transition did not commit");
            }
        }
        Ok(_) => {} // already terminal, or gone; the audit record still lands
        Err(e) => {
            warn!(prompt_id = %reply.prompt_id, error = %e, "store lookup failed while failing prompt");
        }
    }
    audit.append(
        EventKind::Failed,
        serde_json::json!({
            "prompt_id": reply.prompt_id,
            "session_id": reply.session_id,
            "reason": reason,
        }),
    );
}

/// The stall watchdog: tick at `silence_ms / 4`.
fn spawn_watchdog(
    silence_ms: u64,
    ticks: mpsc::SyncSender<()>,
    cancel: Arc<AtomicBool>,
) -> thread::JoinHandle<()> {
    let interval = Duration::from_millis((silence_ms / 4).max(50));
    thread::Builder::new()
        .name("stall-watchdog".into())
        .spawn(move || {
            while !cancel.load(Ordering::SeqCst) {
                thread::sleep(interval);
                // A full queue just means the reader is busy; skip the tick.
                let _ = ticks.try_send(());
            }
        })
        .expect("failed to spawn stall watchdog")
}

/// The input relay: operator keystrokes -> PTY, suppression-gated.
fn spawn_input_relay(
    pty: Arc<PtySession>,
    gate: Arc<Mutex<InjectGate>>,
    cancel: Arc<AtomicBool>,
    suppress: Duration,
) -> thread::JoinHandle<()> {
    thread::Builder::new()
        .name("input-relay".into())
        .spawn(move || {
            let mut buf = [0u8; 256];
            while !cancel.load(Ordering::SeqCst) {
                if !stdin_readable(100) {
                    continue;
                }
                let n = match nix::unistd::read(libc::STDIN_FILENO, &mut buf) {
                    Ok(0) => break, // EOF
                    Ok(n) => n,
                    Err(nix::errno::Errno::EINTR) => continue,
                    Err(_) => break,
                };

                let Ok(mut gate) = gate.lock() else { break };
                let suppressed = gate
                    .last_injection_end
                    .is_some_and(|end| end.elapsed() < suppress);
                // During suppression, pass bytes only from a line start so
                // a half-typed line cannot interleave with an injection.
                if suppressed && !gate.at_line_start {
                    continue;
                }
                if pty.write_all(&buf[..n]).is_err() {
                    break;
                }
                gate.at_line_start = matches!(buf[n - 1], b'\r' | b'\n');
            }
            debug!("input relay exited");
        })
        .expect("failed to spawn input relay")
}

fn stdin_readable(timeout_ms: i32) -> bool {
    use nix::poll::{PollFd, PollFlags, PollTimeout};
    use std::os::fd::BorrowedFd;
    // Safety: STDIN_FILENO is valid for the process lifetime.
    let stdin = unsafe { BorrowedFd::borrow_raw(libc::STDIN_FILENO) };
    let mut fds = [PollFd::new(stdin, PollFlags::POLLIN)];
    let timeout = PollTimeout::try_from(timeout_ms as u32).unwrap_or(PollTimeout::MAX);
    match nix::poll::poll(&mut fds, timeout) {
        Ok(n) if n > 0 => fds[0]
            .revents()
            .is_some_and(|r| r.contains(PollFlags::POLLIN)),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atlasbridge_ledger::AuditLog;
    use atlasbridge_types::{ReplySource, SessionId};
    use chrono::Utc;
    use tempfile::TempDir;

    use crate::adapters::generic::GenericAdapter;

    fn harness(tmp: &TempDir) -> (StoreHandle, AuditWriter, thread::JoinHandle<()>) {
        let store = StoreHandle::open(&tmp.path().join("prompts.db")).unwrap();
        let log = AuditLog::open(&tmp.path().join("audit.log")).unwrap();
        let (audit, audit_thread) = AuditWriter::spawn(log);
        (store, audit, audit_thread)
    }

    fn config(command: &str, args: &[&str]) -> SupervisorConfig {
        SupervisorConfig {
            command: command.into(),
            args: args.iter().map(|s| s.to_string()).collect(),
            cwd: PathBuf::from("/tmp"),
            ttl_seconds: 30,
            silence_ms: 2000,
            post_inject_suppress_ms: 500,
            interactive: false,
        }
    }

    #[test]
    fn supervised_child_runs_to_completion() {
        let tmp = TempDir::new().unwrap();
        let (store, audit, audit_thread) = harness(&tmp);
        let session = Session::start("generic", None);
        store.insert_session(&session).unwrap();

        let (out_tx, _out_rx) = mpsc::sync_channel(16);
        let (_reply_tx, reply_rx) = mpsc::sync_channel::<Reply>(16);
        let cancel = Arc::new(AtomicBool::new(false));

        let exit_code = run_supervised(
            &session,
            Arc::new(GenericAdapter::with_defaults()),
            store.clone(),
            audit.clone(),
            config("/bin/echo", &["no prompts here"]),
            SupervisorHooks {
                outbound: out_tx,
                replies: reply_rx,
            },
            cancel,
        )
        .unwrap();
        assert_eq!(exit_code, 0);

        let ended = store.get_session(&session.session_id).unwrap().unwrap();
        assert!(ended.ended_at.is_some());

        audit.shutdown();
        audit_thread.join().unwrap();
    }

    #[test]
    fn prompt_detected_reply_injected_end_to_end() {
        let tmp = TempDir::new().unwrap();
        let (store, audit, audit_thread) = harness(&tmp);
        let session = Session::start("generic", None);
        store.insert_session(&session).unwrap();

        let (out_tx, out_rx) = mpsc::sync_channel::<PromptEvent>(16);
        let (reply_tx, reply_rx) = mpsc::sync_channel::<Reply>(16);

        // Pretend to be the router: decide the prompt, then enqueue the
        // reply for injection.
        let router_store = store.clone();
        let session_id: SessionId = session.session_id.clone();
        let router = thread::spawn(move || {
            let event = out_rx
                .recv_timeout(Duration::from_secs(10))
                .expect("prompt should be detected");
            assert_eq!(event.prompt_type, atlasbridge_types::PromptType::YesNo);

            router_store
                .transition(&event.prompt_id, PromptStatus::Created, PromptStatus::Routed)
                .unwrap();
            router_store
                .transition(&event.prompt_id, PromptStatus::Routed, PromptStatus::AwaitingReply)
                .unwrap();
            let result = router_store
                .decide_prompt(
                    &event.prompt_id,
                    &session_id,
                    "y",
                    ReplySource::Human,
                    Utc::now().timestamp_millis(),
                )
                .unwrap();
            assert_eq!(result, atlasbridge_store::CommitResult::Accepted);

            reply_tx
                .send(Reply::new(
                    event.prompt_id.clone(),
                    session_id.clone(),
                    "y",
                    ReplySource::Human,
                    None,
                ))
                .unwrap();
            event.prompt_id
        });

        // The child prints a prompt without a newline, waits for input,
        // and succeeds only when it reads "y".
        let exit_code = run_supervised(
            &session,
            Arc::new(GenericAdapter::with_defaults()),
            store.clone(),
            audit.clone(),
            config(
                "/bin/sh",
                &[
                    "-c",
                    r#"printf 'Continue? [y/N] '; read ans; [ "$ans" = "y" ]"#,
                ],
            ),
            SupervisorHooks {
                outbound: out_tx,
                replies: reply_rx,
            },
            Arc::new(AtomicBool::new(false)),
        )
        .unwrap();
        assert_eq!(exit_code, 0, "child should have read the injected 'y'");

        let prompt_id = router.join().unwrap();
        let final_state = store.get_prompt(&prompt_id).unwrap().unwrap();
        assert_eq!(final_state.status, PromptStatus::Resolved);

        audit.flush().unwrap();
        audit.shutdown();
        audit_thread.join().unwrap();

        // INJECTED precedes RESOLVED in the audit chain.
        let log = AuditLog::open(&tmp.path().join("audit.log")).unwrap();
        let kinds: Vec<EventKind> = log.read_all().unwrap().iter().map(|r| r.kind).collect();
        let injected_at = kinds.iter().position(|k| *k == EventKind::Injected);
        let resolved_at = kinds.iter().position(|k| *k == EventKind::Resolved);
        assert!(injected_at.is_some() && resolved_at.is_some());
        assert!(injected_at < resolved_at);
    }

    #[test]
    fn encode_failure_marks_prompt_failed() {
        let tmp = TempDir::new().unwrap();
        let (store, audit, audit_thread) = harness(&tmp);
        let session = Session::start("generic", None);
        store.insert_session(&session).unwrap();

        let event = PromptEvent::create(
            session.session_id.clone(),
            atlasbridge_types::PromptType::YesNo,
            atlasbridge_types::Confidence::High,
            atlasbridge_types::Signal::Pattern,
            "Continue? [y/N]",
            300,
        );
        store.insert_prompt(&event).unwrap();
        store
            .transition(&event.prompt_id, PromptStatus::Created, PromptStatus::Routed)
            .unwrap();
        store
            .decide_prompt(
                &event.prompt_id,
                &session.session_id,
                "maybe", // not encodable as yes/no
                ReplySource::Human,
                Utc::now().timestamp_millis(),
            )
            .unwrap();

        let pty = Arc::new(
            PtySession::spawn("/bin/cat", &[], &PathBuf::from("/tmp"), &[]).unwrap(),
        );
        let gate = Mutex::new(InjectGate {
            last_injection_end: None,
            at_line_start: true,
        });
        let adapter: Arc<dyn ToolAdapter> = Arc::new(GenericAdapter::with_defaults());
        let reply = Reply::new(
            event.prompt_id.clone(),
            session.session_id.clone(),
            "maybe",
            ReplySource::Human,
            None,
        );
        inject_one(&adapter, &pty, &store, &audit, &gate, &reply);

        let state = store.get_prompt(&event.prompt_id).unwrap().unwrap();
        assert_eq!(state.status, PromptStatus::Failed);

        pty.write_all(&[0x04]).ok();
        pty.wait().ok();
        audit.shutdown();
        audit_thread.join().unwrap();
    }
}
