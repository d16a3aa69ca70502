//! Service wiring: store + ledger + channel + engine + router + sweeper.
//!
//! `Service::bootstrap` opens every durable component, runs restart
//! recovery, and starts the long-lived tasks (router inbox, channel
//! receiver, sweeper). `run_tool` then drives one supervised session in
//! the foreground; the background daemon runs the same service without
//! sessions, recovering and sweeping prompts left by crashed runs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{info, warn};

use atlasbridge_autopilot::AutopilotEngine;
use atlasbridge_channel::{
    Allowlist, Channel, ConsoleChannel, InboundReply, TelegramChannel,
};
use atlasbridge_ledger::{AuditLog, AuditWriter};
use atlasbridge_pilot::adapters::create_adapter;
use atlasbridge_pilot::{run_supervised, SupervisorConfig, SupervisorHooks};
use atlasbridge_policy::{CompiledPolicy, Policy};
use atlasbridge_store::StoreHandle;
use atlasbridge_types::paths::DataDir;
use atlasbridge_types::{
    AutopilotMode, BridgeConfig, BridgeError, PromptEvent, Reply, Session,
};

use crate::router::{Router, RouterMsg};
use crate::sessions::{SessionHandle, SessionManager};
use crate::sweeper;

/// Bounded queue sizes; backpressure over memory growth.
const ROUTER_QUEUE: usize = 256;
const INJECT_QUEUE: usize = 64;

/// A running relay service.
pub struct Service {
    pub store: StoreHandle,
    pub audit: AuditWriter,
    pub channel: Arc<dyn Channel>,
    pub engine: Option<Arc<AutopilotEngine>>,
    pub sessions: SessionManager,
    pub router: Arc<Router>,
    config: BridgeConfig,
    router_tx: mpsc::SyncSender<RouterMsg>,
    cancel: Arc<AtomicBool>,
    /// Raised by the sweeper when the audit writer dies; fatal.
    audit_failed: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
    audit_thread: Option<JoinHandle<()>>,
}

impl Service {
    /// Open everything from config, using the channel the config names.
    pub fn bootstrap(config: BridgeConfig, data_dir: &DataDir) -> Result<Self, BridgeError> {
        let (channel, allowlist) = build_channel(&config)?;
        Self::bootstrap_with_channel(config, data_dir, channel, allowlist)
    }

    /// Open everything from config with an explicit channel (tests, lab).
    pub fn bootstrap_with_channel(
        config: BridgeConfig,
        data_dir: &DataDir,
        channel: Arc<dyn Channel>,
        allowlist: Allowlist,
    ) -> Result<Self, BridgeError> {
        data_dir.ensure()?;
        let store = StoreHandle::open(&data_dir.db_path())?;
        let log = AuditLog::open(&data_dir.audit_path())?;
        let (audit, audit_thread) = AuditWriter::spawn(log);

        let engine = build_engine(&config, data_dir)?;
        let sessions = SessionManager::new();
        let router = Arc::new(Router::new(
            store.clone(),
            Arc::clone(&channel),
            audit.clone(),
            engine.clone(),
            allowlist,
            sessions.clone(),
        ));

        let cancel = Arc::new(AtomicBool::new(false));
        let mut threads = Vec::new();

        // One router task, one unified inbox.
        let (router_tx, router_rx) = mpsc::sync_channel::<RouterMsg>(ROUTER_QUEUE);
        {
            let router = Arc::clone(&router);
            let cancel = Arc::clone(&cancel);
            threads.push(
                thread::Builder::new()
                    .name("router".into())
                    .spawn(move || loop {
                        match router_rx.recv_timeout(Duration::from_millis(100)) {
                            Ok(msg) => router.handle(msg),
                            Err(mpsc::RecvTimeoutError::Timeout) => {
                                if cancel.load(Ordering::SeqCst) {
                                    break;
                                }
                            }
                            Err(mpsc::RecvTimeoutError::Disconnected) => break,
                        }
                    })
                    .map_err(|e| BridgeError::ConfigError(format!("spawn router: {e}")))?,
            );
        }

        // Channel receiver, bridged into the router inbox.
        let (inbound_tx, inbound_rx) = mpsc::sync_channel::<InboundReply>(ROUTER_QUEUE);
        let receiver = channel
            .spawn_receiver(inbound_tx, Arc::clone(&cancel))
            .map_err(|e| BridgeError::ChannelError(e.to_string()))?;
        threads.push(receiver);
        {
            let router_tx = router_tx.clone();
            let cancel = Arc::clone(&cancel);
            threads.push(
                thread::Builder::new()
                    .name("inbound-bridge".into())
                    .spawn(move || loop {
                        match inbound_rx.recv_timeout(Duration::from_millis(100)) {
                            Ok(reply) => {
                                if router_tx.send(RouterMsg::Inbound(reply)).is_err() {
                                    break;
                                }
                            }
                            Err(mpsc::RecvTimeoutError::Timeout) => {
                                if cancel.load(Ordering::SeqCst) {
                                    break;
                                }
                            }
                            Err(mpsc::RecvTimeoutError::Disconnected) => break,
                        }
                    })
                    .map_err(|e| BridgeError::ConfigError(format!("spawn bridge: {e}")))?,
            );
        }

        let audit_failed = Arc::new(AtomicBool::new(false));
        threads.push(sweeper::spawn(
            Arc::clone(&router),
            audit.clone(),
            Arc::clone(&cancel),
            Arc::clone(&audit_failed),
        ));

        let service = Self {
            store,
            audit,
            channel,
            engine,
            sessions,
            router,
            config,
            router_tx,
            cancel,
            audit_failed,
            threads,
            audit_thread: Some(audit_thread),
        };

        // Re-attach whatever a previous process left in flight.
        service.router.recover()?;
        Ok(service)
    }

    /// Run one tool under supervision in the foreground. Blocks until the
    /// child exits; returns its exit code.
    pub fn run_tool(
        &self,
        adapter_name: &str,
        command: &str,
        args: Vec<String>,
        label: Option<String>,
        interactive: bool,
        cancel: Arc<AtomicBool>,
    ) -> Result<i32, BridgeError> {
        let adapter = create_adapter(adapter_name, command);
        let session = Session::start(adapter.name(), label.clone());
        self.store.insert_session(&session)?;

        let (inject_tx, inject_rx) = mpsc::sync_channel::<Reply>(INJECT_QUEUE);
        self.sessions.register(
            session.session_id.clone(),
            SessionHandle {
                tool: adapter.name().to_string(),
                label,
                inject_tx,
            },
        );

        // Supervisor -> router bridge for detected prompts.
        let (prompt_tx, prompt_rx) = mpsc::sync_channel::<PromptEvent>(INJECT_QUEUE);
        let forwarder = {
            let router_tx = self.router_tx.clone();
            thread::Builder::new()
                .name("prompt-bridge".into())
                .spawn(move || {
                    for event in prompt_rx {
                        if router_tx.send(RouterMsg::Prompt(event)).is_err() {
                            break;
                        }
                    }
                })
                .map_err(|e| BridgeError::ConfigError(format!("spawn prompt bridge: {e}")))?
        };

        let supervisor_config = SupervisorConfig {
            command: command.to_string(),
            args,
            cwd: std::env::current_dir()
                .map_err(|e| BridgeError::ConfigError(format!("cannot read cwd: {e}")))?,
            ttl_seconds: self.config.prompts.ttl_seconds,
            silence_ms: self.config.prompts.silence_ms,
            post_inject_suppress_ms: self.config.prompts.post_inject_suppress_ms,
            interactive,
        };

        // A service-level shutdown (signal, dead audit writer) must tear
        // the session down too; the supervisor sets the session token on
        // its own exit, which also ends this thread.
        let session_cancel = Arc::clone(&cancel);
        let propagate = {
            let service_cancel = Arc::clone(&self.cancel);
            let session_cancel = Arc::clone(&cancel);
            thread::Builder::new()
                .name("cancel-propagate".into())
                .spawn(move || {
                    while !session_cancel.load(Ordering::SeqCst) {
                        if service_cancel.load(Ordering::SeqCst) {
                            session_cancel.store(true, Ordering::SeqCst);
                            break;
                        }
                        thread::sleep(Duration::from_millis(100));
                    }
                })
                .map_err(|e| BridgeError::ConfigError(format!("spawn cancel propagate: {e}")))?
        };

        let result = run_supervised(
            &session,
            adapter,
            self.store.clone(),
            self.audit.clone(),
            supervisor_config,
            SupervisorHooks {
                outbound: prompt_tx,
                replies: inject_rx,
            },
            cancel,
        );

        self.sessions.unregister(&session.session_id);
        // The supervisor sets the token on its normal exit; an early spawn
        // failure does not, so set it here before joining.
        session_cancel.store(true, Ordering::SeqCst);
        let _ = forwarder.join();
        let _ = propagate.join();
        result
    }

    /// Whether shutdown has been requested.
    pub fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Request shutdown from another thread (signal handler).
    pub fn cancel_token(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// The condition that forced shutdown, if any. A dead audit writer is
    /// the only one today; callers exit with its error code.
    pub fn fatal_error(&self) -> Option<BridgeError> {
        if self.audit_failed.load(Ordering::SeqCst) {
            Some(BridgeError::LedgerError(
                "audit writer failed; events were no longer durable".into(),
            ))
        } else {
            None
        }
    }

    /// Drain queues and stop all tasks.
    pub fn shutdown(mut self) {
        info!("service shutting down");
        self.cancel.store(true, Ordering::SeqCst);
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                warn!("service thread panicked during shutdown");
            }
        }
        self.audit.shutdown();
        if let Some(handle) = self.audit_thread.take() {
            let _ = handle.join();
        }
    }
}

/// Build the configured channel and its allowlist.
fn build_channel(
    config: &BridgeConfig,
) -> Result<(Arc<dyn Channel>, Allowlist), BridgeError> {
    match config.channel.kind.as_str() {
        "console" => Ok((
            Arc::new(ConsoleChannel::new()),
            Allowlist::new(vec![atlasbridge_channel::console::CONSOLE_IDENTITY.into()]),
        )),
        "telegram" => {
            let telegram = config.channel.telegram.as_ref().ok_or_else(|| {
                BridgeError::ConfigError("channel.telegram section missing".into())
            })?;
            if telegram.allowed_user_ids.is_empty() {
                return Err(BridgeError::ConfigError(
                    "telegram.allowed_user_ids is empty".into(),
                ));
            }
            let token = telegram.bot_token.resolve()?;
            if token.is_empty() {
                return Err(BridgeError::ConfigError("telegram.bot_token is empty".into()));
            }
            Ok((
                Arc::new(TelegramChannel::new(
                    &token,
                    telegram.allowed_user_ids.clone(),
                    telegram.poll_timeout_secs,
                    config.channel.delivery_timeout_secs,
                )),
                Allowlist::from_telegram_ids(&telegram.allowed_user_ids),
            ))
        }
        other => Err(BridgeError::ConfigError(format!(
            "unknown channel kind {other:?} (console|telegram)"
        ))),
    }
}

/// Build the autopilot engine unless the effective mode is off.
fn build_engine(
    config: &BridgeConfig,
    data_dir: &DataDir,
) -> Result<Option<Arc<AutopilotEngine>>, BridgeError> {
    use atlasbridge_autopilot::AutopilotState;

    let state_path = data_dir.autopilot_state_path();
    let effective_mode = if state_path.exists() {
        AutopilotState::load(&state_path)?.mode
    } else {
        config.autopilot.mode
    };
    if effective_mode == AutopilotMode::Off {
        return Ok(None);
    }

    let policy_path = data_dir.policy_path();
    let policy = if policy_path.exists() {
        let content = std::fs::read_to_string(&policy_path).map_err(|e| {
            BridgeError::PolicyError(format!("cannot read {}: {e}", policy_path.display()))
        })?;
        Policy::from_yaml(&content)?
    } else {
        Policy::empty()
    };

    let engine = AutopilotEngine::new(
        CompiledPolicy::compile(policy)?,
        config.autopilot.mode,
        Duration::from_secs(config.autopilot.override_window_secs),
        &state_path,
        &data_dir.decision_trace_path(),
    )?;
    Ok(Some(Arc::new(engine)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use atlasbridge_types::PromptStatus;
    use tempfile::TempDir;

    fn console_service(tmp: &TempDir) -> (Arc<ConsoleChannel>, Service) {
        let channel = Arc::new(ConsoleChannel::new());
        let allowlist =
            Allowlist::new(vec![atlasbridge_channel::console::CONSOLE_IDENTITY.into()]);
        let service = Service::bootstrap_with_channel(
            BridgeConfig::default(),
            &DataDir::at(tmp.path()),
            Arc::clone(&channel) as Arc<dyn Channel>,
            allowlist,
        )
        .unwrap();
        (channel, service)
    }

    #[test]
    fn bootstrap_and_shutdown() {
        let tmp = TempDir::new().unwrap();
        let (_channel, service) = console_service(&tmp);
        assert!(service.sessions.is_empty());
        service.shutdown();
    }

    #[test]
    fn run_tool_relays_prompt_to_channel_and_back() {
        let tmp = TempDir::new().unwrap();
        let (channel, service) = console_service(&tmp);

        // Script the human: as soon as the delivery shows up, answer "y".
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
                None,
                false,
                Arc::new(AtomicBool::new(false)),
            )
            .unwrap();
        assert_eq!(exit_code, 0);

        let prompt_id = answering.join().unwrap().expect("delivery seen");
        // Give the router a beat to finish the terminal transitions.
        for _ in 0..100 {
            if service.store.get_prompt(&prompt_id).unwrap().unwrap().status
                == PromptStatus::Resolved
            {
                break;
            }
            thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(
            service.store.get_prompt(&prompt_id).unwrap().unwrap().status,
            PromptStatus::Resolved
        );
        service.shutdown();
    }

    #[test]
    fn duplicate_reply_injects_once() {
        let tmp = TempDir::new().unwrap();
        let (channel, service) = console_service(&tmp);

        let answering = {
            let channel = Arc::clone(&channel);
            thread::spawn(move || {
                for _ in 0..200 {
                    if let Some(delivery) = channel.deliveries().first().cloned() {
                        // The same callback twice: second must be a no-op.
                        channel.push_reply(&delivery.prompt_id, &delivery.nonce, "n");
                        channel.push_reply(&delivery.prompt_id, &delivery.nonce, "n");
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
                    r#"printf 'Delete everything? [y/N] '; read ans; [ "$ans" = "n" ]"#.into(),
                ],
                None,
                false,
                Arc::new(AtomicBool::new(false)),
            )
            .unwrap();
        assert_eq!(exit_code, 0);
        answering.join().unwrap().expect("delivery seen");
        service.shutdown();

        // Exactly one INJECTED record in the audit chain.
        let log = AuditLog::open(&tmp.path().join("audit.log")).unwrap();
        let injected = log
            .read_all()
            .unwrap()
            .iter()
            .filter(|r| r.kind == atlasbridge_ledger::EventKind::Injected)
            .count();
        assert_eq!(injected, 1);
    }

    #[test]
    fn dead_audit_writer_halts_the_service() {
        let tmp = TempDir::new().unwrap();
        let (_channel, service) = console_service(&tmp);

        // Kill the writer out from under the sweeper; its next flush
        // probe fails and must trip the cancel token.
        service.audit.shutdown();
        for _ in 0..60 {
            if service.cancelled() {
                break;
            }
            thread::sleep(Duration::from_millis(100));
        }
        assert!(service.cancelled(), "sweeper should halt the service");
        let fatal = service.fatal_error().expect("fatal condition recorded");
        assert_eq!(
            atlasbridge_types::ExitCode::for_error(&fatal),
            atlasbridge_types::ExitCode::StateCorruption
        );
        service.shutdown();
    }

    #[test]
    fn build_channel_rejects_unknown_kind() {
        let mut config = BridgeConfig::default();
        config.channel.kind = "carrier-pigeon".into();
        assert!(build_channel(&config).is_err());
    }

    #[test]
    fn build_channel_requires_telegram_section() {
        let mut config = BridgeConfig::default();
        config.channel.kind = "telegram".into();
        assert!(build_channel(&config).is_err());
    }
}
