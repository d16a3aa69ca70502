//! The router: couples detector output to the channel and channel replies
//! to the reply injectors, never bypassing the store's decision guard.
//!
//! Forward path: prompt arrives from a supervisor, the autopilot engine is
//! consulted (it may short-circuit), otherwise the prompt is routed and
//! delivered. Return path: a channel reply is verified (nonce, allowlist)
//! and committed through `decide_prompt`; only an `Accepted` outcome
//! reaches an injector. Restart recovery replays pending prompts through
//! the same two paths, which makes duplicate deliveries harmless: the
//! guard still arbitrates.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use subtle::ConstantTimeEq;
use tracing::{debug, info, warn};

use atlasbridge_autopilot::{AutopilotEngine, Disposition};
use atlasbridge_channel::{retry_with_backoff, Allowlist, Channel, ChannelError, InboundReply};
use atlasbridge_ledger::{AuditWriter, EventKind};
use atlasbridge_store::{CommitResult, StoreHandle};
use atlasbridge_types::{is_terminal, BridgeError, PromptEvent, PromptStatus, Reply, ReplySource};

use crate::sessions::SessionManager;

/// Delivery retry budget before a prompt fails.
const DELIVERY_ATTEMPTS: u32 = 5;

/// The router's unified inbox: one task, one queue.
pub enum RouterMsg {
    /// A freshly detected prompt from a supervisor.
    Prompt(PromptEvent),
    /// A reply arriving from the channel receiver.
    Inbound(InboundReply),
}

pub struct Router {
    store: StoreHandle,
    channel: Arc<dyn Channel>,
    audit: AuditWriter,
    engine: Option<Arc<AutopilotEngine>>,
    allowlist: Allowlist,
    sessions: SessionManager,
}

impl Router {
    pub fn new(
        store: StoreHandle,
        channel: Arc<dyn Channel>,
        audit: AuditWriter,
        engine: Option<Arc<AutopilotEngine>>,
        allowlist: Allowlist,
        sessions: SessionManager,
    ) -> Self {
        Self {
            store,
            channel,
            audit,
            engine,
            allowlist,
            sessions,
        }
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Dispatch one message from the unified inbox.
    pub fn handle(&self, msg: RouterMsg) {
        let result = match msg {
            RouterMsg::Prompt(event) => self.handle_prompt(event),
            RouterMsg::Inbound(reply) => self.handle_inbound(reply),
        };
        if let Err(e) = result {
            warn!(error = %e, "router operation failed");
        }
    }

    /// Forward path: prompt -> (autopilot?) -> channel.
    pub fn handle_prompt(&self, event: PromptEvent) -> Result<(), BridgeError> {
        let (tool, label) = self.session_facts(&event);

        let disposition = match &self.engine {
            Some(engine) => engine.consider(&event, &tool, label.as_deref(), Instant::now()),
            None => Disposition::Route,
        };

        match disposition {
            Disposition::Route => self.route_to_human(&event),
            Disposition::Inject {
                value,
                source,
                notice,
            } => {
                self.mark_routed(&event)?;
                if let Some(notice) = notice {
                    self.notify_best_effort(&notice);
                }
                self.commit_and_inject(&event, &value, source)
            }
            Disposition::Suggest { notice, .. } => {
                // Deliver the prompt normally and announce the pending
                // auto-reply; the human's reply, if any, races the window
                // through the decision guard.
                self.route_to_human(&event)?;
                self.notify_best_effort(&notice);
                Ok(())
            }
            Disposition::NotifyOnly { message } => {
                self.mark_routed(&event)?;
                self.notify_best_effort(&message);
                // The prompt stays open for a manual reply until TTL.
                self.store.transition(
                    &event.prompt_id,
                    PromptStatus::Routed,
                    PromptStatus::AwaitingReply,
                )?;
                Ok(())
            }
        }
    }

    /// Return path: verify, commit through the guard, hand to injection.
    pub fn handle_inbound(&self, reply: InboundReply) -> Result<(), BridgeError> {
        let Some(prompt) = self.store.get_prompt(&reply.prompt_id)? else {
            self.audit.append(
                EventKind::ReplyRejected,
                serde_json::json!({
                    "prompt_id": reply.prompt_id,
                    "reason": "unknown_prompt",
                }),
            );
            return Ok(());
        };

        // Nonce check in constant time; a mismatch means the reply was
        // crafted for (or leaked from) a different prompt round-trip.
        let nonce_ok: bool = prompt
            .nonce
            .as_str()
            .as_bytes()
            .ct_eq(reply.nonce.as_str().as_bytes())
            .into();
        if !nonce_ok {
            warn!(prompt_id = %reply.prompt_id, "nonce mismatch on inbound reply");
            self.audit.append(
                EventKind::ReplyRejected,
                serde_json::json!({
                    "prompt_id": reply.prompt_id,
                    "reason": "nonce_mismatch",
                }),
            );
            return Ok(());
        }

        if !self.allowlist.permits(&reply.identity) {
            warn!(identity = %reply.identity, "reply from identity off the allowlist");
            self.audit.append(
                EventKind::IdentityRejected,
                serde_json::json!({
                    "prompt_id": reply.prompt_id,
                    "identity": reply.identity,
                }),
            );
            return Ok(());
        }

        // A human reply takes over any pending assist suggestion.
        if let Some(engine) = &self.engine {
            if engine.take_override(&reply.prompt_id) {
                info!(prompt_id = %reply.prompt_id, "assist suggestion overridden by human");
            }
        }

        let now = Utc::now().timestamp_millis();
        let result = self.store.decide_prompt(
            &reply.prompt_id,
            &prompt.session_id,
            &reply.value,
            ReplySource::Human,
            now,
        )?;
        match result {
            CommitResult::Accepted => {
                self.audit.append(
                    EventKind::ReplyAccepted,
                    serde_json::json!({
                        "prompt_id": reply.prompt_id,
                        "session_id": prompt.session_id,
                        "identity": reply.identity,
                        "source": "human",
                    }),
                );
                self.dispatch_injection(Reply::new(
                    reply.prompt_id.clone(),
                    prompt.session_id.clone(),
                    reply.value,
                    ReplySource::Human,
                    Some(reply.identity),
                ));
                Ok(())
            }
            CommitResult::AlreadyDecided => {
                // Idempotency: duplicate callbacks are dropped silently.
                debug!(prompt_id = %reply.prompt_id, "duplicate reply ignored");
                Ok(())
            }
            CommitResult::Expired => {
                self.notify_best_effort(&format!(
                    "Prompt {} expired before your reply arrived.",
                    reply.prompt_id.short()
                ));
                Ok(())
            }
            CommitResult::WrongSession => {
                self.audit.append(
                    EventKind::ReplyRejected,
                    serde_json::json!({
                        "prompt_id": reply.prompt_id,
                        "reason": "wrong_session",
                    }),
                );
                Ok(())
            }
            CommitResult::Unknown => {
                self.audit.append(
                    EventKind::ReplyRejected,
                    serde_json::json!({
                        "prompt_id": reply.prompt_id,
                        "reason": "unknown_prompt",
                    }),
                );
                Ok(())
            }
        }
    }

    /// Restart recovery: re-attach every pending prompt.
    pub fn recover(&self) -> Result<usize, BridgeError> {
        let now = Utc::now().timestamp_millis();
        let pending = self.store.load_pending(now)?;
        let count = pending.len();
        for event in pending {
            match event.status {
                PromptStatus::Created => {
                    // Never routed; run the full forward path.
                    self.handle_prompt(event)?;
                }
                PromptStatus::Routed => {
                    // Crashed between routing and delivery; deliver again.
                    // A duplicate copy is tolerated: decide_prompt still
                    // arbitrates whichever reply arrives first.
                    self.deliver_with_retry(&event)?;
                    self.store.transition(
                        &event.prompt_id,
                        PromptStatus::Routed,
                        PromptStatus::AwaitingReply,
                    )?;
                }
                PromptStatus::AwaitingReply => {
                    // The receiver is running again; nothing to do.
                }
                PromptStatus::ReplyReceived => {
                    // Decided but never injected; re-enqueue if the
                    // session is attached.
                    if let Some((value, source)) = self.store.get_decision(&event.prompt_id)? {
                        self.dispatch_injection(Reply::new(
                            event.prompt_id.clone(),
                            event.session_id.clone(),
                            value,
                            source,
                            None,
                        ));
                    }
                }
                PromptStatus::Injected => {
                    // The write completed before the crash; close it out.
                    self.store.transition(
                        &event.prompt_id,
                        PromptStatus::Injected,
                        PromptStatus::Resolved,
                    )?;
                    self.audit.append(
                        EventKind::Resolved,
                        serde_json::json!({
                            "prompt_id": event.prompt_id,
                            "session_id": event.session_id,
                            "recovered": true,
                        }),
                    );
                }
                other => {
                    debug!(state = other.as_str(), "pending prompt in unexpected state");
                }
            }
        }
        if count > 0 {
            info!(count, "pending prompts recovered");
        }
        Ok(count)
    }

    /// Sweeper tick: expire overdue prompts and fire due assist windows.
    pub fn tick(&self, now_millis: i64, now: Instant) -> Result<(), BridgeError> {
        for prompt_id in self.store.sweep_expired(now_millis)? {
            self.audit.append(
                EventKind::Expired,
                serde_json::json!({ "prompt_id": prompt_id }),
            );
            self.notify_best_effort(&format!(
                "Prompt {} expired without a reply.",
                prompt_id.short()
            ));
        }

        if let Some(engine) = &self.engine {
            engine.sync_state();
            for (prompt_id, value) in engine.expire_due(now) {
                if let Some(event) = self.store.get_prompt(&prompt_id)? {
                    // The window elapsed with no human action: inject the
                    // suggested reply. The guard arbitrates against any
                    // late-arriving human reply.
                    self.commit_and_inject(&event, &value, ReplySource::Autopilot)?;
                }
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------

    fn session_facts(&self, event: &PromptEvent) -> (String, Option<String>) {
        if let Some(handle) = self.sessions.get(&event.session_id) {
            return (handle.tool, handle.label);
        }
        match self.store.get_session(&event.session_id) {
            Ok(Some(session)) => (session.tool, session.label),
            _ => ("*".into(), None),
        }
    }

    fn mark_routed(&self, event: &PromptEvent) -> Result<(), BridgeError> {
        if self
            .store
            .transition(&event.prompt_id, PromptStatus::Created, PromptStatus::Routed)?
        {
            self.audit.append(
                EventKind::PromptRouted,
                serde_json::json!({
                    "prompt_id": event.prompt_id,
                    "session_id": event.session_id,
                }),
            );
        }
        Ok(())
    }

    fn route_to_human(&self, event: &PromptEvent) -> Result<(), BridgeError> {
        self.mark_routed(event)?;
        match self.deliver_with_retry(event) {
            Ok(()) => {
                self.store.transition(
                    &event.prompt_id,
                    PromptStatus::Routed,
                    PromptStatus::AwaitingReply,
                )?;
                Ok(())
            }
            Err(e) => {
                warn!(prompt_id = %event.prompt_id, error = %e, "delivery failed permanently");
                self.store
                    .transition(&event.prompt_id, PromptStatus::Routed, PromptStatus::Failed)?;
                self.audit.append(
                    EventKind::DeliveryFailed,
                    serde_json::json!({
                        "prompt_id": event.prompt_id,
                        "error": e.to_string(),
                    }),
                );
                Ok(())
            }
        }
    }

    fn deliver_with_retry(&self, event: &PromptEvent) -> Result<(), ChannelError> {
        retry_with_backoff(DELIVERY_ATTEMPTS, || {
            self.channel.deliver(event, &self.allowlist).map(|_| ())
        })
    }

    /// Commit an engine-originated reply through the guard, then inject.
    fn commit_and_inject(
        &self,
        event: &PromptEvent,
        value: &str,
        source: ReplySource,
    ) -> Result<(), BridgeError> {
        let now = Utc::now().timestamp_millis();
        let result =
            self.store
                .decide_prompt(&event.prompt_id, &event.session_id, value, source, now)?;
        match result {
            CommitResult::Accepted => {
                self.audit.append(
                    EventKind::ReplyAccepted,
                    serde_json::json!({
                        "prompt_id": event.prompt_id,
                        "session_id": event.session_id,
                        "source": source.as_str(),
                    }),
                );
                self.dispatch_injection(Reply::new(
                    event.prompt_id.clone(),
                    event.session_id.clone(),
                    value,
                    source,
                    None,
                ));
            }
            other => {
                debug!(
                    prompt_id = %event.prompt_id,
                    outcome = ?other,
                    "engine reply lost the guard"
                );
            }
        }
        Ok(())
    }

    fn dispatch_injection(&self, reply: Reply) {
        let prompt_id = reply.prompt_id.clone();
        if !self.sessions.inject(reply) {
            // No live supervisor to take the reply; the prompt cannot
            // complete.
            match self.store.get_prompt(&prompt_id) {
                Ok(Some(prompt)) if !is_terminal(prompt.status) => {
                    if let Err(e) =
                        self.store
                            .transition(&prompt_id, prompt.status, PromptStatus::Failed)
                    {
                        warn!(prompt_id = %prompt_id, error = %e, "failed transition did not commit");
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(prompt_id = %prompt_id, error = %e, "store lookup failed while failing prompt");
                }
            }
            self.audit.append(
                EventKind::Failed,
                serde_json::json!({
                    "prompt_id": prompt_id,
                    "reason": "session_not_attached",
                }),
            );
        }
    }

    fn notify_best_effort(&self, text: &str) {
        if let Err(e) = self.channel.notify(text) {
            debug!(error = %e, "notify failed");
        }
    }
}
