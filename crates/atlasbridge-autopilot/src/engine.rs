//! The autopilot engine: modes, the assist override window, and the
//! persistent kill switch.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use atlasbridge_policy::{evaluate, CompiledPolicy, PolicyAction, PromptFacts};
use atlasbridge_types::{
    AutopilotMode, BridgeError, Confidence, PromptEvent, PromptId, ReplySource,
};

use crate::trace::DecisionTrace;

/// What the router should do with a prompt after consulting the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Forward to the human as if the engine were off.
    Route,
    /// Inject this value now; `notice` is a non-blocking channel message.
    Inject {
        value: String,
        source: ReplySource,
        notice: Option<String>,
    },
    /// Assist mode: send the suggestion, start the override window.
    Suggest { value: String, notice: String },
    /// Send a notification; the prompt stays open for a manual reply.
    NotifyOnly { message: String },
}

/// Mode and kill-switch state persisted across restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AutopilotState {
    pub mode: AutopilotMode,
    pub paused: bool,
}

impl AutopilotState {
    pub fn load(path: &Path) -> Result<Self, BridgeError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| {
            BridgeError::ConfigError(format!("cannot read {}: {e}", path.display()))
        })?;
        serde_json::from_str(&content)
            .map_err(|e| BridgeError::ConfigError(format!("corrupt autopilot state: {e}")))
    }

    pub fn save(&self, path: &Path) -> Result<(), BridgeError> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| BridgeError::ConfigError(format!("cannot serialize state: {e}")))?;
        std::fs::write(path, content).map_err(|e| {
            BridgeError::ConfigError(format!("cannot write {}: {e}", path.display()))
        })
    }
}

/// A suggestion waiting out its assist-mode override window.
struct PendingSuggestion {
    value: String,
    deadline: Instant,
}

/// The autopilot engine. Shared across router and sweeper via `Arc`.
pub struct AutopilotEngine {
    policy: RwLock<Arc<CompiledPolicy>>,
    mode: Mutex<AutopilotMode>,
    paused: AtomicBool,
    state_path: PathBuf,
    trace: Mutex<DecisionTrace>,
    override_window: Duration,
    pending: Mutex<HashMap<PromptId, PendingSuggestion>>,
}

impl AutopilotEngine {
    /// Build the engine: load persisted state (mode + kill switch), open
    /// the decision trace.
    pub fn new(
        policy: CompiledPolicy,
        configured_mode: AutopilotMode,
        override_window: Duration,
        state_path: &Path,
        trace_path: &Path,
    ) -> Result<Self, BridgeError> {
        let state = AutopilotState::load(state_path)?;
        // An explicit `autopilot mode` command outlives the config file
        // default; the state file is authoritative once it exists.
        let mode = if state_path.exists() {
            state.mode
        } else {
            configured_mode
        };
        let trace = DecisionTrace::open(trace_path)?;
        info!(
            mode = mode.as_str(),
            paused = state.paused,
            "autopilot engine ready"
        );
        Ok(Self {
            policy: RwLock::new(Arc::new(policy)),
            mode: Mutex::new(mode),
            paused: AtomicBool::new(state.paused),
            state_path: state_path.to_path_buf(),
            trace: Mutex::new(trace),
            override_window,
            pending: Mutex::new(HashMap::new()),
        })
    }

    pub fn mode(&self) -> AutopilotMode {
        *self.mode.lock().expect("mode lock")
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Change the mode and persist it.
    pub fn set_mode(&self, mode: AutopilotMode) -> Result<(), BridgeError> {
        *self.mode.lock().expect("mode lock") = mode;
        self.persist()
    }

    /// Kill switch on: every prompt goes to the human until `resume`.
    pub fn pause(&self) -> Result<(), BridgeError> {
        self.paused.store(true, Ordering::SeqCst);
        warn!("autopilot paused");
        self.persist()
    }

    pub fn resume(&self) -> Result<(), BridgeError> {
        self.paused.store(false, Ordering::SeqCst);
        info!("autopilot resumed");
        self.persist()
    }

    /// Pick up state-file changes made by another process (`autopilot
    /// pause` against a running daemon). Called from the sweeper tick.
    pub fn sync_state(&self) {
        // No state file means no command was ever issued; the configured
        // mode stands.
        if !self.state_path.exists() {
            return;
        }
        let Ok(state) = AutopilotState::load(&self.state_path) else {
            return;
        };
        let was_paused = self.is_paused();
        if state.paused != was_paused {
            self.paused.store(state.paused, Ordering::SeqCst);
            if state.paused {
                warn!("autopilot paused (state file)");
            } else {
                info!("autopilot resumed (state file)");
            }
        }
        let mut mode = self.mode.lock().expect("mode lock");
        if *mode != state.mode {
            info!(mode = state.mode.as_str(), "autopilot mode changed (state file)");
            *mode = state.mode;
        }
    }

    fn persist(&self) -> Result<(), BridgeError> {
        AutopilotState {
            mode: self.mode(),
            paused: self.is_paused(),
        }
        .save(&self.state_path)
    }

    /// Swap in a new policy. In-flight prompts keep the decisions already
    /// made under the old one; the new policy applies from the next
    /// detection.
    pub fn reload_policy(&self, policy: CompiledPolicy) {
        let hash = policy.content_hash.clone();
        *self.policy.write().expect("policy lock") = Arc::new(policy);
        info!(policy_hash = %hash, "policy reloaded");
    }

    pub fn policy_hash(&self) -> String {
        self.policy.read().expect("policy lock").content_hash.clone()
    }

    /// Consult the engine about a freshly routed prompt.
    pub fn consider(
        &self,
        event: &PromptEvent,
        tool: &str,
        session_label: Option<&str>,
        now: Instant,
    ) -> Disposition {
        let mode = self.mode();
        if mode == AutopilotMode::Off || self.is_paused() {
            return Disposition::Route;
        }

        let policy = self.policy.read().expect("policy lock").clone();
        let decision = evaluate(
            &policy,
            &PromptFacts {
                prompt_id: &event.prompt_id,
                session_id: &event.session_id,
                prompt_type: event.prompt_type,
                confidence: event.confidence,
                excerpt: &event.excerpt,
                tool,
                session_label,
            },
        );
        if let Err(e) = self
            .trace
            .lock()
            .expect("trace lock")
            .record(&decision, &event.excerpt)
        {
            // A trace failure must not change routing behavior.
            warn!(error = %e, "decision trace write failed");
        }

        match decision.action {
            PolicyAction::RequireHuman => Disposition::Route,
            PolicyAction::Deny { value, reason } => Disposition::Inject {
                value,
                source: ReplySource::Synthetic,
                notice: Some(format!(
                    "[deny] {} (rule {}, prompt {})",
                    reason,
                    decision.matched_rule_id.as_deref().unwrap_or("-"),
                    event.prompt_id.short(),
                )),
            },
            PolicyAction::NotifyOnly { message } => Disposition::NotifyOnly { message },
            PolicyAction::AutoReply { value } => {
                // Low confidence needs an explicit opt-in on the rule,
                // in assist and full mode alike.
                if event.confidence == Confidence::Low && !decision.allow_low {
                    return Disposition::Route;
                }
                let rule = decision.matched_rule_id.as_deref().unwrap_or("-");
                match mode {
                    AutopilotMode::Full => Disposition::Inject {
                        value: value.clone(),
                        source: ReplySource::Autopilot,
                        notice: Some(format!(
                            "[autopilot] replied {value:?} (rule {rule}, prompt {})",
                            event.prompt_id.short(),
                        )),
                    },
                    AutopilotMode::Assist => {
                        self.pending.lock().expect("pending lock").insert(
                            event.prompt_id.clone(),
                            PendingSuggestion {
                                value: value.clone(),
                                deadline: now + self.override_window,
                            },
                        );
                        Disposition::Suggest {
                            value: value.clone(),
                            notice: format!(
                                "[assist] will reply {value:?} in {}s unless overridden \
                                 (rule {rule}, prompt {})",
                                self.override_window.as_secs(),
                                event.prompt_id.short(),
                            ),
                        }
                    }
                    AutopilotMode::Off => Disposition::Route,
                }
            }
        }
    }

    /// Human confirmed an assist suggestion: inject it now.
    pub fn confirm(&self, prompt_id: &PromptId) -> Option<String> {
        self.pending
            .lock()
            .expect("pending lock")
            .remove(prompt_id)
            .map(|s| s.value)
    }

    /// Human overrode a suggestion: drop it; the prompt re-routes as a
    /// normal human prompt.
    pub fn take_override(&self, prompt_id: &PromptId) -> bool {
        self.pending
            .lock()
            .expect("pending lock")
            .remove(prompt_id)
            .is_some()
    }

    /// Whether a suggestion is still pending for this prompt.
    pub fn has_pending(&self, prompt_id: &PromptId) -> bool {
        self.pending
            .lock()
            .expect("pending lock")
            .contains_key(prompt_id)
    }

    /// Suggestions whose override window has elapsed; each is now due for
    /// injection. Called from the sweeper tick.
    pub fn expire_due(&self, now: Instant) -> Vec<(PromptId, String)> {
        let mut pending = self.pending.lock().expect("pending lock");
        let due: Vec<PromptId> = pending
            .iter()
            .filter(|(_, s)| s.deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();
        due.into_iter()
            .filter_map(|id| pending.remove(&id).map(|s| (id, s.value)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atlasbridge_policy::Policy;
    use atlasbridge_types::{PromptType, SessionId, Signal};
    use tempfile::TempDir;

    const POLICY: &str = r#"
version: 1
rules:
  - id: deny-force-push
    match:
      text_contains: "force push"
    action:
      type: deny
      reason: forbidden
  - id: approve-tests
    match:
      tool: claude
      text_contains: "run tests"
    action:
      type: auto_reply
      value: "y"
  - id: approve-low-ok
    match:
      tool: claude
      text_contains: "retry"
      allow_low: true
    action:
      type: auto_reply
      value: "y"
"#;

    fn engine(tmp: &TempDir, mode: AutopilotMode) -> AutopilotEngine {
        let policy = CompiledPolicy::compile(Policy::from_yaml(POLICY).unwrap()).unwrap();
        AutopilotEngine::new(
            policy,
            mode,
            Duration::from_secs(10),
            &tmp.path().join("autopilot.state"),
            &tmp.path().join("decisions.jsonl"),
        )
        .unwrap()
    }

    fn event(excerpt: &str, confidence: Confidence) -> PromptEvent {
        PromptEvent::create(
            SessionId::new("s1"),
            PromptType::YesNo,
            confidence,
            Signal::Pattern,
            excerpt,
            300,
        )
    }

    #[test]
    fn off_mode_routes_everything() {
        let tmp = TempDir::new().unwrap();
        let engine = engine(&tmp, AutopilotMode::Off);
        let d = engine.consider(
            &event("run tests? [y/N]", Confidence::High),
            "claude",
            None,
            Instant::now(),
        );
        assert_eq!(d, Disposition::Route);
    }

    #[test]
    fn full_mode_injects_matched_auto_reply() {
        let tmp = TempDir::new().unwrap();
        let engine = engine(&tmp, AutopilotMode::Full);
        let d = engine.consider(
            &event("run tests? [y/N]", Confidence::High),
            "claude",
            None,
            Instant::now(),
        );
        match d {
            Disposition::Inject { value, source, notice } => {
                assert_eq!(value, "y");
                assert_eq!(source, ReplySource::Autopilot);
                assert!(notice.unwrap().contains("autopilot"));
            }
            other => panic!("expected Inject, got {other:?}"),
        }
    }

    #[test]
    fn deny_injects_immediately_in_assist() {
        // The override window does not apply to deny.
        let tmp = TempDir::new().unwrap();
        let engine = engine(&tmp, AutopilotMode::Assist);
        let d = engine.consider(
            &event("force push to main? [y/N]", Confidence::High),
            "claude",
            None,
            Instant::now(),
        );
        match d {
            Disposition::Inject { value, source, .. } => {
                assert_eq!(value, "n");
                assert_eq!(source, ReplySource::Synthetic);
            }
            other => panic!("expected Inject, got {other:?}"),
        }
    }

    #[test]
    fn assist_mode_suggests_with_window() {
        let tmp = TempDir::new().unwrap();
        let engine = engine(&tmp, AutopilotMode::Assist);
        let e = event("run tests? [y/N]", Confidence::High);
        let now = Instant::now();
        let d = engine.consider(&e, "claude", None, now);
        assert!(matches!(d, Disposition::Suggest { .. }));
        assert!(engine.has_pending(&e.prompt_id));

        // Window not yet elapsed.
        assert!(engine.expire_due(now + Duration::from_secs(9)).is_empty());
        // Elapsed: due for injection.
        let due = engine.expire_due(now + Duration::from_secs(11));
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].0, e.prompt_id);
        assert_eq!(due[0].1, "y");
        assert!(!engine.has_pending(&e.prompt_id));
    }

    #[test]
    fn confirm_takes_suggestion_early() {
        let tmp = TempDir::new().unwrap();
        let engine = engine(&tmp, AutopilotMode::Assist);
        let e = event("run tests? [y/N]", Confidence::High);
        let now = Instant::now();
        engine.consider(&e, "claude", None, now);

        assert_eq!(engine.confirm(&e.prompt_id), Some("y".into()));
        assert!(engine.expire_due(now + Duration::from_secs(60)).is_empty());
    }

    #[test]
    fn override_drops_suggestion() {
        let tmp = TempDir::new().unwrap();
        let engine = engine(&tmp, AutopilotMode::Assist);
        let e = event("run tests? [y/N]", Confidence::High);
        engine.consider(&e, "claude", None, Instant::now());

        assert!(engine.take_override(&e.prompt_id));
        assert!(!engine.take_override(&e.prompt_id));
        assert!(engine.expire_due(Instant::now() + Duration::from_secs(60)).is_empty());
    }

    #[test]
    fn low_confidence_routes_unless_rule_allows() {
        let tmp = TempDir::new().unwrap();
        let engine = engine(&tmp, AutopilotMode::Full);

        // Rule without allow_low: low confidence goes to the human.
        let d = engine.consider(
            &event("run tests? maybe", Confidence::Low),
            "claude",
            None,
            Instant::now(),
        );
        assert_eq!(d, Disposition::Route);

        // Rule with allow_low: low confidence may inject.
        let d = engine.consider(
            &event("retry the download?", Confidence::Low),
            "claude",
            None,
            Instant::now(),
        );
        assert!(matches!(d, Disposition::Inject { .. }));
    }

    #[test]
    fn pause_persists_across_restart() {
        let tmp = TempDir::new().unwrap();
        {
            let engine = engine(&tmp, AutopilotMode::Full);
            engine.pause().unwrap();
            let d = engine.consider(
                &event("run tests? [y/N]", Confidence::High),
                "claude",
                None,
                Instant::now(),
            );
            assert_eq!(d, Disposition::Route, "paused engine routes everything");
        }
        // New engine instance, same state dir: still paused.
        let engine = engine(&tmp, AutopilotMode::Full);
        assert!(engine.is_paused());
        engine.resume().unwrap();
        assert!(!engine.is_paused());
    }

    #[test]
    fn set_mode_persists() {
        let tmp = TempDir::new().unwrap();
        {
            let engine = engine(&tmp, AutopilotMode::Off);
            engine.set_mode(AutopilotMode::Assist).unwrap();
        }
        let engine = engine(&tmp, AutopilotMode::Off);
        assert_eq!(engine.mode(), AutopilotMode::Assist);
    }

    #[test]
    fn sync_state_noop_without_state_file() {
        let tmp = TempDir::new().unwrap();
        let engine = engine(&tmp, AutopilotMode::Full);
        engine.sync_state();
        assert_eq!(engine.mode(), AutopilotMode::Full);
        assert!(!engine.is_paused());
    }

    #[test]
    fn sync_state_picks_up_external_pause() {
        let tmp = TempDir::new().unwrap();
        let engine = engine(&tmp, AutopilotMode::Full);
        // Another process flips the kill switch.
        AutopilotState {
            mode: AutopilotMode::Full,
            paused: true,
        }
        .save(&tmp.path().join("autopilot.state"))
        .unwrap();

        engine.sync_state();
        assert!(engine.is_paused());
        let d = engine.consider(
            &event("run tests? [y/N]", Confidence::High),
            "claude",
            None,
            Instant::now(),
        );
        assert_eq!(d, Disposition::Route);
    }

    #[test]
    fn decisions_are_traced() {
        let tmp = TempDir::new().unwrap();
        let engine = engine(&tmp, AutopilotMode::Full);
        engine.consider(
            &event("force push? [y/N]", Confidence::High),
            "claude",
            None,
            Instant::now(),
        );
        let trace = DecisionTrace::open(&tmp.path().join("decisions.jsonl")).unwrap();
        let entries = trace.read_all().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].data["matched_rule_id"], "deny-force-push");
        assert_eq!(entries[0].data["action"], "deny");
        assert!(trace.verify().unwrap());
    }
}
