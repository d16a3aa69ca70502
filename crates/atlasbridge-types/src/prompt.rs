//! Prompt data model and lifecycle state machine.
//!
//! A [`PromptEvent`] is created when the detector recognizes that the child
//! program is blocked waiting for input. It then moves through the lifecycle
//! `created -> routed -> awaiting_reply -> reply_received -> injected ->
//! resolved`, or terminates early as `expired`, `canceled`, or `failed`.
//! [`is_legal`] is the single predicate table every transition goes through.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{Nonce, PromptId, SessionId};

/// The shape of input the child program is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptType {
    /// A yes/no question, e.g. `Continue? [y/N]`.
    YesNo,
    /// A "press enter to continue" pause.
    ConfirmEnter,
    /// A numbered menu; the reply is an option index.
    MultipleChoice,
    /// Anything else; the reply is free text.
    FreeText,
}

impl PromptType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromptType::YesNo => "yes_no",
            PromptType::ConfirmEnter => "confirm_enter",
            PromptType::MultipleChoice => "multiple_choice",
            PromptType::FreeText => "free_text",
        }
    }
}

impl std::str::FromStr for PromptType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "yes_no" => Ok(PromptType::YesNo),
            "confirm_enter" => Ok(PromptType::ConfirmEnter),
            "multiple_choice" => Ok(PromptType::MultipleChoice),
            "free_text" => Ok(PromptType::FreeText),
            other => Err(format!("unknown prompt type: {other:?}")),
        }
    }
}

/// How sure the detector is that the child is actually waiting for input.
///
/// Ordered so that `Low < Medium < High` for policy threshold comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::Low => "low",
            Confidence::Medium => "medium",
            Confidence::High => "high",
        }
    }
}

impl std::str::FromStr for Confidence {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Confidence::Low),
            "medium" => Ok(Confidence::Medium),
            "high" => Ok(Confidence::High),
            other => Err(format!("unknown confidence: {other:?}")),
        }
    }
}

/// Which of the three detection signals produced a prompt event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    /// An adapter regex matched the output tail.
    Pattern,
    /// The PTY reported the child blocked on a read mid-line.
    BlockedRead,
    /// No output for the silence threshold after at least one byte.
    Silence,
}

impl Signal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Pattern => "pattern",
            Signal::BlockedRead => "blocked_read",
            Signal::Silence => "silence",
        }
    }
}

impl std::str::FromStr for Signal {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pattern" => Ok(Signal::Pattern),
            "blocked_read" => Ok(Signal::BlockedRead),
            "silence" => Ok(Signal::Silence),
            other => Err(format!("unknown signal: {other:?}")),
        }
    }
}

/// Lifecycle state of a prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptStatus {
    Created,
    Routed,
    AwaitingReply,
    ReplyReceived,
    Injected,
    Resolved,
    Expired,
    Canceled,
    Failed,
}

impl PromptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromptStatus::Created => "created",
            PromptStatus::Routed => "routed",
            PromptStatus::AwaitingReply => "awaiting_reply",
            PromptStatus::ReplyReceived => "reply_received",
            PromptStatus::Injected => "injected",
            PromptStatus::Resolved => "resolved",
            PromptStatus::Expired => "expired",
            PromptStatus::Canceled => "canceled",
            PromptStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for PromptStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(PromptStatus::Created),
            "routed" => Ok(PromptStatus::Routed),
            "awaiting_reply" => Ok(PromptStatus::AwaitingReply),
            "reply_received" => Ok(PromptStatus::ReplyReceived),
            "injected" => Ok(PromptStatus::Injected),
            "resolved" => Ok(PromptStatus::Resolved),
            "expired" => Ok(PromptStatus::Expired),
            "canceled" => Ok(PromptStatus::Canceled),
            "failed" => Ok(PromptStatus::Failed),
            other => Err(format!("unknown prompt status: {other:?}")),
        }
    }
}

/// Terminal states: no outgoing transitions.
pub const TERMINAL_STATES: [PromptStatus; 4] = [
    PromptStatus::Resolved,
    PromptStatus::Expired,
    PromptStatus::Canceled,
    PromptStatus::Failed,
];

/// Whether a state has no outgoing transitions.
pub fn is_terminal(status: PromptStatus) -> bool {
    TERMINAL_STATES.contains(&status)
}

/// The single transition predicate table for the prompt lifecycle.
///
/// Happy path: `created -> routed -> awaiting_reply -> reply_received ->
/// injected -> resolved`. Every non-terminal state may additionally go to
/// `expired` (TTL), `canceled` (user action), or `failed` (injection error).
pub fn is_legal(from: PromptStatus, to: PromptStatus) -> bool {
    use PromptStatus::*;

    if is_terminal(from) {
        return false;
    }
    // Early termination is allowed from any non-terminal state.
    if matches!(to, Expired | Canceled | Failed) {
        return true;
    }
    matches!(
        (from, to),
        (Created, Routed)
            | (Routed, AwaitingReply)
            | (Routed, ReplyReceived)
            | (AwaitingReply, ReplyReceived)
            | (ReplyReceived, Injected)
            | (Injected, Resolved)
    )
}

/// A detected request for human input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptEvent {
    pub prompt_id: PromptId,
    pub session_id: SessionId,
    pub prompt_type: PromptType,
    /// ANSI-stripped text surrounding the prompt, at most the detector
    /// window size.
    pub excerpt: String,
    pub confidence: Confidence,
    pub signal: Signal,
    /// Menu options for `multiple_choice`; empty otherwise.
    #[serde(default)]
    pub options: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub ttl_seconds: u64,
    pub status: PromptStatus,
    pub nonce: Nonce,
}

impl PromptEvent {
    /// Create a fresh prompt event in state `created` with a new id and nonce.
    pub fn create(
        session_id: SessionId,
        prompt_type: PromptType,
        confidence: Confidence,
        signal: Signal,
        excerpt: impl Into<String>,
        ttl_seconds: u64,
    ) -> Self {
        Self {
            prompt_id: PromptId::generate(),
            session_id,
            prompt_type,
            excerpt: excerpt.into(),
            confidence,
            signal,
            options: Vec::new(),
            created_at: Utc::now(),
            ttl_seconds,
            status: PromptStatus::Created,
            nonce: Nonce::generate(),
        }
    }

    /// Epoch milliseconds after which the prompt is expired.
    pub fn expires_at_millis(&self) -> i64 {
        self.created_at.timestamp_millis() + (self.ttl_seconds as i64) * 1000
    }

    /// Whether the prompt's TTL has passed at `now` (epoch millis).
    pub fn is_expired_at(&self, now_millis: i64) -> bool {
        self.expires_at_millis() <= now_millis
    }
}

/// Who produced a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplySource {
    /// A human answered through the channel.
    Human,
    /// The autopilot engine answered from a matched rule.
    Autopilot,
    /// A synthetic reply (e.g. the negative injected for a `deny` rule).
    Synthetic,
}

impl ReplySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplySource::Human => "human",
            ReplySource::Autopilot => "autopilot",
            ReplySource::Synthetic => "synthetic",
        }
    }
}

impl std::str::FromStr for ReplySource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "human" => Ok(ReplySource::Human),
            "autopilot" => Ok(ReplySource::Autopilot),
            "synthetic" => Ok(ReplySource::Synthetic),
            other => Err(format!("unknown reply source: {other:?}")),
        }
    }
}

/// A response intended for a specific prompt, queued for injection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub prompt_id: PromptId,
    pub session_id: SessionId,
    /// `"y"`/`"n"` for yes/no, option index for menus, empty for
    /// confirm-enter, free text otherwise.
    pub value: String,
    pub source: ReplySource,
    /// Channel-side sender identifier (e.g. `telegram:42`), if any.
    pub identity: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl Reply {
    pub fn new(
        prompt_id: PromptId,
        session_id: SessionId,
        value: impl Into<String>,
        source: ReplySource,
        identity: Option<String>,
    ) -> Self {
        Self {
            prompt_id,
            session_id,
            value: value.into(),
            source,
            identity,
            received_at: Utc::now(),
        }
    }
}
