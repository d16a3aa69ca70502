//! The channel contract.

use std::sync::atomic::AtomicBool;
use std::sync::mpsc::SyncSender;
use std::sync::Arc;
use std::thread::JoinHandle;

use thiserror::Error;

use atlasbridge_types::{BridgeError, Nonce, PromptEvent, PromptId};

use crate::allowlist::Allowlist;

/// Shared cooperative-cancellation flag for receiver threads.
pub type CancelToken = Arc<AtomicBool>;

/// Errors from channel operations, split by retryability.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Worth retrying with backoff (timeouts, 5xx, rate limits).
    #[error("transient channel failure: {0}")]
    Transient(String),

    /// Retrying will not help (bad token, revoked chat, malformed
    /// request). The prompt transitions to failed.
    #[error("permanent channel failure: {0}")]
    Permanent(String),

    /// The channel is shutting down.
    #[error("channel shut down")]
    Shutdown,
}

impl From<ChannelError> for BridgeError {
    fn from(err: ChannelError) -> Self {
        BridgeError::ChannelError(err.to_string())
    }
}

/// Opaque reference to one delivery, reconstructable from
/// `prompt_id` + `nonce` so restart recovery can re-attach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryToken(pub String);

impl DeliveryToken {
    /// The canonical token for a prompt delivery.
    pub fn for_prompt(prompt_id: &PromptId, nonce: &Nonce) -> Self {
        Self(format!("{prompt_id}:{nonce}"))
    }
}

/// A reply arriving from the channel side, before any verification.
///
/// The router checks the nonce against the stored prompt and the identity
/// against the allowlist before anything reaches the decision guard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundReply {
    pub prompt_id: PromptId,
    pub nonce: Nonce,
    /// Channel-side sender identity, e.g. `telegram:42` or `console:local`.
    pub identity: String,
    pub value: String,
}

/// A bidirectional messaging channel.
///
/// `deliver` and `notify` are called from the router thread; the receiver
/// runs on its own thread and pushes replies into the router's bounded
/// queue. Implementations must be cheap to share (`Send + Sync`).
pub trait Channel: Send + Sync {
    /// Transport name for logs and `status`.
    fn name(&self) -> &str;

    /// Deliver a prompt to the humans on the allowlist.
    ///
    /// Returns a token the transport can later correlate replies with.
    /// Identity enforcement on the reply side is the router's job; the
    /// allowlist here scopes who the prompt is sent to.
    fn deliver(
        &self,
        event: &PromptEvent,
        allowlist: &Allowlist,
    ) -> Result<DeliveryToken, ChannelError>;

    /// Send a one-way informational message (expiry notices, autopilot
    /// notifications). Best effort.
    fn notify(&self, text: &str) -> Result<(), ChannelError>;

    /// Spawn the receive loop. Replies flow into `tx` until `cancel`
    /// trips or the transport fails permanently.
    fn spawn_receiver(
        &self,
        tx: SyncSender<InboundReply>,
        cancel: CancelToken,
    ) -> Result<JoinHandle<()>, ChannelError>;

    /// Lightweight health probe for `status` and `doctor`.
    fn healthy(&self) -> bool {
        true
    }
}
