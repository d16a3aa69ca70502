//! Audit record model and chain hashing.
//!
//! `entry_hash = SHA-256(prev_hash || seq || ts || kind || canonical(data))`
//! where `canonical` serializes JSON with object keys sorted at every level,
//! so the hash does not depend on map iteration order.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// The `prev_hash` of the first record in a chain.
pub const GENESIS_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// Everything the relay records in the audit chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Truncation-reset marker; `prev_hash` is all zeroes.
    ChainRoot,
    SessionStarted,
    SessionEnded,
    PromptCreated,
    PromptRouted,
    DeliveryFailed,
    ReplyAccepted,
    ReplyRejected,
    IdentityRejected,
    Injected,
    Resolved,
    Expired,
    Canceled,
    Failed,
    AutopilotDecision,
    AutopilotPaused,
    AutopilotResumed,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ChainRoot => "chain_root",
            EventKind::SessionStarted => "session_started",
            EventKind::SessionEnded => "session_ended",
            EventKind::PromptCreated => "prompt_created",
            EventKind::PromptRouted => "prompt_routed",
            EventKind::DeliveryFailed => "delivery_failed",
            EventKind::ReplyAccepted => "reply_accepted",
            EventKind::ReplyRejected => "reply_rejected",
            EventKind::IdentityRejected => "identity_rejected",
            EventKind::Injected => "injected",
            EventKind::Resolved => "resolved",
            EventKind::Expired => "expired",
            EventKind::Canceled => "canceled",
            EventKind::Failed => "failed",
            EventKind::AutopilotDecision => "autopilot_decision",
            EventKind::AutopilotPaused => "autopilot_paused",
            EventKind::AutopilotResumed => "autopilot_resumed",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single record in the audit chain.
///
/// Field order here is the wire order of the JSON payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Monotonic sequence number, starting at 0 for the chain root.
    pub seq: u64,
    /// Epoch milliseconds.
    pub ts: i64,
    pub kind: EventKind,
    /// Hex SHA-256 of the previous record (or [`GENESIS_HASH`]).
    pub prev_hash: String,
    /// Structured event payload.
    pub data: serde_json::Value,
}

impl AuditRecord {
    /// Compute this record's chain hash.
    pub fn entry_hash(&self) -> String {
        compute_entry_hash(&self.prev_hash, self.seq, self.ts, self.kind, &self.data)
    }
}

/// Compute `SHA-256(prev_hash || seq || ts || kind || canonical(data))`.
pub fn compute_entry_hash(
    prev_hash: &str,
    seq: u64,
    ts: i64,
    kind: EventKind,
    data: &serde_json::Value,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prev_hash.as_bytes());
    hasher.update(seq.to_string().as_bytes());
    hasher.update(ts.to_string().as_bytes());
    hasher.update(kind.as_str().as_bytes());
    hasher.update(canonical_json(data).as_bytes());
    hex::encode(hasher.finalize())
}

/// Serialize a JSON value with object keys sorted at every level.
pub fn canonical_json(value: &serde_json::Value) -> String {
    fn write(value: &serde_json::Value, out: &mut String) {
        match value {
            serde_json::Value::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                out.push('{');
                for (i, key) in keys.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    out.push_str(&serde_json::to_string(key).expect("string serializes"));
                    out.push(':');
                    write(&map[*key], out);
                }
                out.push('}');
            }
            serde_json::Value::Array(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    write(item, out);
                }
                out.push(']');
            }
            other => {
                out.push_str(&other.to_string());
            }
        }
    }
    let mut out = String::new();
    write(value, &mut out);
    out
}
