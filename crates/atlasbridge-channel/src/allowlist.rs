//! Channel-side identity allowlist.
//!
//! Identities are `<transport>:<id>` strings, e.g. `telegram:42` or
//! `console:local`. Replies from identities not on the list are dropped
//! by the router with an audit entry.

/// Set of channel-side identities authorized to reply.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Allowlist {
    identities: Vec<String>,
}

impl Allowlist {
    pub fn new(identities: Vec<String>) -> Self {
        Self { identities }
    }

    /// Convenience for Telegram numeric user ids.
    pub fn from_telegram_ids(ids: &[i64]) -> Self {
        Self {
            identities: ids.iter().map(|id| format!("telegram:{id}")).collect(),
        }
    }

    pub fn permits(&self, identity: &str) -> bool {
        self.identities.iter().any(|i| i == identity)
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn identities(&self) -> &[String] {
        &self.identities
    }
}
