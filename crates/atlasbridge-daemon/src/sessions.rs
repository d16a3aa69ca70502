//! Live session registry.
//!
//! Each active supervised run registers its injection queue here so the
//! router can hand decided replies to the right reply injector. The
//! registry is shared (router, sweeper, CLI status) and cheap to clone.

use std::collections::HashMap;
use std::sync::mpsc::SyncSender;
use std::sync::{Arc, Mutex};

use tracing::warn;

use atlasbridge_types::{Reply, SessionId};

/// What the router needs to know about one live session.
#[derive(Clone)]
pub struct SessionHandle {
    pub tool: String,
    pub label: Option<String>,
    /// FIFO injection queue consumed by the session's reply injector.
    pub inject_tx: SyncSender<Reply>,
}

/// Shared registry of live sessions.
#[derive(Clone, Default)]
pub struct SessionManager {
    inner: Arc<Mutex<HashMap<SessionId, SessionHandle>>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, session_id: SessionId, handle: SessionHandle) {
        self.inner
            .lock()
            .expect("session registry lock")
            .insert(session_id, handle);
    }

    pub fn unregister(&self, session_id: &SessionId) {
        self.inner
            .lock()
            .expect("session registry lock")
            .remove(session_id);
    }

    pub fn get(&self, session_id: &SessionId) -> Option<SessionHandle> {
        self.inner
            .lock()
            .expect("session registry lock")
            .get(session_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("session registry lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hand a decided reply to the owning session's injector queue.
    ///
    /// Returns `false` when the session is not attached (e.g. the reply
    /// arrived after a restart with no live supervisor).
    pub fn inject(&self, reply: Reply) -> bool {
        let handle = self.get(&reply.session_id);
        match handle {
            Some(handle) => match handle.inject_tx.send(reply) {
                Ok(()) => true,
                Err(e) => {
                    warn!(session_id = %e.0.session_id, "session injector hung up");
                    false
                }
            },
            None => {
                warn!(session_id = %reply.session_id, "reply for unattached session");
                false
            }
        }
    }
}
