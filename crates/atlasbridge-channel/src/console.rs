//! Deterministic local channel for tests and the prompt lab.
//!
//! Deliveries and notices accumulate in memory (and go to the log); the
//! test or lab scenario scripts replies by pushing them onto a queue that
//! the receiver thread drains into the router. The identity is
//! `console:local` by default, so allowlist behavior is exercised exactly
//! like a real transport.

use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::mpsc::SyncSender;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::info;

use atlasbridge_types::{Nonce, PromptEvent, PromptId};

use crate::allowlist::Allowlist;
use crate::channel::{CancelToken, Channel, ChannelError, DeliveryToken, InboundReply};

pub const CONSOLE_IDENTITY: &str = "console:local";

/// A delivery the console channel has seen.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedDelivery {
    pub prompt_id: PromptId,
    pub nonce: Nonce,
    pub excerpt: String,
}

/// In-process channel with scripted replies.
#[derive(Default)]
pub struct ConsoleChannel {
    deliveries: Mutex<Vec<RecordedDelivery>>,
    notices: Mutex<Vec<String>>,
    scripted: Arc<Mutex<VecDeque<InboundReply>>>,
    /// When nonzero, deliveries fail this many times before succeeding.
    flaky_deliveries: Mutex<u32>,
}

impl ConsoleChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply as if the human answered through the channel.
    pub fn push_reply(&self, prompt_id: &PromptId, nonce: &Nonce, value: &str) {
        self.push_reply_from(prompt_id, nonce, CONSOLE_IDENTITY, value);
    }

    /// Queue a reply from an arbitrary identity (allowlist tests).
    pub fn push_reply_from(
        &self,
        prompt_id: &PromptId,
        nonce: &Nonce,
        identity: &str,
        value: &str,
    ) {
        self.scripted
            .lock()
            .expect("scripted lock")
            .push_back(InboundReply {
                prompt_id: prompt_id.clone(),
                nonce: nonce.clone(),
                identity: identity.into(),
                value: value.into(),
            });
    }

    /// Make the next `n` deliveries fail with a transient error.
    pub fn fail_next_deliveries(&self, n: u32) {
        *self.flaky_deliveries.lock().expect("flaky lock") = n;
    }

    pub fn deliveries(&self) -> Vec<RecordedDelivery> {
        self.deliveries.lock().expect("deliveries lock").clone()
    }

    pub fn notices(&self) -> Vec<String> {
        self.notices.lock().expect("notices lock").clone()
    }
}

impl Channel for ConsoleChannel {
    fn name(&self) -> &str {
        "console"
    }

    fn deliver(
        &self,
        event: &PromptEvent,
        _allowlist: &Allowlist,
    ) -> Result<DeliveryToken, ChannelError> {
        {
            let mut flaky = self.flaky_deliveries.lock().expect("flaky lock");
            if *flaky > 0 {
                *flaky -= 1;
                return Err(ChannelError::Transient("scripted delivery failure".into()));
            }
        }
        info!(
            prompt_id = %event.prompt_id,
            type_ = event.prompt_type.as_str(),
            excerpt = %event.excerpt,
            "console delivery"
        );
        self.deliveries
            .lock()
            .expect("deliveries lock")
            .push(RecordedDelivery {
                prompt_id: event.prompt_id.clone(),
                nonce: event.nonce.clone(),
                excerpt: event.excerpt.clone(),
            });
        Ok(DeliveryToken::for_prompt(&event.prompt_id, &event.nonce))
    }

    fn notify(&self, text: &str) -> Result<(), ChannelError> {
        info!(notice = text, "console notice");
        self.notices
            .lock()
            .expect("notices lock")
            .push(text.to_string());
        Ok(())
    }

    fn spawn_receiver(
        &self,
        tx: SyncSender<InboundReply>,
        cancel: CancelToken,
    ) -> Result<JoinHandle<()>, ChannelError> {
        let scripted = Arc::clone(&self.scripted);
        let handle = std::thread::Builder::new()
            .name("console-recv".into())
            .spawn(move || {
                while !cancel.load(Ordering::SeqCst) {
                    let next = scripted.lock().expect("scripted lock").pop_front();
                    match next {
                        Some(reply) => {
                            if tx.send(reply).is_err() {
                                break;
                            }
                        }
                        None => std::thread::sleep(Duration::from_millis(20)),
                    }
                }
            })
            .map_err(|e| ChannelError::Permanent(format!("cannot spawn receiver: {e}")))?;
        Ok(handle)
    }
}
