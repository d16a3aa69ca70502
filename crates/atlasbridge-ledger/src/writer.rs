//! Dedicated audit writer thread.
//!
//! [`AuditWriter`] spawns a background thread that owns an [`AuditLog`]
//! exclusively -- no mutex on the write path. Supervisor tasks, the router,
//! and the sweeper submit events through a bounded
//! [`std::sync::mpsc::sync_channel`] (4096 entries, providing backpressure).
//! `AuditWriter` is `Clone`: each task holds its own handle.

use std::sync::mpsc;
use std::thread;

use tracing::error;

use atlasbridge_types::BridgeError;

use crate::log::AuditLog;
use crate::record::EventKind;

enum AuditMsg {
    Append {
        kind: EventKind,
        data: serde_json::Value,
    },
    /// Barrier: the reply fires once every prior append is durable.
    Flush {
        reply: mpsc::SyncSender<()>,
    },
    Shutdown,
}

/// Handle to the dedicated audit writer thread.
#[derive(Clone)]
pub struct AuditWriter {
    tx: mpsc::SyncSender<AuditMsg>,
}

impl AuditWriter {
    /// Spawn a writer thread that owns `log`.
    ///
    /// Returns the handle plus the `JoinHandle` to wait on after
    /// [`shutdown`](AuditWriter::shutdown).
    pub fn spawn(log: AuditLog) -> (Self, thread::JoinHandle<()>) {
        let (tx, rx) = mpsc::sync_channel::<AuditMsg>(4096);
        let handle = thread::Builder::new()
            .name("audit-writer".into())
            .spawn(move || Self::writer_loop(log, rx))
            .expect("failed to spawn audit writer thread");
        (Self { tx }, handle)
    }

    fn writer_loop(mut log: AuditLog, rx: mpsc::Receiver<AuditMsg>) {
        for msg in rx {
            match msg {
                AuditMsg::Append { kind, data } => {
                    if let Err(e) = log.append(kind, data) {
                        // Losing audit writes is a fatal condition for the
                        // daemon. Exiting the thread makes every later
                        // flush() fail; the sweeper notices and halts the
                        // daemon with a state-corruption exit.
                        error!(error = %e, kind = %kind, "audit append failed; writer exiting");
                        return;
                    }
                }
                AuditMsg::Flush { reply } => {
                    let _ = reply.send(());
                }
                AuditMsg::Shutdown => break,
            }
        }
    }

    /// Append an event. Fire-and-forget; ordering is preserved per sender.
    pub fn append(&self, kind: EventKind, data: serde_json::Value) {
        let _ = self.tx.send(AuditMsg::Append { kind, data });
    }

    /// Block until every previously submitted event is durable.
    pub fn flush(&self) -> Result<(), BridgeError> {
        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        self.tx
            .send(AuditMsg::Flush { reply: reply_tx })
            .map_err(|_| BridgeError::LedgerError("audit writer thread has shut down".into()))?;
        reply_rx
            .recv()
            .map_err(|_| BridgeError::LedgerError("audit writer thread has shut down".into()))
    }

    /// Whether the writer thread is still accepting events.
    pub fn is_alive(&self) -> bool {
        self.flush().is_ok()
    }

    /// Ask the writer to exit after draining queued messages.
    pub fn shutdown(&self) {
        let _ = self.tx.send(AuditMsg::Shutdown);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn appended_events_are_persisted() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("audit.log");
        let log = AuditLog::open(&path).unwrap();
        let (writer, handle) = AuditWriter::spawn(log);

        writer.append(EventKind::PromptCreated, json!({"prompt_id": "p1"}));
        writer.append(EventKind::Resolved, json!({"prompt_id": "p1"}));
        writer.shutdown();
        handle.join().unwrap();

        let log = AuditLog::open(&path).unwrap();
        let records = log.read_all().unwrap();
        // chain root + 2 events
        assert_eq!(records.len(), 3);
        assert_eq!(records[1].kind, EventKind::PromptCreated);
        assert_eq!(records[2].kind, EventKind::Resolved);
        assert!(log.verify(None).unwrap().valid);
    }

    #[test]
    fn flush_waits_for_durability() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("audit.log");
        let log = AuditLog::open(&path).unwrap();
        let (writer, handle) = AuditWriter::spawn(log);

        for i in 0..50 {
            writer.append(EventKind::Injected, json!({"i": i}));
        }
        writer.flush().unwrap();

        // Events are on disk before shutdown.
        let snapshot = AuditLog::open(&path).unwrap().read_all().unwrap();
        assert_eq!(snapshot.len(), 51);

        writer.shutdown();
        handle.join().unwrap();
    }

    #[test]
    fn clone_handles_share_one_chain() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("audit.log");
        let log = AuditLog::open(&path).unwrap();
        let (writer, handle) = AuditWriter::spawn(log);
        let writer2 = writer.clone();

        writer.append(EventKind::SessionStarted, json!({"session_id": "s1"}));
        writer2.append(EventKind::SessionEnded, json!({"session_id": "s1"}));
        writer.shutdown();
        handle.join().unwrap();

        let log = AuditLog::open(&path).unwrap();
        assert!(log.verify(None).unwrap().valid);
        assert_eq!(log.read_all().unwrap().len(), 3);
    }

    #[test]
    fn shutdown_after_join_is_harmless() {
        let tmp = TempDir::new().unwrap();
        let log = AuditLog::open(&tmp.path().join("audit.log")).unwrap();
        let (writer, handle) = AuditWriter::spawn(log);
        writer.shutdown();
        handle.join().unwrap();
        writer.shutdown(); // send fails silently
        assert!(!writer.is_alive());
    }
}
