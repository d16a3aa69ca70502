//! Hash-chained append-only audit log.
//!
//! Every state transition and decision in the relay is recorded as a
//! length-prefixed binary record: `uvarint len || payload_json || 32-byte
//! entry hash`. Records link through `prev_hash`, forming a tamper-evident
//! chain that survives restarts: on open, the writer reads the last record
//! and resumes from its hash.
//!
//! - [`record`]: record model, canonical JSON, SHA-256 chain hashing
//! - [`log`]: the file format -- open, append (fsync'd), verify, reset
//! - [`writer`]: dedicated writer thread fed by a bounded queue

pub mod log;
pub mod record;
pub mod writer;

pub use log::{AuditLog, IntegrityReport};
pub use record::{compute_entry_hash, AuditRecord, EventKind, GENESIS_HASH};
pub use writer::AuditWriter;
