//! Periodic maintenance: TTL sweep, assist-window expiry, audit flush.
//!
//! The flush doubles as a liveness probe for the audit writer thread.
//! Losing audit writes is fatal for the daemon: if the writer is gone,
//! the sweeper raises the fatal flag and trips the shared cancel token so
//! the service tears down and the process exits with a state-corruption
//! code instead of running unaudited.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{error, warn};

use atlasbridge_ledger::AuditWriter;

use crate::router::Router;

/// Sweep cadence.
const TICK: Duration = Duration::from_secs(1);

/// Spawn the sweeper thread. It runs until `cancel` trips; a dead audit
/// writer sets `audit_failed` and trips `cancel` itself.
pub fn spawn(
    router: Arc<Router>,
    audit: AuditWriter,
    cancel: Arc<AtomicBool>,
    audit_failed: Arc<AtomicBool>,
) -> thread::JoinHandle<()> {
    thread::Builder::new()
        .name("sweeper".into())
        .spawn(move || {
            while !cancel.load(Ordering::SeqCst) {
                thread::sleep(TICK);
                if let Err(e) = router.tick(Utc::now().timestamp_millis(), Instant::now()) {
                    warn!(error = %e, "sweeper tick failed");
                }
                if audit.flush().is_err() {
                    // The audit writer died; the daemon must not keep
                    // deciding and injecting without an audit trail.
                    error!("audit writer unavailable; halting the daemon");
                    audit_failed.store(true, Ordering::SeqCst);
                    cancel.store(true, Ordering::SeqCst);
                    return;
                }
            }
        })
        .expect("failed to spawn sweeper")
}
