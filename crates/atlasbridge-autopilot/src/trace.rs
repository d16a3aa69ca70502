//! Append-only, hash-chained decision trace.
//!
//! One JSON line per autopilot decision, linked with the same SHA-256
//! chain scheme as the audit log but as an independent chain. On open the
//! writer reads the last line and resumes from its hash; a corrupt tail is
//! surfaced (never silently skipped).

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use atlasbridge_ledger::{compute_entry_hash, EventKind, GENESIS_HASH};
use atlasbridge_policy::PolicyDecision;
use atlasbridge_types::BridgeError;

/// One line of the decision trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub seq: u64,
    /// Epoch milliseconds.
    pub ts: i64,
    pub prev_hash: String,
    /// The decision plus the prompt excerpt it was made on.
    pub data: serde_json::Value,
    pub entry_hash: String,
}

impl TraceEntry {
    fn compute_hash(&self) -> String {
        compute_entry_hash(
            &self.prev_hash,
            self.seq,
            self.ts,
            EventKind::AutopilotDecision,
            &self.data,
        )
    }
}

/// Hash-chained JSONL writer for autopilot decisions.
pub struct DecisionTrace {
    path: PathBuf,
    file: File,
    next_seq: u64,
    prev_hash: String,
}

impl DecisionTrace {
    /// Open (or create) the trace, resuming the chain from the last line.
    pub fn open(path: &Path) -> Result<Self, BridgeError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(path)
            .map_err(|e| {
                BridgeError::LedgerError(format!("cannot open {}: {e}", path.display()))
            })?;

        let mut trace = Self {
            path: path.to_path_buf(),
            file,
            next_seq: 0,
            prev_hash: GENESIS_HASH.to_string(),
        };
        let entries = trace.read_all()?;
        if let Some(last) = entries.last() {
            trace.next_seq = last.seq + 1;
            trace.prev_hash = last.entry_hash.clone();
        }
        info!(
            path = %path.display(),
            entries = entries.len(),
            "decision trace opened"
        );
        Ok(trace)
    }

    /// Record one decision with the excerpt it was evaluated against.
    pub fn record(
        &mut self,
        decision: &PolicyDecision,
        excerpt: &str,
    ) -> Result<String, BridgeError> {
        let data = serde_json::json!({
            "prompt_id": decision.prompt_id,
            "session_id": decision.session_id,
            "excerpt": excerpt,
            "matched_rule_id": decision.matched_rule_id,
            "action": decision.action.kind(),
            "risk_level": decision.risk_level,
            "policy_hash": decision.policy_hash,
            "confidence": decision.confidence.as_str(),
        });
        let mut entry = TraceEntry {
            seq: self.next_seq,
            ts: Utc::now().timestamp_millis(),
            prev_hash: self.prev_hash.clone(),
            data,
            entry_hash: String::new(),
        };
        entry.entry_hash = entry.compute_hash();

        let line = serde_json::to_string(&entry)
            .map_err(|e| BridgeError::LedgerError(format!("cannot serialize trace entry: {e}")))?;
        self.file
            .write_all(format!("{line}\n").as_bytes())
            .map_err(|e| BridgeError::LedgerError(format!("trace write failed: {e}")))?;
        self.file
            .sync_data()
            .map_err(|e| BridgeError::LedgerError(format!("trace fsync failed: {e}")))?;

        self.prev_hash = entry.entry_hash.clone();
        self.next_seq += 1;
        Ok(entry.entry_hash)
    }

    /// All entries, verifying each line's hash as it is read.
    pub fn read_all(&self) -> Result<Vec<TraceEntry>, BridgeError> {
        let file = File::open(&self.path).map_err(|e| {
            BridgeError::LedgerError(format!("cannot open {}: {e}", self.path.display()))
        })?;
        let mut entries = Vec::new();
        for (i, line) in BufReader::new(file).lines().enumerate() {
            let line =
                line.map_err(|e| BridgeError::LedgerError(format!("trace read failed: {e}")))?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: TraceEntry = serde_json::from_str(&line).map_err(|e| {
                BridgeError::LedgerError(format!("corrupt trace line {}: {e}", i + 1))
            })?;
            if entry.entry_hash != entry.compute_hash() {
                return Err(BridgeError::LedgerError(format!(
                    "trace line {} fails hash verification",
                    i + 1
                )));
            }
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Verify the whole chain's linkage.
    pub fn verify(&self) -> Result<bool, BridgeError> {
        let entries = self.read_all()?;
        let mut expected = GENESIS_HASH.to_string();
        for entry in &entries {
            if entry.prev_hash != expected {
                return Ok(false);
            }
            expected = entry.entry_hash.clone();
        }
        Ok(true)
    }

    /// The last `n` entries, oldest first.
    pub fn tail(&self, n: usize) -> Result<Vec<TraceEntry>, BridgeError> {
        let mut entries = self.read_all()?;
        let skip = entries.len().saturating_sub(n);
        Ok(entries.split_off(skip))
    }
}
