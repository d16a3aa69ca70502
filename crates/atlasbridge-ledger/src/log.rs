//! The on-disk audit log format.
//!
//! Each record is stored as `uvarint len || payload_json || entry_hash`
//! where `len` covers the JSON payload only and `entry_hash` is the raw
//! 32-byte SHA-256 chain hash. Every append is fsync'd before the in-memory
//! `prev_hash` advances, so after a crash the chain tip on disk is always
//! the one the next record links to.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{info, warn};

use atlasbridge_types::BridgeError;

use crate::record::{compute_entry_hash, AuditRecord, EventKind, GENESIS_HASH};

const HASH_LEN: usize = 32;
/// Records larger than this indicate corruption, not data.
const MAX_RECORD_LEN: u64 = 1 << 20;

/// Result of a chain verification pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityReport {
    pub total_records: usize,
    pub valid: bool,
    /// Index of the first record that fails verification, if any.
    pub first_invalid: Option<usize>,
    pub message: String,
}

/// Append-only hash-chained audit log writer/reader.
pub struct AuditLog {
    path: PathBuf,
    file: File,
    next_seq: u64,
    prev_hash: String,
}

impl AuditLog {
    /// Open the log at `path`, creating it with a chain-root marker if it
    /// does not exist. An existing file is scanned to the tip; a torn or
    /// corrupt tail is fatal -- operators recover with [`AuditLog::reset`].
    pub fn open(path: &Path) -> Result<Self, BridgeError> {
        let exists = path.exists();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(path)
            .map_err(|e| {
                BridgeError::LedgerError(format!("cannot open {}: {e}", path.display()))
            })?;

        let mut log = Self {
            path: path.to_path_buf(),
            file,
            next_seq: 0,
            prev_hash: GENESIS_HASH.to_string(),
        };

        if exists {
            let records = read_records(path)?;
            if let Some(last) = records.last() {
                log.next_seq = last.seq + 1;
                log.prev_hash = last.entry_hash();
            }
            info!(
                path = %path.display(),
                records = records.len(),
                tip = %log.prev_hash,
                "audit log reopened"
            );
        } else {
            log.append(EventKind::ChainRoot, serde_json::json!({}))?;
            info!(path = %path.display(), "audit log created");
        }

        Ok(log)
    }

    /// Truncate the log and start a fresh chain with a new root marker.
    pub fn reset(path: &Path) -> Result<Self, BridgeError> {
        if path.exists() {
            std::fs::remove_file(path).map_err(|e| {
                BridgeError::LedgerError(format!("cannot truncate {}: {e}", path.display()))
            })?;
            warn!(path = %path.display(), "audit log truncated; starting new chain");
        }
        Self::open(path)
    }

    /// Append one record and fsync it. Returns the new entry hash.
    pub fn append(
        &mut self,
        kind: EventKind,
        data: serde_json::Value,
    ) -> Result<String, BridgeError> {
        let record = AuditRecord {
            seq: self.next_seq,
            ts: Utc::now().timestamp_millis(),
            kind,
            prev_hash: self.prev_hash.clone(),
            data,
        };
        let entry_hash = record.entry_hash();

        let payload = serde_json::to_vec(&record)
            .map_err(|e| BridgeError::LedgerError(format!("cannot serialize record: {e}")))?;
        let hash_bytes = hex::decode(&entry_hash)
            .map_err(|e| BridgeError::LedgerError(format!("bad hash encoding: {e}")))?;

        let mut buf = Vec::with_capacity(payload.len() + HASH_LEN + 10);
        write_uvarint(&mut buf, payload.len() as u64);
        buf.extend_from_slice(&payload);
        buf.extend_from_slice(&hash_bytes);

        self.file
            .write_all(&buf)
            .map_err(|e| BridgeError::LedgerError(format!("audit write failed: {e}")))?;
        self.file
            .sync_data()
            .map_err(|e| BridgeError::LedgerError(format!("audit fsync failed: {e}")))?;

        // Only advance the chain tip once the record is durable.
        self.prev_hash = entry_hash.clone();
        self.next_seq += 1;
        Ok(entry_hash)
    }

    /// Read every record back from disk.
    pub fn read_all(&self) -> Result<Vec<AuditRecord>, BridgeError> {
        read_records(&self.path)
    }

    /// Verify linkage and hashes over `[from_seq, to_seq]` (inclusive,
    /// whole chain when `None`).
    pub fn verify(&self, range: Option<(u64, u64)>) -> Result<IntegrityReport, BridgeError> {
        let records = read_records(&self.path)?;
        verify_records(&records, range)
    }

    /// The hash the next appended record will link from.
    pub fn tip(&self) -> &str {
        &self.prev_hash
    }

    /// The sequence number the next record will get.
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }
}

/// Verify a record slice: recomputed hashes, seq monotonicity, linkage.
pub fn verify_records(
    records: &[AuditRecord],
    range: Option<(u64, u64)>,
) -> Result<IntegrityReport, BridgeError> {
    let selected: Vec<(usize, &AuditRecord)> = records
        .iter()
        .enumerate()
        .filter(|(_, r)| range.map_or(true, |(lo, hi)| r.seq >= lo && r.seq <= hi))
        .collect();

    if selected.is_empty() {
        return Ok(IntegrityReport {
            total_records: 0,
            valid: true,
            first_invalid: None,
            message: "no records in range".into(),
        });
    }

    let mut expected_prev: Option<String> = None;
    for (i, record) in &selected {
        if let Some(expected) = &expected_prev {
            if &record.prev_hash != expected {
                return Ok(IntegrityReport {
                    total_records: selected.len(),
                    valid: false,
                    first_invalid: Some(*i),
                    message: format!(
                        "chain broken at seq {}: expected prev_hash {expected}, found {}",
                        record.seq, record.prev_hash
                    ),
                });
            }
        } else if record.seq == 0 && record.prev_hash != GENESIS_HASH {
            return Ok(IntegrityReport {
                total_records: selected.len(),
                valid: false,
                first_invalid: Some(*i),
                message: "seq 0 does not link from the genesis hash".into(),
            });
        }
        let recomputed =
            compute_entry_hash(&record.prev_hash, record.seq, record.ts, record.kind, &record.data);
        expected_prev = Some(recomputed);
    }

    Ok(IntegrityReport {
        total_records: selected.len(),
        valid: true,
        first_invalid: None,
        message: format!("{} records verified", selected.len()),
    })
}

fn read_records(path: &Path) -> Result<Vec<AuditRecord>, BridgeError> {
    let mut file = File::open(path)
        .map_err(|e| BridgeError::LedgerError(format!("cannot open {}: {e}", path.display())))?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)
        .map_err(|e| BridgeError::LedgerError(format!("cannot read {}: {e}", path.display())))?;

    let mut records = Vec::new();
    let mut offset = 0usize;
    while offset < bytes.len() {
        let (len, varint_len) = read_uvarint(&bytes[offset..]).ok_or_else(|| {
            BridgeError::LedgerError(format!("corrupt length prefix at byte {offset}"))
        })?;
        if len > MAX_RECORD_LEN {
            return Err(BridgeError::LedgerError(format!(
                "implausible record length {len} at byte {offset}"
            )));
        }
        let start = offset + varint_len;
        let end = start + len as usize;
        let hash_end = end + HASH_LEN;
        if hash_end > bytes.len() {
            return Err(BridgeError::LedgerError(format!(
                "torn record at byte {offset} (file ends mid-record)"
            )));
        }

        let record: AuditRecord = serde_json::from_slice(&bytes[start..end]).map_err(|e| {
            BridgeError::LedgerError(format!("corrupt record payload at byte {start}: {e}"))
        })?;
        let stored_hash = hex::encode(&bytes[end..hash_end]);
        if stored_hash != record.entry_hash() {
            return Err(BridgeError::LedgerError(format!(
                "record seq {} fails hash verification",
                record.seq
            )));
        }

        records.push(record);
        offset = hash_end;
    }
    Ok(records)
}

/// LEB128 unsigned varint.
fn write_uvarint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

/// Decode a uvarint; returns `(value, bytes_consumed)`.
fn read_uvarint(bytes: &[u8]) -> Option<(u64, usize)> {
    let mut value: u64 = 0;
    let mut shift = 0u32;
    for (i, &byte) in bytes.iter().enumerate() {
        if shift >= 64 {
            return None;
        }
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
        shift += 7;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn log_path(tmp: &TempDir) -> PathBuf {
        tmp.path().join("audit.log")
    }

    #[test]
    fn uvarint_round_trip() {
        for value in [0u64, 1, 127, 128, 300, 16384, u32::MAX as u64, u64::MAX] {
            let mut buf = Vec::new();
            write_uvarint(&mut buf, value);
            let (back, consumed) = read_uvarint(&buf).unwrap();
            assert_eq!(back, value);
            assert_eq!(consumed, buf.len());
        }
    }

    #[test]
    fn uvarint_rejects_truncated() {
        assert!(read_uvarint(&[0x80]).is_none());
        assert!(read_uvarint(&[]).is_none());
    }

    #[test]
    fn new_log_starts_with_chain_root() {
        let tmp = TempDir::new().unwrap();
        let log = AuditLog::open(&log_path(&tmp)).unwrap();
        let records = log.read_all().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, EventKind::ChainRoot);
        assert_eq!(records[0].prev_hash, GENESIS_HASH);
        assert_eq!(records[0].seq, 0);
    }

    #[test]
    fn append_links_records() {
        let tmp = TempDir::new().unwrap();
        let mut log = AuditLog::open(&log_path(&tmp)).unwrap();
        let h1 = log
            .append(EventKind::PromptCreated, json!({"prompt_id": "p1"}))
            .unwrap();
        let _h2 = log
            .append(EventKind::PromptRouted, json!({"prompt_id": "p1"}))
            .unwrap();

        let records = log.read_all().unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[2].prev_hash, h1);
        assert_eq!(records[2].seq, 2);
    }

    #[test]
    fn reopen_resumes_chain_tip() {
        let tmp = TempDir::new().unwrap();
        let path = log_path(&tmp);
        let tip = {
            let mut log = AuditLog::open(&path).unwrap();
            log.append(EventKind::PromptCreated, json!({"prompt_id": "p1"}))
                .unwrap()
        };

        let mut log = AuditLog::open(&path).unwrap();
        assert_eq!(log.tip(), tip);
        assert_eq!(log.next_seq(), 2);

        let h = log
            .append(EventKind::Resolved, json!({"prompt_id": "p1"}))
            .unwrap();
        let records = log.read_all().unwrap();
        assert_eq!(records.last().unwrap().prev_hash, tip);
        assert_eq!(records.last().unwrap().entry_hash(), h);
    }

    #[test]
    fn verify_detects_clean_chain() {
        let tmp = TempDir::new().unwrap();
        let mut log = AuditLog::open(&log_path(&tmp)).unwrap();
        for i in 0..5 {
            log.append(EventKind::Injected, json!({"i": i})).unwrap();
        }
        let report = log.verify(None).unwrap();
        assert!(report.valid, "{}", report.message);
        assert_eq!(report.total_records, 6);
    }

    #[test]
    fn verify_range_subset() {
        let tmp = TempDir::new().unwrap();
        let mut log = AuditLog::open(&log_path(&tmp)).unwrap();
        for i in 0..5 {
            log.append(EventKind::Injected, json!({"i": i})).unwrap();
        }
        let report = log.verify(Some((2, 4))).unwrap();
        assert!(report.valid);
        assert_eq!(report.total_records, 3);
    }

    #[test]
    fn tampered_payload_fails_open() {
        let tmp = TempDir::new().unwrap();
        let path = log_path(&tmp);
        {
            let mut log = AuditLog::open(&path).unwrap();
            log.append(EventKind::Injected, json!({"value": "y"})).unwrap();
        }
        // Flip a byte somewhere in the middle of the file.
        let mut bytes = std::fs::read(&path).unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0x01;
        std::fs::write(&path, &bytes).unwrap();

        assert!(AuditLog::open(&path).is_err());
    }

    #[test]
    fn torn_tail_fails_open() {
        let tmp = TempDir::new().unwrap();
        let path = log_path(&tmp);
        {
            let mut log = AuditLog::open(&path).unwrap();
            log.append(EventKind::Injected, json!({"value": "y"})).unwrap();
        }
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 5]).unwrap();
        assert!(AuditLog::open(&path).is_err());
    }

    #[test]
    fn reset_starts_fresh_chain() {
        let tmp = TempDir::new().unwrap();
        let path = log_path(&tmp);
        {
            let mut log = AuditLog::open(&path).unwrap();
            log.append(EventKind::Injected, json!({"a": 1})).unwrap();
        }
        let log = AuditLog::reset(&path).unwrap();
        let records = log.read_all().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, EventKind::ChainRoot);
        assert_eq!(records[0].prev_hash, GENESIS_HASH);
    }

    #[test]
    fn verify_records_detects_broken_linkage() {
        let tmp = TempDir::new().unwrap();
        let mut log = AuditLog::open(&log_path(&tmp)).unwrap();
        log.append(EventKind::Injected, json!({"a": 1})).unwrap();
        let mut records = log.read_all().unwrap();
        records[1].prev_hash = "deadbeef".into();

        let report = verify_records(&records, None).unwrap();
        assert!(!report.valid);
        assert_eq!(report.first_invalid, Some(1));
    }
}
