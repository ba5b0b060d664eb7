//! Append-only audit log
//!
//! A single global chain. Appends are serialized behind one short-held
//! mutex that covers sequencing, hashing and the JSONL write; nothing else
//! is ever done while it is held.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::Mutex;
use tracing::debug;

use crate::entry::{AuditRecord, NewAuditEntry};
use crate::error::{AuditError, AuditResult};
use crate::hash::{calculate_payload_hash, calculate_record_hash, verify_records, ChainError, GENESIS_HASH};

struct AuditChain {
    records: Vec<AuditRecord>,
    file: Option<File>,
}

impl AuditChain {
    fn last_hash(&self) -> String {
        self.records
            .last()
            .map(|r| r.record_hash.clone())
            .unwrap_or_else(|| GENESIS_HASH.to_string())
    }
}

/// Hash-chained, append-only audit log
pub struct AuditLog {
    path: Option<PathBuf>,
    chain: Mutex<AuditChain>,
}

impl AuditLog {
    /// Open (or create) a JSONL-backed log, loading existing records as-is.
    ///
    /// Loading never rewrites the file; call `verify_all` to check it.
    pub fn open(path: impl AsRef<Path>) -> AuditResult<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut records = Vec::new();
        if path.is_file() {
            let reader = BufReader::new(File::open(&path)?);
            for (i, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let record: AuditRecord =
                    serde_json::from_str(&line).map_err(|e| AuditError::Corrupt {
                        line: i + 1,
                        reason: e.to_string(),
                    })?;
                records.push(record);
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        debug!(path = %path.display(), records = records.len(), "audit log opened");

        Ok(Self {
            path: Some(path),
            chain: Mutex::new(AuditChain {
                records,
                file: Some(file),
            }),
        })
    }

    /// Create an in-memory log (for testing and dry runs)
    pub fn in_memory() -> Self {
        Self {
            path: None,
            chain: Mutex::new(AuditChain {
                records: Vec::new(),
                file: None,
            }),
        }
    }

    /// Append an entry to the chain, returning its id.
    pub fn append(&self, entry: NewAuditEntry) -> AuditResult<u64> {
        let mut chain = self.chain.lock();

        let id = chain.records.len() as u64 + 1;
        let prev_hash = chain.last_hash();

        let mut record = AuditRecord {
            id,
            correlation_id: entry.correlation_id,
            actor_type: entry.actor_type,
            actor_id: entry.actor_id,
            event_type: entry.event_type,
            timestamp: Utc::now(),
            resource_type: entry.resource_type,
            resource_id: entry.resource_id,
            payload: entry.payload,
            payload_hash: String::new(),
            prev_hash,
            record_hash: String::new(),
        };
        record.payload_hash = calculate_payload_hash(&record);
        record.record_hash = calculate_record_hash(&record.payload_hash, &record.prev_hash);

        if let Some(ref mut file) = chain.file {
            let json = serde_json::to_string(&record)?;
            writeln!(file, "{}", json)?;
            file.flush()?;
        }

        debug!(id, event_type = %record.event_type, "audit record appended");
        chain.records.push(record);
        Ok(id)
    }

    /// Recompute hashes for ids `from..=to`; false on any mismatch.
    pub fn verify_chain(&self, from: u64, to: u64) -> bool {
        self.check_range(from, to).is_ok()
    }

    /// Verify the whole chain
    pub fn verify_all(&self) -> bool {
        let len = self.len() as u64;
        len == 0 || self.verify_chain(1, len)
    }

    /// Like `verify_chain` but reports the first failure
    pub fn check_range(&self, from: u64, to: u64) -> Result<(), ChainError> {
        let chain = self.chain.lock();
        let len = chain.records.len() as u64;

        if from == 0 || from > to || to > len {
            return Err(ChainError::OutOfRange { from, to, len });
        }

        let start = (from - 1) as usize;
        let end = to as usize;
        let expected_prev = if start == 0 {
            GENESIS_HASH.to_string()
        } else {
            chain.records[start - 1].record_hash.clone()
        };

        verify_records(&chain.records[start..end], &expected_prev)
    }

    pub fn get(&self, id: u64) -> Option<AuditRecord> {
        if id == 0 {
            return None;
        }
        self.chain.lock().records.get((id - 1) as usize).cloned()
    }

    /// Records with ids in `from..=to`
    pub fn range(&self, from: u64, to: u64) -> Vec<AuditRecord> {
        self.chain
            .lock()
            .records
            .iter()
            .filter(|r| r.id >= from && r.id <= to)
            .cloned()
            .collect()
    }

    /// Audit trail for one resource, oldest first
    pub fn by_resource(&self, resource_type: &str, resource_id: &str) -> Vec<AuditRecord> {
        self.chain
            .lock()
            .records
            .iter()
            .filter(|r| r.resource_type == resource_type && r.resource_id == resource_id)
            .cloned()
            .collect()
    }

    pub fn by_correlation(&self, correlation_id: &str) -> Vec<AuditRecord> {
        self.chain
            .lock()
            .records
            .iter()
            .filter(|r| r.correlation_id == correlation_id)
            .cloned()
            .collect()
    }

    pub fn by_event_type(&self, event_type: &str) -> Vec<AuditRecord> {
        self.chain
            .lock()
            .records
            .iter()
            .filter(|r| r.event_type == event_type)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.chain.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// record_hash of the newest record (GENESIS when empty)
    pub fn last_hash(&self) -> String {
        self.chain.lock().last_hash()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::ActorType;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn entry(n: u64) -> NewAuditEntry {
        NewAuditEntry::new("payment.posted", "loan", "LN-001")
            .actor(ActorType::User, "clerk-7")
            .payload(json!({ "amount_minor": 1000 * n, "seq": n }))
    }

    #[test]
    fn test_append_links_chain() {
        let log = AuditLog::in_memory();
        let first = log.append(entry(1)).unwrap();
        let second = log.append(entry(2)).unwrap();

        assert_eq!((first, second), (1, 2));
        let r1 = log.get(1).unwrap();
        let r2 = log.get(2).unwrap();
        assert_eq!(r1.prev_hash, GENESIS_HASH);
        assert_eq!(r2.prev_hash, r1.record_hash);
        assert_eq!(log.last_hash(), r2.record_hash);
        assert!(log.verify_all());
    }

    #[test]
    fn test_verify_sub_range() {
        let log = AuditLog::in_memory();
        for n in 1..=5 {
            log.append(entry(n)).unwrap();
        }
        assert!(log.verify_chain(2, 4));
        assert!(log.verify_chain(5, 5));
        assert!(!log.verify_chain(0, 3));
        assert!(!log.verify_chain(4, 2));
        assert!(!log.verify_chain(1, 6));
    }

    #[test]
    fn test_in_memory_tamper_detected() {
        let log = AuditLog::in_memory();
        for n in 1..=3 {
            log.append(entry(n)).unwrap();
        }
        log.chain.lock().records[1].payload = json!({ "amount_minor": 1, "seq": 2 });

        assert!(log.verify_chain(1, 1));
        assert!(!log.verify_chain(1, 3));
        assert!(matches!(
            log.check_range(2, 2),
            Err(ChainError::PayloadMismatch { id: 2, .. })
        ));
    }

    #[test]
    fn test_file_tamper_detected_after_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");

        {
            let log = AuditLog::open(&path).unwrap();
            for n in 1..=3 {
                log.append(entry(n)).unwrap();
            }
        }

        {
            let log = AuditLog::open(&path).unwrap();
            assert_eq!(log.len(), 3);
            assert!(log.verify_all());
            // Appending after reopen continues the same chain
            log.append(entry(4)).unwrap();
            assert!(log.verify_all());
        }

        let content = std::fs::read_to_string(&path).unwrap();
        let tampered = content.replacen("\"amount_minor\":2000", "\"amount_minor\":2001", 1);
        assert_ne!(content, tampered);
        std::fs::write(&path, tampered).unwrap();

        let log = AuditLog::open(&path).unwrap();
        assert!(!log.verify_all());
        assert!(log.verify_chain(1, 1));
    }

    #[test]
    fn test_queries() {
        let log = AuditLog::in_memory();
        log.append(entry(1).correlation("corr-a")).unwrap();
        log.append(NewAuditEntry::new("batch.submitted", "transfer_batch", "B-1"))
            .unwrap();
        log.append(entry(2).correlation("corr-a")).unwrap();

        assert_eq!(log.by_resource("loan", "LN-001").len(), 2);
        assert_eq!(log.by_correlation("corr-a").len(), 2);
        assert_eq!(log.by_event_type("batch.submitted").len(), 1);
        assert_eq!(log.range(2, 3).len(), 2);
    }

    #[test]
    fn test_concurrent_appends_stay_chained() {
        let log = Arc::new(AuditLog::in_memory());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let log = Arc::clone(&log);
                std::thread::spawn(move || {
                    for n in 0..25 {
                        log.append(entry(t * 100 + n)).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(log.len(), 200);
        assert!(log.verify_all());
    }
}
