//! Hash chain utilities for audit integrity

use crate::entry::AuditRecord;
use chrono::SecondsFormat;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// prev_hash of the first record in the chain
pub const GENESIS_HASH: &str = "GENESIS";

const FIELD_SEPARATOR: [u8; 1] = [0x1f];

/// SHA256 over every stored field except the three hashes.
///
/// The payload is hashed as compact JSON; `serde_json::Value` keeps object
/// keys sorted, so the encoding is canonical.
pub fn calculate_payload_hash(record: &AuditRecord) -> String {
    let mut hasher = Sha256::new();

    hasher.update(record.id.to_le_bytes());
    let timestamp = record.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true);
    for field in [
        record.correlation_id.as_str(),
        record.actor_type.as_str(),
        record.actor_id.as_str(),
        record.event_type.as_str(),
        timestamp.as_str(),
        record.resource_type.as_str(),
        record.resource_id.as_str(),
    ] {
        hasher.update(field.as_bytes());
        hasher.update(FIELD_SEPARATOR);
    }
    hasher.update(record.payload.to_string().as_bytes());

    hex::encode(hasher.finalize())
}

/// record_hash = SHA256(payload_hash || prev_hash)
pub fn calculate_record_hash(payload_hash: &str, prev_hash: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload_hash.as_bytes());
    hasher.update(prev_hash.as_bytes());
    hex::encode(hasher.finalize())
}

/// Verify a contiguous run of records.
///
/// `expected_prev` is the record hash that precedes `records[0]`
/// (`GENESIS_HASH` when the run starts at id 1).
pub fn verify_records(records: &[AuditRecord], expected_prev: &str) -> Result<(), ChainError> {
    let mut prev_hash = expected_prev.to_string();

    for (i, record) in records.iter().enumerate() {
        if i > 0 && record.id != records[i - 1].id + 1 {
            return Err(ChainError::InvalidSequence {
                expected: records[i - 1].id + 1,
                actual: record.id,
            });
        }

        if record.prev_hash != prev_hash {
            return Err(ChainError::BrokenLink {
                id: record.id,
                expected: prev_hash,
                actual: record.prev_hash.clone(),
            });
        }

        let payload_hash = calculate_payload_hash(record);
        if record.payload_hash != payload_hash {
            return Err(ChainError::PayloadMismatch {
                id: record.id,
                expected: payload_hash,
                actual: record.payload_hash.clone(),
            });
        }

        let record_hash = calculate_record_hash(&record.payload_hash, &record.prev_hash);
        if record.record_hash != record_hash {
            return Err(ChainError::RecordMismatch {
                id: record.id,
                expected: record_hash,
                actual: record.record_hash.clone(),
            });
        }

        prev_hash = record.record_hash.clone();
    }

    Ok(())
}

/// Errors in hash chain verification
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    #[error("Broken link at id {id}: expected prev_hash '{expected}', got '{actual}'")]
    BrokenLink {
        id: u64,
        expected: String,
        actual: String,
    },

    #[error("Payload hash mismatch at id {id}: expected '{expected}', got '{actual}'")]
    PayloadMismatch {
        id: u64,
        expected: String,
        actual: String,
    },

    #[error("Record hash mismatch at id {id}: expected '{expected}', got '{actual}'")]
    RecordMismatch {
        id: u64,
        expected: String,
        actual: String,
    },

    #[error("Invalid sequence: expected {expected}, got {actual}")]
    InvalidSequence { expected: u64, actual: u64 },

    #[error("Range {from}..={to} is outside the log (len {len})")]
    OutOfRange { from: u64, to: u64, len: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::ActorType;
    use chrono::Utc;
    use serde_json::json;

    fn create_record(id: u64, prev_hash: &str) -> AuditRecord {
        let mut record = AuditRecord {
            id,
            correlation_id: format!("corr-{id}"),
            actor_type: ActorType::System,
            actor_id: "system".to_string(),
            event_type: "ledger.event_posted".to_string(),
            timestamp: Utc::now(),
            resource_type: "loan".to_string(),
            resource_id: "LN-1".to_string(),
            payload: json!({ "amount_minor": 150000, "loan_id": "LN-1" }),
            payload_hash: String::new(),
            prev_hash: prev_hash.to_string(),
            record_hash: String::new(),
        };
        record.payload_hash = calculate_payload_hash(&record);
        record.record_hash = calculate_record_hash(&record.payload_hash, &record.prev_hash);
        record
    }

    #[test]
    fn test_hash_deterministic() {
        let record = create_record(1, GENESIS_HASH);
        assert_eq!(calculate_payload_hash(&record), calculate_payload_hash(&record));
    }

    #[test]
    fn test_verify_valid_chain() {
        let r1 = create_record(1, GENESIS_HASH);
        let r2 = create_record(2, &r1.record_hash);
        let r3 = create_record(3, &r2.record_hash);
        assert!(verify_records(&[r1, r2, r3], GENESIS_HASH).is_ok());
    }

    #[test]
    fn test_verify_broken_link() {
        let r1 = create_record(1, GENESIS_HASH);
        let r2 = create_record(2, "wrong_hash");
        let result = verify_records(&[r1, r2], GENESIS_HASH);
        assert!(matches!(result, Err(ChainError::BrokenLink { id: 2, .. })));
    }

    #[test]
    fn test_payload_tamper_detected() {
        let r1 = create_record(1, GENESIS_HASH);
        let mut r2 = create_record(2, &r1.record_hash);
        r2.payload = json!({ "amount_minor": 150001, "loan_id": "LN-1" });
        let result = verify_records(&[r1, r2], GENESIS_HASH);
        assert!(matches!(result, Err(ChainError::PayloadMismatch { id: 2, .. })));
    }

    #[test]
    fn test_header_tamper_detected() {
        let mut r1 = create_record(1, GENESIS_HASH);
        r1.actor_id = "mallory".to_string();
        let result = verify_records(&[r1], GENESIS_HASH);
        assert!(matches!(result, Err(ChainError::PayloadMismatch { .. })));
    }
}
