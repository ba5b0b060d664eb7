//! Transfer errors

use hearth_audit::AuditError;
use hearth_ledger::LedgerError;
use hearth_recon::ReconError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Duplicate idempotency key {idempotency_key}{}", .original_batch.map(|b| format!(" (original batch {b})")).unwrap_or_default())]
    DuplicateSubmission {
        idempotency_key: String,
        original_batch: Option<Uuid>,
    },

    #[error("Batch not found: {0}")]
    BatchNotFound(Uuid),

    #[error("Transfer entry not found: {0}")]
    EntryNotFound(String),

    #[error("Illegal transfer transition for {trace}: {from} -> {to}")]
    InvalidTransition {
        trace: String,
        from: String,
        to: String,
    },

    #[error("Return amount {returned} does not match entry amount {expected} for {trace}")]
    AmountMismatch {
        trace: String,
        expected: i64,
        returned: i64,
    },

    #[error("Invalid return code: {0}")]
    InvalidReturnCode(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Gateway error: {0}")]
    Gateway(String),

    #[error("Corrupt stored value: {0}")]
    Corrupt(String),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Reconciliation error: {0}")]
    Recon(#[from] ReconError),

    #[error("Audit error: {0}")]
    Audit(#[from] AuditError),
}

pub type TransferResult<T> = Result<T, TransferError>;
