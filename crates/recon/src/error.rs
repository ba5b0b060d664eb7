//! Reconciliation errors

use hearth_audit::AuditError;
use hearth_core::{EventId, MoneyError};
use hearth_ledger::LedgerError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum ReconError {
    #[error("Statement parse error at row {row}: {reason}")]
    Parse { row: usize, reason: String },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Duplicate bank transaction {external_id} on account {bank_account_id}")]
    DuplicateTransaction {
        bank_account_id: String,
        external_id: String,
    },

    #[error("Bank transaction not found: {0}")]
    TransactionNotFound(Uuid),

    #[error("Ledger event not found: {0}")]
    EventNotFound(EventId),

    #[error("Ledger event {event_id} is already matched to bank transaction {bank_txn_id}")]
    EventAlreadyMatched { event_id: EventId, bank_txn_id: Uuid },

    #[error("Bank transaction {id} is {status}, expected pending")]
    NotPending { id: Uuid, status: String },

    #[error("Exception not found: {0}")]
    ExceptionNotFound(Uuid),

    #[error("Illegal exception transition {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Corrupt reconciliation record: {0}")]
    Corrupt(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Amount error: {0}")]
    Money(#[from] MoneyError),

    #[error("Audit error: {0}")]
    Audit(#[from] AuditError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

pub type ReconResult<T> = Result<T, ReconError>;
