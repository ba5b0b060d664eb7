//! Ledger errors

use hearth_audit::AuditError;
use hearth_core::{AccountError, EventId, LoanId, MoneyError};
use thiserror::Error;

/// Errors that can occur in ledger operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Event unbalanced: debits {debits} != credits {credits}")]
    Imbalanced { debits: i64, credits: i64 },

    #[error("Invalid account: {0}")]
    InvalidAccount(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Duplicate source {source_system}:{source_id} (original event {existing})")]
    DuplicateSource {
        source_system: String,
        source_id: String,
        existing: EventId,
    },

    #[error("Event {0} is already reversed")]
    AlreadyReversed(EventId),

    #[error("Event not found: {0}")]
    EventNotFound(EventId),

    #[error("Loan not found: {0}")]
    LoanNotFound(LoanId),

    #[error("Loan already boarded: {0}")]
    LoanExists(LoanId),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<AccountError> for LedgerError {
    fn from(err: AccountError) -> Self {
        LedgerError::InvalidAccount(err.to_string())
    }
}

impl From<MoneyError> for LedgerError {
    fn from(err: MoneyError) -> Self {
        LedgerError::Validation(err.to_string())
    }
}

impl From<std::io::Error> for LedgerError {
    fn from(err: std::io::Error) -> Self {
        LedgerError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        LedgerError::Storage(err.to_string())
    }
}

impl From<AuditError> for LedgerError {
    fn from(err: AuditError) -> Self {
        LedgerError::Storage(format!("audit: {err}"))
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;
