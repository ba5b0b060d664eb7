//! Allocation errors

use hearth_core::LoanId;
use hearth_ledger::LedgerError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AllocationError {
    #[error("Invalid payment amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid waterfall: {0}")]
    InvalidWaterfall(String),

    #[error("Loan not found: {0}")]
    LoanNotFound(LoanId),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

pub type AllocationResult<T> = Result<T, AllocationError>;
