//! Servicing cycle errors

use hearth_allocation::AllocationError;
use hearth_audit::AuditError;
use hearth_core::{LoanId, MoneyError};
use hearth_ledger::LedgerError;
use hearth_recon::ReconError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum CycleError {
    #[error("Run not found: {0}")]
    RunNotFound(Uuid),

    #[error("Run {run_id} is already {state}")]
    AlreadyFinished { run_id: Uuid, state: String },

    #[error("Loan not found: {0}")]
    LoanNotFound(LoanId),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Amount error: {0}")]
    Money(#[from] MoneyError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Allocation error: {0}")]
    Allocation(#[from] AllocationError),

    #[error("Reconciliation error: {0}")]
    Recon(#[from] ReconError),

    #[error("Audit error: {0}")]
    Audit(#[from] AuditError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Export error: {0}")]
    Export(String),
}

impl CycleError {
    /// Failures of the storage underneath the ledger or audit log. These fail
    /// the whole run instead of a single loan.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            CycleError::Ledger(LedgerError::Storage(_))
                | CycleError::Allocation(AllocationError::Ledger(LedgerError::Storage(_)))
                | CycleError::Audit(_)
                | CycleError::Recon(ReconError::Audit(_))
        )
    }
}

pub type CycleResult<T> = Result<T, CycleError>;
