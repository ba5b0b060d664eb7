//! Hearth Servicing Cycle
//!
//! Nightly batch over boarded loans:
//! 1. accrue interest through the valuation date
//! 2. assess a late fee once per missed due date, after the grace period
//! 3. apply funds held in suspense through the payment waterfall
//!
//! Dry runs share the planning code and write nothing to the ledger.

pub mod config;
pub mod error;
pub mod export;
pub mod orchestrator;
pub mod plan;
pub mod run;

pub use config::CycleConfig;
pub use error::{CycleError, CycleResult};
pub use export::{export_run, ExportFormat};
pub use orchestrator::CycleOrchestrator;
pub use plan::{plan_loan, PlanInput, PlannedStep};
pub use run::{
    CycleRun, LoanResult, LoanStatus, PlannedPosting, PostingKind, RunReconciliation, RunState,
};
