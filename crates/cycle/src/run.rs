//! Cycle run records

use chrono::{DateTime, NaiveDate, Utc};
use hearth_core::{EventId, LoanId};
use hearth_ledger::EventType;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use uuid::Uuid;

/// Run lifecycle
///
/// ```text
/// pending ──▶ running ──▶ completed
///                    ├──▶ failed
///                    └──▶ cancelled
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Completed | RunState::Failed | RunState::Cancelled
        )
    }
}

/// Planned total against what the ledger actually holds after the run
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RunReconciliation {
    Balanced,
    Imbalanced,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PostingKind {
    InterestAccrual,
    LateFee,
    SuspenseApplication,
    UnappliedApplication,
}

/// One ledger event the cycle intends to post for a loan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedPosting {
    pub kind: PostingKind,
    pub event_type: EventType,
    pub source_id: String,
    pub business_date: NaiveDate,
    pub amount_minor: i64,
    pub description: String,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LoanStatus {
    /// Postings written to the ledger
    Posted,
    /// Dry run: postings planned, nothing written
    Planned,
    /// Nothing to do for this loan
    NoAction,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanResult {
    pub loan_id: LoanId,
    pub status: LoanStatus,
    pub postings: Vec<PlannedPosting>,
    /// Ledger events created, in posting order (empty on dry runs)
    pub event_ids: Vec<EventId>,
    pub error: Option<String>,
    pub exception_id: Option<Uuid>,
}

impl LoanResult {
    pub fn planned_minor(&self) -> i64 {
        self.postings.iter().map(|p| p.amount_minor).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleRun {
    pub id: Uuid,
    pub valuation_date: NaiveDate,
    pub dry_run: bool,
    pub state: RunState,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub total_loans: usize,
    pub processed_loans: usize,
    pub results: Vec<LoanResult>,
    /// Every exception raised by this run, loan-level and run-level
    pub exception_ids: Vec<Uuid>,
    pub planned_total_minor: i64,
    pub posted_total_minor: i64,
    pub reconciliation: Option<RunReconciliation>,
    pub failure: Option<String>,
}

impl CycleRun {
    pub(crate) fn new(id: Uuid, valuation_date: NaiveDate, dry_run: bool, total_loans: usize) -> Self {
        Self {
            id,
            valuation_date,
            dry_run,
            state: RunState::Pending,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            total_loans,
            processed_loans: 0,
            results: Vec::new(),
            exception_ids: Vec::new(),
            planned_total_minor: 0,
            posted_total_minor: 0,
            reconciliation: None,
            failure: None,
        }
    }

    pub fn result_for(&self, loan_id: &LoanId) -> Option<&LoanResult> {
        self.results.iter().find(|r| &r.loan_id == loan_id)
    }

    pub fn failed_loans(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.status == LoanStatus::Failed)
            .count()
    }
}
