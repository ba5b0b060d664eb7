//! Reconciliation exceptions
//!
//! An exception is a durable work item for operations staff. Exceptions are
//! never resolved automatically. Every state change is written to the audit
//! log. Opened over a `ReconStore`, every change is also written to SQLite.
//!
//! ```text
//! open ──▶ pending ──▶ resolved
//!   │         │
//!   ├─────────┴──────▶ resolved
//!   └─────────┴──────▶ cancelled
//! ```

use chrono::{DateTime, Utc};
use hearth_audit::{Actor, AuditLog, NewAuditEntry};
use hearth_core::LoanId;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use strum_macros::{AsRefStr, Display, EnumString};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{ReconError, ReconResult};
use crate::store::ReconStore;

const RESOURCE_TYPE: &str = "recon_exception";

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ExceptionCategory {
    /// Bank line that looks like an ACH return
    AchReturn,
    /// Insufficient funds
    Nsf,
    /// Same bank line reported more than once
    Duplicate,
    /// No ledger counterpart found in time
    Unmatched,
    /// Transfer entry returned by the receiving bank
    Return,
    /// Servicing cycle planned and posted totals disagree
    CycleImbalance,
    /// Servicing cycle could not process a loan
    CycleFailure,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ExceptionState {
    Open,
    Pending,
    Resolved,
    Cancelled,
}

impl ExceptionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExceptionState::Resolved | ExceptionState::Cancelled)
    }

    fn can_transition_to(&self, next: ExceptionState) -> bool {
        use ExceptionState::*;
        matches!(
            (self, next),
            (Open, Pending) | (Open, Resolved) | (Pending, Resolved) | (Open, Cancelled) | (Pending, Cancelled)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationException {
    pub id: Uuid,
    pub bank_transaction_id: Option<Uuid>,
    pub transfer_trace: Option<String>,
    pub loan_id: Option<LoanId>,
    pub category: ExceptionCategory,
    pub severity: Severity,
    pub state: ExceptionState,
    pub assigned_to: Option<String>,
    pub detail: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resolution_note: Option<String>,
}

/// A new exception, before it is raised
#[derive(Debug, Clone)]
pub struct NewException {
    pub category: ExceptionCategory,
    pub severity: Severity,
    pub detail: String,
    pub bank_transaction_id: Option<Uuid>,
    pub transfer_trace: Option<String>,
    pub loan_id: Option<LoanId>,
    pub correlation_id: Option<String>,
}

impl NewException {
    pub fn new(category: ExceptionCategory, severity: Severity, detail: impl Into<String>) -> Self {
        Self {
            category,
            severity,
            detail: detail.into(),
            bank_transaction_id: None,
            transfer_trace: None,
            loan_id: None,
            correlation_id: None,
        }
    }

    pub fn bank_transaction(mut self, id: Uuid) -> Self {
        self.bank_transaction_id = Some(id);
        self
    }

    pub fn transfer_trace(mut self, trace: impl Into<String>) -> Self {
        self.transfer_trace = Some(trace.into());
        self
    }

    pub fn loan(mut self, loan_id: LoanId) -> Self {
        self.loan_id = Some(loan_id);
        self
    }

    pub fn correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }
}

/// Filter for [`ExceptionStore::list`]; unset fields match everything
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExceptionFilter {
    pub state: Option<ExceptionState>,
    pub category: Option<ExceptionCategory>,
    pub min_severity: Option<Severity>,
    pub loan_id: Option<LoanId>,
    pub transfer_trace: Option<String>,
}

impl ExceptionFilter {
    pub fn open() -> Self {
        Self {
            state: Some(ExceptionState::Open),
            ..Default::default()
        }
    }

    fn matches(&self, exc: &ReconciliationException) -> bool {
        self.state.map_or(true, |s| exc.state == s)
            && self.category.map_or(true, |c| exc.category == c)
            && self.min_severity.map_or(true, |s| exc.severity >= s)
            && self
                .loan_id
                .as_ref()
                .map_or(true, |l| exc.loan_id.as_ref() == Some(l))
            && self
                .transfer_trace
                .as_deref()
                .map_or(true, |t| exc.transfer_trace.as_deref() == Some(t))
    }
}

/// Shared exception queue used by the matcher, transfer processor and cycle
pub struct ExceptionStore {
    audit: Arc<AuditLog>,
    exceptions: RwLock<BTreeMap<Uuid, ReconciliationException>>,
    store: Option<Arc<ReconStore>>,
}

impl ExceptionStore {
    /// Memory-only queue
    pub fn new(audit: Arc<AuditLog>) -> Self {
        Self {
            audit,
            exceptions: RwLock::new(BTreeMap::new()),
            store: None,
        }
    }

    /// Queue persisted in `store`, loaded with every exception raised so far
    pub fn open(audit: Arc<AuditLog>, store: Arc<ReconStore>) -> ReconResult<Self> {
        let exceptions: BTreeMap<Uuid, ReconciliationException> = store
            .exceptions()?
            .into_iter()
            .map(|e| (e.id, e))
            .collect();
        info!("Loaded {} reconciliation exceptions", exceptions.len());
        Ok(Self {
            audit,
            exceptions: RwLock::new(exceptions),
            store: Some(store),
        })
    }

    fn persist(&self, exc: &ReconciliationException) -> ReconResult<()> {
        match &self.store {
            Some(store) => store.save_exception(exc),
            None => Ok(()),
        }
    }

    /// Raise a new open exception
    pub fn raise(&self, new: NewException, actor: &Actor) -> ReconResult<ReconciliationException> {
        let now = Utc::now();
        let exc = ReconciliationException {
            id: Uuid::new_v4(),
            bank_transaction_id: new.bank_transaction_id,
            transfer_trace: new.transfer_trace,
            loan_id: new.loan_id,
            category: new.category,
            severity: new.severity,
            state: ExceptionState::Open,
            assigned_to: None,
            detail: new.detail,
            created_at: now,
            updated_at: now,
            resolution_note: None,
        };

        let mut entry = NewAuditEntry::new("recon.exception_raised", RESOURCE_TYPE, exc.id.to_string())
            .by(actor)
            .payload(serde_json::json!({
                "category": exc.category,
                "severity": exc.severity,
                "bank_transaction_id": exc.bank_transaction_id,
                "transfer_trace": exc.transfer_trace,
                "loan_id": exc.loan_id,
                "detail": exc.detail,
            }));
        if let Some(correlation) = new.correlation_id {
            entry = entry.correlation(correlation);
        }
        self.audit.append(entry)?;
        self.persist(&exc)?;

        warn!(
            "Exception raised: {} {} severity={} ({})",
            exc.id, exc.category, exc.severity, exc.detail
        );
        self.exceptions.write().insert(exc.id, exc.clone());
        Ok(exc)
    }

    /// Assign an exception to a person; allowed in any non-terminal state
    pub fn assign(&self, id: Uuid, assignee: &str, actor: &Actor) -> ReconResult<ReconciliationException> {
        if assignee.trim().is_empty() {
            return Err(ReconError::Validation("assignee is required".to_string()));
        }

        let mut map = self.exceptions.write();
        let exc = map.get_mut(&id).ok_or(ReconError::ExceptionNotFound(id))?;
        if exc.state.is_terminal() {
            return Err(ReconError::InvalidTransition {
                from: exc.state.to_string(),
                to: "assigned".to_string(),
            });
        }

        self.audit.append(
            NewAuditEntry::new("recon.exception_assigned", RESOURCE_TYPE, id.to_string())
                .by(actor)
                .payload(serde_json::json!({
                    "from": exc.assigned_to,
                    "to": assignee,
                })),
        )?;

        let mut updated = exc.clone();
        updated.assigned_to = Some(assignee.to_string());
        updated.updated_at = Utc::now();
        self.persist(&updated)?;

        *exc = updated.clone();
        info!("Exception {} assigned to {}", id, assignee);
        Ok(updated)
    }

    /// Open -> Pending: work in progress
    pub fn mark_pending(&self, id: Uuid, actor: &Actor) -> ReconResult<ReconciliationException> {
        self.transition(id, ExceptionState::Pending, None, actor)
    }

    /// Close with a resolution note
    pub fn resolve(&self, id: Uuid, note: &str, actor: &Actor) -> ReconResult<ReconciliationException> {
        if note.trim().is_empty() {
            return Err(ReconError::Validation(
                "resolution note is required".to_string(),
            ));
        }
        self.transition(id, ExceptionState::Resolved, Some(note), actor)
    }

    pub fn cancel(&self, id: Uuid, reason: &str, actor: &Actor) -> ReconResult<ReconciliationException> {
        self.transition(id, ExceptionState::Cancelled, Some(reason), actor)
    }

    fn transition(
        &self,
        id: Uuid,
        next: ExceptionState,
        note: Option<&str>,
        actor: &Actor,
    ) -> ReconResult<ReconciliationException> {
        let mut map = self.exceptions.write();
        let exc = map.get_mut(&id).ok_or(ReconError::ExceptionNotFound(id))?;

        if !exc.state.can_transition_to(next) {
            return Err(ReconError::InvalidTransition {
                from: exc.state.to_string(),
                to: next.to_string(),
            });
        }

        self.audit.append(
            NewAuditEntry::new(
                format!("recon.exception_{next}"),
                RESOURCE_TYPE,
                id.to_string(),
            )
            .by(actor)
            .payload(serde_json::json!({
                "from": exc.state,
                "to": next,
                "note": note,
            })),
        )?;

        let mut updated = exc.clone();
        updated.state = next;
        updated.updated_at = Utc::now();
        if let Some(note) = note.filter(|n| !n.trim().is_empty()) {
            updated.resolution_note = Some(note.to_string());
        }
        self.persist(&updated)?;

        info!("Exception {} {} -> {}", id, exc.state, next);
        *exc = updated.clone();
        Ok(updated)
    }

    pub fn get(&self, id: &Uuid) -> Option<ReconciliationException> {
        self.exceptions.read().get(id).cloned()
    }

    /// Matching exceptions, oldest first
    pub fn list(&self, filter: &ExceptionFilter) -> Vec<ReconciliationException> {
        let mut found: Vec<ReconciliationException> = self
            .exceptions
            .read()
            .values()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        found
    }

    pub fn len(&self) -> usize {
        self.exceptions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (ExceptionStore, Arc<AuditLog>) {
        let audit = Arc::new(AuditLog::in_memory());
        (ExceptionStore::new(Arc::clone(&audit)), audit)
    }

    fn raise_unmatched(store: &ExceptionStore) -> ReconciliationException {
        store
            .raise(
                NewException::new(ExceptionCategory::Unmatched, Severity::Medium, "no match")
                    .loan(LoanId::new("LN-1")),
                &Actor::system(),
            )
            .unwrap()
    }

    #[test]
    fn test_raise_is_audited() {
        let (store, audit) = store();
        let exc = raise_unmatched(&store);

        assert_eq!(exc.state, ExceptionState::Open);
        let records = audit.by_resource(RESOURCE_TYPE, &exc.id.to_string());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].event_type, "recon.exception_raised");
    }

    #[test]
    fn test_lifecycle() {
        let (store, audit) = store();
        let exc = raise_unmatched(&store);
        let ops = Actor::user("ops-1");

        store.assign(exc.id, "ops-1", &ops).unwrap();
        store.mark_pending(exc.id, &ops).unwrap();
        let done = store.resolve(exc.id, "matched manually", &ops).unwrap();

        assert_eq!(done.state, ExceptionState::Resolved);
        assert_eq!(done.assigned_to.as_deref(), Some("ops-1"));
        assert_eq!(done.resolution_note.as_deref(), Some("matched manually"));
        assert_eq!(audit.by_resource(RESOURCE_TYPE, &exc.id.to_string()).len(), 4);
        assert!(audit.verify_all());
    }

    #[test]
    fn test_illegal_transitions() {
        let (store, _) = store();
        let exc = raise_unmatched(&store);
        let ops = Actor::user("ops-1");

        store.cancel(exc.id, "bank error", &ops).unwrap();
        assert!(matches!(
            store.mark_pending(exc.id, &ops),
            Err(ReconError::InvalidTransition { .. })
        ));
        assert!(matches!(
            store.resolve(exc.id, "late", &ops),
            Err(ReconError::InvalidTransition { .. })
        ));
        assert!(store.assign(exc.id, "ops-2", &ops).is_err());

        let other = raise_unmatched(&store);
        store.mark_pending(other.id, &ops).unwrap();
        assert!(store.mark_pending(other.id, &ops).is_err());
    }

    #[test]
    fn test_resolve_requires_note() {
        let (store, _) = store();
        let exc = raise_unmatched(&store);
        assert!(matches!(
            store.resolve(exc.id, "  ", &Actor::system()),
            Err(ReconError::Validation(_))
        ));
        assert_eq!(store.get(&exc.id).unwrap().state, ExceptionState::Open);
    }

    #[test]
    fn test_list_filter() {
        let (store, _) = store();
        raise_unmatched(&store);
        store
            .raise(
                NewException::new(ExceptionCategory::Return, Severity::Critical, "R05")
                    .transfer_trace("0910000000001"),
                &Actor::system(),
            )
            .unwrap();

        assert_eq!(store.list(&ExceptionFilter::default()).len(), 2);
        let critical = store.list(&ExceptionFilter {
            min_severity: Some(Severity::High),
            ..Default::default()
        });
        assert_eq!(critical.len(), 1);
        assert_eq!(critical[0].category, ExceptionCategory::Return);

        let by_loan = store.list(&ExceptionFilter {
            loan_id: Some(LoanId::new("LN-1")),
            ..Default::default()
        });
        assert_eq!(by_loan.len(), 1);
        assert_eq!(by_loan[0].category, ExceptionCategory::Unmatched);
    }

    #[test]
    fn test_unknown_id() {
        let (store, _) = store();
        assert!(matches!(
            store.mark_pending(Uuid::new_v4(), &Actor::system()),
            Err(ReconError::ExceptionNotFound(_))
        ));
    }
}
