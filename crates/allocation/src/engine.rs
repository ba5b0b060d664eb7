//! Payment engine
//!
//! Derives outstanding buckets from the ledger, allocates, and posts one
//! balanced payment event. Submissions for the same loan are serialized so
//! each one allocates against balances that include the one before it.

use chrono::NaiveDate;
use dashmap::DashMap;
use hearth_audit::Actor;
use hearth_core::{EventId, GlAccount, LoanId, Money};
use hearth_ledger::{LedgerError, LedgerStore};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{AllocationError, AllocationResult};
use crate::waterfall::{allocate, plan_event, Allocation, Outstanding, PlanContext, WaterfallPolicy};

/// A borrower payment arriving from any channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSubmission {
    pub loan_id: LoanId,
    pub amount: Money,
    pub effective_date: NaiveDate,
    /// Channel the payment came through (portal, lockbox, ach, ...)
    pub source_channel: String,
    /// Channel's own reference; unique per channel
    pub external_ref: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptStatus {
    Posted,
    Duplicate,
}

/// Result of a payment submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentReceipt {
    pub event_id: EventId,
    pub allocation: Allocation,
    pub status: ReceiptStatus,
}

/// Allocates and posts borrower payments
pub struct PaymentEngine {
    ledger: Arc<LedgerStore>,
    policy: WaterfallPolicy,
    loan_locks: DashMap<LoanId, Arc<Mutex<()>>>,
}

impl PaymentEngine {
    pub fn new(ledger: Arc<LedgerStore>, policy: WaterfallPolicy) -> Self {
        Self {
            ledger,
            policy,
            loan_locks: DashMap::new(),
        }
    }

    pub fn policy(&self) -> &WaterfallPolicy {
        &self.policy
    }

    fn loan_lock(&self, loan_id: &LoanId) -> Arc<Mutex<()>> {
        Arc::clone(self.loan_locks.entry(loan_id.clone()).or_default().value())
    }

    /// Outstanding buckets for a loan as of a business date
    pub fn outstanding(&self, loan_id: &LoanId, as_of: NaiveDate) -> AllocationResult<Outstanding> {
        let terms = self
            .ledger
            .terms(loan_id)
            .ok_or_else(|| AllocationError::LoanNotFound(loan_id.clone()))?;
        let balances = self.ledger.get_balances(loan_id, Some(as_of))?;
        Ok(Outstanding::from_balances(&balances, &terms))
    }

    /// Allocate without posting (what-if quotes)
    pub fn preview(&self, submission: &PaymentSubmission) -> AllocationResult<Allocation> {
        let outstanding = self.outstanding(&submission.loan_id, submission.effective_date)?;
        allocate(
            &submission.loan_id,
            submission.amount,
            &outstanding,
            &self.policy.order,
            &self.policy,
        )
    }

    /// Allocate and post a payment.
    ///
    /// Idempotent on (source_channel, external_ref): a repeat returns the
    /// original receipt with status `Duplicate` and posts nothing.
    pub fn submit(&self, submission: PaymentSubmission, actor: &Actor) -> AllocationResult<PaymentReceipt> {
        let lock = self.loan_lock(&submission.loan_id);
        let _guard = lock.lock();

        if let Some(existing) = self
            .ledger
            .find_by_source(&submission.source_channel, &submission.external_ref)
        {
            return self.duplicate_receipt(existing);
        }

        let terms = self
            .ledger
            .terms(&submission.loan_id)
            .ok_or_else(|| AllocationError::LoanNotFound(submission.loan_id.clone()))?;
        let allocation = self.preview(&submission)?;

        let ctx = PlanContext {
            business_date: submission.effective_date,
            source_system: submission.source_channel.clone(),
            source_id: submission.external_ref.clone(),
            description: format!("Payment via {}", submission.source_channel),
            currency: terms.currency,
            actor: actor.clone(),
            correlation_id: None,
        };
        let event = plan_event(&allocation, GlAccount::Cash, &ctx)?.ok_or_else(|| {
            AllocationError::InvalidAmount("payment produced no ledger movement".to_string())
        })?;

        let event_id = match self.ledger.post_event(event) {
            Ok(id) => id,
            Err(LedgerError::DuplicateSource { existing, .. }) => {
                return self.duplicate_receipt(existing)
            }
            Err(e) => return Err(e.into()),
        };

        info!(
            event_id = %event_id,
            loan_id = %submission.loan_id,
            amount = %submission.amount,
            residual = %allocation.suspense_residual,
            "payment posted"
        );

        Ok(PaymentReceipt {
            event_id,
            allocation,
            status: ReceiptStatus::Posted,
        })
    }

    /// Receipt for an already posted payment, rebuilt from its ledger event
    fn duplicate_receipt(&self, existing: EventId) -> AllocationResult<PaymentReceipt> {
        let event = self
            .ledger
            .event(&existing)
            .ok_or(LedgerError::EventNotFound(existing))?;
        warn!(event_id = %existing, loan_id = %event.loan_id, "duplicate payment submission");

        let entries = self.ledger.entries_for_event(&existing)?;
        Ok(PaymentReceipt {
            event_id: existing,
            allocation: Allocation::from_entries(&event.loan_id, &entries),
            status: ReceiptStatus::Duplicate,
        })
    }
}
