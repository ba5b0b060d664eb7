//! Payment waterfall
//!
//! `allocate` is pure: same payment, snapshot and waterfall always give the
//! same allocation. `plan_event` turns an allocation into a balanced ledger
//! event for any funding account, so payments, cycle suspense application
//! and dry runs all go through the same code.

use chrono::NaiveDate;
use hearth_audit::Actor;
use hearth_core::{BucketName, Currency, GlAccount, LoanId, Money};
use hearth_ledger::{
    EntryLine, EventType, LedgerEntry, LoanBalances, LoanTerms, NewEvent,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::error::{AllocationError, AllocationResult};

/// Waterfall behavior knobs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaterfallPolicy {
    /// Bucket order used by the payment engine
    #[serde(default = "default_order")]
    pub order: Vec<BucketName>,

    /// Proceed past buckets missing from the outstanding snapshot instead of
    /// routing the remainder to suspense
    #[serde(default)]
    pub allow_skip: bool,
}

fn default_order() -> Vec<BucketName> {
    BucketName::default_waterfall()
}

impl Default for WaterfallPolicy {
    fn default() -> Self {
        Self {
            order: default_order(),
            allow_skip: false,
        }
    }
}

/// Owed amount per bucket at a point in time
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outstanding(BTreeMap<BucketName, Money>);

impl Outstanding {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, bucket: BucketName, owed: Money) -> Self {
        self.0.insert(bucket, owed);
        self
    }

    pub fn set(&mut self, bucket: BucketName, owed: Money) {
        self.0.insert(bucket, owed);
    }

    pub fn get(&self, bucket: BucketName) -> Option<Money> {
        self.0.get(&bucket).copied()
    }

    pub fn total(&self) -> Money {
        self.0.values().copied().sum()
    }

    /// Derive owed buckets from ledger balances and loan terms.
    ///
    /// Interest owed is past due once the loan is delinquent. Whatever the
    /// buckets already hold toward the installment being filled is taken off
    /// principal and interest first, then escrow. Scheduled principal is the
    /// rest of the installment less interest owed, capped at the principal
    /// balance. Future holds one installment less what is already held in
    /// unapplied.
    pub fn from_balances(balances: &LoanBalances, terms: &LoanTerms) -> Self {
        let fees = Money::from_balance(balances.fees_minor);
        let interest = Money::from_balance(balances.interest_minor);
        let (past_due, current) = if balances.is_delinquent() {
            (interest, Money::ZERO)
        } else {
            (Money::ZERO, interest)
        };

        let installment = terms.monthly_installment.minor();
        let paid = balances.paid_toward_current(terms);
        let paid_installment = paid.min(installment);
        let paid_escrow = paid - paid_installment;

        let scheduled_principal = Money::from_balance(
            (installment - paid_installment - interest.minor()).min(balances.principal_minor),
        );
        let escrow = Money::from_balance(terms.monthly_escrow.minor() - paid_escrow);
        let future = Money::from_balance(terms.monthly_total() - balances.unapplied_minor);

        Self::new()
            .with(BucketName::FeesDue, fees)
            .with(BucketName::InterestPastDue, past_due)
            .with(BucketName::InterestCurrent, current)
            .with(BucketName::Principal, scheduled_principal)
            .with(BucketName::Escrow, escrow)
            .with(BucketName::Future, future)
    }
}

/// Applied amount for one bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationLine {
    pub bucket: BucketName,
    pub applied: Money,
}

/// How one payment splits across buckets.
///
/// Σ lines.applied + suspense_residual == payment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub loan_id: LoanId,
    pub payment: Money,
    pub lines: Vec<AllocationLine>,
    pub suspense_residual: Money,
    /// First unmet bucket when allocation stopped early
    pub stopped_at: Option<BucketName>,
}

impl Allocation {
    pub fn applied(&self, bucket: BucketName) -> Money {
        self.lines
            .iter()
            .filter(|l| l.bucket == bucket)
            .map(|l| l.applied)
            .sum()
    }

    pub fn applied_total(&self) -> Money {
        self.lines.iter().map(|l| l.applied).sum()
    }

    /// Rebuild an allocation from a posted event's entries.
    ///
    /// Bucket lines carry their bucket name as `entity_ref`; suspense credits
    /// are the residual. Zero-applied buckets are not recoverable.
    pub fn from_entries(loan_id: &LoanId, entries: &[LedgerEntry]) -> Self {
        let mut lines = Vec::new();
        let mut residual = 0i64;
        let mut payment = 0i64;

        for entry in entries {
            payment += entry.debit_minor();
            if entry.credit_minor() == 0 {
                continue;
            }
            match entry.entity_ref.as_deref().and_then(|r| r.parse::<BucketName>().ok()) {
                Some(bucket) => lines.push(AllocationLine {
                    bucket,
                    applied: entry.amount,
                }),
                None if entry.account == GlAccount::Suspense => residual += entry.amount.minor(),
                None => {}
            }
        }

        Self {
            loan_id: loan_id.clone(),
            payment: Money::from_balance(payment),
            lines,
            suspense_residual: Money::from_balance(residual),
            stopped_at: None,
        }
    }
}

/// Walk `waterfall` applying `min(remaining, owed)` to each bucket.
///
/// A bucket absent from `outstanding` is unmet: allocation stops there and
/// the remainder goes to suspense, unless `policy.allow_skip` is set, in
/// which case it is treated as owing nothing.
pub fn allocate(
    loan_id: &LoanId,
    payment: Money,
    outstanding: &Outstanding,
    waterfall: &[BucketName],
    policy: &WaterfallPolicy,
) -> AllocationResult<Allocation> {
    if payment.is_zero() {
        return Err(AllocationError::InvalidAmount(
            "payment must be greater than zero".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    if let Some(dup) = waterfall.iter().find(|b| !seen.insert(**b)) {
        return Err(AllocationError::InvalidWaterfall(format!(
            "bucket {} appears more than once",
            dup
        )));
    }

    let mut remaining = payment;
    let mut lines = Vec::with_capacity(waterfall.len());
    let mut stopped_at = None;

    for &bucket in waterfall {
        let owed = match outstanding.get(bucket) {
            Some(owed) => owed,
            None if policy.allow_skip => Money::ZERO,
            None => {
                stopped_at = Some(bucket);
                break;
            }
        };

        let applied = remaining.min(owed);
        remaining = remaining.saturating_sub(&applied);
        lines.push(AllocationLine { bucket, applied });
    }

    Ok(Allocation {
        loan_id: loan_id.clone(),
        payment,
        lines,
        suspense_residual: remaining,
        stopped_at,
    })
}

/// Identity and context of the event an allocation is posted under
#[derive(Debug, Clone)]
pub struct PlanContext {
    pub business_date: NaiveDate,
    pub source_system: String,
    pub source_id: String,
    pub description: String,
    pub currency: Currency,
    pub actor: Actor,
    pub correlation_id: Option<String>,
}

/// Build the ledger event for an allocation.
///
/// With `GlAccount::Cash` funding this is a payment: debit cash for the full
/// payment, credit each bucket, credit suspense with the residual. With
/// `GlAccount::Suspense` funding, held funds are applied: only the applied
/// total moves and the residual stays where it is. `GlAccount::Unapplied`
/// funding applies held prepayments the same way. Returns `None` when
/// nothing would move.
pub fn plan_event(
    allocation: &Allocation,
    funding: GlAccount,
    ctx: &PlanContext,
) -> AllocationResult<Option<NewEvent>> {
    let (event_type, debit_amount) = match funding {
        GlAccount::Cash => (EventType::Payment, allocation.payment),
        GlAccount::Suspense => (EventType::SuspenseApplication, allocation.applied_total()),
        GlAccount::Unapplied => (EventType::UnappliedApplication, allocation.applied_total()),
        other => {
            return Err(AllocationError::InvalidAmount(format!(
                "{} cannot fund an allocation",
                other
            )))
        }
    };

    if debit_amount.is_zero() {
        return Ok(None);
    }

    let mut builder = NewEvent::builder(event_type, allocation.loan_id.clone())
        .business_date(ctx.business_date)
        .source(ctx.source_system.clone(), ctx.source_id.clone())
        .description(ctx.description.clone())
        .by(&ctx.actor)
        .currency(ctx.currency.clone())
        .debit(funding, debit_amount);
    if let Some(correlation_id) = &ctx.correlation_id {
        builder = builder.correlation(correlation_id.clone());
    }

    for line in allocation.lines.iter().filter(|l| !l.applied.is_zero()) {
        builder = builder.line(
            EntryLine::credit(line.bucket.gl_account(), line.applied)
                .with_currency(ctx.currency.clone())
                .with_entity_ref(line.bucket.to_string()),
        );
    }

    if funding == GlAccount::Cash && !allocation.suspense_residual.is_zero() {
        builder = builder.credit(GlAccount::Suspense, allocation.suspense_residual);
    }

    Ok(Some(builder.build()))
}
