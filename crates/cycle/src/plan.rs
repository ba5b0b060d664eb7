//! Per-loan cycle planning
//!
//! `plan_loan` reads the ledger and returns the events a cycle would post,
//! in order. Live runs post them; dry runs only report them. Later steps see
//! the effect of earlier ones (accrued interest and a new late fee are owed
//! before held suspense is applied, and suspense lands in the buckets before
//! held prepayments are).

use chrono::NaiveDate;
use hearth_allocation::{allocate, plan_event, Allocation, Outstanding, PlanContext, WaterfallPolicy};
use hearth_audit::Actor;
use hearth_core::{accrue_interest, BucketName, GlAccount, LoanId, Money};
use hearth_ledger::{EventType, LedgerStore, LoanBalances, LoanTerms, NewEvent};

use crate::config::CycleConfig;
use crate::error::{CycleError, CycleResult};
use crate::run::{PlannedPosting, PostingKind};

/// A planned posting with the event that implements it
#[derive(Debug, Clone)]
pub struct PlannedStep {
    pub posting: PlannedPosting,
    pub event: NewEvent,
}

/// Inputs shared by every loan in a run
pub struct PlanInput<'a> {
    pub ledger: &'a LedgerStore,
    pub policy: &'a WaterfallPolicy,
    pub config: &'a CycleConfig,
    pub valuation_date: NaiveDate,
    pub actor: &'a Actor,
    pub correlation_id: String,
}

pub fn plan_loan(input: &PlanInput<'_>, loan_id: &LoanId) -> CycleResult<Vec<PlannedStep>> {
    let terms = input
        .ledger
        .terms(loan_id)
        .ok_or_else(|| CycleError::LoanNotFound(loan_id.clone()))?;
    let balances = input
        .ledger
        .get_balances(loan_id, Some(input.valuation_date))?;

    // Running view of balances as earlier steps would leave them
    let mut projected = balances.clone();
    let mut steps = Vec::new();

    if input.config.accrue_interest {
        if let Some(step) = plan_accrual(input, &terms, &balances)? {
            projected.interest_minor += step.posting.amount_minor;
            steps.push(step);
        }
    }

    if input.config.assess_late_fees {
        if let Some(step) = plan_late_fee(input, &terms, &balances) {
            projected.fees_minor += step.posting.amount_minor;
            steps.push(step);
        }
    }

    if input.config.apply_suspense {
        let waterfall = input.policy.order.clone();
        if let Some((step, allocation)) =
            plan_held_funds(input, &terms, &projected, GlAccount::Suspense, &waterfall)?
        {
            project_allocation(&mut projected, &allocation);
            projected.suspense_minor -= step.posting.amount_minor;
            steps.push(step);
        }
    }

    // Prepayments wait in unapplied until the installment they cover is due
    if input.config.apply_unapplied
        && projected.unapplied_minor > 0
        && projected.bucket_due_date(&terms) <= input.valuation_date
    {
        let waterfall: Vec<BucketName> = input
            .policy
            .order
            .iter()
            .copied()
            .filter(|b| is_installment_bucket(*b))
            .collect();
        if let Some((step, _)) =
            plan_held_funds(input, &terms, &projected, GlAccount::Unapplied, &waterfall)?
        {
            steps.push(step);
        }
    }

    Ok(steps)
}

fn is_installment_bucket(bucket: BucketName) -> bool {
    matches!(
        bucket,
        BucketName::InterestPastDue
            | BucketName::InterestCurrent
            | BucketName::Principal
            | BucketName::Escrow
    )
}

/// Move an allocation's bucket credits into the projected balances
fn project_allocation(projected: &mut LoanBalances, allocation: &Allocation) {
    for line in &allocation.lines {
        let amount = line.applied.minor();
        match line.bucket.gl_account() {
            GlAccount::FeesReceivable => projected.fees_minor -= amount,
            GlAccount::InterestReceivable => {
                projected.interest_minor -= amount;
                projected.applied_minor += amount;
            }
            GlAccount::LoanPrincipal => {
                projected.principal_minor -= amount;
                projected.applied_minor += amount;
            }
            GlAccount::Escrow => {
                projected.escrow_minor += amount;
                projected.applied_minor += amount;
            }
            GlAccount::Unapplied => {
                projected.unapplied_minor += amount;
                projected.applied_minor += amount;
            }
            _ => {}
        }
    }
}

fn plan_accrual(
    input: &PlanInput<'_>,
    terms: &LoanTerms,
    balances: &LoanBalances,
) -> CycleResult<Option<PlannedStep>> {
    let loan_id = &terms.loan_id;
    let source_id = format!("accrual:{}:{}", loan_id, input.valuation_date);
    if input
        .ledger
        .find_by_source(&input.config.source_system, &source_id)
        .is_some()
    {
        return Ok(None);
    }

    let Some(from) = accrued_through(input.ledger, loan_id, input.valuation_date)? else {
        return Ok(None);
    };
    if from >= input.valuation_date {
        return Ok(None);
    }

    let amount = accrue_interest(
        balances.principal_minor,
        terms.annual_rate,
        from,
        input.valuation_date,
        terms.day_count,
        terms.rounding,
    )?;
    if amount.is_zero() {
        return Ok(None);
    }

    let description = format!("Interest {} to {}", from, input.valuation_date);
    let event = base_event(input, terms, EventType::InterestAccrual, &source_id, &description)
        .debit(GlAccount::InterestReceivable, amount)
        .credit(GlAccount::InterestIncome, amount)
        .build();

    Ok(Some(step(PostingKind::InterestAccrual, event, amount, &source_id, input.valuation_date, description)))
}

/// Business date interest has been accrued through: the latest live accrual,
/// or the disbursement date for a loan that has never accrued.
fn accrued_through(
    ledger: &LedgerStore,
    loan_id: &LoanId,
    valuation_date: NaiveDate,
) -> CycleResult<Option<NaiveDate>> {
    let events = ledger.events_for_loan(loan_id, None, Some(valuation_date))?;
    let live = events.iter().filter(|e| !e.is_reversed && !e.is_reversal());

    let mut last_accrual = None;
    let mut disbursed = None;
    for event in live {
        match event.event_type {
            EventType::InterestAccrual => {
                last_accrual = last_accrual.max(Some(event.business_date));
            }
            EventType::Disbursement => {
                disbursed = match disbursed {
                    None => Some(event.business_date),
                    Some(d) => Some(std::cmp::min(d, event.business_date)),
                };
            }
            _ => {}
        }
    }
    Ok(last_accrual.or(disbursed))
}

fn plan_late_fee(
    input: &PlanInput<'_>,
    terms: &LoanTerms,
    balances: &LoanBalances,
) -> Option<PlannedStep> {
    if terms.late_fee.is_zero() || balances.days_delinquent <= terms.late_fee_grace_days {
        return None;
    }
    let due = balances.next_due_date?;

    // One fee per missed due date, however many cycles run past it
    let source_id = format!("late_fee:{}:{}", terms.loan_id, due);
    if input
        .ledger
        .find_by_source(&input.config.source_system, &source_id)
        .is_some()
    {
        return None;
    }

    let description = format!(
        "Late fee for installment due {} ({} days past due)",
        due, balances.days_delinquent
    );
    let event = base_event(input, terms, EventType::FeeAssessment, &source_id, &description)
        .debit(GlAccount::FeesReceivable, terms.late_fee)
        .credit(GlAccount::FeeIncome, terms.late_fee)
        .build();

    Some(step(PostingKind::LateFee, event, terms.late_fee, &source_id, input.valuation_date, description))
}

/// Apply funds held in `funding` (suspense or unapplied) through `waterfall`
fn plan_held_funds(
    input: &PlanInput<'_>,
    terms: &LoanTerms,
    projected: &LoanBalances,
    funding: GlAccount,
    waterfall: &[BucketName],
) -> CycleResult<Option<(PlannedStep, Allocation)>> {
    let (held_minor, prefix, kind) = match funding {
        GlAccount::Unapplied => (
            projected.unapplied_minor,
            "unapplied",
            PostingKind::UnappliedApplication,
        ),
        _ => (
            projected.suspense_minor,
            "suspense",
            PostingKind::SuspenseApplication,
        ),
    };
    if held_minor <= 0 {
        return Ok(None);
    }

    let source_id = format!("{}:{}:{}", prefix, terms.loan_id, input.valuation_date);
    if input
        .ledger
        .find_by_source(&input.config.source_system, &source_id)
        .is_some()
    {
        return Ok(None);
    }

    let held = Money::from_balance(held_minor);
    let outstanding = Outstanding::from_balances(projected, terms);
    let allocation = allocate(&terms.loan_id, held, &outstanding, waterfall, input.policy)?;

    let description = format!("Apply {} held in {}", held.minor(), prefix);
    let ctx = PlanContext {
        business_date: input.valuation_date,
        source_system: input.config.source_system.clone(),
        source_id: source_id.clone(),
        description: description.clone(),
        currency: terms.currency.clone(),
        actor: input.actor.clone(),
        correlation_id: Some(input.correlation_id.clone()),
    };
    let Some(event) = plan_event(&allocation, funding, &ctx)? else {
        return Ok(None);
    };
    let applied = allocation.applied_total();

    Ok(Some((
        step(kind, event, applied, &source_id, input.valuation_date, description),
        allocation,
    )))
}

fn base_event(
    input: &PlanInput<'_>,
    terms: &LoanTerms,
    event_type: EventType,
    source_id: &str,
    description: &str,
) -> hearth_ledger::NewEventBuilder {
    NewEvent::builder(event_type, terms.loan_id.clone())
        .business_date(input.valuation_date)
        .source(input.config.source_system.clone(), source_id)
        .description(description)
        .by(input.actor)
        .correlation(input.correlation_id.clone())
        .currency(terms.currency.clone())
}

fn step(
    kind: PostingKind,
    event: NewEvent,
    amount: Money,
    source_id: &str,
    business_date: NaiveDate,
    description: String,
) -> PlannedStep {
    PlannedStep {
        posting: PlannedPosting {
            kind,
            event_type: event.event_type,
            source_id: source_id.to_string(),
            business_date,
            amount_minor: amount.minor(),
            description,
        },
        event,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_audit::AuditLog;
    use hearth_core::{Currency, DayCount, RoundingPolicy};
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn m(minor: i64) -> Money {
        Money::new(minor).unwrap()
    }

    fn ledger() -> LedgerStore {
        let ledger = LedgerStore::in_memory(Arc::new(AuditLog::in_memory()));
        let terms = LoanTerms {
            loan_id: LoanId::new("LN-1"),
            currency: Currency::Usd,
            annual_rate: dec!(0.06),
            day_count: DayCount::Thirty360,
            rounding: RoundingPolicy::HalfEven,
            first_due_date: date(2024, 2, 1),
            monthly_installment: m(120_000),
            monthly_escrow: m(30_000),
            late_fee: m(5_000),
            late_fee_grace_days: 15,
        };
        // 200,000.00 at 6% 30/360: 1,000.00 per month
        ledger
            .board_loan(terms, m(20_000_000), date(2024, 1, 1), &Actor::system())
            .unwrap();
        ledger
    }

    fn input<'a>(
        ledger: &'a LedgerStore,
        policy: &'a WaterfallPolicy,
        config: &'a CycleConfig,
        actor: &'a Actor,
        valuation_date: NaiveDate,
    ) -> PlanInput<'a> {
        PlanInput {
            ledger,
            policy,
            config,
            valuation_date,
            actor,
            correlation_id: "run-1".to_string(),
        }
    }

    #[test]
    fn test_accrual_from_disbursement() {
        let ledger = ledger();
        let (policy, config, actor) = (WaterfallPolicy::default(), CycleConfig::default(), Actor::batch("cycle"));
        let steps = plan_loan(
            &input(&ledger, &policy, &config, &actor, date(2024, 2, 1)),
            &LoanId::new("LN-1"),
        )
        .unwrap();

        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].posting.kind, PostingKind::InterestAccrual);
        assert_eq!(steps[0].posting.amount_minor, 100_000);
        assert_eq!(steps[0].posting.source_id, "accrual:LN-1:2024-02-01");
    }

    #[test]
    fn test_accrual_resumes_from_last_accrual() {
        let ledger = ledger();
        let (policy, config, actor) = (WaterfallPolicy::default(), CycleConfig::default(), Actor::batch("cycle"));
        for step in plan_loan(
            &input(&ledger, &policy, &config, &actor, date(2024, 2, 1)),
            &LoanId::new("LN-1"),
        )
        .unwrap()
        {
            ledger.post_event(step.event).unwrap();
        }

        // Same date again: nothing new
        let again = plan_loan(
            &input(&ledger, &policy, &config, &actor, date(2024, 2, 1)),
            &LoanId::new("LN-1"),
        )
        .unwrap();
        assert!(again.is_empty());

        // Half a month later: 15 days of 30/360 interest
        let next = plan_loan(
            &input(&ledger, &policy, &config, &actor, date(2024, 2, 16)),
            &LoanId::new("LN-1"),
        )
        .unwrap();
        assert_eq!(next[0].posting.amount_minor, 50_000);
    }

    #[test]
    fn test_late_fee_once_per_due_date() {
        let ledger = ledger();
        let policy = WaterfallPolicy::default();
        let config = CycleConfig {
            accrue_interest: false,
            ..Default::default()
        };
        let actor = Actor::batch("cycle");
        let loan = LoanId::new("LN-1");

        // 14 days past the Feb 1 due date: inside grace
        let early = plan_loan(&input(&ledger, &policy, &config, &actor, date(2024, 2, 15)), &loan).unwrap();
        assert!(early.is_empty());

        let late = plan_loan(&input(&ledger, &policy, &config, &actor, date(2024, 2, 20)), &loan).unwrap();
        assert_eq!(late.len(), 1);
        assert_eq!(late[0].posting.kind, PostingKind::LateFee);
        assert_eq!(late[0].posting.source_id, "late_fee:LN-1:2024-02-01");
        ledger.post_event(late[0].event.clone()).unwrap();

        let later = plan_loan(&input(&ledger, &policy, &config, &actor, date(2024, 2, 25)), &loan).unwrap();
        assert!(later.is_empty());
    }

    #[test]
    fn test_suspense_applied_after_new_charges() {
        let ledger = ledger();
        let loan = LoanId::new("LN-1");
        ledger
            .post_event(
                NewEvent::builder(EventType::TransferSettlement, loan.clone())
                    .business_date(date(2024, 1, 31))
                    .source("transfer", "0910000100000001:settle")
                    .debit(GlAccount::Cash, m(150_000))
                    .credit(GlAccount::Suspense, m(150_000))
                    .build(),
            )
            .unwrap();

        let (policy, config, actor) = (WaterfallPolicy::default(), CycleConfig::default(), Actor::batch("cycle"));
        let steps = plan_loan(&input(&ledger, &policy, &config, &actor, date(2024, 2, 1)), &loan).unwrap();

        assert_eq!(steps.len(), 2);
        let suspense = &steps[1];
        assert_eq!(suspense.posting.kind, PostingKind::SuspenseApplication);
        // interest 1,000.00 accrued this cycle, principal 200.00, escrow 300.00
        assert_eq!(suspense.posting.amount_minor, 150_000);

        for step in steps {
            ledger.post_event(step.event).unwrap();
        }
        let balances = ledger.get_balances(&loan, None).unwrap();
        assert_eq!(balances.suspense_minor, 0);
        assert_eq!(balances.interest_minor, 0);
        assert_eq!(balances.principal_minor, 20_000_000 - 20_000);
        assert_eq!(balances.escrow_minor, 30_000);
    }

    #[test]
    fn test_prepayment_applied_when_due() {
        let ledger = ledger();
        let loan = LoanId::new("LN-1");
        // February's installment through the buckets, March's held ahead
        ledger
            .post_event(
                NewEvent::builder(EventType::Payment, loan.clone())
                    .business_date(date(2024, 1, 31))
                    .source("portal", "pay-1")
                    .debit(GlAccount::Cash, m(300_000))
                    .credit(GlAccount::LoanPrincipal, m(120_000))
                    .credit(GlAccount::Escrow, m(30_000))
                    .credit(GlAccount::Unapplied, m(150_000))
                    .build(),
            )
            .unwrap();

        let policy = WaterfallPolicy::default();
        let config = CycleConfig {
            accrue_interest: false,
            ..Default::default()
        };
        let actor = Actor::batch("cycle");

        // Held funds stay put until March's due date
        let early = plan_loan(&input(&ledger, &policy, &config, &actor, date(2024, 2, 20)), &loan).unwrap();
        assert!(early.is_empty());

        // Past March's grace period: no late fee, the prepayment is applied
        let due = plan_loan(&input(&ledger, &policy, &config, &actor, date(2024, 3, 20)), &loan).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].posting.kind, PostingKind::UnappliedApplication);
        assert_eq!(due[0].posting.source_id, "unapplied:LN-1:2024-03-20");
        assert_eq!(due[0].posting.amount_minor, 150_000);

        for step in due {
            ledger.post_event(step.event).unwrap();
        }
        let balances = ledger.get_balances(&loan, Some(date(2024, 3, 20))).unwrap();
        assert_eq!(balances.unapplied_minor, 0);
        assert_eq!(balances.principal_minor, 20_000_000 - 240_000);
        assert_eq!(balances.escrow_minor, 60_000);
        assert_eq!(balances.next_due_date, Some(date(2024, 4, 1)));
        assert_eq!(balances.days_delinquent, 0);

        let again = plan_loan(&input(&ledger, &policy, &config, &actor, date(2024, 3, 20)), &loan).unwrap();
        assert!(again.is_empty());
    }

    #[test]
    fn test_unknown_loan() {
        let ledger = ledger();
        let (policy, config, actor) = (WaterfallPolicy::default(), CycleConfig::default(), Actor::batch("cycle"));
        assert!(matches!(
            plan_loan(&input(&ledger, &policy, &config, &actor, date(2024, 2, 1)), &LoanId::new("LN-404")),
            Err(CycleError::LoanNotFound(_))
        ));
    }
}
