//! Loan terms and derived balances
//!
//! Balances are never stored on their own; they are folded from entries.
//! The store keeps a running fold per loan (the snapshot) and can always
//! recompute it from scratch.

use chrono::{Months, NaiveDate};
use hearth_core::{Currency, DayCount, GlAccount, LoanId, Money, RoundingPolicy};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::event::{EventType, LedgerEntry};

/// Contractual terms registered when a loan is boarded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanTerms {
    pub loan_id: LoanId,
    #[serde(default)]
    pub currency: Currency,
    /// Annual nominal rate (0.065 = 6.5%)
    pub annual_rate: Decimal,
    #[serde(default)]
    pub day_count: DayCount,
    #[serde(default)]
    pub rounding: RoundingPolicy,
    pub first_due_date: NaiveDate,
    /// Scheduled principal and interest per month
    pub monthly_installment: Money,
    #[serde(default)]
    pub monthly_escrow: Money,
    #[serde(default)]
    pub late_fee: Money,
    #[serde(default = "default_grace_days")]
    pub late_fee_grace_days: i64,
}

fn default_grace_days() -> i64 {
    15
}

impl LoanTerms {
    /// Installment plus escrow: what one month of "paid" means
    pub fn monthly_total(&self) -> i64 {
        self.monthly_installment.minor() + self.monthly_escrow.minor()
    }

    /// Due date of installment number `n` (0-based)
    pub fn due_date(&self, n: u32) -> NaiveDate {
        self.first_due_date
            .checked_add_months(Months::new(n))
            .unwrap_or(NaiveDate::MAX)
    }
}

/// Signed natural balances per GL account
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountTotals(BTreeMap<GlAccount, i64>);

impl AccountTotals {
    pub fn apply(&mut self, entry: &LedgerEntry) {
        *self.0.entry(entry.account).or_insert(0) += entry.signed_minor();
    }

    pub fn get(&self, account: GlAccount) -> i64 {
        self.0.get(&account).copied().unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&GlAccount, &i64)> {
        self.0.iter()
    }
}

/// Accounts whose credits count toward the paid-through installment count.
///
/// Unapplied holds prepaid installments, so a borrower paid ahead is not
/// delinquent while those funds wait for their due date.
const PAID_THROUGH_ACCOUNTS: [GlAccount; 4] = [
    GlAccount::InterestReceivable,
    GlAccount::LoanPrincipal,
    GlAccount::Escrow,
    GlAccount::Unapplied,
];

/// Whether entries of this event type (or of the event a reversal mirrors)
/// count as borrower money applied to the installment.
pub(crate) fn counts_toward_paid_through(effective_type: EventType) -> bool {
    matches!(
        effective_type,
        EventType::Payment | EventType::SuspenseApplication | EventType::UnappliedApplication
    )
}

/// Signed paid-through contribution of one entry (credit +, debit -)
pub(crate) fn paid_through_delta(entry: &LedgerEntry) -> i64 {
    if PAID_THROUGH_ACCOUNTS.contains(&entry.account) {
        entry.credit_minor() - entry.debit_minor()
    } else {
        0
    }
}

/// Derived per-loan balances as of a business date
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanBalances {
    pub loan_id: LoanId,
    pub principal_minor: i64,
    pub escrow_minor: i64,
    pub suspense_minor: i64,
    pub fees_minor: i64,
    pub interest_minor: i64,
    pub unapplied_minor: i64,
    /// Borrower money applied toward installments, held prepayments included
    #[serde(default)]
    pub applied_minor: i64,
    pub days_delinquent: i64,
    pub next_due_date: Option<NaiveDate>,
    pub as_of: NaiveDate,
}

impl LoanBalances {
    pub(crate) fn derive(
        loan_id: &LoanId,
        totals: &AccountTotals,
        applied_minor: i64,
        terms: Option<&LoanTerms>,
        as_of: NaiveDate,
    ) -> Self {
        let principal_minor = totals.get(GlAccount::LoanPrincipal);
        let (days_delinquent, next_due_date) = match terms {
            Some(terms) if principal_minor > 0 => delinquency(terms, applied_minor, as_of),
            _ => (0, None),
        };

        Self {
            loan_id: loan_id.clone(),
            principal_minor,
            escrow_minor: totals.get(GlAccount::Escrow),
            suspense_minor: totals.get(GlAccount::Suspense),
            fees_minor: totals.get(GlAccount::FeesReceivable),
            interest_minor: totals.get(GlAccount::InterestReceivable),
            unapplied_minor: totals.get(GlAccount::Unapplied),
            applied_minor,
            days_delinquent,
            next_due_date,
            as_of,
        }
    }

    pub fn is_delinquent(&self) -> bool {
        self.days_delinquent > 0
    }

    /// Applied through the installment buckets, excluding funds still held
    /// in unapplied
    pub fn bucket_paid_minor(&self) -> i64 {
        (self.applied_minor - self.unapplied_minor).max(0)
    }

    /// Part of the installment being filled that the buckets already hold
    pub fn paid_toward_current(&self, terms: &LoanTerms) -> i64 {
        let monthly = terms.monthly_total();
        if monthly <= 0 {
            return 0;
        }
        self.bucket_paid_minor() % monthly
    }

    /// Due date of the first installment the buckets have not filled
    pub fn bucket_due_date(&self, terms: &LoanTerms) -> NaiveDate {
        terms.due_date(installments_covered(terms, self.bucket_paid_minor()))
    }
}

fn installments_covered(terms: &LoanTerms, applied_minor: i64) -> u32 {
    let monthly = terms.monthly_total();
    if monthly > 0 {
        (applied_minor.max(0) / monthly).min(u32::MAX as i64) as u32
    } else {
        0
    }
}

/// Paid-through installments drive the next due date; days past that date
/// are days delinquent.
pub fn delinquency(terms: &LoanTerms, applied_minor: i64, as_of: NaiveDate) -> (i64, Option<NaiveDate>) {
    let next_due = terms.due_date(installments_covered(terms, applied_minor));
    let days = (as_of - next_due).num_days().max(0);
    (days, Some(next_due))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn terms() -> LoanTerms {
        LoanTerms {
            loan_id: LoanId::new("LN-1"),
            currency: Currency::Usd,
            annual_rate: dec!(0.06),
            day_count: DayCount::Thirty360,
            rounding: RoundingPolicy::HalfEven,
            first_due_date: date(2024, 2, 1),
            monthly_installment: Money::new(100_000).unwrap(),
            monthly_escrow: Money::new(30_000).unwrap(),
            late_fee: Money::new(5_000).unwrap(),
            late_fee_grace_days: 15,
        }
    }

    #[test]
    fn test_not_yet_due() {
        let (days, next) = delinquency(&terms(), 0, date(2024, 1, 20));
        assert_eq!(days, 0);
        assert_eq!(next, Some(date(2024, 2, 1)));
    }

    #[test]
    fn test_past_due_counts_days() {
        let (days, _) = delinquency(&terms(), 0, date(2024, 2, 21));
        assert_eq!(days, 20);
    }

    #[test]
    fn test_paid_through_advances_due_date() {
        // Two full months plus a partial
        let (days, next) = delinquency(&terms(), 2 * 130_000 + 10, date(2024, 3, 15));
        assert_eq!(next, Some(date(2024, 4, 1)));
        assert_eq!(days, 0);
    }

    #[test]
    fn test_held_prepayment_keeps_loan_current() {
        let mut totals = AccountTotals::default();
        let entry = |account, side, minor| LedgerEntry {
            id: uuid::Uuid::new_v4(),
            event_id: hearth_core::EventId::new(),
            account,
            side,
            amount: Money::new(minor).unwrap(),
            currency: Currency::Usd,
            loan_id: LoanId::new("LN-1"),
            entity_ref: None,
        };
        // One installment through the buckets, the next one held ahead
        let lines = [
            entry(GlAccount::LoanPrincipal, hearth_core::Side::Credit, 100_000),
            entry(GlAccount::Escrow, hearth_core::Side::Credit, 30_000),
            entry(GlAccount::Unapplied, hearth_core::Side::Credit, 130_000),
        ];
        let mut applied = 0;
        for line in &lines {
            totals.apply(line);
            applied += paid_through_delta(line);
        }

        let balances = LoanBalances::derive(&LoanId::new("LN-1"), &totals, applied, Some(&terms()), date(2024, 3, 25));
        assert_eq!(balances.unapplied_minor, 130_000);
        assert_eq!(balances.next_due_date, Some(date(2024, 4, 1)));
        assert_eq!(balances.days_delinquent, 0);

        assert_eq!(balances.bucket_paid_minor(), 130_000);
        assert_eq!(balances.bucket_due_date(&terms()), date(2024, 3, 1));
        assert_eq!(balances.paid_toward_current(&terms()), 0);
    }

    #[test]
    fn test_partial_installment_progress() {
        let balances = LoanBalances {
            loan_id: LoanId::new("LN-1"),
            principal_minor: 1_000_000,
            escrow_minor: 0,
            suspense_minor: 0,
            fees_minor: 0,
            interest_minor: 0,
            unapplied_minor: 0,
            applied_minor: 130_000 + 45_000,
            days_delinquent: 0,
            next_due_date: None,
            as_of: date(2024, 2, 10),
        };
        assert_eq!(balances.paid_toward_current(&terms()), 45_000);
        assert_eq!(balances.bucket_due_date(&terms()), date(2024, 3, 1));
    }

    #[test]
    fn test_deserialize_terms_with_defaults() {
        let json = r#"{
            "loan_id": "ln-9",
            "annual_rate": "0.05",
            "first_due_date": "2024-02-01",
            "monthly_installment": 120000
        }"#;
        let terms: LoanTerms = serde_json::from_str(json).unwrap();
        assert_eq!(terms.loan_id.as_str(), "LN-9");
        assert_eq!(terms.late_fee_grace_days, 15);
        assert_eq!(terms.day_count, DayCount::Thirty360);
        assert!(terms.monthly_escrow.is_zero());
    }
}
