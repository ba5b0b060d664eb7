//! Event validation
//!
//! Structural double-entry checks first, then event-type posting rules.
//! Everything here is pure; nothing is written until an event passes.

use hearth_core::{AccountCategory, GlAccount, Side};

use crate::error::LedgerError;
use crate::event::{EntryLine, EventType, NewEvent};

/// Validation result with detailed error
pub type ValidationResult = Result<(), LedgerError>;

/// Run every check for a proposed event
pub fn validate_event(event: &NewEvent) -> ValidationResult {
    validate_structure(event)?;
    validate_type_rules(event)
}

/// Double-entry structure: at least two non-zero lines, one loan, one
/// currency, Σdebit == Σcredit.
pub fn validate_structure(event: &NewEvent) -> ValidationResult {
    if event.source_system.trim().is_empty() || event.source_id.trim().is_empty() {
        return Err(LedgerError::Validation(
            "source_system and source_id are required".to_string(),
        ));
    }

    if event.lines.len() < 2 {
        return Err(LedgerError::Validation(format!(
            "event needs at least 2 lines, got {}",
            event.lines.len()
        )));
    }

    if let Some(line) = event.lines.iter().find(|l| l.amount.is_zero()) {
        return Err(LedgerError::Validation(format!(
            "zero amount on {} {}",
            line.side, line.account
        )));
    }

    if let Some(line) = event
        .lines
        .iter()
        .find(|l| l.loan_id.as_ref().is_some_and(|id| *id != event.loan_id))
    {
        return Err(LedgerError::Validation(format!(
            "line on {} belongs to another loan than {}",
            line.account, event.loan_id
        )));
    }

    let currency = &event.lines[0].currency;
    if event.lines.iter().any(|l| &l.currency != currency) {
        return Err(LedgerError::Validation(
            "all lines of an event must share one currency".to_string(),
        ));
    }

    let debits = checked_total(&event.lines, Side::Debit)?;
    let credits = checked_total(&event.lines, Side::Credit)?;
    if debits != credits {
        return Err(LedgerError::Imbalanced { debits, credits });
    }

    Ok(())
}

fn checked_total(lines: &[EntryLine], side: Side) -> Result<i64, LedgerError> {
    lines
        .iter()
        .filter(|l| l.side == side)
        .try_fold(0i64, |acc, l| acc.checked_add(l.amount.minor()))
        .ok_or_else(|| LedgerError::Validation(format!("{side} total overflows")))
}

/// Posting rules per event type
pub fn validate_type_rules(event: &NewEvent) -> ValidationResult {
    match (event.event_type, event.reversal_of_event_id) {
        (EventType::Reversal, None) => {
            return Err(LedgerError::Validation(
                "reversal event must reference the reversed event".to_string(),
            ))
        }
        (EventType::Reversal, Some(_)) => return Ok(()),
        (_, Some(_)) => {
            return Err(LedgerError::Validation(format!(
                "{} event cannot carry reversal_of_event_id",
                event.event_type
            )))
        }
        (_, None) => {}
    }

    match event.event_type {
        EventType::Disbursement => validate_disbursement(event),
        EventType::Payment => validate_payment(event),
        EventType::InterestAccrual => only_accounts(
            event,
            &[
                (GlAccount::InterestReceivable, Side::Debit),
                (GlAccount::InterestIncome, Side::Credit),
            ],
        ),
        EventType::FeeAssessment => only_accounts(
            event,
            &[
                (GlAccount::FeesReceivable, Side::Debit),
                (GlAccount::FeeIncome, Side::Credit),
            ],
        ),
        EventType::SuspenseApplication => validate_suspense_application(event),
        EventType::UnappliedApplication => only_accounts(
            event,
            &[
                (GlAccount::Unapplied, Side::Debit),
                (GlAccount::InterestReceivable, Side::Credit),
                (GlAccount::LoanPrincipal, Side::Credit),
                (GlAccount::Escrow, Side::Credit),
            ],
        ),
        EventType::TransferSettlement => only_accounts(
            event,
            &[(GlAccount::Cash, Side::Debit), (GlAccount::Suspense, Side::Credit)],
        ),
        // Adjustments allow any accounts; they are audit-heavy instead
        EventType::Adjustment | EventType::Reversal => Ok(()),
    }
}

/// Disbursement: LOAN_PRINCIPAL debit against CASH or FUNDING_CLEARING
fn validate_disbursement(event: &NewEvent) -> ValidationResult {
    for line in &event.lines {
        let valid = matches!(
            (line.account, line.side),
            (GlAccount::LoanPrincipal, Side::Debit)
                | (GlAccount::Cash, Side::Credit)
                | (GlAccount::FundingClearing, Side::Credit)
        );
        if !valid {
            return Err(invalid_posting(event.event_type, line, "disbursement debits principal against a funding source"));
        }
    }
    Ok(())
}

/// Payment: CASH debit, credits to receivables, escrow or holding accounts
fn validate_payment(event: &NewEvent) -> ValidationResult {
    for line in &event.lines {
        let valid = match line.side {
            Side::Debit => line.account == GlAccount::Cash,
            Side::Credit => is_bucket_or_holding(line.account),
        };
        if !valid {
            return Err(invalid_posting(event.event_type, line, "payment debits CASH and credits buckets or suspense"));
        }
    }
    Ok(())
}

/// Suspense application: SUSPENSE debit, credits to bucket accounts
fn validate_suspense_application(event: &NewEvent) -> ValidationResult {
    for line in &event.lines {
        let valid = match line.side {
            Side::Debit => line.account == GlAccount::Suspense,
            Side::Credit => is_bucket_or_holding(line.account) && line.account != GlAccount::Suspense,
        };
        if !valid {
            return Err(invalid_posting(event.event_type, line, "suspense application debits SUSPENSE and credits buckets"));
        }
    }
    Ok(())
}

fn is_bucket_or_holding(account: GlAccount) -> bool {
    match account.category() {
        AccountCategory::Asset => account != GlAccount::Cash,
        AccountCategory::Liability => account != GlAccount::FundingClearing,
        _ => false,
    }
}

fn only_accounts(event: &NewEvent, allowed: &[(GlAccount, Side)]) -> ValidationResult {
    for line in &event.lines {
        if !allowed.contains(&(line.account, line.side)) {
            return Err(invalid_posting(event.event_type, line, "account/side not allowed for this event type"));
        }
    }
    Ok(())
}

fn invalid_posting(event_type: EventType, line: &EntryLine, reason: &str) -> LedgerError {
    LedgerError::Validation(format!(
        "invalid {} posting {} {}: {}",
        event_type, line.side, line.account, reason
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_core::{Currency, EventId, Money};

    fn m(minor: i64) -> Money {
        Money::new(minor).unwrap()
    }

    fn payment() -> crate::event::NewEventBuilder {
        NewEvent::builder(EventType::Payment, "LN-1").source("portal", "p-1")
    }

    #[test]
    fn test_balanced_payment_ok() {
        let event = payment()
            .debit(GlAccount::Cash, m(1000))
            .credit(GlAccount::LoanPrincipal, m(1000))
            .build();
        assert!(validate_event(&event).is_ok());
    }

    #[test]
    fn test_imbalanced_rejected() {
        let event = payment()
            .debit(GlAccount::Cash, m(1000))
            .credit(GlAccount::LoanPrincipal, m(999))
            .build();
        assert_eq!(
            validate_event(&event),
            Err(LedgerError::Imbalanced {
                debits: 1000,
                credits: 999
            })
        );
    }

    #[test]
    fn test_single_line_rejected() {
        let event = payment().debit(GlAccount::Cash, m(1000)).build();
        assert!(matches!(validate_event(&event), Err(LedgerError::Validation(_))));
    }

    #[test]
    fn test_zero_amount_rejected() {
        let event = payment()
            .debit(GlAccount::Cash, m(0))
            .credit(GlAccount::LoanPrincipal, m(0))
            .build();
        assert!(matches!(validate_event(&event), Err(LedgerError::Validation(_))));
    }

    #[test]
    fn test_mixed_loans_rejected() {
        let event = payment()
            .debit(GlAccount::Cash, m(100))
            .line(EntryLine::credit(GlAccount::LoanPrincipal, m(100)).with_loan("LN-2".into()))
            .build();
        assert!(matches!(validate_event(&event), Err(LedgerError::Validation(_))));
    }

    #[test]
    fn test_mixed_currency_rejected() {
        let event = payment()
            .debit(GlAccount::Cash, m(100))
            .line(EntryLine::credit(GlAccount::LoanPrincipal, m(100)).with_currency(Currency::Cad))
            .build();
        assert!(matches!(validate_event(&event), Err(LedgerError::Validation(_))));
    }

    #[test]
    fn test_payment_must_debit_cash() {
        let event = payment()
            .debit(GlAccount::Escrow, m(100))
            .credit(GlAccount::LoanPrincipal, m(100))
            .build();
        assert!(matches!(validate_event(&event), Err(LedgerError::Validation(_))));
    }

    #[test]
    fn test_accrual_rules() {
        let ok = NewEvent::builder(EventType::InterestAccrual, "LN-1")
            .source("cycle", "a-1")
            .debit(GlAccount::InterestReceivable, m(50))
            .credit(GlAccount::InterestIncome, m(50))
            .build();
        assert!(validate_event(&ok).is_ok());

        let bad = NewEvent::builder(EventType::InterestAccrual, "LN-1")
            .source("cycle", "a-2")
            .debit(GlAccount::Cash, m(50))
            .credit(GlAccount::InterestIncome, m(50))
            .build();
        assert!(validate_event(&bad).is_err());
    }

    #[test]
    fn test_unapplied_application_rules() {
        let ok = NewEvent::builder(EventType::UnappliedApplication, "LN-1")
            .source("cycle", "unapplied:LN-1:2024-03-01")
            .debit(GlAccount::Unapplied, m(150))
            .credit(GlAccount::InterestReceivable, m(50))
            .credit(GlAccount::LoanPrincipal, m(70))
            .credit(GlAccount::Escrow, m(30))
            .build();
        assert!(validate_event(&ok).is_ok());

        // Held prepayments never pay fees or move back into suspense
        let fees = NewEvent::builder(EventType::UnappliedApplication, "LN-1")
            .source("cycle", "unapplied:LN-1:2024-04-01")
            .debit(GlAccount::Unapplied, m(50))
            .credit(GlAccount::FeesReceivable, m(50))
            .build();
        assert!(validate_event(&fees).is_err());
    }

    #[test]
    fn test_reversal_link_rules() {
        let mut reversal = NewEvent::builder(EventType::Reversal, "LN-1")
            .source("reversal", "x")
            .debit(GlAccount::LoanPrincipal, m(10))
            .credit(GlAccount::Cash, m(10))
            .build();
        assert!(validate_event(&reversal).is_err());

        reversal.reversal_of_event_id = Some(EventId::new());
        assert!(validate_event(&reversal).is_ok());

        let mut payment = payment()
            .debit(GlAccount::Cash, m(10))
            .credit(GlAccount::LoanPrincipal, m(10))
            .build();
        payment.reversal_of_event_id = Some(EventId::new());
        assert!(validate_event(&payment).is_err());
    }

    #[test]
    fn test_missing_source_rejected() {
        let event = NewEvent::builder(EventType::Adjustment, "LN-1")
            .debit(GlAccount::Cash, m(10))
            .credit(GlAccount::Suspense, m(10))
            .build();
        assert!(matches!(validate_event(&event), Err(LedgerError::Validation(_))));
    }
}
