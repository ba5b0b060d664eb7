//! Match scoring
//!
//! A score is 0-100: up to 50 for amount, 20 for date proximity and 30 for a
//! reference match. Candidates in the wrong direction, outside the date
//! window or beyond the amount tolerance are not candidates at all.

use hearth_core::{EventId, LoanId, Money};
use hearth_ledger::CashEvent;
use serde::{Deserialize, Serialize};

use crate::config::MatcherConfig;
use crate::transaction::BankTransaction;

pub const AMOUNT_POINTS: i64 = 50;
/// Best amount score for an inexact amount
pub const INEXACT_AMOUNT_POINTS: i64 = 40;
pub const DATE_POINTS: i64 = 20;
pub const REFERENCE_POINTS: i64 = 30;

/// A ledger event proposed as the counterpart of a bank transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CashMatchCandidate {
    pub event_id: EventId,
    pub sequence: u64,
    pub loan_id: LoanId,
    pub score: u8,
    pub amount_variance_minor: i64,
    pub day_distance: i64,
    pub reference_matched: bool,
    pub event_amount: Money,
}

/// `points * part / whole` without overflow for configured extremes
fn scaled(points: i64, part: i64, whole: i64) -> i64 {
    (i128::from(points) * i128::from(part) / i128::from(whole)) as i64
}

/// Score `event` against `txn`, or None when it cannot be a match.
pub fn score_candidate(
    txn: &BankTransaction,
    event: &CashEvent,
    config: &MatcherConfig,
) -> Option<CashMatchCandidate> {
    if txn.direction.cash_direction() != event.direction {
        return None;
    }

    let variance = (txn.amount.minor() - event.amount.minor()).abs();
    let tolerance = config.amount_tolerance_minor.max(0);
    if variance > tolerance {
        return None;
    }

    let day_distance = (txn.date - event.business_date).num_days().abs();
    let window = config.date_window_days.max(0);
    if day_distance > window {
        return None;
    }

    let amount_points = if variance == 0 {
        AMOUNT_POINTS
    } else {
        // tolerance > 0 here, since variance <= tolerance and variance > 0
        INEXACT_AMOUNT_POINTS - scaled(INEXACT_AMOUNT_POINTS, variance, tolerance)
    };

    let date_points = if window == 0 {
        DATE_POINTS
    } else {
        scaled(DATE_POINTS, window - day_distance, window)
    };

    let reference_matched = txn
        .reference
        .as_deref()
        .map(|r| references_equal(r, &event.reference))
        .unwrap_or(false);
    let reference_points = if reference_matched { REFERENCE_POINTS } else { 0 };

    let score = (amount_points + date_points + reference_points).clamp(0, 100) as u8;

    Some(CashMatchCandidate {
        event_id: event.event_id,
        sequence: event.sequence,
        loan_id: event.loan_id.clone(),
        score,
        amount_variance_minor: variance,
        day_distance,
        reference_matched,
        event_amount: event.amount,
    })
}

fn references_equal(a: &str, b: &str) -> bool {
    let a = a.trim();
    !a.is_empty() && a.eq_ignore_ascii_case(b.trim())
}

/// Sort by score descending, then ledger sequence ascending
pub fn rank(candidates: &mut [CashMatchCandidate]) {
    candidates.sort_by(|a, b| b.score.cmp(&a.score).then(a.sequence.cmp(&b.sequence)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{BankDirection, ReconciliationStatus};
    use chrono::{NaiveDate, Utc};
    use hearth_ledger::{CashDirection, EventType};
    use uuid::Uuid;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 2, d).unwrap()
    }

    fn txn(amount: i64, day: u32, reference: Option<&str>) -> BankTransaction {
        BankTransaction {
            id: Uuid::new_v4(),
            bank_account_id: "OPS".to_string(),
            external_id: "BNK-1".to_string(),
            date: date(day),
            amount: Money::new(amount).unwrap(),
            direction: BankDirection::Credit,
            description: String::new(),
            reference: reference.map(str::to_string),
            reconciliation_status: ReconciliationStatus::Pending,
            matched_event_id: None,
            match_score: None,
            imported_at: Utc::now(),
        }
    }

    fn event(amount: i64, day: u32, reference: &str) -> CashEvent {
        CashEvent {
            event_id: EventId::new(),
            sequence: 7,
            loan_id: LoanId::new("LN-1"),
            business_date: date(day),
            event_type: EventType::Payment,
            direction: CashDirection::Inflow,
            amount: Money::new(amount).unwrap(),
            reference: reference.to_string(),
            description: String::new(),
        }
    }

    #[test]
    fn test_exact_match_scores_100() {
        let config = MatcherConfig::default();
        let c = score_candidate(&txn(150_000, 1, Some("PAY-1")), &event(150_000, 1, "pay-1"), &config)
            .unwrap();
        assert_eq!(c.score, 100);
        assert!(c.reference_matched);
    }

    #[test]
    fn test_variance_reduces_score() {
        let config = MatcherConfig::default();
        let c = score_candidate(&txn(149_900, 1, None), &event(150_000, 1, "pay-1"), &config).unwrap();
        // 40 - 40*100/500 = 32 amount, 20 date, 0 reference
        assert_eq!(c.score, 52);
        assert_eq!(c.amount_variance_minor, 100);
    }

    #[test]
    fn test_date_decay() {
        let config = MatcherConfig::default();
        let c = score_candidate(&txn(150_000, 3, None), &event(150_000, 1, "x"), &config).unwrap();
        // 50 amount, 20*(3-2)/3 = 6 date
        assert_eq!(c.score, 56);
    }

    #[test]
    fn test_out_of_bounds_dropped() {
        let config = MatcherConfig::default();
        assert!(score_candidate(&txn(150_000, 1, None), &event(149_000, 1, "x"), &config).is_none());
        assert!(score_candidate(&txn(150_000, 9, None), &event(150_000, 1, "x"), &config).is_none());

        let mut outflow = event(150_000, 1, "x");
        outflow.direction = CashDirection::Outflow;
        assert!(score_candidate(&txn(150_000, 1, None), &outflow, &config).is_none());
    }

    #[test]
    fn test_rank_orders_by_score_then_sequence() {
        let config = MatcherConfig::default();
        let t = txn(150_000, 1, None);
        let mut a = score_candidate(&t, &event(150_000, 1, "a"), &config).unwrap();
        a.sequence = 9;
        let mut b = score_candidate(&t, &event(150_000, 1, "b"), &config).unwrap();
        b.sequence = 3;
        let c = score_candidate(&t, &event(149_950, 1, "c"), &config).unwrap();

        let mut all = vec![c.clone(), a.clone(), b.clone()];
        rank(&mut all);
        assert_eq!(all[0].sequence, 3);
        assert_eq!(all[1].sequence, 9);
        assert_eq!(all[2].event_id, c.event_id);
    }
}
