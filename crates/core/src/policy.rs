//! Day-count and rounding policy for interest accrual

use crate::money::{Money, MoneyError};
use chrono::{Datelike, NaiveDate};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Day-count convention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DayCount {
    Actual360,
    Actual365,
    /// US 30/360 (bond basis)
    #[default]
    Thirty360,
}

impl DayCount {
    /// Number of accrual days in `[from, to)`
    pub fn days_between(&self, from: NaiveDate, to: NaiveDate) -> i64 {
        match self {
            DayCount::Actual360 | DayCount::Actual365 => (to - from).num_days(),
            DayCount::Thirty360 => {
                let d1 = from.day().min(30) as i64;
                let d2 = if d1 == 30 {
                    to.day().min(30) as i64
                } else {
                    to.day() as i64
                };
                360 * (to.year() as i64 - from.year() as i64)
                    + 30 * (to.month() as i64 - from.month() as i64)
                    + (d2 - d1)
            }
        }
    }

    pub fn year_basis(&self) -> i64 {
        match self {
            DayCount::Actual365 => 365,
            DayCount::Actual360 | DayCount::Thirty360 => 360,
        }
    }
}

/// How fractional minor units are resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RoundingPolicy {
    /// Banker's rounding
    #[default]
    HalfEven,
    HalfUp,
    /// Truncate toward zero
    Down,
}

impl RoundingPolicy {
    pub fn round(&self, value: Decimal) -> Decimal {
        let strategy = match self {
            RoundingPolicy::HalfEven => RoundingStrategy::MidpointNearestEven,
            RoundingPolicy::HalfUp => RoundingStrategy::MidpointAwayFromZero,
            RoundingPolicy::Down => RoundingStrategy::ToZero,
        };
        value.round_dp_with_strategy(0, strategy)
    }
}

/// Simple interest on `principal_minor` for `[from, to)`.
///
/// Returns zero when the period is empty or the principal is not positive.
pub fn accrue_interest(
    principal_minor: i64,
    annual_rate: Decimal,
    from: NaiveDate,
    to: NaiveDate,
    day_count: DayCount,
    rounding: RoundingPolicy,
) -> Result<Money, MoneyError> {
    if principal_minor <= 0 || to <= from || annual_rate <= Decimal::ZERO {
        return Ok(Money::ZERO);
    }

    let days = day_count.days_between(from, to);
    if days <= 0 {
        return Ok(Money::ZERO);
    }

    let raw = Decimal::from(principal_minor) * annual_rate * Decimal::from(days)
        / Decimal::from(day_count.year_basis());
    let rounded = rounding.round(raw);
    let minor = rounded
        .to_i64()
        .ok_or_else(|| MoneyError::Overflow(rounded.to_string()))?;
    Money::new(minor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_thirty_360_month_end() {
        let days = DayCount::Thirty360.days_between(date(2024, 1, 31), date(2024, 2, 29));
        assert_eq!(days, 29);
        let days = DayCount::Thirty360.days_between(date(2024, 1, 1), date(2024, 2, 1));
        assert_eq!(days, 30);
    }

    #[test]
    fn test_actual_days() {
        let days = DayCount::Actual365.days_between(date(2024, 2, 1), date(2024, 3, 1));
        assert_eq!(days, 29);
    }

    #[test]
    fn test_accrue_one_month() {
        // 100,000.00 at 6% for a 30/360 month = 500.00
        let interest = accrue_interest(
            10_000_000,
            dec!(0.06),
            date(2024, 1, 1),
            date(2024, 2, 1),
            DayCount::Thirty360,
            RoundingPolicy::HalfEven,
        )
        .unwrap();
        assert_eq!(interest.minor(), 50_000);
    }

    #[test]
    fn test_rounding_modes() {
        assert_eq!(RoundingPolicy::HalfEven.round(dec!(2.5)), dec!(2));
        assert_eq!(RoundingPolicy::HalfUp.round(dec!(2.5)), dec!(3));
        assert_eq!(RoundingPolicy::Down.round(dec!(2.9)), dec!(2));
    }

    #[test]
    fn test_empty_period_accrues_nothing() {
        let interest = accrue_interest(
            10_000_000,
            dec!(0.06),
            date(2024, 2, 1),
            date(2024, 2, 1),
            DayCount::Actual360,
            RoundingPolicy::HalfUp,
        )
        .unwrap();
        assert!(interest.is_zero());
    }
}
