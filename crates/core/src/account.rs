//! General-ledger accounts
//!
//! Every ledger line posts to exactly one `GlAccount`. Codes are stable
//! strings (`CASH`, `LOAN_PRINCIPAL`, ...) so they can be typed at the edge
//! and validated once.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};
use thiserror::Error;

/// Errors for account code parsing
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccountError {
    #[error("Unknown GL account code: {0}")]
    UnknownCode(String),
}

/// Debit or credit side of a ledger line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Debit,
    Credit,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Debit => Side::Credit,
            Side::Credit => Side::Debit,
        }
    }
}

/// Account category following standard accounting principles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountCategory {
    /// Resources owned by the servicer (cash, receivables from borrowers)
    Asset,
    /// Obligations (escrow held for borrowers, unapplied funds)
    Liability,
    Equity,
    /// Income earned (interest, fees)
    Revenue,
    Expense,
}

impl AccountCategory {
    /// Returns the normal balance side for this category.
    ///
    /// - Assets and Expenses increase on Debit
    /// - Liabilities, Equity, and Revenue increase on Credit
    pub fn normal_balance(&self) -> Side {
        match self {
            AccountCategory::Asset | AccountCategory::Expense => Side::Debit,
            AccountCategory::Liability | AccountCategory::Equity | AccountCategory::Revenue => {
                Side::Credit
            }
        }
    }
}

/// Servicing chart of accounts
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
    EnumString,
    Display,
    EnumIter,
    AsRefStr,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GlAccount {
    /// Operating cash at the custodial bank
    Cash,
    /// Unpaid principal balance receivable
    LoanPrincipal,
    /// Accrued, uncollected interest
    InterestReceivable,
    /// Assessed, uncollected fees (late fees, NSF fees)
    FeesReceivable,
    /// Escrow funds held for taxes and insurance
    Escrow,
    /// Funds received but not yet definitively allocated
    Suspense,
    /// Prepaid funds held against future installments
    Unapplied,
    InterestIncome,
    FeeIncome,
    /// Offset for loan disbursements funded by the warehouse line
    FundingClearing,
}

impl GlAccount {
    pub fn category(&self) -> AccountCategory {
        match self {
            GlAccount::Cash
            | GlAccount::LoanPrincipal
            | GlAccount::InterestReceivable
            | GlAccount::FeesReceivable => AccountCategory::Asset,
            GlAccount::Escrow
            | GlAccount::Suspense
            | GlAccount::Unapplied
            | GlAccount::FundingClearing => AccountCategory::Liability,
            GlAccount::InterestIncome | GlAccount::FeeIncome => AccountCategory::Revenue,
        }
    }

    pub fn normal_balance(&self) -> Side {
        self.category().normal_balance()
    }

    /// Stable code used at the edges (`CASH`, `LOAN_PRINCIPAL`, ...)
    pub fn code(&self) -> &str {
        self.as_ref()
    }

    /// Parse an account code, case-insensitively.
    pub fn from_code(code: &str) -> Result<Self, AccountError> {
        GlAccount::from_str(&code.trim().to_uppercase())
            .map_err(|_| AccountError::UnknownCode(code.to_string()))
    }

    /// Signed effect of a line on this account's natural balance
    pub fn signed_delta(&self, side: Side, minor: i64) -> i64 {
        if side == self.normal_balance() {
            minor
        } else {
            -minor
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_codes_roundtrip() {
        for account in GlAccount::iter() {
            let parsed = GlAccount::from_code(account.code()).unwrap();
            assert_eq!(parsed, account);
        }
    }

    #[test]
    fn test_code_case_insensitive() {
        assert_eq!(
            GlAccount::from_code("loan_principal").unwrap(),
            GlAccount::LoanPrincipal
        );
        assert_eq!(GlAccount::from_code("escrow").unwrap(), GlAccount::Escrow);
    }

    #[test]
    fn test_unknown_code() {
        assert!(matches!(
            GlAccount::from_code("PETTY_CASH"),
            Err(AccountError::UnknownCode(_))
        ));
    }

    #[test]
    fn test_normal_balance() {
        assert_eq!(GlAccount::Cash.normal_balance(), Side::Debit);
        assert_eq!(GlAccount::Escrow.normal_balance(), Side::Credit);
        assert_eq!(GlAccount::InterestIncome.normal_balance(), Side::Credit);
        assert_eq!(GlAccount::LoanPrincipal.signed_delta(Side::Credit, 100), -100);
    }
}
