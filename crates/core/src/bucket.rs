//! Waterfall buckets

use crate::account::GlAccount;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// A bucket a payment can be applied against, in waterfall terms.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, EnumString, Display,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BucketName {
    FeesDue,
    InterestPastDue,
    InterestCurrent,
    Principal,
    Escrow,
    /// Prepayment held against the next installment
    Future,
}

impl BucketName {
    /// GL account credited when money is applied to this bucket
    pub fn gl_account(&self) -> GlAccount {
        match self {
            BucketName::FeesDue => GlAccount::FeesReceivable,
            BucketName::InterestPastDue | BucketName::InterestCurrent => {
                GlAccount::InterestReceivable
            }
            BucketName::Principal => GlAccount::LoanPrincipal,
            BucketName::Escrow => GlAccount::Escrow,
            BucketName::Future => GlAccount::Unapplied,
        }
    }

    /// Standard servicing order
    pub fn default_waterfall() -> Vec<BucketName> {
        vec![
            BucketName::FeesDue,
            BucketName::InterestPastDue,
            BucketName::InterestCurrent,
            BucketName::Principal,
            BucketName::Escrow,
            BucketName::Future,
        ]
    }
}
