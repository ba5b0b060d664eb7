//! Hearth Core - Domain types
//!
//! Fundamental types shared by every servicing component:
//! - `Money`: non-negative integer minor-unit amounts
//! - `Currency`: fiat codes with their minor-unit exponent
//! - `GlAccount` / `BucketName`: general-ledger accounts and waterfall buckets
//! - `DayCount` / `RoundingPolicy`: interest accrual policy

pub mod account;
pub mod bucket;
pub mod currency;
pub mod ids;
pub mod money;
pub mod policy;

pub use account::{AccountCategory, AccountError, GlAccount, Side};
pub use bucket::BucketName;
pub use currency::{Currency, CurrencyError};
pub use ids::{EventId, LoanId};
pub use money::{Money, MoneyError};
pub use policy::{accrue_interest, DayCount, RoundingPolicy};
