//! Hearth Ledger - double-entry store for loan money movement
//!
//! All financial state changes go through this crate.
//!
//! # Key Types
//! - `NewEvent` / `NewEventBuilder`: a proposed balanced event
//! - `LedgerEvent` / `LedgerEntry`: committed, immutable records
//! - `LedgerStore`: per-loan books, balances and replay
//! - `LoanTerms` / `LoanBalances`: contractual terms and derived balances

pub mod balances;
pub mod error;
pub mod event;
pub mod journal;
pub mod store;
pub mod validation;

pub use balances::{delinquency, AccountTotals, LoanBalances, LoanTerms};
pub use error::{LedgerError, LedgerResult};
pub use event::{
    CashDirection, CashEvent, EntryLine, EventType, LedgerEntry, LedgerEvent, NewEvent,
    NewEventBuilder,
};
pub use journal::{Journal, JournalRecord};
pub use store::LedgerStore;
pub use validation::validate_event;
