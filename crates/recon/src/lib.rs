//! Hearth Reconciliation - bank statement matching and exception queue
//!
//! # Flow
//! 1. `ReconMatcher::import_statement` stores bank lines (duplicates rejected)
//! 2. each line is scored against open ledger cash events and auto-matched
//!    when the best candidate is confident and unambiguous
//! 3. `promote_stale` turns lines pending past the grace period into
//!    `ReconciliationException`s for operations staff
//!
//! Opened over a [`ReconStore`], transactions, matches and exceptions are
//! kept in SQLite and survive restarts.

pub mod config;
pub mod error;
pub mod exception;
pub mod matcher;
pub mod scoring;
pub mod store;
pub mod transaction;

pub use config::MatcherConfig;
pub use error::{ReconError, ReconResult};
pub use exception::{
    ExceptionCategory, ExceptionFilter, ExceptionState, ExceptionStore, NewException,
    ReconciliationException, Severity,
};
pub use matcher::{ImportReport, ReconMatcher};
pub use scoring::{rank, score_candidate, CashMatchCandidate};
pub use store::ReconStore;
pub use transaction::{
    read_statement_csv, BankDirection, BankTransaction, ReconciliationStatus, StatementRow,
};
