//! Hearth Compliance Audit Log
//!
//! Every state-changing action in the servicing core appends one record here.
//! Records form a single global hash chain:
//!
//! ```text
//! record_hash(n) = SHA256(payload_hash(n) || prev_hash(n))
//! prev_hash(n)   = record_hash(n - 1)        (GENESIS for n = 1)
//! ```
//!
//! There is no update or delete. `verify_chain` recomputes both hashes over a
//! range and fails on any altered byte.

pub mod entry;
pub mod error;
pub mod hash;
pub mod log;

pub use entry::{Actor, ActorType, AuditRecord, NewAuditEntry};
pub use error::{AuditError, AuditResult};
pub use hash::{ChainError, GENESIS_HASH};
pub use log::AuditLog;
