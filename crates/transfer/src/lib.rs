//! Hearth Transfers - ACH-style batch processing
//!
//! Entries move `pending -> sent -> settled | returned` (and a settled entry
//! may still be returned). Idempotency keys and trace numbers are unique in
//! the SQLite store. Settlement credits suspense for the loan; a return of a
//! settled entry reverses that posting and raises a `return` exception.

pub mod config;
pub mod error;
pub mod gateway;
pub mod model;
pub mod processor;
pub mod store;

pub use config::TransferConfig;
pub use error::{TransferError, TransferResult};
pub use gateway::{GatewayAck, MockGateway, OutboxGateway, TransferGateway};
pub use model::{EntryState, NewTransferEntry, ReturnCode, TransferBatch, TransferEntry, TransferReturn};
pub use processor::TransferProcessor;
pub use store::TransferStore;
