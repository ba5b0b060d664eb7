//! Hearth Payment Allocation
//!
//! Splits an incoming payment across fees, interest, principal and escrow in
//! waterfall order and posts the result as one balanced ledger event.

pub mod engine;
pub mod error;
pub mod waterfall;

pub use engine::{PaymentEngine, PaymentReceipt, PaymentSubmission, ReceiptStatus};
pub use error::{AllocationError, AllocationResult};
pub use waterfall::{
    allocate, plan_event, Allocation, AllocationLine, Outstanding, PlanContext, WaterfallPolicy,
};
