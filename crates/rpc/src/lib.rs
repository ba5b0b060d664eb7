//! Hearth RPC - CLI and service wiring
//!
//! `AppContext` builds every service from a `HearthConfig`; `commands`
//! holds the operations the `hearth` binary exposes.

pub mod commands;
pub mod config;
pub mod context;

pub use config::HearthConfig;
pub use context::AppContext;
