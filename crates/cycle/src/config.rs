//! Servicing cycle configuration

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleConfig {
    /// Loans processed concurrently
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// `source_system` of cycle postings
    #[serde(default = "default_source_system")]
    pub source_system: String,

    #[serde(default = "default_true")]
    pub accrue_interest: bool,

    #[serde(default = "default_true")]
    pub assess_late_fees: bool,

    #[serde(default = "default_true")]
    pub apply_suspense: bool,

    /// Apply prepaid funds held in unapplied once their installment is due
    #[serde(default = "default_true")]
    pub apply_unapplied: bool,
}

fn default_max_workers() -> usize {
    4
}

fn default_source_system() -> String {
    "cycle".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            source_system: default_source_system(),
            accrue_interest: true,
            assess_late_fees: true,
            apply_suspense: true,
            apply_unapplied: true,
        }
    }
}
