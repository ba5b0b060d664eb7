//! Matcher configuration

use serde::{Deserialize, Serialize};

/// Tuning for bank transaction matching
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatcherConfig {
    /// Candidates must be within this many days of the bank date
    #[serde(default = "default_date_window_days")]
    pub date_window_days: i64,

    /// Largest amount variance (minor units) still considered a candidate
    #[serde(default = "default_amount_tolerance_minor")]
    pub amount_tolerance_minor: i64,

    /// Minimum score (0-100) for an automatic match
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: u8,

    /// Days a transaction may stay pending before it becomes an exception
    #[serde(default = "default_grace_period_days")]
    pub grace_period_days: i64,
}

fn default_date_window_days() -> i64 {
    3
}

fn default_amount_tolerance_minor() -> i64 {
    500
}

fn default_confidence_threshold() -> u8 {
    80
}

fn default_grace_period_days() -> i64 {
    5
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            date_window_days: default_date_window_days(),
            amount_tolerance_minor: default_amount_tolerance_minor(),
            confidence_threshold: default_confidence_threshold(),
            grace_period_days: default_grace_period_days(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: MatcherConfig = serde_json::from_str(r#"{"confidence_threshold": 90}"#).unwrap();
        assert_eq!(config.confidence_threshold, 90);
        assert_eq!(config.date_window_days, 3);
        assert_eq!(config.amount_tolerance_minor, 500);
    }
}
