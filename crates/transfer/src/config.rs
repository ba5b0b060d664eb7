//! Transfer processor configuration

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Originating bank routing prefix; trace numbers are this plus a
    /// 7-digit sequence
    #[serde(default = "default_odfi_prefix")]
    pub odfi_prefix: String,

    /// Largest number of entries accepted in one batch
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// `source_system` used for settlement postings
    #[serde(default = "default_source_system")]
    pub source_system: String,
}

fn default_odfi_prefix() -> String {
    "09100001".to_string()
}

fn default_max_batch_size() -> usize {
    500
}

fn default_source_system() -> String {
    "transfer".to_string()
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            odfi_prefix: default_odfi_prefix(),
            max_batch_size: default_max_batch_size(),
            source_system: default_source_system(),
        }
    }
}

impl TransferConfig {
    pub fn trace_number(&self, sequence: u64) -> String {
        format!("{}{:07}", self.odfi_prefix, sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_number_format() {
        let config = TransferConfig::default();
        assert_eq!(config.trace_number(42), "091000010000042");
        assert_eq!(config.trace_number(42).len(), 15);
    }

    #[test]
    fn test_defaults_from_empty_json() {
        let config: TransferConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, TransferConfig::default());
    }
}
