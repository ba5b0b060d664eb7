//! Identifier newtypes shared across components

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Loan number as assigned by the origination system
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct LoanId(String);

impl LoanId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into().trim().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LoanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LoanId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for LoanId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<LoanId> for String {
    fn from(id: LoanId) -> Self {
        id.0
    }
}

/// Ledger event identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for EventId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loan_id_normalized() {
        assert_eq!(LoanId::new(" ln-001 ").as_str(), "LN-001");
        assert_eq!(LoanId::from("ln-001"), LoanId::new("LN-001"));
    }

    #[test]
    fn test_event_id_parse() {
        let id = EventId::new();
        let parsed: EventId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }
}
