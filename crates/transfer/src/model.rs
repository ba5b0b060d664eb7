//! Transfer batch types

use chrono::{DateTime, NaiveDate, Utc};
use hearth_core::{Currency, EventId, LoanId, Money};
use hearth_recon::Severity;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::error::{TransferError, TransferResult};

/// Entry lifecycle
///
/// ```text
/// pending ──▶ sent ──▶ settled
///               │         │
///               └────┬────┘
///                    ▼
///                 returned
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    Pending,
    Sent,
    Settled,
    Returned,
}

impl EntryState {
    pub fn can_transition_to(&self, next: EntryState) -> bool {
        use EntryState::*;
        matches!(
            (self, next),
            (Pending, Sent) | (Sent, Settled) | (Sent, Returned) | (Settled, Returned)
        )
    }
}

/// Caller's request for one transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTransferEntry {
    pub loan_id: LoanId,
    pub amount: Money,
    #[serde(default)]
    pub currency: Currency,
    /// Caller-chosen key; a key is accepted at most once, ever
    pub idempotency_key: String,
    /// Masked receiving account, e.g. "****6789"
    #[serde(default)]
    pub account_ref: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferEntry {
    pub trace_number: String,
    pub batch_id: Uuid,
    pub loan_id: LoanId,
    pub amount: Money,
    pub currency: Currency,
    pub idempotency_key: String,
    pub account_ref: String,
    pub state: EntryState,
    pub settlement_event_id: Option<EventId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferBatch {
    pub id: Uuid,
    pub effective_date: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub entries: Vec<TransferEntry>,
}

impl TransferBatch {
    pub fn total_minor(&self) -> i64 {
        self.entries.iter().map(|e| e.amount.minor()).sum()
    }
}

/// Standard two-character-plus-digits ACH return code, e.g. `R01`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ReturnCode(String);

impl ReturnCode {
    pub fn parse(raw: &str) -> TransferResult<Self> {
        let code = raw.trim().to_ascii_uppercase();
        let bytes = code.as_bytes();
        let valid = bytes.len() == 3
            && bytes[0] == b'R'
            && bytes[1].is_ascii_digit()
            && bytes[2].is_ascii_digit();
        if !valid {
            return Err(TransferError::InvalidReturnCode(raw.to_string()));
        }
        Ok(Self(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Exception severity for this return
    pub fn severity(&self) -> Severity {
        match self.0.as_str() {
            "R01" | "R09" => Severity::Medium,
            "R02" | "R03" | "R04" => Severity::High,
            "R05" | "R07" | "R10" | "R29" => Severity::Critical,
            _ => Severity::Low,
        }
    }

    pub fn description(&self) -> &'static str {
        match self.0.as_str() {
            "R01" => "insufficient funds",
            "R02" => "account closed",
            "R03" => "no account / unable to locate account",
            "R04" => "invalid account number",
            "R05" => "unauthorized debit to consumer account",
            "R07" => "authorization revoked by customer",
            "R08" => "payment stopped",
            "R09" => "uncollected funds",
            "R10" => "customer advises not authorized",
            "R16" => "account frozen",
            "R20" => "non-transaction account",
            "R29" => "corporate customer advises not authorized",
            _ => "other return",
        }
    }
}

impl std::fmt::Display for ReturnCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for ReturnCode {
    type Error = TransferError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ReturnCode::parse(&value)
    }
}

impl From<ReturnCode> for String {
    fn from(code: ReturnCode) -> Self {
        code.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReturn {
    pub trace_number: String,
    pub return_code: ReturnCode,
    pub amount: Money,
    /// Compensating reversal, when the entry had settled
    pub reversal_event_id: Option<EventId>,
    pub exception_id: Uuid,
    pub received_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_machine() {
        use EntryState::*;
        assert!(Pending.can_transition_to(Sent));
        assert!(Sent.can_transition_to(Settled));
        assert!(Sent.can_transition_to(Returned));
        assert!(Settled.can_transition_to(Returned));

        assert!(!Pending.can_transition_to(Settled));
        assert!(!Pending.can_transition_to(Returned));
        assert!(!Returned.can_transition_to(Settled));
        assert!(!Settled.can_transition_to(Sent));
    }

    #[test]
    fn test_return_code_severity() {
        let sev = |c: &str| ReturnCode::parse(c).unwrap().severity();
        assert_eq!(sev("R01"), Severity::Medium);
        assert_eq!(sev("r09"), Severity::Medium);
        assert_eq!(sev("R03"), Severity::High);
        assert_eq!(sev("R29"), Severity::Critical);
        assert_eq!(sev("R16"), Severity::Low);
    }

    #[test]
    fn test_return_code_rejects_garbage() {
        assert!(ReturnCode::parse("X01").is_err());
        assert!(ReturnCode::parse("R1").is_err());
        assert!(serde_json::from_str::<ReturnCode>("\"R1A\"").is_err());
        assert_eq!(
            serde_json::from_str::<ReturnCode>("\"r05\"").unwrap().as_str(),
            "R05"
        );
    }
}
