//! Bank transactions and statement parsing
//!
//! CSV statements use the header
//! `external_id,date,amount,direction,description,reference`.
//! Amounts are major-unit decimal strings, parsed once into `Money`.

use chrono::{DateTime, NaiveDate, Utc};
use hearth_core::{Currency, EventId, Money};
use hearth_ledger::CashDirection;
use serde::{Deserialize, Serialize};
use std::io::Read;
use strum_macros::{Display, EnumString};
use uuid::Uuid;

use crate::error::{ReconError, ReconResult};

/// Direction as reported by the bank, from the servicer account's view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BankDirection {
    /// Money into the account
    Credit,
    /// Money out of the account
    Debit,
}

impl BankDirection {
    /// Ledger cash direction this bank movement corresponds to
    pub fn cash_direction(&self) -> CashDirection {
        match self {
            BankDirection::Credit => CashDirection::Inflow,
            BankDirection::Debit => CashDirection::Outflow,
        }
    }

    pub(crate) fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "c" | "cr" | "credit" => Some(BankDirection::Credit),
            "d" | "dr" | "debit" => Some(BankDirection::Debit),
            _ => None,
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationStatus {
    Pending,
    Matched,
    Exception,
}

/// An externally reported cash movement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankTransaction {
    pub id: Uuid,
    pub bank_account_id: String,
    /// Bank's id for the transaction; unique per account
    pub external_id: String,
    pub date: NaiveDate,
    pub amount: Money,
    pub direction: BankDirection,
    pub description: String,
    pub reference: Option<String>,
    pub reconciliation_status: ReconciliationStatus,
    pub matched_event_id: Option<EventId>,
    pub match_score: Option<u8>,
    pub imported_at: DateTime<Utc>,
}

/// One parsed statement line, before it is stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementRow {
    pub external_id: String,
    pub date: NaiveDate,
    pub amount: Money,
    pub direction: BankDirection,
    pub description: String,
    pub reference: Option<String>,
}

impl StatementRow {
    pub(crate) fn into_transaction(self, bank_account_id: &str) -> BankTransaction {
        BankTransaction {
            id: Uuid::new_v4(),
            bank_account_id: bank_account_id.to_string(),
            external_id: self.external_id,
            date: self.date,
            amount: self.amount,
            direction: self.direction,
            description: self.description,
            reference: self.reference.filter(|r| !r.trim().is_empty()),
            reconciliation_status: ReconciliationStatus::Pending,
            matched_event_id: None,
            match_score: None,
            imported_at: Utc::now(),
        }
    }
}

#[derive(Deserialize)]
struct CsvRow {
    external_id: String,
    date: String,
    amount: String,
    direction: String,
    #[serde(default)]
    description: String,
    reference: Option<String>,
}

/// Parse a CSV bank statement
pub fn read_statement_csv<R: Read>(reader: R, currency: &Currency) -> ReconResult<Vec<StatementRow>> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let mut rows = Vec::new();
    for (i, record) in rdr.deserialize::<CsvRow>().enumerate() {
        let row_number = i + 1;
        let raw = record?;
        let parse_err = |reason: String| ReconError::Parse {
            row: row_number,
            reason,
        };

        if raw.external_id.is_empty() {
            return Err(parse_err("external_id is empty".to_string()));
        }
        let date = NaiveDate::parse_from_str(&raw.date, "%Y-%m-%d")
            .map_err(|e| parse_err(format!("date: {e}")))?;
        let amount = Money::parse_decimal(&raw.amount, currency)
            .map_err(|e| parse_err(format!("amount: {e}")))?;
        if amount.is_zero() {
            return Err(parse_err("amount must be greater than zero".to_string()));
        }
        let direction = BankDirection::parse(&raw.direction)
            .ok_or_else(|| parse_err(format!("unknown direction: {}", raw.direction)))?;

        rows.push(StatementRow {
            external_id: raw.external_id,
            date,
            amount,
            direction,
            description: raw.description,
            reference: raw.reference.filter(|r| !r.is_empty()),
        });
    }

    Ok(rows)
}
