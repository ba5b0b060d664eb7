//! Ledger events and entries
//!
//! A `LedgerEvent` is the atomic unit of money movement for one loan. It owns
//! two or more `LedgerEntry` lines whose debits and credits sum to the same
//! amount. Neither is ever updated or deleted; corrections are new events.

use chrono::{DateTime, NaiveDate, Utc};
use hearth_audit::{Actor, ActorType};
use hearth_core::{Currency, EventId, GlAccount, LoanId, Money, Side};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::error::LedgerError;

/// Business meaning of an event; drives the posting rules in `validation`
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Loan funded: LOAN_PRINCIPAL up, funding source down
    Disbursement,
    /// Borrower cash applied through the waterfall
    Payment,
    InterestAccrual,
    FeeAssessment,
    /// Held suspense funds applied to buckets
    SuspenseApplication,
    /// Prepaid funds held in UNAPPLIED applied once their installment is due
    UnappliedApplication,
    /// Transfer network settlement moving cash into suspense
    TransferSettlement,
    /// Mirror of a prior event with sides swapped
    Reversal,
    /// Manual correction; any accounts
    Adjustment,
}

/// A committed ledger event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub id: EventId,
    /// Global, strictly increasing commit order
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub business_date: NaiveDate,
    pub event_type: EventType,
    pub source_system: String,
    pub source_id: String,
    pub description: String,
    pub loan_id: LoanId,
    /// Set on reversal events only
    pub reversal_of_event_id: Option<EventId>,
    /// Derived on read from the reversal index; stored records are always false
    #[serde(default)]
    pub is_reversed: bool,
    pub actor_id: String,
}

impl LedgerEvent {
    pub fn is_reversal(&self) -> bool {
        self.reversal_of_event_id.is_some()
    }
}

/// A single debit or credit line of a committed event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub event_id: EventId,
    pub account: GlAccount,
    pub side: Side,
    pub amount: Money,
    pub currency: Currency,
    pub loan_id: LoanId,
    pub entity_ref: Option<String>,
}

impl LedgerEntry {
    pub fn debit_minor(&self) -> i64 {
        match self.side {
            Side::Debit => self.amount.minor(),
            Side::Credit => 0,
        }
    }

    pub fn credit_minor(&self) -> i64 {
        match self.side {
            Side::Credit => self.amount.minor(),
            Side::Debit => 0,
        }
    }

    /// Signed effect on the account's natural balance
    pub fn signed_minor(&self) -> i64 {
        self.account.signed_delta(self.side, self.amount.minor())
    }
}

/// Direction of net cash movement for an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CashDirection {
    Inflow,
    Outflow,
}

/// Cash-touching event as seen by the reconciliation matcher
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CashEvent {
    pub event_id: EventId,
    pub sequence: u64,
    pub loan_id: LoanId,
    pub business_date: NaiveDate,
    pub event_type: EventType,
    pub direction: CashDirection,
    /// Net cash amount of the event
    pub amount: Money,
    /// External reference the event was posted under (`source_id`)
    pub reference: String,
    pub description: String,
}

/// A proposed line, before it is committed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryLine {
    pub account: GlAccount,
    pub side: Side,
    pub amount: Money,
    pub currency: Currency,
    /// When set, must equal the event's loan
    pub loan_id: Option<LoanId>,
    pub entity_ref: Option<String>,
}

impl EntryLine {
    pub fn new(account: GlAccount, side: Side, amount: Money) -> Self {
        Self {
            account,
            side,
            amount,
            currency: Currency::default(),
            loan_id: None,
            entity_ref: None,
        }
    }

    pub fn debit(account: GlAccount, amount: Money) -> Self {
        Self::new(account, Side::Debit, amount)
    }

    pub fn credit(account: GlAccount, amount: Money) -> Self {
        Self::new(account, Side::Credit, amount)
    }

    /// Build a line from an external account code (`CASH`, `escrow`, ...)
    pub fn from_code(code: &str, side: Side, amount: Money) -> Result<Self, LedgerError> {
        let account = GlAccount::from_code(code)?;
        Ok(Self::new(account, side, amount))
    }

    pub fn with_currency(mut self, currency: Currency) -> Self {
        self.currency = currency;
        self
    }

    pub fn with_loan(mut self, loan_id: LoanId) -> Self {
        self.loan_id = Some(loan_id);
        self
    }

    pub fn with_entity_ref(mut self, entity_ref: impl Into<String>) -> Self {
        self.entity_ref = Some(entity_ref.into());
        self
    }
}

/// An event submitted to `LedgerStore::post_event`
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub event_type: EventType,
    pub loan_id: LoanId,
    pub business_date: NaiveDate,
    pub source_system: String,
    pub source_id: String,
    pub description: String,
    pub actor_type: ActorType,
    pub actor_id: String,
    pub correlation_id: Option<String>,
    pub reversal_of_event_id: Option<EventId>,
    pub lines: Vec<EntryLine>,
}

impl NewEvent {
    pub fn builder(event_type: EventType, loan_id: impl Into<LoanId>) -> NewEventBuilder {
        NewEventBuilder::new(event_type, loan_id.into())
    }

    pub fn total_debits(&self) -> i64 {
        self.lines
            .iter()
            .filter(|l| l.side == Side::Debit)
            .map(|l| l.amount.minor())
            .sum()
    }

    pub fn total_credits(&self) -> i64 {
        self.lines
            .iter()
            .filter(|l| l.side == Side::Credit)
            .map(|l| l.amount.minor())
            .sum()
    }

    /// Key used by the source uniqueness index
    pub fn source_key(&self) -> String {
        source_key(&self.source_system, &self.source_id)
    }
}

pub(crate) fn source_key(source_system: &str, source_id: &str) -> String {
    format!("{}:{}", source_system, source_id)
}

/// Builder for `NewEvent`
///
/// Lines added through `debit`/`credit` take the builder's currency.
pub struct NewEventBuilder {
    event: NewEvent,
    currency: Currency,
}

impl NewEventBuilder {
    fn new(event_type: EventType, loan_id: LoanId) -> Self {
        Self {
            event: NewEvent {
                event_type,
                loan_id,
                business_date: Utc::now().date_naive(),
                source_system: String::new(),
                source_id: String::new(),
                description: String::new(),
                actor_type: ActorType::System,
                actor_id: "system".to_string(),
                correlation_id: None,
                reversal_of_event_id: None,
                lines: Vec::new(),
            },
            currency: Currency::default(),
        }
    }

    pub fn business_date(mut self, date: NaiveDate) -> Self {
        self.event.business_date = date;
        self
    }

    pub fn source(mut self, system: impl Into<String>, id: impl Into<String>) -> Self {
        self.event.source_system = system.into();
        self.event.source_id = id.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.event.description = description.into();
        self
    }

    pub fn actor(mut self, actor_type: ActorType, actor_id: impl Into<String>) -> Self {
        self.event.actor_type = actor_type;
        self.event.actor_id = actor_id.into();
        self
    }

    pub fn by(self, actor: &Actor) -> Self {
        self.actor(actor.actor_type, actor.id.clone())
    }

    pub fn correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.event.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn currency(mut self, currency: Currency) -> Self {
        self.currency = currency;
        self
    }

    pub fn debit(mut self, account: GlAccount, amount: Money) -> Self {
        let line = EntryLine::debit(account, amount).with_currency(self.currency.clone());
        self.event.lines.push(line);
        self
    }

    pub fn credit(mut self, account: GlAccount, amount: Money) -> Self {
        let line = EntryLine::credit(account, amount).with_currency(self.currency.clone());
        self.event.lines.push(line);
        self
    }

    /// Mark as the reversal of `event_id`
    pub fn reversal_of(mut self, event_id: EventId) -> Self {
        self.event.reversal_of_event_id = Some(event_id);
        self
    }

    pub fn line(mut self, line: EntryLine) -> Self {
        self.event.lines.push(line);
        self
    }

    pub fn build(self) -> NewEvent {
        self.event
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(minor: i64) -> Money {
        Money::new(minor).unwrap()
    }

    #[test]
    fn test_builder_totals() {
        let event = NewEvent::builder(EventType::Payment, "ln-1")
            .source("portal", "pay-1")
            .debit(GlAccount::Cash, m(1000))
            .credit(GlAccount::InterestReceivable, m(600))
            .credit(GlAccount::LoanPrincipal, m(400))
            .build();

        assert_eq!(event.loan_id.as_str(), "LN-1");
        assert_eq!(event.total_debits(), 1000);
        assert_eq!(event.total_credits(), 1000);
        assert_eq!(event.source_key(), "portal:pay-1");
    }

    #[test]
    fn test_line_from_code() {
        let line = EntryLine::from_code("suspense", Side::Credit, m(5)).unwrap();
        assert_eq!(line.account, GlAccount::Suspense);

        let err = EntryLine::from_code("NOPE", Side::Credit, m(5)).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidAccount(_)));
    }

    #[test]
    fn test_entry_sides() {
        let entry = LedgerEntry {
            id: Uuid::new_v4(),
            event_id: EventId::new(),
            account: GlAccount::LoanPrincipal,
            side: Side::Credit,
            amount: m(250),
            currency: Currency::Usd,
            loan_id: LoanId::new("LN-1"),
            entity_ref: None,
        };
        assert_eq!(entry.debit_minor(), 0);
        assert_eq!(entry.credit_minor(), 250);
        assert_eq!(entry.signed_minor(), -250);
    }
}
