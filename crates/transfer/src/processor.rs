//! Transfer batch processor
//!
//! Owns batches, entries and returns. Writes to the ledger only when an entry
//! settles (cash in, held in suspense) or a settled entry is returned
//! (compensating reversal).

use chrono::{NaiveDate, Utc};
use hearth_audit::{Actor, AuditLog, NewAuditEntry};
use hearth_core::{EventId, GlAccount, Money};
use hearth_ledger::{EventType, LedgerError, LedgerStore, NewEvent};
use hearth_recon::{ExceptionCategory, ExceptionStore, NewException};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::TransferConfig;
use crate::error::{TransferError, TransferResult};
use crate::gateway::{GatewayAck, TransferGateway};
use crate::model::{EntryState, NewTransferEntry, ReturnCode, TransferBatch, TransferEntry, TransferReturn};
use crate::store::TransferStore;

pub struct TransferProcessor {
    store: TransferStore,
    ledger: Arc<LedgerStore>,
    exceptions: Arc<ExceptionStore>,
    audit: Arc<AuditLog>,
    config: TransferConfig,
}

impl TransferProcessor {
    pub fn new(
        store: TransferStore,
        ledger: Arc<LedgerStore>,
        exceptions: Arc<ExceptionStore>,
        config: TransferConfig,
    ) -> Self {
        let audit = Arc::clone(ledger.audit());
        Self {
            store,
            ledger,
            exceptions,
            audit,
            config,
        }
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Accept a batch of transfers.
    ///
    /// At most once per idempotency key: a key seen before, in this batch or
    /// any earlier one, rejects the whole batch with `DuplicateSubmission`.
    pub fn submit_batch(
        &self,
        effective_date: NaiveDate,
        entries: Vec<NewTransferEntry>,
        actor: &Actor,
    ) -> TransferResult<TransferBatch> {
        if entries.is_empty() {
            return Err(TransferError::Validation("batch has no entries".to_string()));
        }
        if entries.len() > self.config.max_batch_size {
            return Err(TransferError::Validation(format!(
                "batch has {} entries, limit is {}",
                entries.len(),
                self.config.max_batch_size
            )));
        }

        let mut loans = HashSet::new();
        for entry in &entries {
            if entry.idempotency_key.trim().is_empty() {
                return Err(TransferError::Validation(
                    "idempotency_key is required".to_string(),
                ));
            }
            if entry.amount.is_zero() {
                return Err(TransferError::Validation(format!(
                    "zero amount for {}",
                    entry.idempotency_key
                )));
            }
            if loans.insert(entry.loan_id.clone()) {
                let terms = self
                    .ledger
                    .terms(&entry.loan_id)
                    .ok_or_else(|| LedgerError::LoanNotFound(entry.loan_id.clone()))?;
                if terms.currency != entry.currency {
                    return Err(TransferError::Validation(format!(
                        "loan {} is serviced in {}, entry is {}",
                        entry.loan_id, terms.currency, entry.currency
                    )));
                }
            }
        }

        let batch = self.store.insert_batch(effective_date, &entries, &self.config)?;

        self.audit.append(
            NewAuditEntry::new("transfer.batch_submitted", "transfer_batch", batch.id.to_string())
                .by(actor)
                .payload(serde_json::json!({
                    "effective_date": batch.effective_date,
                    "entry_count": batch.entries.len(),
                    "total_minor": batch.total_minor(),
                    "traces": batch.entries.iter().map(|e| e.trace_number.as_str()).collect::<Vec<_>>(),
                })),
        )?;

        info!(
            "Transfer batch {} submitted: {} entries, {} minor units",
            batch.id,
            batch.entries.len(),
            batch.total_minor()
        );
        Ok(batch)
    }

    /// Transmit a batch through `gateway` and mark its entries `sent`.
    ///
    /// No store lock is held while the gateway call is in flight.
    pub async fn send_batch(
        &self,
        batch_id: Uuid,
        gateway: &dyn TransferGateway,
        actor: &Actor,
    ) -> TransferResult<GatewayAck> {
        let batch = self.store.batch(&batch_id)?;
        if batch.sent_at.is_some() {
            return Err(TransferError::Validation(format!(
                "batch {batch_id} was already sent"
            )));
        }

        let ack = match gateway.transmit(&batch).await {
            Ok(ack) => ack,
            Err(e) => {
                warn!("Gateway {} failed for batch {}: {}", gateway.name(), batch_id, e);
                return Err(e);
            }
        };

        let sent = self.store.mark_batch_sent(&batch_id, Utc::now())?;
        self.audit.append(
            NewAuditEntry::new("transfer.batch_sent", "transfer_batch", batch_id.to_string())
                .by(actor)
                .payload(serde_json::json!({
                    "gateway": gateway.name(),
                    "reference": ack.reference,
                    "entries_sent": sent,
                })),
        )?;

        info!(
            "Transfer batch {} sent via {} ({} entries)",
            batch_id,
            gateway.name(),
            sent
        );
        Ok(ack)
    }

    /// Settlement callback: funds arrived, hold them in suspense for the loan
    pub fn record_settlement(
        &self,
        trace_number: &str,
        settled_on: NaiveDate,
        actor: &Actor,
    ) -> TransferResult<EventId> {
        let entry = self.store.entry(trace_number)?;
        if !entry.state.can_transition_to(EntryState::Settled) {
            return Err(TransferError::InvalidTransition {
                trace: trace_number.to_string(),
                from: entry.state.to_string(),
                to: EntryState::Settled.to_string(),
            });
        }

        let event = NewEvent::builder(EventType::TransferSettlement, entry.loan_id.clone())
            .business_date(settled_on)
            .source(self.config.source_system.clone(), format!("{trace_number}:settle"))
            .description(format!("Transfer {trace_number} settled"))
            .currency(entry.currency.clone())
            .by(actor)
            .correlation(trace_number)
            .debit(GlAccount::Cash, entry.amount)
            .credit(GlAccount::Suspense, entry.amount)
            .build();

        let event_id = match self.ledger.post_event(event) {
            Ok(id) => id,
            // Posted on an earlier attempt that failed before the state update
            Err(LedgerError::DuplicateSource { existing, .. }) => existing,
            Err(e) => return Err(e.into()),
        };

        self.store
            .transition(trace_number, entry.state, EntryState::Settled, Some(event_id))?;
        self.audit.append(
            NewAuditEntry::new("transfer.entry_settled", "transfer_entry", trace_number)
                .by(actor)
                .correlation(trace_number)
                .payload(serde_json::json!({
                    "loan_id": entry.loan_id,
                    "amount_minor": entry.amount.minor(),
                    "event_id": event_id,
                })),
        )?;

        info!(
            "Transfer {} settled for loan {} (event {})",
            trace_number, entry.loan_id, event_id
        );
        Ok(event_id)
    }

    /// Return callback.
    ///
    /// A returned settled entry has its settlement reversed. Every accepted
    /// return raises exactly one `return` exception; a second return for the
    /// same trace is rejected.
    pub fn record_return(
        &self,
        trace_number: &str,
        return_code: &str,
        amount: Money,
        actor: &Actor,
    ) -> TransferResult<TransferReturn> {
        let code = ReturnCode::parse(return_code)?;
        let entry = self.store.entry(trace_number)?;

        if amount != entry.amount {
            return Err(TransferError::AmountMismatch {
                trace: trace_number.to_string(),
                expected: entry.amount.minor(),
                returned: amount.minor(),
            });
        }
        if !entry.state.can_transition_to(EntryState::Returned) {
            return Err(TransferError::InvalidTransition {
                trace: trace_number.to_string(),
                from: entry.state.to_string(),
                to: EntryState::Returned.to_string(),
            });
        }

        let reversal_event_id = match (entry.state, entry.settlement_event_id) {
            (EntryState::Settled, Some(settlement)) => Some(self.reverse_settlement(
                &entry,
                settlement,
                &code,
                actor,
            )?),
            (EntryState::Settled, None) => {
                return Err(TransferError::Corrupt(format!(
                    "settled entry {trace_number} has no settlement event"
                )))
            }
            _ => None,
        };

        self.store
            .transition(trace_number, entry.state, EntryState::Returned, None)?;

        let exception = self.exceptions.raise(
            NewException::new(
                ExceptionCategory::Return,
                code.severity(),
                format!(
                    "{} ({}) on trace {} for {} minor units, entry was {}",
                    code,
                    code.description(),
                    trace_number,
                    amount.minor(),
                    entry.state
                ),
            )
            .transfer_trace(trace_number)
            .loan(entry.loan_id.clone())
            .correlation(trace_number),
            actor,
        )?;

        let ret = TransferReturn {
            trace_number: trace_number.to_string(),
            return_code: code,
            amount,
            reversal_event_id,
            exception_id: exception.id,
            received_at: Utc::now(),
        };
        self.store.insert_return(&ret)?;

        self.audit.append(
            NewAuditEntry::new("transfer.entry_returned", "transfer_entry", trace_number)
                .by(actor)
                .correlation(trace_number)
                .payload(serde_json::json!({
                    "return_code": ret.return_code,
                    "amount_minor": amount.minor(),
                    "prior_state": entry.state,
                    "reversal_event_id": reversal_event_id,
                    "exception_id": exception.id,
                })),
        )?;

        warn!(
            "Transfer {} returned {} ({}), reversal {:?}",
            trace_number,
            ret.return_code,
            ret.return_code.description(),
            reversal_event_id
        );
        Ok(ret)
    }

    fn reverse_settlement(
        &self,
        entry: &TransferEntry,
        settlement: EventId,
        code: &ReturnCode,
        actor: &Actor,
    ) -> TransferResult<EventId> {
        let reason = format!("Transfer {} returned {}", entry.trace_number, code);
        match self.ledger.reverse_event(settlement, &reason, actor) {
            Ok(id) => Ok(id),
            Err(LedgerError::AlreadyReversed(original)) => self
                .ledger
                .reversal_of(&original)
                .ok_or(TransferError::Ledger(LedgerError::AlreadyReversed(original))),
            Err(e) => Err(e.into()),
        }
    }

    pub fn batch(&self, batch_id: &Uuid) -> TransferResult<TransferBatch> {
        self.store.batch(batch_id)
    }

    pub fn batch_ids(&self) -> TransferResult<Vec<Uuid>> {
        self.store.batch_ids()
    }

    pub fn entry(&self, trace_number: &str) -> TransferResult<TransferEntry> {
        self.store.entry(trace_number)
    }

    pub fn entries_by_state(&self, state: EntryState) -> TransferResult<Vec<TransferEntry>> {
        self.store.entries_by_state(state)
    }

    pub fn return_for(&self, trace_number: &str) -> TransferResult<Option<TransferReturn>> {
        self.store.return_for(trace_number)
    }
}
