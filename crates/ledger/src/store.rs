//! Ledger store
//!
//! Per-loan books behind their own mutex so writes to different loans run in
//! parallel. The source-id uniqueness index, event index and reversal index
//! are shared across loans. Every successful write appends one audit record.

use chrono::{NaiveDate, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use hearth_audit::{Actor, AuditLog, NewAuditEntry};
use hearth_core::{EventId, GlAccount, LoanId, Money};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::balances::{
    counts_toward_paid_through, paid_through_delta, AccountTotals, LoanBalances, LoanTerms,
};
use crate::error::{LedgerError, LedgerResult};
use crate::event::{
    source_key, CashDirection, CashEvent, EntryLine, EventType, LedgerEntry, LedgerEvent,
    NewEvent,
};
use crate::journal::{Journal, JournalRecord};
use crate::validation::validate_event;

#[derive(Debug, Clone)]
struct StoredEvent {
    event: LedgerEvent,
    entries: Vec<LedgerEntry>,
}

/// Everything the ledger knows about one loan
#[derive(Debug, Default)]
struct LoanBook {
    terms: Option<LoanTerms>,
    events: Vec<StoredEvent>,
    positions: HashMap<EventId, usize>,
    totals: AccountTotals,
    applied_minor: i64,
}

impl LoanBook {
    fn get(&self, id: &EventId) -> Option<&StoredEvent> {
        self.positions.get(id).map(|&i| &self.events[i])
    }

    /// Type whose paid-through rules apply: a reversal counts as its original
    fn effective_type(&self, event: &LedgerEvent) -> EventType {
        match event.reversal_of_event_id {
            Some(original) => self
                .get(&original)
                .map(|s| s.event.event_type)
                .unwrap_or(event.event_type),
            None => event.event_type,
        }
    }

    fn push(&mut self, stored: StoredEvent) {
        let counts = counts_toward_paid_through(self.effective_type(&stored.event));
        for entry in &stored.entries {
            self.totals.apply(entry);
            if counts {
                self.applied_minor += paid_through_delta(entry);
            }
        }
        self.positions.insert(stored.event.id, self.events.len());
        self.events.push(stored);
    }

    /// Fold entries from scratch, optionally only up to a business date
    fn fold(&self, upto: Option<NaiveDate>) -> (AccountTotals, i64) {
        let mut totals = AccountTotals::default();
        let mut applied = 0i64;

        for stored in &self.events {
            if upto.is_some_and(|d| stored.event.business_date > d) {
                continue;
            }
            let counts = counts_toward_paid_through(self.effective_type(&stored.event));
            for entry in &stored.entries {
                totals.apply(entry);
                if counts {
                    applied += paid_through_delta(entry);
                }
            }
        }

        (totals, applied)
    }
}

/// The double-entry ledger for the servicing portfolio
pub struct LedgerStore {
    books: DashMap<LoanId, Arc<Mutex<LoanBook>>>,
    event_index: DashMap<EventId, LoanId>,
    sources: DashMap<String, EventId>,
    /// original event id -> reversal event id
    reversals: DashMap<EventId, EventId>,
    sequence: AtomicU64,
    journal: Option<Mutex<Journal>>,
    audit: Arc<AuditLog>,
}

impl LedgerStore {
    /// Ledger without persistence (tests, dry runs)
    pub fn in_memory(audit: Arc<AuditLog>) -> Self {
        Self {
            books: DashMap::new(),
            event_index: DashMap::new(),
            sources: DashMap::new(),
            reversals: DashMap::new(),
            sequence: AtomicU64::new(0),
            journal: None,
            audit,
        }
    }

    /// Open a journal-backed ledger, replaying everything already written.
    pub fn open(path: impl AsRef<Path>, audit: Arc<AuditLog>) -> LedgerResult<Self> {
        let path = path.as_ref();
        let records = Journal::read_all(path)?;

        let mut store = Self::in_memory(audit);
        store.journal = Some(Mutex::new(Journal::new(path)?));

        let mut events = Vec::new();
        for record in records {
            match record {
                JournalRecord::Boarded(terms) => {
                    let book = store.book_or_default(&terms.loan_id);
                    book.lock().terms = Some(terms);
                }
                JournalRecord::Event { event, entries } => events.push(StoredEvent { event, entries }),
            }
        }

        events.sort_by_key(|s| s.event.sequence);
        let mut last_sequence = 0;
        for stored in events {
            let event = &stored.event;
            last_sequence = last_sequence.max(event.sequence);
            store
                .sources
                .insert(source_key(&event.source_system, &event.source_id), event.id);
            store.event_index.insert(event.id, event.loan_id.clone());
            if let Some(original) = event.reversal_of_event_id {
                store.reversals.insert(original, event.id);
            }
            let book = store.book_or_default(&event.loan_id);
            book.lock().push(stored);
        }
        store.sequence.store(last_sequence, Ordering::SeqCst);

        info!(
            path = %path.display(),
            loans = store.books.len(),
            events = store.event_index.len(),
            "ledger replayed"
        );
        Ok(store)
    }

    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    fn book(&self, loan_id: &LoanId) -> LedgerResult<Arc<Mutex<LoanBook>>> {
        self.books
            .get(loan_id)
            .map(|b| Arc::clone(b.value()))
            .ok_or_else(|| LedgerError::LoanNotFound(loan_id.clone()))
    }

    fn book_or_default(&self, loan_id: &LoanId) -> Arc<Mutex<LoanBook>> {
        Arc::clone(self.books.entry(loan_id.clone()).or_default().value())
    }

    /// Register a loan's terms and post its disbursement.
    pub fn board_loan(
        &self,
        terms: LoanTerms,
        principal: Money,
        business_date: NaiveDate,
        actor: &Actor,
    ) -> LedgerResult<EventId> {
        let loan_id = terms.loan_id.clone();
        let disbursement = NewEvent::builder(EventType::Disbursement, loan_id.clone())
            .business_date(business_date)
            .source("boarding", loan_id.as_str())
            .description("Loan boarded")
            .by(actor)
            .currency(terms.currency.clone())
            .debit(GlAccount::LoanPrincipal, principal)
            .credit(GlAccount::FundingClearing, principal)
            .build();
        validate_event(&disbursement)?;

        let book = self.book_or_default(&loan_id);
        let mut book = book.lock();
        if book.terms.is_some() {
            return Err(LedgerError::LoanExists(loan_id));
        }

        book.terms = Some(terms.clone());

        match self.commit(&mut book, disbursement, "loan.boarded", Some(&terms)) {
            Ok(event) => Ok(event.id),
            Err(e) => {
                book.terms = None;
                Err(e)
            }
        }
    }

    /// Validate and commit a balanced event.
    pub fn post_event(&self, event: NewEvent) -> LedgerResult<EventId> {
        validate_event(&event)?;

        let book = self.book(&event.loan_id)?;
        let mut book = book.lock();
        self.commit(&mut book, event, "ledger.event_posted", None)
            .map(|e| e.id)
    }

    /// Post the mirror image of `event_id` with every side swapped.
    pub fn reverse_event(&self, event_id: EventId, reason: &str, actor: &Actor) -> LedgerResult<EventId> {
        let loan_id = self
            .event_index
            .get(&event_id)
            .map(|l| l.value().clone())
            .ok_or(LedgerError::EventNotFound(event_id))?;

        let book = self.book(&loan_id)?;
        let mut book = book.lock();
        let original = book
            .get(&event_id)
            .cloned()
            .ok_or(LedgerError::EventNotFound(event_id))?;

        let business_date = Utc::now().date_naive().max(original.event.business_date);
        let mut builder = NewEvent::builder(EventType::Reversal, loan_id)
            .business_date(business_date)
            .source("reversal", event_id.to_string())
            .description(reason)
            .by(actor)
            .correlation(event_id.to_string())
            .reversal_of(event_id);
        for entry in &original.entries {
            let mut line = EntryLine::new(entry.account, entry.side.opposite(), entry.amount)
                .with_currency(entry.currency.clone());
            line.entity_ref = entry.entity_ref.clone();
            builder = builder.line(line);
        }
        let reversal = builder.build();
        validate_event(&reversal)?;

        self.commit(&mut book, reversal, "ledger.event_reversed", None)
            .map(|e| e.id)
    }

    /// Commit under the loan lock: uniqueness, audit, journal, in-memory apply.
    ///
    /// Nothing is journaled or applied unless the audit record was written.
    /// `boarding` terms are journaled ahead of the event record.
    fn commit(
        &self,
        book: &mut LoanBook,
        new: NewEvent,
        audit_type: &str,
        boarding: Option<&LoanTerms>,
    ) -> LedgerResult<LedgerEvent> {
        if let Some(terms) = &book.terms {
            if let Some(line) = new.lines.iter().find(|l| l.currency != terms.currency) {
                return Err(LedgerError::Validation(format!(
                    "loan {} is serviced in {}, got {}",
                    new.loan_id, terms.currency, line.currency
                )));
            }
        }

        if let Some(original) = new.reversal_of_event_id {
            let stored = book
                .get(&original)
                .ok_or(LedgerError::EventNotFound(original))?;
            if stored.event.is_reversal() {
                return Err(LedgerError::Validation(format!(
                    "event {} is a reversal and cannot be reversed",
                    original
                )));
            }
            if self.reversals.contains_key(&original) {
                return Err(LedgerError::AlreadyReversed(original));
            }
        }

        let id = EventId::new();
        let key = new.source_key();
        match self.sources.entry(key.clone()) {
            Entry::Occupied(existing) => {
                return Err(LedgerError::DuplicateSource {
                    source_system: new.source_system,
                    source_id: new.source_id,
                    existing: *existing.get(),
                })
            }
            Entry::Vacant(slot) => {
                slot.insert(id);
            }
        }

        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let event = LedgerEvent {
            id,
            sequence,
            timestamp: Utc::now(),
            business_date: new.business_date,
            event_type: new.event_type,
            source_system: new.source_system,
            source_id: new.source_id,
            description: new.description,
            loan_id: new.loan_id,
            reversal_of_event_id: new.reversal_of_event_id,
            is_reversed: false,
            actor_id: new.actor_id,
        };
        let entries: Vec<LedgerEntry> = new
            .lines
            .into_iter()
            .map(|line| LedgerEntry {
                id: Uuid::new_v4(),
                event_id: id,
                account: line.account,
                side: line.side,
                amount: line.amount,
                currency: line.currency,
                loan_id: event.loan_id.clone(),
                entity_ref: line.entity_ref,
            })
            .collect();

        let total_minor: i64 = entries.iter().map(|e| e.debit_minor()).sum();
        let correlation_id = new.correlation_id.unwrap_or_else(|| id.to_string());
        let audit_entry = NewAuditEntry::new(audit_type, "loan", event.loan_id.as_str())
            .actor(new.actor_type, event.actor_id.clone())
            .correlation(correlation_id.clone())
            .payload(json!({
                "event_id": id.to_string(),
                "sequence": sequence,
                "event_type": event.event_type.as_ref(),
                "business_date": event.business_date.to_string(),
                "source_system": event.source_system,
                "source_id": event.source_id,
                "total_minor": total_minor,
                "reversal_of_event_id": event.reversal_of_event_id.map(|e| e.to_string()),
            }));
        if let Err(e) = self.audit.append(audit_entry) {
            self.sources.remove(&key);
            error!(event_id = %id, error = %e, "audit append failed, event not committed");
            return Err(e.into());
        }

        if let Some(journal) = &self.journal {
            let record = JournalRecord::Event {
                event: event.clone(),
                entries: entries.clone(),
            };
            let mut journal = journal.lock();
            let written = match boarding {
                Some(terms) => journal
                    .append(&JournalRecord::Boarded(terms.clone()))
                    .and_then(|_| journal.append(&record)),
                None => journal.append(&record),
            };
            if let Err(e) = written {
                self.sources.remove(&key);
                error!(event_id = %id, error = %e, "journal append failed");
                let aborted = NewAuditEntry::new("ledger.commit_aborted", "loan", event.loan_id.as_str())
                    .actor(new.actor_type, event.actor_id.clone())
                    .correlation(correlation_id)
                    .payload(json!({
                        "event_id": id.to_string(),
                        "sequence": sequence,
                        "error": e.to_string(),
                    }));
                if let Err(audit_err) = self.audit.append(aborted) {
                    error!(event_id = %id, error = %audit_err, "could not audit aborted commit");
                }
                return Err(e);
            }
        }

        if let Some(original) = event.reversal_of_event_id {
            self.reversals.insert(original, id);
        }
        self.event_index.insert(id, event.loan_id.clone());
        book.push(StoredEvent {
            event: event.clone(),
            entries,
        });

        info!(
            event_id = %id,
            sequence,
            loan_id = %event.loan_id,
            event_type = %event.event_type,
            total_minor,
            "ledger event committed"
        );
        Ok(event)
    }

    fn decorate(&self, event: &LedgerEvent) -> LedgerEvent {
        let mut event = event.clone();
        event.is_reversed = self.reversals.contains_key(&event.id);
        event
    }

    /// Balances for a loan: the running snapshot when `as_of` is None,
    /// a replay of events with business_date <= `as_of` otherwise.
    pub fn get_balances(&self, loan_id: &LoanId, as_of: Option<NaiveDate>) -> LedgerResult<LoanBalances> {
        let book = self.book(loan_id)?;
        let book = book.lock();
        let balances = match as_of {
            None => LoanBalances::derive(
                loan_id,
                &book.totals,
                book.applied_minor,
                book.terms.as_ref(),
                Utc::now().date_naive(),
            ),
            Some(date) => {
                let (totals, applied) = book.fold(Some(date));
                LoanBalances::derive(loan_id, &totals, applied, book.terms.as_ref(), date)
            }
        };
        Ok(balances)
    }

    /// Recompute the full snapshot from entries, ignoring the running fold.
    pub fn replay_totals(&self, loan_id: &LoanId) -> LedgerResult<LoanBalances> {
        let book = self.book(loan_id)?;
        let book = book.lock();
        let (totals, applied) = book.fold(None);
        if totals != book.totals {
            warn!(loan_id = %loan_id, "replayed totals differ from snapshot");
        }
        Ok(LoanBalances::derive(
            loan_id,
            &totals,
            applied,
            book.terms.as_ref(),
            Utc::now().date_naive(),
        ))
    }

    /// Signed totals per GL account for a loan
    pub fn account_totals(&self, loan_id: &LoanId) -> LedgerResult<AccountTotals> {
        let book = self.book(loan_id)?;
        let totals = book.lock().totals.clone();
        Ok(totals)
    }

    pub fn event(&self, event_id: &EventId) -> Option<LedgerEvent> {
        let loan_id = self.event_index.get(event_id)?.value().clone();
        let book = self.book(&loan_id).ok()?;
        let book = book.lock();
        book.get(event_id).map(|s| self.decorate(&s.event))
    }

    pub fn entries_for_event(&self, event_id: &EventId) -> LedgerResult<Vec<LedgerEntry>> {
        let loan_id = self
            .event_index
            .get(event_id)
            .map(|l| l.value().clone())
            .ok_or(LedgerError::EventNotFound(*event_id))?;
        let book = self.book(&loan_id)?;
        let book = book.lock();
        book.get(event_id)
            .map(|s| s.entries.clone())
            .ok_or(LedgerError::EventNotFound(*event_id))
    }

    /// Events for a loan in commit order, optionally bounded by business date
    pub fn events_for_loan(
        &self,
        loan_id: &LoanId,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> LedgerResult<Vec<LedgerEvent>> {
        let book = self.book(loan_id)?;
        let book = book.lock();
        Ok(book
            .events
            .iter()
            .map(|s| &s.event)
            .filter(|e| from.map_or(true, |d| e.business_date >= d))
            .filter(|e| to.map_or(true, |d| e.business_date <= d))
            .map(|e| self.decorate(e))
            .collect())
    }

    /// Event id already posted under (source_system, source_id)
    pub fn find_by_source(&self, source_system: &str, source_id: &str) -> Option<EventId> {
        self.sources
            .get(&source_key(source_system, source_id))
            .map(|id| *id.value())
    }

    /// Id of the reversal posted against `event_id`, if any
    pub fn reversal_of(&self, event_id: &EventId) -> Option<EventId> {
        self.reversals.get(event_id).map(|id| *id.value())
    }

    /// Cash-touching events in a business-date window that are candidates
    /// for bank matching: not reversed and not reversals themselves.
    pub fn open_cash_events(&self, from: NaiveDate, to: NaiveDate) -> Vec<CashEvent> {
        let books: Vec<Arc<Mutex<LoanBook>>> =
            self.books.iter().map(|b| Arc::clone(b.value())).collect();

        let mut found = Vec::new();
        for book in books {
            let book = book.lock();
            for stored in &book.events {
                let event = &stored.event;
                if event.business_date < from
                    || event.business_date > to
                    || event.is_reversal()
                    || self.reversals.contains_key(&event.id)
                {
                    continue;
                }

                let net: i64 = stored
                    .entries
                    .iter()
                    .filter(|e| e.account == GlAccount::Cash)
                    .map(|e| e.debit_minor() - e.credit_minor())
                    .sum();
                if net == 0 {
                    continue;
                }

                found.push(CashEvent {
                    event_id: event.id,
                    sequence: event.sequence,
                    loan_id: event.loan_id.clone(),
                    business_date: event.business_date,
                    event_type: event.event_type,
                    direction: if net > 0 {
                        CashDirection::Inflow
                    } else {
                        CashDirection::Outflow
                    },
                    amount: Money::from_balance(net.abs()),
                    reference: event.source_id.clone(),
                    description: event.description.clone(),
                });
            }
        }

        found.sort_by_key(|c| c.sequence);
        found
    }

    /// Boarded loans, sorted
    pub fn loan_ids(&self) -> Vec<LoanId> {
        let mut ids: Vec<LoanId> = self.books.iter().map(|b| b.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn terms(&self, loan_id: &LoanId) -> Option<LoanTerms> {
        let book = self.book(loan_id).ok()?;
        let terms = book.lock().terms.clone();
        terms
    }

    pub fn event_count(&self) -> usize {
        self.event_index.len()
    }
}
