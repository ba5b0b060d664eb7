//! Bank reconciliation matcher
//!
//! Owns imported bank transactions and pairs them with ledger cash events.
//! The ledger is only read from here; no ledger lock is taken while the
//! matcher state lock is held. With a `ReconStore` attached, imports and
//! status changes are written through to SQLite before memory is updated.

use chrono::{Days, NaiveDate};
use hearth_audit::{Actor, AuditLog, NewAuditEntry};
use hearth_core::{Currency, EventId};
use hearth_ledger::LedgerStore;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::MatcherConfig;
use crate::error::{ReconError, ReconResult};
use crate::exception::{
    ExceptionCategory, ExceptionStore, NewException, ReconciliationException, Severity,
};
use crate::scoring::{rank, score_candidate, CashMatchCandidate};
use crate::store::ReconStore;
use crate::transaction::{read_statement_csv, BankTransaction, ReconciliationStatus, StatementRow};

const RESOURCE_TYPE: &str = "bank_transaction";

/// Result of one statement import
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportReport {
    pub bank_account_id: String,
    /// Imported transactions, in statement order, after auto-matching
    pub transactions: Vec<BankTransaction>,
    pub auto_matched: usize,
}

impl ImportReport {
    pub fn pending(&self) -> usize {
        self.transactions
            .iter()
            .filter(|t| t.reconciliation_status == ReconciliationStatus::Pending)
            .count()
    }
}

#[derive(Default)]
struct MatcherState {
    txns: HashMap<Uuid, BankTransaction>,
    /// (bank_account_id, external_id) -> txn id
    by_external: HashMap<(String, String), Uuid>,
    /// ledger event -> bank txn it is matched to
    matched_events: HashMap<EventId, Uuid>,
}

impl MatcherState {
    fn insert(&mut self, txn: BankTransaction) {
        self.by_external
            .insert((txn.bank_account_id.clone(), txn.external_id.clone()), txn.id);
        if let Some(event_id) = txn.matched_event_id {
            self.matched_events.insert(event_id, txn.id);
        }
        self.txns.insert(txn.id, txn);
    }
}

pub struct ReconMatcher {
    ledger: Arc<LedgerStore>,
    audit: Arc<AuditLog>,
    exceptions: Arc<ExceptionStore>,
    config: MatcherConfig,
    state: RwLock<MatcherState>,
    store: Option<Arc<ReconStore>>,
}

impl ReconMatcher {
    /// Matcher holding its transactions in memory only
    pub fn new(
        ledger: Arc<LedgerStore>,
        exceptions: Arc<ExceptionStore>,
        config: MatcherConfig,
    ) -> Self {
        let audit = Arc::clone(ledger.audit());
        Self {
            ledger,
            audit,
            exceptions,
            config,
            state: RwLock::new(MatcherState::default()),
            store: None,
        }
    }

    /// Matcher backed by `store`, loaded with every transaction imported so far
    pub fn open(
        ledger: Arc<LedgerStore>,
        exceptions: Arc<ExceptionStore>,
        config: MatcherConfig,
        store: Arc<ReconStore>,
    ) -> ReconResult<Self> {
        let mut state = MatcherState::default();
        for txn in store.transactions()? {
            state.insert(txn);
        }
        info!(
            "Loaded {} bank transactions ({} matched)",
            state.txns.len(),
            state.matched_events.len()
        );

        let mut matcher = Self::new(ledger, exceptions, config);
        matcher.state = RwLock::new(state);
        matcher.store = Some(store);
        Ok(matcher)
    }

    fn persist_update(&self, txn: &BankTransaction) -> ReconResult<()> {
        match &self.store {
            Some(store) => store.update_transaction(txn),
            None => Ok(()),
        }
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    pub fn exceptions(&self) -> &Arc<ExceptionStore> {
        &self.exceptions
    }

    /// Parse a CSV statement and import it
    pub fn import_csv<R: Read>(
        &self,
        bank_account_id: &str,
        reader: R,
        currency: &Currency,
        actor: &Actor,
    ) -> ReconResult<ImportReport> {
        let rows = read_statement_csv(reader, currency)?;
        self.import_statement(bank_account_id, rows, actor)
    }

    /// Store statement rows and try to match each one.
    ///
    /// The import is all or nothing: a duplicate external id, within the
    /// statement or against earlier imports for the same account, rejects
    /// every row.
    pub fn import_statement(
        &self,
        bank_account_id: &str,
        rows: Vec<StatementRow>,
        actor: &Actor,
    ) -> ReconResult<ImportReport> {
        let bank_account_id = bank_account_id.trim();
        if bank_account_id.is_empty() {
            return Err(ReconError::Validation(
                "bank_account_id is required".to_string(),
            ));
        }

        let imported: Vec<BankTransaction> = {
            let mut state = self.state.write();

            let mut seen = std::collections::HashSet::new();
            for row in &rows {
                let key = (bank_account_id.to_string(), row.external_id.clone());
                if state.by_external.contains_key(&key) || !seen.insert(key) {
                    return Err(ReconError::DuplicateTransaction {
                        bank_account_id: bank_account_id.to_string(),
                        external_id: row.external_id.clone(),
                    });
                }
            }

            let txns: Vec<BankTransaction> = rows
                .into_iter()
                .map(|row| row.into_transaction(bank_account_id))
                .collect();

            self.audit.append(
                NewAuditEntry::new("recon.statement_imported", "bank_account", bank_account_id)
                    .by(actor)
                    .payload(serde_json::json!({
                        "count": txns.len(),
                        "transactions": txns
                            .iter()
                            .map(|t| serde_json::json!({
                                "id": t.id,
                                "external_id": t.external_id,
                                "date": t.date,
                                "amount_minor": t.amount.minor(),
                                "direction": t.direction,
                            }))
                            .collect::<Vec<_>>(),
                    })),
            )?;

            if let Some(store) = &self.store {
                store.insert_transactions(&txns)?;
            }
            for txn in &txns {
                state.insert(txn.clone());
            }
            txns
        };

        info!(
            "Imported {} bank transactions for {}",
            imported.len(),
            bank_account_id
        );

        let mut auto_matched = 0;
        let mut transactions = Vec::with_capacity(imported.len());
        for txn in imported {
            if self.try_auto_match(txn.id, actor)? {
                auto_matched += 1;
            }
            let current = self
                .transaction(&txn.id)
                .ok_or(ReconError::TransactionNotFound(txn.id))?;
            transactions.push(current);
        }

        Ok(ImportReport {
            bank_account_id: bank_account_id.to_string(),
            transactions,
            auto_matched,
        })
    }

    /// Ranked ledger candidates for a pending bank transaction
    pub fn propose_matches(&self, bank_txn_id: &Uuid) -> ReconResult<Vec<CashMatchCandidate>> {
        let txn = self
            .transaction(bank_txn_id)
            .ok_or(ReconError::TransactionNotFound(*bank_txn_id))?;

        let window = Days::new(self.config.date_window_days.max(0).unsigned_abs());
        let from = txn.date.checked_sub_days(window).unwrap_or(NaiveDate::MIN);
        let to = txn.date.checked_add_days(window).unwrap_or(NaiveDate::MAX);
        let events = self.ledger.open_cash_events(from, to);

        let state = self.state.read();
        let mut candidates: Vec<CashMatchCandidate> = events
            .iter()
            .filter(|e| !state.matched_events.contains_key(&e.event_id))
            .filter_map(|e| score_candidate(&txn, e, &self.config))
            .collect();
        drop(state);

        rank(&mut candidates);
        debug!(
            "{} candidates for bank transaction {}",
            candidates.len(),
            bank_txn_id
        );
        Ok(candidates)
    }

    fn try_auto_match(&self, bank_txn_id: Uuid, actor: &Actor) -> ReconResult<bool> {
        let candidates = self.propose_matches(&bank_txn_id)?;
        let Some(best) = candidates.first() else {
            return Ok(false);
        };
        if best.score < self.config.confidence_threshold {
            return Ok(false);
        }
        if candidates.get(1).map_or(false, |second| second.score == best.score) {
            debug!(
                "Bank transaction {} has ambiguous candidates at score {}",
                bank_txn_id, best.score
            );
            return Ok(false);
        }

        match self.link(bank_txn_id, best.event_id, Some(best.score), true, actor) {
            Ok(_) => Ok(true),
            // Lost a race with another match on the same event
            Err(ReconError::EventAlreadyMatched { .. }) | Err(ReconError::NotPending { .. }) => {
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Manually confirm a match between a bank transaction and a ledger event
    pub fn confirm_match(
        &self,
        bank_txn_id: Uuid,
        event_id: EventId,
        actor: &Actor,
    ) -> ReconResult<BankTransaction> {
        if self.ledger.event(&event_id).is_none() {
            return Err(ReconError::EventNotFound(event_id));
        }

        let score = self
            .propose_matches(&bank_txn_id)?
            .into_iter()
            .find(|c| c.event_id == event_id)
            .map(|c| c.score);

        self.link(bank_txn_id, event_id, score, false, actor)
    }

    fn link(
        &self,
        bank_txn_id: Uuid,
        event_id: EventId,
        score: Option<u8>,
        automatic: bool,
        actor: &Actor,
    ) -> ReconResult<BankTransaction> {
        let mut state = self.state.write();

        if let Some(existing) = state.matched_events.get(&event_id) {
            return Err(ReconError::EventAlreadyMatched {
                event_id,
                bank_txn_id: *existing,
            });
        }

        let txn = state
            .txns
            .get(&bank_txn_id)
            .ok_or(ReconError::TransactionNotFound(bank_txn_id))?;
        if txn.reconciliation_status != ReconciliationStatus::Pending {
            return Err(ReconError::NotPending {
                id: bank_txn_id,
                status: txn.reconciliation_status.to_string(),
            });
        }

        self.audit.append(
            NewAuditEntry::new("recon.match_confirmed", RESOURCE_TYPE, bank_txn_id.to_string())
                .by(actor)
                .correlation(event_id.to_string())
                .payload(serde_json::json!({
                    "event_id": event_id,
                    "score": score,
                    "automatic": automatic,
                    "external_id": txn.external_id,
                    "amount_minor": txn.amount.minor(),
                })),
        )?;

        let mut matched = txn.clone();
        matched.reconciliation_status = ReconciliationStatus::Matched;
        matched.matched_event_id = Some(event_id);
        matched.match_score = score;
        self.persist_update(&matched)?;

        state.matched_events.insert(event_id, bank_txn_id);
        state.txns.insert(bank_txn_id, matched.clone());

        info!(
            "Matched bank transaction {} to event {} (score {:?}, automatic={})",
            bank_txn_id, event_id, score, automatic
        );
        Ok(matched)
    }

    /// Turn transactions pending longer than the grace period into exceptions
    pub fn promote_stale(
        &self,
        today: NaiveDate,
        actor: &Actor,
    ) -> ReconResult<Vec<ReconciliationException>> {
        let mut state = self.state.write();

        let mut stale: Vec<BankTransaction> = state
            .txns
            .values()
            .filter(|t| t.reconciliation_status == ReconciliationStatus::Pending)
            .filter(|t| (today - t.date).num_days() > self.config.grace_period_days)
            .cloned()
            .collect();
        stale.sort_by(|a, b| a.date.cmp(&b.date).then(a.external_id.cmp(&b.external_id)));

        let mut raised = Vec::with_capacity(stale.len());
        for txn in stale {
            let (category, severity) = infer_category(&txn, state.txns.values());
            let detail = format!(
                "{} {} {} on {} ({}) unmatched after {} days",
                txn.bank_account_id,
                txn.external_id,
                txn.direction,
                txn.date,
                txn.description,
                (today - txn.date).num_days()
            );

            let exc = self.exceptions.raise(
                NewException::new(category, severity, detail)
                    .bank_transaction(txn.id)
                    .correlation(txn.id.to_string()),
                actor,
            )?;

            let mut promoted = txn;
            promoted.reconciliation_status = ReconciliationStatus::Exception;
            self.persist_update(&promoted)?;
            state.txns.insert(promoted.id, promoted);
            raised.push(exc);
        }

        if !raised.is_empty() {
            info!("Promoted {} stale bank transactions to exceptions", raised.len());
        }
        Ok(raised)
    }

    pub fn transaction(&self, id: &Uuid) -> Option<BankTransaction> {
        self.state.read().txns.get(id).cloned()
    }

    /// Transactions by date then external id, optionally filtered by status
    pub fn transactions(&self, status: Option<ReconciliationStatus>) -> Vec<BankTransaction> {
        let mut txns: Vec<BankTransaction> = self
            .state
            .read()
            .txns
            .values()
            .filter(|t| status.map_or(true, |s| t.reconciliation_status == s))
            .cloned()
            .collect();
        txns.sort_by(|a, b| {
            a.date
                .cmp(&b.date)
                .then(a.bank_account_id.cmp(&b.bank_account_id))
                .then(a.external_id.cmp(&b.external_id))
        });
        txns
    }

    /// Bank transaction matched to a ledger event, if any
    pub fn matched_for_event(&self, event_id: &EventId) -> Option<Uuid> {
        self.state.read().matched_events.get(event_id).copied()
    }
}

fn infer_category<'a>(
    txn: &BankTransaction,
    all: impl Iterator<Item = &'a BankTransaction>,
) -> (ExceptionCategory, Severity) {
    let text = format!(
        "{} {}",
        txn.description,
        txn.reference.as_deref().unwrap_or_default()
    )
    .to_ascii_uppercase();

    if text.contains("RETURN") || has_return_code(&text) {
        return (ExceptionCategory::AchReturn, Severity::High);
    }
    if text.contains("NSF") || text.contains("INSUFFICIENT") {
        return (ExceptionCategory::Nsf, Severity::High);
    }

    let mut all = all;
    let duplicated = all.any(|other| {
        other.id != txn.id
            && other.bank_account_id == txn.bank_account_id
            && other.date == txn.date
            && other.amount == txn.amount
            && other.direction == txn.direction
            && other.reference == txn.reference
    });
    if duplicated {
        return (ExceptionCategory::Duplicate, Severity::Medium);
    }

    (ExceptionCategory::Unmatched, Severity::Medium)
}

/// ACH return codes look like R01..R99
fn has_return_code(text: &str) -> bool {
    text.split(|c: char| !c.is_ascii_alphanumeric()).any(|token| {
        let bytes = token.as_bytes();
        bytes.len() == 3 && bytes[0] == b'R' && bytes[1].is_ascii_digit() && bytes[2].is_ascii_digit()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exception::{ExceptionFilter, ExceptionState};
    use crate::transaction::BankDirection;
    use hearth_core::{DayCount, GlAccount, LoanId, Money, RoundingPolicy};
    use hearth_ledger::{EventType, LoanTerms, NewEvent};
    use rust_decimal_macros::dec;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 2, d).unwrap()
    }

    fn m(minor: i64) -> Money {
        Money::new(minor).unwrap()
    }

    fn terms(loan: &str) -> LoanTerms {
        LoanTerms {
            loan_id: LoanId::new(loan),
            currency: Currency::Usd,
            annual_rate: dec!(0.06),
            day_count: DayCount::Thirty360,
            rounding: RoundingPolicy::HalfEven,
            first_due_date: date(1),
            monthly_installment: m(120_000),
            monthly_escrow: m(30_000),
            late_fee: m(5_000),
            late_fee_grace_days: 15,
        }
    }

    fn setup(loans: &[&str]) -> (Arc<LedgerStore>, ReconMatcher) {
        let audit = Arc::new(AuditLog::in_memory());
        let ledger = Arc::new(LedgerStore::in_memory(Arc::clone(&audit)));
        for loan in loans {
            ledger
                .board_loan(
                    terms(loan),
                    m(20_000_000),
                    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                    &Actor::system(),
                )
                .unwrap();
        }
        let exceptions = Arc::new(ExceptionStore::new(audit));
        let matcher = ReconMatcher::new(Arc::clone(&ledger), exceptions, MatcherConfig::default());
        (ledger, matcher)
    }

    fn pay(ledger: &LedgerStore, loan: &str, source_id: &str, amount: i64, day: u32) -> EventId {
        ledger
            .post_event(
                NewEvent::builder(EventType::Payment, loan)
                    .business_date(date(day))
                    .source("lockbox", source_id)
                    .debit(GlAccount::Cash, m(amount))
                    .credit(GlAccount::LoanPrincipal, m(amount))
                    .build(),
            )
            .unwrap()
    }

    fn row(external_id: &str, amount: i64, day: u32, reference: Option<&str>) -> StatementRow {
        StatementRow {
            external_id: external_id.to_string(),
            date: date(day),
            amount: m(amount),
            direction: BankDirection::Credit,
            description: "LOCKBOX DEPOSIT".to_string(),
            reference: reference.map(str::to_string),
        }
    }

    #[test]
    fn test_exact_reference_auto_matches_and_near_miss_goes_stale() {
        let (ledger, matcher) = setup(&["LN-1", "LN-2"]);
        let first = pay(&ledger, "LN-1", "pay-1", 150_000, 1);
        let second = pay(&ledger, "LN-2", "pay-2", 150_000, 1);

        let report = matcher
            .import_statement(
                "OPS",
                vec![
                    row("BNK-1", 150_000, 1, Some("PAY-1")),
                    row("BNK-2", 149_900, 1, None),
                ],
                &Actor::batch("import"),
            )
            .unwrap();

        assert_eq!(report.auto_matched, 1);
        let matched = &report.transactions[0];
        assert_eq!(matched.reconciliation_status, ReconciliationStatus::Matched);
        assert_eq!(matched.matched_event_id, Some(first));
        assert_eq!(matched.match_score, Some(100));

        let near = &report.transactions[1];
        assert_eq!(near.reconciliation_status, ReconciliationStatus::Pending);
        let candidates = matcher.propose_matches(&near.id).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].event_id, second);
        assert_eq!(candidates[0].score, 52);

        // Still inside the grace period
        assert!(matcher.promote_stale(date(6), &Actor::system()).unwrap().is_empty());

        let raised = matcher.promote_stale(date(7), &Actor::system()).unwrap();
        assert_eq!(raised.len(), 1);
        assert_eq!(raised[0].category, ExceptionCategory::Unmatched);
        assert_eq!(raised[0].bank_transaction_id, Some(near.id));
        assert_eq!(
            matcher.transaction(&near.id).unwrap().reconciliation_status,
            ReconciliationStatus::Exception
        );
        assert_eq!(matcher.exceptions().list(&ExceptionFilter::open()).len(), 1);

        // Matched transactions never go stale
        assert!(matcher.promote_stale(date(28), &Actor::system()).unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_external_id_rejects_whole_import() {
        let (_, matcher) = setup(&[]);
        matcher
            .import_statement("OPS", vec![row("BNK-1", 100, 1, None)], &Actor::system())
            .unwrap();

        let err = matcher
            .import_statement(
                "OPS",
                vec![row("BNK-9", 100, 1, None), row("BNK-1", 100, 1, None)],
                &Actor::system(),
            )
            .unwrap_err();
        assert!(matches!(err, ReconError::DuplicateTransaction { .. }));
        assert_eq!(matcher.transactions(None).len(), 1);

        // Same external id on another account is fine
        matcher
            .import_statement("ESCROW", vec![row("BNK-1", 100, 1, None)], &Actor::system())
            .unwrap();
        assert_eq!(matcher.transactions(None).len(), 2);
    }

    #[test]
    fn test_ambiguous_candidates_stay_pending() {
        let (ledger, matcher) = setup(&["LN-1", "LN-2"]);
        pay(&ledger, "LN-1", "pay-1", 150_000, 1);
        pay(&ledger, "LN-2", "pay-2", 150_000, 1);

        let report = matcher
            .import_statement("OPS", vec![row("BNK-1", 150_000, 1, None)], &Actor::system())
            .unwrap();
        // Two candidates at 70; below threshold and tied
        assert_eq!(report.auto_matched, 0);
        assert_eq!(report.pending(), 1);
    }

    #[test]
    fn test_confirm_match_once_per_event() {
        let (ledger, matcher) = setup(&["LN-1"]);
        let event = pay(&ledger, "LN-1", "pay-1", 150_000, 1);

        let report = matcher
            .import_statement(
                "OPS",
                vec![row("BNK-1", 150_000, 2, None), row("BNK-2", 150_000, 2, None)],
                &Actor::system(),
            )
            .unwrap();
        assert_eq!(report.auto_matched, 0);

        let ops = Actor::user("ops-1");
        let first = report.transactions[0].id;
        let txn = matcher.confirm_match(first, event, &ops).unwrap();
        assert_eq!(txn.reconciliation_status, ReconciliationStatus::Matched);
        assert_eq!(matcher.matched_for_event(&event), Some(first));

        let err = matcher
            .confirm_match(report.transactions[1].id, event, &ops)
            .unwrap_err();
        assert!(matches!(err, ReconError::EventAlreadyMatched { .. }));

        assert!(matches!(
            matcher.confirm_match(first, EventId::new(), &ops),
            Err(ReconError::EventNotFound(_))
        ));
        assert_eq!(
            ledger
                .audit()
                .by_event_type("recon.match_confirmed")
                .len(),
            1
        );
    }

    #[test]
    fn test_reversed_event_is_not_a_candidate() {
        let (ledger, matcher) = setup(&["LN-1"]);
        let event = pay(&ledger, "LN-1", "pay-1", 150_000, 1);
        ledger
            .reverse_event(event, "bounced", &Actor::user("ops"))
            .unwrap();

        let report = matcher
            .import_statement("OPS", vec![row("BNK-1", 150_000, 1, Some("pay-1"))], &Actor::system())
            .unwrap();
        assert_eq!(report.auto_matched, 0);
        assert!(matcher
            .propose_matches(&report.transactions[0].id)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_stale_category_inference() {
        let (_, matcher) = setup(&[]);
        let mut returned = row("BNK-1", 5_000, 1, None);
        returned.description = "ACH RETURN R01".to_string();
        let mut nsf = row("BNK-2", 6_000, 1, None);
        nsf.description = "NSF ITEM".to_string();
        let dup_a = row("BNK-3", 7_000, 1, Some("X-1"));
        let dup_b = row("BNK-4", 7_000, 1, Some("X-1"));

        matcher
            .import_statement("OPS", vec![returned, nsf, dup_a, dup_b], &Actor::system())
            .unwrap();
        let raised = matcher.promote_stale(date(20), &Actor::system()).unwrap();

        let categories: Vec<ExceptionCategory> = raised.iter().map(|e| e.category).collect();
        assert_eq!(
            categories,
            vec![
                ExceptionCategory::AchReturn,
                ExceptionCategory::Nsf,
                ExceptionCategory::Duplicate,
                ExceptionCategory::Duplicate,
            ]
        );
        assert_eq!(raised[0].severity, Severity::High);
        assert!(raised.iter().all(|e| e.state == ExceptionState::Open));
    }

    #[test]
    fn test_import_csv() {
        let (ledger, matcher) = setup(&["LN-1"]);
        let event = pay(&ledger, "LN-1", "pay-1", 150_000, 1);
        let csv = "external_id,date,amount,direction,description,reference\n\
                   BNK-1,2024-02-01,1500.00,credit,LOCKBOX,pay-1\n";

        let report = matcher
            .import_csv("OPS", csv.as_bytes(), &Currency::Usd, &Actor::system())
            .unwrap();
        assert_eq!(report.transactions[0].matched_event_id, Some(event));
    }

    #[test]
    fn test_state_reloaded_from_store() {
        let (ledger, _) = setup(&["LN-1"]);
        let event = pay(&ledger, "LN-1", "pay-1", 150_000, 1);
        let audit = Arc::clone(ledger.audit());
        let store = Arc::new(ReconStore::in_memory().unwrap());
        let open = || {
            let exceptions =
                Arc::new(ExceptionStore::open(Arc::clone(&audit), Arc::clone(&store)).unwrap());
            ReconMatcher::open(Arc::clone(&ledger), exceptions, MatcherConfig::default(), Arc::clone(&store))
                .unwrap()
        };

        let (matched, stale) = {
            let matcher = open();
            let report = matcher
                .import_statement(
                    "OPS",
                    vec![row("BNK-1", 150_000, 1, Some("pay-1")), row("BNK-2", 99_000, 1, None)],
                    &Actor::system(),
                )
                .unwrap();
            assert_eq!(report.auto_matched, 1);
            assert_eq!(matcher.promote_stale(date(10), &Actor::system()).unwrap().len(), 1);
            (report.transactions[0].id, report.transactions[1].id)
        };

        let matcher = open();
        assert_eq!(matcher.transactions(None).len(), 2);
        assert_eq!(matcher.matched_for_event(&event), Some(matched));
        assert_eq!(
            matcher.transaction(&stale).unwrap().reconciliation_status,
            ReconciliationStatus::Exception
        );
        assert_eq!(matcher.exceptions().list(&ExceptionFilter::open()).len(), 1);

        let err = matcher
            .import_statement("OPS", vec![row("BNK-1", 150_000, 1, None)], &Actor::system())
            .unwrap_err();
        assert!(matches!(err, ReconError::DuplicateTransaction { .. }));
        assert!(matcher.promote_stale(date(20), &Actor::system()).unwrap().is_empty());
    }

    #[test]
    fn test_unbounded_date_window() {
        let audit = Arc::new(AuditLog::in_memory());
        let ledger = Arc::new(LedgerStore::in_memory(Arc::clone(&audit)));
        ledger
            .board_loan(
                terms("LN-1"),
                m(20_000_000),
                NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                &Actor::system(),
            )
            .unwrap();
        let event = pay(&ledger, "LN-1", "pay-1", 150_000, 1);

        let config = MatcherConfig {
            date_window_days: i64::MAX,
            ..MatcherConfig::default()
        };
        let matcher = ReconMatcher::new(
            Arc::clone(&ledger),
            Arc::new(ExceptionStore::new(audit)),
            config,
        );

        let report = matcher
            .import_statement("OPS", vec![row("BNK-1", 150_000, 20, None)], &Actor::system())
            .unwrap();
        let candidates = matcher.propose_matches(&report.transactions[0].id).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].event_id, event);
        assert_eq!(candidates[0].day_distance, 19);
    }

    #[test]
    fn test_return_code_detection() {
        assert!(has_return_code("ACH R29 CORP"));
        assert!(!has_return_code("RETAIL R2D2"));
        assert!(!has_return_code("R100"));
    }
}
