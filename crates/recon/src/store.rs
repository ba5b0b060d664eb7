//! SQLite storage for bank transactions and reconciliation exceptions
//!
//! The matcher and the exception queue keep their working set in memory and
//! write every change through to this store; opening them on an existing
//! database loads everything back.

use chrono::{DateTime, NaiveDate, Utc};
use hearth_core::{EventId, LoanId, Money};
use parking_lot::Mutex;
use rusqlite::{params, Connection, Row};
use std::path::Path;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{ReconError, ReconResult};
use crate::exception::{ExceptionCategory, ExceptionState, ReconciliationException, Severity};
use crate::transaction::{BankDirection, BankTransaction, ReconciliationStatus};

const TXN_COLUMNS: &str = "id, bank_account_id, external_id, txn_date, amount_minor, direction,
     description, reference, status, matched_event_id, match_score, imported_at";

const EXCEPTION_COLUMNS: &str = "id, bank_transaction_id, transfer_trace, loan_id, category,
     severity, state, assigned_to, detail, created_at, updated_at, resolution_note";

/// SQLite storage for reconciliation state
pub struct ReconStore {
    conn: Mutex<Connection>,
}

impl ReconStore {
    /// Open (or create) a database file
    pub fn open<P: AsRef<Path>>(path: P) -> ReconResult<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> ReconResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> ReconResult<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS bank_transactions (
                id TEXT PRIMARY KEY,
                bank_account_id TEXT NOT NULL,
                external_id TEXT NOT NULL,
                txn_date TEXT NOT NULL,
                amount_minor INTEGER NOT NULL CHECK (amount_minor >= 0),
                direction TEXT NOT NULL,
                description TEXT NOT NULL,
                reference TEXT,
                status TEXT NOT NULL,
                matched_event_id TEXT UNIQUE,
                match_score INTEGER,
                imported_at TEXT NOT NULL,
                UNIQUE (bank_account_id, external_id)
            );

            CREATE INDEX IF NOT EXISTS idx_bank_transactions_status
                ON bank_transactions(status);

            CREATE TABLE IF NOT EXISTS recon_exceptions (
                id TEXT PRIMARY KEY,
                bank_transaction_id TEXT,
                transfer_trace TEXT,
                loan_id TEXT,
                category TEXT NOT NULL,
                severity TEXT NOT NULL,
                state TEXT NOT NULL,
                assigned_to TEXT,
                detail TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                resolution_note TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_recon_exceptions_state
                ON recon_exceptions(state);",
        )?;
        Ok(())
    }

    /// Insert one statement's transactions atomically
    pub fn insert_transactions(&self, txns: &[BankTransaction]) -> ReconResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for txn in txns {
            tx.execute(
                &format!(
                    "INSERT INTO bank_transactions ({TXN_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
                ),
                params![
                    txn.id.to_string(),
                    txn.bank_account_id,
                    txn.external_id,
                    txn.date.to_string(),
                    txn.amount.minor(),
                    txn.direction.to_string(),
                    txn.description,
                    txn.reference,
                    txn.reconciliation_status.to_string(),
                    txn.matched_event_id.map(|id| id.to_string()),
                    txn.match_score.map(i64::from),
                    txn.imported_at.to_rfc3339(),
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Persist a transaction's reconciliation outcome
    pub fn update_transaction(&self, txn: &BankTransaction) -> ReconResult<()> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE bank_transactions
             SET status = ?1, matched_event_id = ?2, match_score = ?3
             WHERE id = ?4",
            params![
                txn.reconciliation_status.to_string(),
                txn.matched_event_id.map(|id| id.to_string()),
                txn.match_score.map(i64::from),
                txn.id.to_string(),
            ],
        )?;
        if changed == 0 {
            return Err(ReconError::TransactionNotFound(txn.id));
        }
        Ok(())
    }

    /// Every stored transaction, in import order
    pub fn transactions(&self) -> ReconResult<Vec<BankTransaction>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {TXN_COLUMNS} FROM bank_transactions ORDER BY rowid"
        ))?;
        let raw: Vec<RawTransaction> = stmt
            .query_map([], RawTransaction::from_row)?
            .collect::<Result<_, _>>()?;
        raw.into_iter().map(BankTransaction::try_from).collect()
    }

    /// Insert or replace an exception record
    pub fn save_exception(&self, exc: &ReconciliationException) -> ReconResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO recon_exceptions ({EXCEPTION_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
            ),
            params![
                exc.id.to_string(),
                exc.bank_transaction_id.map(|id| id.to_string()),
                exc.transfer_trace,
                exc.loan_id.as_ref().map(|l| l.as_str().to_string()),
                exc.category.to_string(),
                exc.severity.to_string(),
                exc.state.to_string(),
                exc.assigned_to,
                exc.detail,
                exc.created_at.to_rfc3339(),
                exc.updated_at.to_rfc3339(),
                exc.resolution_note,
            ],
        )?;
        Ok(())
    }

    pub fn exceptions(&self) -> ReconResult<Vec<ReconciliationException>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {EXCEPTION_COLUMNS} FROM recon_exceptions ORDER BY created_at, id"
        ))?;
        let raw: Vec<RawException> = stmt
            .query_map([], RawException::from_row)?
            .collect::<Result<_, _>>()?;
        raw.into_iter().map(ReconciliationException::try_from).collect()
    }
}

struct RawTransaction {
    id: String,
    bank_account_id: String,
    external_id: String,
    date: String,
    amount_minor: i64,
    direction: String,
    description: String,
    reference: Option<String>,
    status: String,
    matched_event_id: Option<String>,
    match_score: Option<i64>,
    imported_at: String,
}

impl RawTransaction {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            bank_account_id: row.get(1)?,
            external_id: row.get(2)?,
            date: row.get(3)?,
            amount_minor: row.get(4)?,
            direction: row.get(5)?,
            description: row.get(6)?,
            reference: row.get(7)?,
            status: row.get(8)?,
            matched_event_id: row.get(9)?,
            match_score: row.get(10)?,
            imported_at: row.get(11)?,
        })
    }
}

impl TryFrom<RawTransaction> for BankTransaction {
    type Error = ReconError;

    fn try_from(raw: RawTransaction) -> Result<Self, Self::Error> {
        let direction = BankDirection::parse(&raw.direction)
            .ok_or_else(|| ReconError::Corrupt(format!("direction: {}", raw.direction)))?;
        let match_score = raw
            .match_score
            .map(|s| u8::try_from(s).map_err(|e| ReconError::Corrupt(format!("match score: {e}"))))
            .transpose()?;

        Ok(BankTransaction {
            id: parse_uuid(&raw.id)?,
            bank_account_id: raw.bank_account_id,
            external_id: raw.external_id,
            date: NaiveDate::parse_from_str(&raw.date, "%Y-%m-%d")
                .map_err(|e| ReconError::Corrupt(format!("date {}: {e}", raw.date)))?,
            amount: Money::new(raw.amount_minor).map_err(|e| ReconError::Corrupt(e.to_string()))?,
            direction,
            description: raw.description,
            reference: raw.reference,
            reconciliation_status: ReconciliationStatus::from_str(&raw.status)
                .map_err(|_| ReconError::Corrupt(format!("status: {}", raw.status)))?,
            matched_event_id: raw.matched_event_id.as_deref().map(parse_event_id).transpose()?,
            match_score,
            imported_at: parse_timestamp(&raw.imported_at)?,
        })
    }
}

struct RawException {
    id: String,
    bank_transaction_id: Option<String>,
    transfer_trace: Option<String>,
    loan_id: Option<String>,
    category: String,
    severity: String,
    state: String,
    assigned_to: Option<String>,
    detail: String,
    created_at: String,
    updated_at: String,
    resolution_note: Option<String>,
}

impl RawException {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            bank_transaction_id: row.get(1)?,
            transfer_trace: row.get(2)?,
            loan_id: row.get(3)?,
            category: row.get(4)?,
            severity: row.get(5)?,
            state: row.get(6)?,
            assigned_to: row.get(7)?,
            detail: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
            resolution_note: row.get(11)?,
        })
    }
}

impl TryFrom<RawException> for ReconciliationException {
    type Error = ReconError;

    fn try_from(raw: RawException) -> Result<Self, Self::Error> {
        Ok(ReconciliationException {
            id: parse_uuid(&raw.id)?,
            bank_transaction_id: raw.bank_transaction_id.as_deref().map(parse_uuid).transpose()?,
            transfer_trace: raw.transfer_trace,
            loan_id: raw.loan_id.map(LoanId::new),
            category: ExceptionCategory::from_str(&raw.category)
                .map_err(|_| ReconError::Corrupt(format!("category: {}", raw.category)))?,
            severity: Severity::from_str(&raw.severity)
                .map_err(|_| ReconError::Corrupt(format!("severity: {}", raw.severity)))?,
            state: ExceptionState::from_str(&raw.state)
                .map_err(|_| ReconError::Corrupt(format!("state: {}", raw.state)))?,
            assigned_to: raw.assigned_to,
            detail: raw.detail,
            created_at: parse_timestamp(&raw.created_at)?,
            updated_at: parse_timestamp(&raw.updated_at)?,
            resolution_note: raw.resolution_note,
        })
    }
}

fn parse_uuid(raw: &str) -> ReconResult<Uuid> {
    Uuid::parse_str(raw).map_err(|e| ReconError::Corrupt(format!("id {raw}: {e}")))
}

fn parse_event_id(raw: &str) -> ReconResult<EventId> {
    EventId::from_str(raw).map_err(|e| ReconError::Corrupt(format!("event id: {e}")))
}

fn parse_timestamp(raw: &str) -> ReconResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| ReconError::Corrupt(format!("timestamp {raw}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exception::{ExceptionStore, NewException};
    use hearth_audit::{Actor, AuditLog};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn txn(external_id: &str) -> BankTransaction {
        BankTransaction {
            id: Uuid::new_v4(),
            bank_account_id: "OPS".to_string(),
            external_id: external_id.to_string(),
            date: NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
            amount: Money::new(150_000).unwrap(),
            direction: BankDirection::Credit,
            description: "LOCKBOX DEPOSIT".to_string(),
            reference: Some("pay-1".to_string()),
            reconciliation_status: ReconciliationStatus::Pending,
            matched_event_id: None,
            match_score: None,
            imported_at: Utc::now(),
        }
    }

    #[test]
    fn test_transactions_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("recon.db");

        let mut first = txn("BNK-1");
        {
            let store = ReconStore::open(&path).unwrap();
            store.insert_transactions(&[first.clone(), txn("BNK-2")]).unwrap();

            first.reconciliation_status = ReconciliationStatus::Matched;
            first.matched_event_id = Some(EventId::new());
            first.match_score = Some(100);
            store.update_transaction(&first).unwrap();
        }

        let store = ReconStore::open(&path).unwrap();
        let loaded = store.transactions().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0], first);
        assert_eq!(loaded[1].external_id, "BNK-2");
    }

    #[test]
    fn test_external_id_unique_per_account() {
        let store = ReconStore::in_memory().unwrap();
        store.insert_transactions(&[txn("BNK-1")]).unwrap();

        // Rejected as a whole: BNK-3 is not stored either
        assert!(store.insert_transactions(&[txn("BNK-3"), txn("BNK-1")]).is_err());
        assert_eq!(store.transactions().unwrap().len(), 1);

        let mut other = txn("BNK-1");
        other.bank_account_id = "ESCROW".to_string();
        store.insert_transactions(&[other]).unwrap();
    }

    #[test]
    fn test_event_matched_once() {
        let store = ReconStore::in_memory().unwrap();
        let (mut a, mut b) = (txn("BNK-1"), txn("BNK-2"));
        store.insert_transactions(&[a.clone(), b.clone()]).unwrap();

        let event = EventId::new();
        a.matched_event_id = Some(event);
        a.reconciliation_status = ReconciliationStatus::Matched;
        store.update_transaction(&a).unwrap();

        b.matched_event_id = Some(event);
        b.reconciliation_status = ReconciliationStatus::Matched;
        assert!(matches!(store.update_transaction(&b), Err(ReconError::Database(_))));
    }

    #[test]
    fn test_exceptions_round_trip_through_queue() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("recon.db");
        let audit = Arc::new(AuditLog::in_memory());
        let ops = Actor::user("ops-1");

        let id = {
            let exceptions =
                ExceptionStore::open(Arc::clone(&audit), Arc::new(ReconStore::open(&path).unwrap()))
                    .unwrap();
            let exc = exceptions
                .raise(
                    NewException::new(ExceptionCategory::Return, Severity::Critical, "R05")
                        .transfer_trace("091000010000001")
                        .loan(LoanId::new("LN-1")),
                    &ops,
                )
                .unwrap();
            exceptions.assign(exc.id, "ops-2", &ops).unwrap();
            exc.id
        };

        let exceptions =
            ExceptionStore::open(audit, Arc::new(ReconStore::open(&path).unwrap())).unwrap();
        let loaded = exceptions.get(&id).unwrap();
        assert_eq!(loaded.state, ExceptionState::Open);
        assert_eq!(loaded.assigned_to.as_deref(), Some("ops-2"));
        assert_eq!(loaded.severity, Severity::Critical);
        assert_eq!(loaded.loan_id, Some(LoanId::new("LN-1")));

        exceptions.resolve(id, "borrower repaid by wire", &ops).unwrap();
        assert_eq!(store_state(&path, id), ExceptionState::Resolved);
    }

    fn store_state(path: &Path, id: Uuid) -> ExceptionState {
        let store = ReconStore::open(path).unwrap();
        store
            .exceptions()
            .unwrap()
            .into_iter()
            .find(|e| e.id == id)
            .map(|e| e.state)
            .unwrap()
    }
}
