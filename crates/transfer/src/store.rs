//! SQLite storage for transfer batches, entries and returns

use chrono::{DateTime, NaiveDate, Utc};
use hearth_core::{Currency, EventId, LoanId, Money};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;
use uuid::Uuid;

use crate::config::TransferConfig;
use crate::error::{TransferError, TransferResult};
use crate::model::{EntryState, NewTransferEntry, ReturnCode, TransferBatch, TransferEntry, TransferReturn};

const ENTRY_COLUMNS: &str = "trace_number, batch_id, loan_id, amount_minor, currency,
     idempotency_key, account_ref, state, settlement_event_id, created_at, updated_at";

/// SQLite storage for transfer state
pub struct TransferStore {
    conn: Mutex<Connection>,
}

impl TransferStore {
    /// Open (or create) a database file
    pub fn open<P: AsRef<Path>>(path: P) -> TransferResult<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> TransferResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> TransferResult<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS transfer_batches (
                id TEXT PRIMARY KEY,
                effective_date TEXT NOT NULL,
                created_at TEXT NOT NULL,
                sent_at TEXT
            );

            CREATE TABLE IF NOT EXISTS transfer_entries (
                trace_number TEXT PRIMARY KEY,
                seq INTEGER NOT NULL UNIQUE,
                batch_id TEXT NOT NULL REFERENCES transfer_batches(id),
                loan_id TEXT NOT NULL,
                amount_minor INTEGER NOT NULL CHECK (amount_minor > 0),
                currency TEXT NOT NULL,
                idempotency_key TEXT NOT NULL UNIQUE,
                account_ref TEXT NOT NULL,
                state TEXT NOT NULL,
                settlement_event_id TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_transfer_entries_batch
                ON transfer_entries(batch_id);
            CREATE INDEX IF NOT EXISTS idx_transfer_entries_state
                ON transfer_entries(state);

            CREATE TABLE IF NOT EXISTS transfer_returns (
                trace_number TEXT PRIMARY KEY REFERENCES transfer_entries(trace_number),
                return_code TEXT NOT NULL,
                amount_minor INTEGER NOT NULL,
                reversal_event_id TEXT,
                exception_id TEXT NOT NULL,
                received_at TEXT NOT NULL
            );",
        )?;
        Ok(())
    }

    /// Insert a batch and its entries atomically.
    ///
    /// Fails with `DuplicateSubmission` when any idempotency key repeats,
    /// inside the batch or against any earlier batch.
    pub fn insert_batch(
        &self,
        effective_date: NaiveDate,
        entries: &[NewTransferEntry],
        config: &TransferConfig,
    ) -> TransferResult<TransferBatch> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let mut seen = HashSet::new();
        for entry in entries {
            if let Some(original) = batch_for_key(&tx, &entry.idempotency_key)? {
                return Err(TransferError::DuplicateSubmission {
                    idempotency_key: entry.idempotency_key.clone(),
                    original_batch: Some(original),
                });
            }
            if !seen.insert(entry.idempotency_key.as_str()) {
                return Err(TransferError::DuplicateSubmission {
                    idempotency_key: entry.idempotency_key.clone(),
                    original_batch: None,
                });
            }
        }

        let now = Utc::now();
        let batch_id = Uuid::new_v4();
        tx.execute(
            "INSERT INTO transfer_batches (id, effective_date, created_at, sent_at)
             VALUES (?1, ?2, ?3, NULL)",
            params![batch_id.to_string(), effective_date.to_string(), now.to_rfc3339()],
        )?;

        let mut next_seq: i64 = tx.query_row(
            "SELECT COALESCE(MAX(seq), 0) + 1 FROM transfer_entries",
            [],
            |row| row.get(0),
        )?;

        let mut stored = Vec::with_capacity(entries.len());
        for entry in entries {
            let trace_number = config.trace_number(next_seq as u64);
            tx.execute(
                "INSERT INTO transfer_entries
                 (trace_number, seq, batch_id, loan_id, amount_minor, currency,
                  idempotency_key, account_ref, state, settlement_event_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, NULL, ?10, ?10)",
                params![
                    trace_number,
                    next_seq,
                    batch_id.to_string(),
                    entry.loan_id.as_str(),
                    entry.amount.minor(),
                    entry.currency.code(),
                    entry.idempotency_key,
                    entry.account_ref,
                    EntryState::Pending.as_ref(),
                    now.to_rfc3339(),
                ],
            )?;
            stored.push(TransferEntry {
                trace_number,
                batch_id,
                loan_id: entry.loan_id.clone(),
                amount: entry.amount,
                currency: entry.currency.clone(),
                idempotency_key: entry.idempotency_key.clone(),
                account_ref: entry.account_ref.clone(),
                state: EntryState::Pending,
                settlement_event_id: None,
                created_at: now,
                updated_at: now,
            });
            next_seq += 1;
        }

        tx.commit()?;

        Ok(TransferBatch {
            id: batch_id,
            effective_date,
            created_at: now,
            sent_at: None,
            entries: stored,
        })
    }

    pub fn batch_for_key(&self, idempotency_key: &str) -> TransferResult<Option<Uuid>> {
        let conn = self.conn.lock();
        batch_for_key(&conn, idempotency_key)
    }

    pub fn batch(&self, id: &Uuid) -> TransferResult<TransferBatch> {
        let conn = self.conn.lock();

        let header = conn
            .query_row(
                "SELECT effective_date, created_at, sent_at FROM transfer_batches WHERE id = ?1",
                params![id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                    ))
                },
            )
            .optional()?
            .ok_or(TransferError::BatchNotFound(*id))?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {ENTRY_COLUMNS} FROM transfer_entries WHERE batch_id = ?1 ORDER BY seq"
        ))?;
        let raw: Vec<RawEntry> = stmt
            .query_map(params![id.to_string()], RawEntry::from_row)?
            .collect::<Result<_, _>>()?;
        let entries = raw
            .into_iter()
            .map(TransferEntry::try_from)
            .collect::<TransferResult<Vec<_>>>()?;

        Ok(TransferBatch {
            id: *id,
            effective_date: parse_date(&header.0)?,
            created_at: parse_timestamp(&header.1)?,
            sent_at: header.2.as_deref().map(parse_timestamp).transpose()?,
            entries,
        })
    }

    /// Batch ids, oldest first
    pub fn batch_ids(&self) -> TransferResult<Vec<Uuid>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT id FROM transfer_batches ORDER BY created_at, id")?;
        let ids: Vec<String> = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<_, _>>()?;
        ids.iter()
            .map(|s| Uuid::parse_str(s).map_err(|e| TransferError::Corrupt(format!("batch id: {e}"))))
            .collect()
    }

    pub fn entry(&self, trace_number: &str) -> TransferResult<TransferEntry> {
        let conn = self.conn.lock();
        let raw = conn
            .query_row(
                &format!("SELECT {ENTRY_COLUMNS} FROM transfer_entries WHERE trace_number = ?1"),
                params![trace_number],
                RawEntry::from_row,
            )
            .optional()?
            .ok_or_else(|| TransferError::EntryNotFound(trace_number.to_string()))?;
        TransferEntry::try_from(raw)
    }

    pub fn entries_by_state(&self, state: EntryState) -> TransferResult<Vec<TransferEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {ENTRY_COLUMNS} FROM transfer_entries WHERE state = ?1 ORDER BY seq"
        ))?;
        let raw: Vec<RawEntry> = stmt
            .query_map(params![state.as_ref()], RawEntry::from_row)?
            .collect::<Result<_, _>>()?;
        raw.into_iter().map(TransferEntry::try_from).collect()
    }

    /// Compare-and-set an entry's state.
    ///
    /// Returns `InvalidTransition` if the entry is no longer in `from`, so two
    /// callbacks racing on one trace cannot both win.
    pub fn transition(
        &self,
        trace_number: &str,
        from: EntryState,
        to: EntryState,
        settlement_event_id: Option<EventId>,
    ) -> TransferResult<()> {
        if !from.can_transition_to(to) {
            return Err(TransferError::InvalidTransition {
                trace: trace_number.to_string(),
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE transfer_entries
             SET state = ?1,
                 settlement_event_id = COALESCE(?2, settlement_event_id),
                 updated_at = ?3
             WHERE trace_number = ?4 AND state = ?5",
            params![
                to.as_ref(),
                settlement_event_id.map(|id| id.to_string()),
                Utc::now().to_rfc3339(),
                trace_number,
                from.as_ref(),
            ],
        )?;

        if changed == 1 {
            return Ok(());
        }

        let current: Option<String> = conn
            .query_row(
                "SELECT state FROM transfer_entries WHERE trace_number = ?1",
                params![trace_number],
                |row| row.get(0),
            )
            .optional()?;
        match current {
            None => Err(TransferError::EntryNotFound(trace_number.to_string())),
            Some(state) => Err(TransferError::InvalidTransition {
                trace: trace_number.to_string(),
                from: state,
                to: to.to_string(),
            }),
        }
    }

    /// Stamp a batch as transmitted and move its pending entries to `sent`
    pub fn mark_batch_sent(&self, batch_id: &Uuid, sent_at: DateTime<Utc>) -> TransferResult<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let updated = tx.execute(
            "UPDATE transfer_batches SET sent_at = ?1 WHERE id = ?2 AND sent_at IS NULL",
            params![sent_at.to_rfc3339(), batch_id.to_string()],
        )?;
        if updated == 0 {
            let exists: Option<String> = tx
                .query_row(
                    "SELECT id FROM transfer_batches WHERE id = ?1",
                    params![batch_id.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            return match exists {
                None => Err(TransferError::BatchNotFound(*batch_id)),
                Some(_) => Err(TransferError::Validation(format!(
                    "batch {batch_id} was already sent"
                ))),
            };
        }

        let entries = tx.execute(
            "UPDATE transfer_entries SET state = ?1, updated_at = ?2
             WHERE batch_id = ?3 AND state = ?4",
            params![
                EntryState::Sent.as_ref(),
                sent_at.to_rfc3339(),
                batch_id.to_string(),
                EntryState::Pending.as_ref(),
            ],
        )?;

        tx.commit()?;
        Ok(entries)
    }

    pub fn insert_return(&self, ret: &TransferReturn) -> TransferResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO transfer_returns
             (trace_number, return_code, amount_minor, reversal_event_id, exception_id, received_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                ret.trace_number,
                ret.return_code.as_str(),
                ret.amount.minor(),
                ret.reversal_event_id.map(|id| id.to_string()),
                ret.exception_id.to_string(),
                ret.received_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn return_for(&self, trace_number: &str) -> TransferResult<Option<TransferReturn>> {
        let conn = self.conn.lock();
        let raw = conn
            .query_row(
                "SELECT trace_number, return_code, amount_minor, reversal_event_id, exception_id, received_at
                 FROM transfer_returns WHERE trace_number = ?1",
                params![trace_number],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()?;

        let Some(raw) = raw else {
            return Ok(None);
        };
        Ok(Some(TransferReturn {
            trace_number: raw.0,
            return_code: ReturnCode::parse(&raw.1)?,
            amount: Money::new(raw.2).map_err(|e| TransferError::Corrupt(e.to_string()))?,
            reversal_event_id: raw.3.as_deref().map(parse_event_id).transpose()?,
            exception_id: Uuid::parse_str(&raw.4)
                .map_err(|e| TransferError::Corrupt(format!("exception id: {e}")))?,
            received_at: parse_timestamp(&raw.5)?,
        }))
    }
}

fn batch_for_key(conn: &Connection, idempotency_key: &str) -> TransferResult<Option<Uuid>> {
    let found: Option<String> = conn
        .query_row(
            "SELECT batch_id FROM transfer_entries WHERE idempotency_key = ?1",
            params![idempotency_key],
            |row| row.get(0),
        )
        .optional()?;
    found
        .map(|s| Uuid::parse_str(&s).map_err(|e| TransferError::Corrupt(format!("batch id: {e}"))))
        .transpose()
}

struct RawEntry {
    trace_number: String,
    batch_id: String,
    loan_id: String,
    amount_minor: i64,
    currency: String,
    idempotency_key: String,
    account_ref: String,
    state: String,
    settlement_event_id: Option<String>,
    created_at: String,
    updated_at: String,
}

impl RawEntry {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            trace_number: row.get(0)?,
            batch_id: row.get(1)?,
            loan_id: row.get(2)?,
            amount_minor: row.get(3)?,
            currency: row.get(4)?,
            idempotency_key: row.get(5)?,
            account_ref: row.get(6)?,
            state: row.get(7)?,
            settlement_event_id: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }
}

impl TryFrom<RawEntry> for TransferEntry {
    type Error = TransferError;

    fn try_from(raw: RawEntry) -> Result<Self, Self::Error> {
        Ok(TransferEntry {
            batch_id: Uuid::parse_str(&raw.batch_id)
                .map_err(|e| TransferError::Corrupt(format!("batch id: {e}")))?,
            loan_id: LoanId::new(raw.loan_id),
            amount: Money::new(raw.amount_minor).map_err(|e| TransferError::Corrupt(e.to_string()))?,
            currency: Currency::from_str(&raw.currency)
                .map_err(|e| TransferError::Corrupt(e.to_string()))?,
            idempotency_key: raw.idempotency_key,
            account_ref: raw.account_ref,
            state: EntryState::from_str(&raw.state)
                .map_err(|_| TransferError::Corrupt(format!("entry state: {}", raw.state)))?,
            settlement_event_id: raw.settlement_event_id.as_deref().map(parse_event_id).transpose()?,
            created_at: parse_timestamp(&raw.created_at)?,
            updated_at: parse_timestamp(&raw.updated_at)?,
            trace_number: raw.trace_number,
        })
    }
}

fn parse_event_id(raw: &str) -> TransferResult<EventId> {
    EventId::from_str(raw).map_err(|e| TransferError::Corrupt(format!("event id: {e}")))
}

fn parse_date(raw: &str) -> TransferResult<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|e| TransferError::Corrupt(format!("date {raw}: {e}")))
}

fn parse_timestamp(raw: &str) -> TransferResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| TransferError::Corrupt(format!("timestamp {raw}: {e}")))
}
