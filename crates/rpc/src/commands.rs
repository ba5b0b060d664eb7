//! CLI commands
//!
//! Each command takes the context, does one thing, and returns what it did.
//! Printing is left to the binary.

use anyhow::Context;
use chrono::NaiveDate;
use hearth_allocation::{PaymentReceipt, PaymentSubmission};
use hearth_audit::AuditRecord;
use hearth_core::{EventId, LoanId, Money};
use hearth_cycle::{export_run, CycleError, CycleRun, ExportFormat};
use hearth_ledger::{LedgerEvent, LoanBalances, LoanTerms};
use hearth_recon::{
    BankTransaction, CashMatchCandidate, ExceptionFilter, ImportReport, ReconciliationException,
    ReconciliationStatus,
};
use hearth_transfer::{GatewayAck, NewTransferEntry, TransferBatch, TransferEntry, TransferReturn};
use rust_decimal::Decimal;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;

use crate::context::AppContext;

/// Write a default config file into the data directory
pub fn init(ctx: &AppContext) -> anyhow::Result<PathBuf> {
    let path = ctx.data_dir().join("hearth.json");
    if path.exists() {
        anyhow::bail!("Already initialized ({} exists)", path.display());
    }
    ctx.config.write(&path)?;
    info!(path = %path.display(), "data directory initialized");
    Ok(path)
}

/// Loan boarding request; amounts are decimal strings in the loan currency
#[derive(Debug, Clone)]
pub struct BoardRequest {
    pub loan_id: String,
    pub principal: String,
    pub annual_rate: Decimal,
    pub first_due_date: NaiveDate,
    pub monthly_installment: String,
    pub monthly_escrow: Option<String>,
    pub late_fee: Option<String>,
    pub late_fee_grace_days: Option<i64>,
    pub boarded_on: NaiveDate,
}

pub fn board(ctx: &AppContext, req: BoardRequest) -> anyhow::Result<EventId> {
    let currency = ctx.config.currency.clone();
    let parse = |raw: &str| Money::parse_decimal(raw, &currency);

    if req.annual_rate < Decimal::ZERO {
        anyhow::bail!("annual rate must not be negative");
    }

    let mut terms = LoanTerms {
        loan_id: LoanId::new(req.loan_id),
        currency: currency.clone(),
        annual_rate: req.annual_rate,
        day_count: Default::default(),
        rounding: Default::default(),
        first_due_date: req.first_due_date,
        monthly_installment: parse(&req.monthly_installment)?,
        monthly_escrow: Money::ZERO,
        late_fee: Money::ZERO,
        late_fee_grace_days: 15,
    };
    if let Some(escrow) = req.monthly_escrow.as_deref() {
        terms.monthly_escrow = parse(escrow)?;
    }
    if let Some(fee) = req.late_fee.as_deref() {
        terms.late_fee = parse(fee)?;
    }
    if let Some(days) = req.late_fee_grace_days {
        terms.late_fee_grace_days = days;
    }

    let principal = parse(&req.principal)?;
    let event_id = ctx
        .ledger
        .board_loan(terms, principal, req.boarded_on, ctx.actor())?;
    Ok(event_id)
}

pub fn pay(
    ctx: &AppContext,
    loan_id: &str,
    amount: &str,
    effective_date: NaiveDate,
    source_channel: &str,
    external_ref: &str,
) -> anyhow::Result<PaymentReceipt> {
    let submission = PaymentSubmission {
        loan_id: LoanId::new(loan_id),
        amount: Money::parse_decimal(amount, &ctx.config.currency)?,
        effective_date,
        source_channel: source_channel.to_string(),
        external_ref: external_ref.to_string(),
    };
    Ok(ctx.payments.submit(submission, ctx.actor())?)
}

pub fn reverse(ctx: &AppContext, event_id: &str, reason: &str) -> anyhow::Result<EventId> {
    let event_id: EventId = event_id
        .parse()
        .with_context(|| format!("invalid event id '{event_id}'"))?;
    Ok(ctx.ledger.reverse_event(event_id, reason, ctx.actor())?)
}

pub fn balance(
    ctx: &AppContext,
    loan_id: &str,
    as_of: Option<NaiveDate>,
) -> anyhow::Result<LoanBalances> {
    Ok(ctx.ledger.get_balances(&LoanId::new(loan_id), as_of)?)
}

pub fn history(
    ctx: &AppContext,
    loan_id: &str,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> anyhow::Result<Vec<LedgerEvent>> {
    Ok(ctx.ledger.events_for_loan(&LoanId::new(loan_id), from, to)?)
}

/// Import a CSV bank statement and auto-match what can be matched
pub fn import_statement(
    ctx: &AppContext,
    bank_account_id: &str,
    path: &Path,
) -> anyhow::Result<ImportReport> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("opening statement {}", path.display()))?;
    let report = ctx
        .matcher
        .import_csv(bank_account_id, file, &ctx.config.currency, ctx.actor())?;
    Ok(report)
}

/// Imported bank transactions, optionally only those in one status
pub fn recon_list(
    ctx: &AppContext,
    status: Option<ReconciliationStatus>,
) -> anyhow::Result<Vec<BankTransaction>> {
    Ok(ctx.matcher.transactions(status))
}

/// Ranked ledger candidates for a pending bank transaction
pub fn recon_candidates(ctx: &AppContext, bank_txn_id: Uuid) -> anyhow::Result<Vec<CashMatchCandidate>> {
    Ok(ctx.matcher.propose_matches(&bank_txn_id)?)
}

pub fn recon_confirm(
    ctx: &AppContext,
    bank_txn_id: Uuid,
    event_id: &str,
) -> anyhow::Result<BankTransaction> {
    let event_id: EventId = event_id
        .parse()
        .with_context(|| format!("invalid event id '{event_id}'"))?;
    Ok(ctx.matcher.confirm_match(bank_txn_id, event_id, ctx.actor())?)
}

/// Raise exceptions for bank transactions pending past the grace period
pub fn recon_promote(ctx: &AppContext, today: NaiveDate) -> anyhow::Result<Vec<ReconciliationException>> {
    let raised = ctx.matcher.promote_stale(today, ctx.actor())?;
    info!(count = raised.len(), %today, "stale bank transactions promoted");
    Ok(raised)
}

pub fn exception_list(
    ctx: &AppContext,
    filter: &ExceptionFilter,
) -> anyhow::Result<Vec<ReconciliationException>> {
    Ok(ctx.exceptions.list(filter))
}

pub fn exception_assign(
    ctx: &AppContext,
    id: Uuid,
    assignee: &str,
) -> anyhow::Result<ReconciliationException> {
    Ok(ctx.exceptions.assign(id, assignee, ctx.actor())?)
}

pub fn exception_pending(ctx: &AppContext, id: Uuid) -> anyhow::Result<ReconciliationException> {
    Ok(ctx.exceptions.mark_pending(id, ctx.actor())?)
}

pub fn exception_resolve(
    ctx: &AppContext,
    id: Uuid,
    note: &str,
) -> anyhow::Result<ReconciliationException> {
    Ok(ctx.exceptions.resolve(id, note, ctx.actor())?)
}

pub fn exception_cancel(
    ctx: &AppContext,
    id: Uuid,
    reason: &str,
) -> anyhow::Result<ReconciliationException> {
    Ok(ctx.exceptions.cancel(id, reason, ctx.actor())?)
}

/// Submit a batch from a JSON file holding an array of entries
pub fn transfer_submit(
    ctx: &AppContext,
    path: &Path,
    effective_date: NaiveDate,
) -> anyhow::Result<TransferBatch> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading entries {}", path.display()))?;
    let entries: Vec<NewTransferEntry> = serde_json::from_str(&raw)
        .with_context(|| format!("parsing entries {}", path.display()))?;
    Ok(ctx
        .transfers
        .submit_batch(effective_date, entries, ctx.actor())?)
}

/// Hand a batch to the outbox gateway
pub async fn transfer_send(ctx: &AppContext, batch_id: Uuid) -> anyhow::Result<GatewayAck> {
    let gateway = ctx.outbox();
    Ok(ctx
        .transfers
        .send_batch(batch_id, &gateway, ctx.actor())
        .await?)
}

pub fn transfer_settle(
    ctx: &AppContext,
    trace_number: &str,
    settled_on: NaiveDate,
) -> anyhow::Result<EventId> {
    Ok(ctx
        .transfers
        .record_settlement(trace_number, settled_on, ctx.actor())?)
}

pub fn transfer_return(
    ctx: &AppContext,
    trace_number: &str,
    return_code: &str,
    amount: &str,
) -> anyhow::Result<TransferReturn> {
    let amount = Money::parse_decimal(amount, &ctx.config.currency)?;
    Ok(ctx
        .transfers
        .record_return(trace_number, return_code, amount, ctx.actor())?)
}

pub fn transfer_show(ctx: &AppContext, trace_number: &str) -> anyhow::Result<TransferEntry> {
    Ok(ctx.transfers.entry(trace_number)?)
}

/// Run a servicing cycle to completion; Ctrl-C cancels it.
///
/// The finished run is saved under the data directory.
pub async fn cycle_run(
    ctx: &AppContext,
    valuation_date: NaiveDate,
    loans: Vec<String>,
    dry_run: bool,
) -> anyhow::Result<CycleRun> {
    let loan_ids = if loans.is_empty() {
        None
    } else {
        Some(loans.into_iter().map(LoanId::new).collect())
    };

    let run_id = ctx
        .cycle
        .start_cycle(valuation_date, loan_ids, dry_run, ctx.actor())?;

    let run = tokio::select! {
        run = ctx.cycle.wait(&run_id) => run?,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, cancelling cycle run {}", run_id);
            match ctx.cycle.cancel(&run_id, ctx.actor()) {
                Ok(()) | Err(CycleError::AlreadyFinished { .. }) => {}
                Err(e) => return Err(e.into()),
            }
            ctx.cycle.wait(&run_id).await?
        }
    };

    let path = ctx.save_run(&run)?;
    info!(run_id = %run.id, path = %path.display(), state = %run.state, "cycle run saved");
    Ok(run)
}

pub fn cycle_status(ctx: &AppContext, run_id: Uuid) -> anyhow::Result<CycleRun> {
    ctx.load_run(&run_id)
}

pub fn cycle_export(ctx: &AppContext, run_id: Uuid, format: ExportFormat) -> anyhow::Result<String> {
    let run = ctx.load_run(&run_id)?;
    Ok(export_run(&run, format)?)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditSummary {
    pub records: usize,
    pub last_hash: String,
}

/// Recompute the whole audit chain; the error names the first bad record
pub fn audit_verify(ctx: &AppContext) -> anyhow::Result<AuditSummary> {
    let records = ctx.audit.len();
    if records > 0 {
        ctx.audit.check_range(1, records as u64)?;
    }
    Ok(AuditSummary {
        records,
        last_hash: ctx.audit.last_hash(),
    })
}

/// Audit records for a loan, optionally limited to a date range
pub fn audit_trail(
    ctx: &AppContext,
    loan_id: &str,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> anyhow::Result<Vec<AuditRecord>> {
    let loan_id = LoanId::new(loan_id);
    if ctx.ledger.terms(&loan_id).is_none() {
        anyhow::bail!("Loan not found: {}", loan_id);
    }

    let records = ctx
        .audit
        .by_resource("loan", loan_id.as_str())
        .into_iter()
        .filter(|r| {
            let day = r.timestamp.date_naive();
            from.map_or(true, |f| day >= f) && to.map_or(true, |t| day <= t)
        })
        .collect();
    Ok(records)
}
