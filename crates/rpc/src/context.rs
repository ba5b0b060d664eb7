//! Application context - wires every service from one config

use hearth_allocation::PaymentEngine;
use hearth_audit::{Actor, AuditLog};
use hearth_cycle::{CycleOrchestrator, CycleRun};
use hearth_ledger::LedgerStore;
use hearth_recon::{ExceptionStore, ReconMatcher, ReconStore};
use hearth_transfer::{OutboxGateway, TransferProcessor, TransferStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::config::HearthConfig;

/// Errors specific to the on-disk layout
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("Cycle run {0} has no saved record")]
    RunNotSaved(Uuid),

    #[error("Saved run {path} is unreadable: {reason}")]
    CorruptRun { path: PathBuf, reason: String },
}

/// All services over one data directory
///
/// ```text
/// <data_dir>/
///   audit/audit.jsonl      hash-chained audit log
///   journal/               ledger journal, one file per posting date
///   transfers.db           transfer batches, entries, returns
///   recon.db               bank transactions, matches, exceptions
///   outbox/                batches handed to the bank
///   runs/<id>.json         finished cycle runs
/// ```
pub struct AppContext {
    pub config: HearthConfig,
    pub audit: Arc<AuditLog>,
    pub ledger: Arc<LedgerStore>,
    pub exceptions: Arc<ExceptionStore>,
    pub payments: PaymentEngine,
    pub matcher: ReconMatcher,
    pub transfers: TransferProcessor,
    pub cycle: Arc<CycleOrchestrator>,
    actor: Actor,
}

impl AppContext {
    pub fn new(config: HearthConfig) -> anyhow::Result<Self> {
        let data_dir = config.data_dir.clone();
        std::fs::create_dir_all(&data_dir)?;

        let audit = Arc::new(AuditLog::open(audit_path(&data_dir))?);
        let ledger = Arc::new(LedgerStore::open(
            data_dir.join("journal"),
            Arc::clone(&audit),
        )?);
        let recon = Arc::new(ReconStore::open(data_dir.join("recon.db"))?);
        let exceptions = Arc::new(ExceptionStore::open(Arc::clone(&audit), Arc::clone(&recon))?);

        let payments = PaymentEngine::new(Arc::clone(&ledger), config.waterfall.clone());
        let matcher = ReconMatcher::open(
            Arc::clone(&ledger),
            Arc::clone(&exceptions),
            config.matcher.clone(),
            recon,
        )?;
        let transfers = TransferProcessor::new(
            TransferStore::open(data_dir.join("transfers.db"))?,
            Arc::clone(&ledger),
            Arc::clone(&exceptions),
            config.transfer.clone(),
        );
        let cycle = Arc::new(CycleOrchestrator::new(
            Arc::clone(&ledger),
            Arc::clone(&exceptions),
            config.waterfall.clone(),
            config.cycle.clone(),
        ));

        info!(
            data_dir = %data_dir.display(),
            loans = ledger.loan_ids().len(),
            audit_records = audit.len(),
            open_exceptions = exceptions.list(&hearth_recon::ExceptionFilter::open()).len(),
            "context ready"
        );

        let actor = Actor::user(config.operator.clone());
        Ok(Self {
            config,
            audit,
            ledger,
            exceptions,
            payments,
            matcher,
            transfers,
            cycle,
            actor,
        })
    }

    /// Actor recorded for actions taken through this context
    pub fn actor(&self) -> &Actor {
        &self.actor
    }

    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    pub fn outbox(&self) -> OutboxGateway {
        OutboxGateway::new(self.data_dir().join("outbox"))
    }

    fn run_path(&self, run_id: &Uuid) -> PathBuf {
        self.data_dir().join("runs").join(format!("{run_id}.json"))
    }

    /// Persist a finished run so later invocations can report on it
    pub fn save_run(&self, run: &CycleRun) -> anyhow::Result<PathBuf> {
        let path = self.run_path(&run.id);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, serde_json::to_vec_pretty(run)?)?;
        Ok(path)
    }

    /// A run from this process, or one saved by an earlier invocation
    pub fn load_run(&self, run_id: &Uuid) -> anyhow::Result<CycleRun> {
        if let Ok(run) = self.cycle.status(run_id) {
            return Ok(run);
        }

        let path = self.run_path(run_id);
        if !path.exists() {
            return Err(ContextError::RunNotSaved(*run_id).into());
        }
        let raw = std::fs::read(&path)?;
        let run = serde_json::from_slice(&raw).map_err(|e| ContextError::CorruptRun {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        Ok(run)
    }
}

pub fn audit_path(data_dir: &Path) -> PathBuf {
    data_dir.join("audit").join("audit.jsonl")
}
