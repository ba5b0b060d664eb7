//! Servicing cycle orchestrator
//!
//! A run processes loans on a bounded pool of tokio tasks. Each loan is
//! planned with `plan_loan`; live runs post the plan, dry runs stop there.
//! A loan that fails is recorded and raised as an exception while the rest of
//! the run carries on. Storage failures stop the run.

use chrono::{NaiveDate, Utc};
use dashmap::DashMap;
use hearth_allocation::WaterfallPolicy;
use hearth_audit::{Actor, AuditLog, NewAuditEntry};
use hearth_core::LoanId;
use hearth_ledger::LedgerStore;
use hearth_recon::{ExceptionCategory, ExceptionStore, NewException, Severity};
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Notify, Semaphore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::CycleConfig;
use crate::error::{CycleError, CycleResult};
use crate::plan::{plan_loan, PlanInput};
use crate::run::{CycleRun, LoanResult, LoanStatus, RunReconciliation, RunState};

const RESOURCE_TYPE: &str = "cycle_run";

struct RunHandle {
    run: RwLock<CycleRun>,
    cancel: AtomicBool,
    failure: Mutex<Option<String>>,
    finished: Notify,
}

impl RunHandle {
    fn should_stop(&self) -> bool {
        self.cancel.load(Ordering::SeqCst) || self.failure.lock().is_some()
    }

    fn snapshot(&self) -> CycleRun {
        self.run.read().clone()
    }
}

pub struct CycleOrchestrator {
    ledger: Arc<LedgerStore>,
    exceptions: Arc<ExceptionStore>,
    audit: Arc<AuditLog>,
    policy: WaterfallPolicy,
    config: CycleConfig,
    runs: DashMap<Uuid, Arc<RunHandle>>,
}

impl CycleOrchestrator {
    pub fn new(
        ledger: Arc<LedgerStore>,
        exceptions: Arc<ExceptionStore>,
        policy: WaterfallPolicy,
        config: CycleConfig,
    ) -> Self {
        let audit = Arc::clone(ledger.audit());
        Self {
            ledger,
            exceptions,
            audit,
            policy,
            config,
            runs: DashMap::new(),
        }
    }

    pub fn config(&self) -> &CycleConfig {
        &self.config
    }

    /// Start a run in the background and return its id.
    ///
    /// `loan_ids` of None means every boarded loan. Must be called inside a
    /// tokio runtime.
    pub fn start_cycle(
        self: &Arc<Self>,
        valuation_date: NaiveDate,
        loan_ids: Option<Vec<LoanId>>,
        dry_run: bool,
        actor: &Actor,
    ) -> CycleResult<Uuid> {
        let loans = match loan_ids {
            Some(ids) => {
                let mut seen = HashSet::new();
                let mut unique = Vec::with_capacity(ids.len());
                for id in ids {
                    if self.ledger.terms(&id).is_none() {
                        return Err(CycleError::LoanNotFound(id));
                    }
                    if seen.insert(id.clone()) {
                        unique.push(id);
                    }
                }
                unique
            }
            None => self.ledger.loan_ids(),
        };

        let run_id = Uuid::new_v4();
        let handle = Arc::new(RunHandle {
            run: RwLock::new(CycleRun::new(run_id, valuation_date, dry_run, loans.len())),
            cancel: AtomicBool::new(false),
            failure: Mutex::new(None),
            finished: Notify::new(),
        });

        self.audit.append(
            NewAuditEntry::new("cycle.run_created", RESOURCE_TYPE, run_id.to_string())
                .by(actor)
                .correlation(run_id.to_string())
                .payload(serde_json::json!({
                    "valuation_date": valuation_date,
                    "dry_run": dry_run,
                    "loan_count": loans.len(),
                })),
        )?;
        self.runs.insert(run_id, Arc::clone(&handle));

        info!(
            "Cycle run {} created: {} loans, valuation {}, dry_run={}",
            run_id,
            loans.len(),
            valuation_date,
            dry_run
        );

        let this = Arc::clone(self);
        let actor = actor.clone();
        tokio::spawn(async move {
            this.execute(handle, loans, actor).await;
        });

        Ok(run_id)
    }

    /// Snapshot of a run; safe to call while it is in progress
    pub fn status(&self, run_id: &Uuid) -> CycleResult<CycleRun> {
        self.handle(run_id).map(|h| h.snapshot())
    }

    /// Runs, newest first
    pub fn runs(&self) -> Vec<CycleRun> {
        let mut runs: Vec<CycleRun> = self.runs.iter().map(|h| h.snapshot()).collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        runs
    }

    /// Ask a run to stop. Loans already in progress finish; no new loan
    /// starts.
    pub fn cancel(&self, run_id: &Uuid, actor: &Actor) -> CycleResult<()> {
        let handle = self.handle(run_id)?;
        let state = handle.run.read().state;
        if state.is_terminal() {
            return Err(CycleError::AlreadyFinished {
                run_id: *run_id,
                state: state.to_string(),
            });
        }

        handle.cancel.store(true, Ordering::SeqCst);
        self.audit.append(
            NewAuditEntry::new("cycle.cancel_requested", RESOURCE_TYPE, run_id.to_string())
                .by(actor)
                .correlation(run_id.to_string()),
        )?;
        info!("Cancellation requested for cycle run {}", run_id);
        Ok(())
    }

    /// Wait for a run to reach a terminal state
    pub async fn wait(&self, run_id: &Uuid) -> CycleResult<CycleRun> {
        let handle = self.handle(run_id)?;
        loop {
            let notified = handle.finished.notified();
            let run = handle.snapshot();
            if run.state.is_terminal() {
                return Ok(run);
            }
            notified.await;
        }
    }

    fn handle(&self, run_id: &Uuid) -> CycleResult<Arc<RunHandle>> {
        self.runs
            .get(run_id)
            .map(|h| Arc::clone(h.value()))
            .ok_or(CycleError::RunNotFound(*run_id))
    }

    async fn execute(self: Arc<Self>, handle: Arc<RunHandle>, loans: Vec<LoanId>, actor: Actor) {
        let run_id = handle.run.read().id;
        {
            let mut run = handle.run.write();
            run.state = RunState::Running;
            run.started_at = Some(Utc::now());
        }

        let semaphore = Arc::new(Semaphore::new(self.config.max_workers.max(1)));
        let mut handles = Vec::new();

        for loan_id in loans {
            if handle.should_stop() {
                break;
            }
            let permit = match Arc::clone(&semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            if handle.should_stop() {
                break;
            }

            let this = Arc::clone(&self);
            let handle = Arc::clone(&handle);
            let actor = actor.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                this.run_loan(&handle, loan_id, &actor);
            }));
        }

        for h in handles {
            if let Err(e) = h.await {
                error!("Cycle worker for run {} panicked: {}", run_id, e);
                handle
                    .failure
                    .lock()
                    .get_or_insert_with(|| format!("worker panicked: {e}"));
            }
        }

        self.finish(&handle, &actor);
        handle.finished.notify_waiters();
    }

    fn run_loan(&self, handle: &RunHandle, loan_id: LoanId, actor: &Actor) {
        let (run_id, valuation_date, dry_run) = {
            let run = handle.run.read();
            (run.id, run.valuation_date, run.dry_run)
        };

        let result = match self.process_loan(run_id, valuation_date, dry_run, &loan_id, actor) {
            Ok(result) => result,
            Err(e) if e.is_infrastructure() => {
                error!("Cycle run {} stopped on loan {}: {}", run_id, loan_id, e);
                handle
                    .failure
                    .lock()
                    .get_or_insert_with(|| format!("loan {loan_id}: {e}"));
                LoanResult {
                    loan_id,
                    status: LoanStatus::Failed,
                    postings: Vec::new(),
                    event_ids: Vec::new(),
                    error: Some(e.to_string()),
                    exception_id: None,
                }
            }
            Err(e) => self.loan_failure(run_id, dry_run, loan_id, e, actor),
        };

        let mut run = handle.run.write();
        run.processed_loans += 1;
        if let Some(id) = result.exception_id {
            run.exception_ids.push(id);
        }
        run.results.push(result);
    }

    /// Plan one loan and, unless dry, post the plan in order
    fn process_loan(
        &self,
        run_id: Uuid,
        valuation_date: NaiveDate,
        dry_run: bool,
        loan_id: &LoanId,
        actor: &Actor,
    ) -> CycleResult<LoanResult> {
        let input = PlanInput {
            ledger: &self.ledger,
            policy: &self.policy,
            config: &self.config,
            valuation_date,
            actor,
            correlation_id: run_id.to_string(),
        };
        let steps = plan_loan(&input, loan_id)?;
        let postings: Vec<_> = steps.iter().map(|s| s.posting.clone()).collect();

        if steps.is_empty() {
            debug!("Cycle run {}: nothing to do for {}", run_id, loan_id);
            return Ok(LoanResult {
                loan_id: loan_id.clone(),
                status: LoanStatus::NoAction,
                postings,
                event_ids: Vec::new(),
                error: None,
                exception_id: None,
            });
        }

        if dry_run {
            return Ok(LoanResult {
                loan_id: loan_id.clone(),
                status: LoanStatus::Planned,
                postings,
                event_ids: Vec::new(),
                error: None,
                exception_id: None,
            });
        }

        let mut event_ids = Vec::with_capacity(steps.len());
        for step in steps {
            match self.ledger.post_event(step.event) {
                Ok(id) => event_ids.push(id),
                Err(e) => {
                    let err = CycleError::from(e);
                    if err.is_infrastructure() {
                        return Err(err);
                    }
                    // Earlier steps stay posted; reconciliation sees the gap
                    let mut result = self.loan_failure(run_id, false, loan_id.clone(), err, actor);
                    result.postings = postings;
                    result.event_ids = event_ids;
                    return Ok(result);
                }
            }
        }

        debug!(
            "Cycle run {}: posted {} events for {}",
            run_id,
            event_ids.len(),
            loan_id
        );
        Ok(LoanResult {
            loan_id: loan_id.clone(),
            status: LoanStatus::Posted,
            postings,
            event_ids,
            error: None,
            exception_id: None,
        })
    }

    fn loan_failure(
        &self,
        run_id: Uuid,
        dry_run: bool,
        loan_id: LoanId,
        err: CycleError,
        actor: &Actor,
    ) -> LoanResult {
        warn!("Cycle run {}: loan {} failed: {}", run_id, loan_id, err);

        let exception_id = if dry_run {
            None
        } else {
            match self.exceptions.raise(
                NewException::new(
                    ExceptionCategory::CycleFailure,
                    Severity::High,
                    format!("servicing cycle {run_id} failed for loan {loan_id}: {err}"),
                )
                .loan(loan_id.clone())
                .correlation(run_id.to_string()),
                actor,
            ) {
                Ok(exc) => Some(exc.id),
                Err(e) => {
                    error!("Could not raise exception for loan {}: {}", loan_id, e);
                    None
                }
            }
        };

        LoanResult {
            loan_id,
            status: LoanStatus::Failed,
            postings: Vec::new(),
            event_ids: Vec::new(),
            error: Some(err.to_string()),
            exception_id,
        }
    }

    /// Settle the final state and reconcile planned against posted totals
    fn finish(&self, handle: &RunHandle, actor: &Actor) {
        let failure = handle.failure.lock().clone();
        let cancelled = handle.cancel.load(Ordering::SeqCst);

        let mut run = handle.run.write();
        run.results.sort_by(|a, b| a.loan_id.cmp(&b.loan_id));
        run.planned_total_minor = run.results.iter().map(|r| r.planned_minor()).sum();

        if run.dry_run {
            run.posted_total_minor = 0;
            run.reconciliation = Some(RunReconciliation::Balanced);
        } else {
            let posted = self.posted_total(&run);
            run.posted_total_minor = posted;
            let planned_for_posting: i64 = run
                .results
                .iter()
                .filter(|r| matches!(r.status, LoanStatus::Posted | LoanStatus::Failed))
                .map(|r| r.planned_minor())
                .sum();

            if posted == planned_for_posting {
                run.reconciliation = Some(RunReconciliation::Balanced);
            } else {
                run.reconciliation = Some(RunReconciliation::Imbalanced);
                let detail = format!(
                    "servicing cycle {} planned {} minor units but the ledger holds {}",
                    run.id, planned_for_posting, posted
                );
                error!("{}", detail);
                match self.exceptions.raise(
                    NewException::new(ExceptionCategory::CycleImbalance, Severity::Critical, detail)
                        .correlation(run.id.to_string()),
                    actor,
                ) {
                    Ok(exc) => run.exception_ids.push(exc.id),
                    Err(e) => error!("Could not raise imbalance exception: {}", e),
                }
            }
        }

        run.state = if failure.is_some() {
            RunState::Failed
        } else if cancelled {
            RunState::Cancelled
        } else {
            RunState::Completed
        };
        run.failure = failure;
        run.finished_at = Some(Utc::now());

        let summary = serde_json::json!({
            "state": run.state,
            "processed_loans": run.processed_loans,
            "total_loans": run.total_loans,
            "failed_loans": run.failed_loans(),
            "planned_total_minor": run.planned_total_minor,
            "posted_total_minor": run.posted_total_minor,
            "reconciliation": run.reconciliation,
            "failure": run.failure,
        });
        if let Err(e) = self.audit.append(
            NewAuditEntry::new("cycle.run_finished", RESOURCE_TYPE, run.id.to_string())
                .by(actor)
                .correlation(run.id.to_string())
                .payload(summary),
        ) {
            error!("Could not audit end of cycle run {}: {}", run.id, e);
        }

        info!(
            "Cycle run {} {}: {}/{} loans, planned {} posted {}",
            run.id,
            run.state,
            run.processed_loans,
            run.total_loans,
            run.planned_total_minor,
            run.posted_total_minor
        );
    }

    /// Debit total of the run's events as the ledger holds them now
    fn posted_total(&self, run: &CycleRun) -> i64 {
        run.results
            .iter()
            .flat_map(|r| r.event_ids.iter())
            .map(|id| match self.ledger.entries_for_event(id) {
                Ok(entries) => entries.iter().map(|e| e.debit_minor()).sum::<i64>(),
                Err(e) => {
                    warn!("Event {} from run {} not readable: {}", id, run.id, e);
                    0
                }
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::PostingKind;
    use hearth_core::{BucketName, Currency, DayCount, GlAccount, Money, RoundingPolicy};
    use hearth_ledger::{EventType, LoanTerms, NewEvent};
    use hearth_recon::ExceptionFilter;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
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
            first_due_date: date(2024, 2, 1),
            monthly_installment: m(120_000),
            monthly_escrow: m(30_000),
            late_fee: m(5_000),
            late_fee_grace_days: 15,
        }
    }

    fn orchestrator(loans: usize, config: CycleConfig) -> (Arc<LedgerStore>, Arc<CycleOrchestrator>) {
        let audit = Arc::new(AuditLog::in_memory());
        let ledger = Arc::new(LedgerStore::in_memory(Arc::clone(&audit)));
        for i in 0..loans {
            ledger
                .board_loan(
                    terms(&format!("LN-{i:03}")),
                    m(20_000_000),
                    date(2024, 1, 1),
                    &Actor::system(),
                )
                .unwrap();
        }
        let exceptions = Arc::new(ExceptionStore::new(audit));
        let orchestrator = Arc::new(CycleOrchestrator::new(
            Arc::clone(&ledger),
            exceptions,
            WaterfallPolicy::default(),
            config,
        ));
        (ledger, orchestrator)
    }

    fn postings(run: &CycleRun) -> Vec<(LoanId, Vec<crate::run::PlannedPosting>)> {
        run.results
            .iter()
            .map(|r| (r.loan_id.clone(), r.postings.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_live_run_posts_and_balances() {
        let (ledger, orchestrator) = orchestrator(3, CycleConfig::default());
        let actor = Actor::batch("nightly");

        let run_id = orchestrator
            .start_cycle(date(2024, 2, 1), None, false, &actor)
            .unwrap();
        let run = orchestrator.wait(&run_id).await.unwrap();

        assert_eq!(run.state, RunState::Completed);
        assert_eq!(run.processed_loans, 3);
        assert_eq!(run.reconciliation, Some(RunReconciliation::Balanced));
        assert_eq!(run.planned_total_minor, 300_000);
        assert_eq!(run.posted_total_minor, 300_000);
        assert!(run.results.iter().all(|r| r.status == LoanStatus::Posted));

        let balances = ledger.get_balances(&LoanId::new("LN-000"), None).unwrap();
        assert_eq!(balances.interest_minor, 100_000);

        // Rerun for the same date posts nothing new
        let again = orchestrator
            .start_cycle(date(2024, 2, 1), None, false, &actor)
            .unwrap();
        let again = orchestrator.wait(&again).await.unwrap();
        assert!(again.results.iter().all(|r| r.status == LoanStatus::NoAction));
        assert_eq!(
            ledger.get_balances(&LoanId::new("LN-000"), None).unwrap().interest_minor,
            100_000
        );
    }

    #[tokio::test]
    async fn test_dry_run_matches_live_plan() {
        let (ledger, orchestrator) = orchestrator(2, CycleConfig::default());
        ledger
            .post_event(
                NewEvent::builder(EventType::TransferSettlement, "LN-001")
                    .business_date(date(2024, 2, 10))
                    .source("transfer", "t-1:settle")
                    .debit(GlAccount::Cash, m(90_000))
                    .credit(GlAccount::Suspense, m(90_000))
                    .build(),
            )
            .unwrap();
        let events_before = ledger.event_count();
        let actor = Actor::batch("nightly");
        let valuation = date(2024, 2, 20);

        let dry_id = orchestrator.start_cycle(valuation, None, true, &actor).unwrap();
        let dry = orchestrator.wait(&dry_id).await.unwrap();
        assert_eq!(ledger.event_count(), events_before);
        assert!(dry.results.iter().all(|r| r.status == LoanStatus::Planned));

        let live_id = orchestrator.start_cycle(valuation, None, false, &actor).unwrap();
        let live = orchestrator.wait(&live_id).await.unwrap();

        assert_eq!(postings(&dry), postings(&live));
        assert_eq!(dry.planned_total_minor, live.posted_total_minor);

        let kinds: Vec<PostingKind> = live
            .result_for(&LoanId::new("LN-001"))
            .unwrap()
            .postings
            .iter()
            .map(|p| p.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                PostingKind::InterestAccrual,
                PostingKind::LateFee,
                PostingKind::SuspenseApplication
            ]
        );
    }

    #[tokio::test]
    async fn test_loan_failure_is_isolated() {
        let audit = Arc::new(AuditLog::in_memory());
        let ledger = Arc::new(LedgerStore::in_memory(Arc::clone(&audit)));
        for loan in ["LN-000", "LN-001"] {
            ledger
                .board_loan(terms(loan), m(20_000_000), date(2024, 1, 1), &Actor::system())
                .unwrap();
        }
        ledger
            .post_event(
                NewEvent::builder(EventType::TransferSettlement, "LN-000")
                    .business_date(date(2024, 1, 20))
                    .source("transfer", "t-1:settle")
                    .debit(GlAccount::Cash, m(50_000))
                    .credit(GlAccount::Suspense, m(50_000))
                    .build(),
            )
            .unwrap();

        // Only LN-000 has suspense to apply, and this waterfall cannot allocate
        let orchestrator = Arc::new(CycleOrchestrator::new(
            Arc::clone(&ledger),
            Arc::new(ExceptionStore::new(audit)),
            WaterfallPolicy {
                order: vec![BucketName::FeesDue, BucketName::FeesDue],
                allow_skip: false,
            },
            CycleConfig::default(),
        ));

        let run_id = orchestrator
            .start_cycle(date(2024, 2, 1), None, false, &Actor::batch("nightly"))
            .unwrap();
        let run = orchestrator.wait(&run_id).await.unwrap();

        assert_eq!(run.state, RunState::Completed);
        let failed = run.result_for(&LoanId::new("LN-000")).unwrap();
        assert_eq!(failed.status, LoanStatus::Failed);
        assert!(failed.exception_id.is_some());
        assert_eq!(
            run.result_for(&LoanId::new("LN-001")).unwrap().status,
            LoanStatus::Posted
        );
        assert_eq!(run.reconciliation, Some(RunReconciliation::Balanced));

        let raised = orchestrator.exceptions.list(&ExceptionFilter {
            category: Some(ExceptionCategory::CycleFailure),
            ..Default::default()
        });
        assert_eq!(raised.len(), 1);
        assert_eq!(raised[0].loan_id, Some(LoanId::new("LN-000")));
    }

    #[tokio::test]
    async fn test_cancel_keeps_partial_results() {
        let config = CycleConfig {
            max_workers: 1,
            ..Default::default()
        };
        let (_, orchestrator) = orchestrator(50, config);
        let actor = Actor::batch("nightly");

        let run_id = orchestrator
            .start_cycle(date(2024, 2, 1), None, false, &actor)
            .unwrap();
        while orchestrator.status(&run_id).unwrap().processed_loans == 0 {
            tokio::task::yield_now().await;
        }
        orchestrator.cancel(&run_id, &Actor::user("ops")).unwrap();
        let run = orchestrator.wait(&run_id).await.unwrap();

        assert_eq!(run.state, RunState::Cancelled);
        assert!(run.processed_loans >= 1);
        assert!(run.processed_loans < run.total_loans);
        assert_eq!(run.results.len(), run.processed_loans);
        assert_eq!(run.reconciliation, Some(RunReconciliation::Balanced));

        assert!(matches!(
            orchestrator.cancel(&run_id, &actor),
            Err(CycleError::AlreadyFinished { .. })
        ));
    }

    #[tokio::test]
    async fn test_unknown_loan_and_run() {
        let (_, orchestrator) = orchestrator(1, CycleConfig::default());
        assert!(matches!(
            orchestrator.start_cycle(
                date(2024, 2, 1),
                Some(vec![LoanId::new("LN-404")]),
                false,
                &Actor::system()
            ),
            Err(CycleError::LoanNotFound(_))
        ));
        assert!(matches!(
            orchestrator.status(&Uuid::new_v4()),
            Err(CycleError::RunNotFound(_))
        ));
    }
}
