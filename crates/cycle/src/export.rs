//! Run export as JSON or CSV

use serde::Serialize;
use strum_macros::{Display, EnumString};
use uuid::Uuid;

use crate::error::{CycleError, CycleResult};
use crate::orchestrator::CycleOrchestrator;
use crate::run::CycleRun;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Csv,
}

/// One CSV row per planned posting; loans with no postings get one row
#[derive(Serialize)]
struct ExportRow<'a> {
    run_id: Uuid,
    valuation_date: String,
    dry_run: bool,
    loan_id: &'a str,
    loan_status: String,
    kind: String,
    event_type: String,
    source_id: &'a str,
    amount_minor: Option<i64>,
    event_id: String,
    error: &'a str,
}

pub fn export_run(run: &CycleRun, format: ExportFormat) -> CycleResult<String> {
    match format {
        ExportFormat::Json => Ok(serde_json::to_string_pretty(run)?),
        ExportFormat::Csv => export_csv(run),
    }
}

fn export_csv(run: &CycleRun) -> CycleResult<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    let valuation_date = run.valuation_date.to_string();

    for result in &run.results {
        let error = result.error.as_deref().unwrap_or_default();
        if result.postings.is_empty() {
            writer.serialize(ExportRow {
                run_id: run.id,
                valuation_date: valuation_date.clone(),
                dry_run: run.dry_run,
                loan_id: result.loan_id.as_str(),
                loan_status: result.status.to_string(),
                kind: String::new(),
                event_type: String::new(),
                source_id: "",
                amount_minor: None,
                event_id: String::new(),
                error,
            })?;
            continue;
        }

        for (i, posting) in result.postings.iter().enumerate() {
            writer.serialize(ExportRow {
                run_id: run.id,
                valuation_date: valuation_date.clone(),
                dry_run: run.dry_run,
                loan_id: result.loan_id.as_str(),
                loan_status: result.status.to_string(),
                kind: posting.kind.to_string(),
                event_type: posting.event_type.to_string(),
                source_id: &posting.source_id,
                amount_minor: Some(posting.amount_minor),
                event_id: result
                    .event_ids
                    .get(i)
                    .map(|id| id.to_string())
                    .unwrap_or_default(),
                error,
            })?;
        }
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| CycleError::Export(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| CycleError::Export(e.to_string()))
}

impl CycleOrchestrator {
    pub fn export(&self, run_id: &Uuid, format: ExportFormat) -> CycleResult<String> {
        let run = self.status(run_id)?;
        export_run(&run, format)
    }
}
