use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::error::EvalError;
use crate::model::{EvalResult, QueryMetrics, QueryStatus, RunSummary};
use crate::params::{ExportConfig, ParameterSet};
use crate::util::{ensure_directory, expand_folder_template, write_json_pretty};

pub(super) const RESULTS_FILE: &str = "results.csv";
pub(super) const PARAMETERS_FILE: &str = "parameters.json";
pub(super) const SUMMARY_FILE: &str = "summary.json";

const CSV_HEADER: [&str; 12] = [
    "case_id",
    "query",
    "status",
    "recall_at_k",
    "precision_at_k",
    "first_relevant_rank",
    "reciprocal_rank",
    "ground_truth",
    "hits",
    "attempts",
    "error",
    "evaluated_at",
];

#[derive(Debug, Clone)]
pub(crate) struct ExportPaths {
    pub folder: PathBuf,
    pub results_csv: PathBuf,
    pub parameters_json: PathBuf,
    pub summary_json: PathBuf,
}

pub(super) fn export_run(
    export: &ExportConfig,
    started_at: DateTime<Utc>,
    params: &ParameterSet,
    results: &[EvalResult],
    summary: &RunSummary,
) -> Result<ExportPaths, EvalError> {
    ensure_directory(&export.root)?;
    let folder = claim_folder(
        &export
            .root
            .join(expand_folder_template(&export.folder, started_at)),
    )?;

    let paths = ExportPaths {
        results_csv: folder.join(RESULTS_FILE),
        parameters_json: folder.join(PARAMETERS_FILE),
        summary_json: folder.join(SUMMARY_FILE),
        folder,
    };

    write_results_csv(&paths.results_csv, results)?;
    write_json_pretty(&paths.parameters_json, params)?;
    write_json_pretty(&paths.summary_json, summary)?;

    Ok(paths)
}

/// Creates a fresh run folder, moving to the next `-N` suffix while the
/// name is taken. `create_dir` is the claim, so concurrent runs never share one.
pub(super) fn claim_folder(base: &Path) -> Result<PathBuf, EvalError> {
    let name = base
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    if let Some(parent) = base.parent() {
        ensure_directory(parent)?;
    }

    let mut candidate = base.to_path_buf();
    let mut suffix = 0_u32;
    loop {
        match fs::create_dir(&candidate) {
            Ok(()) => return Ok(candidate),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                suffix += 1;
                candidate = base.with_file_name(format!("{name}-{suffix}"));
            }
            Err(err) => return Err(EvalError::io(&candidate, err)),
        }
    }
}

pub(super) fn write_results_csv(path: &Path, results: &[EvalResult]) -> Result<(), EvalError> {
    let to_io = |err: csv::Error| EvalError::io(path, std::io::Error::from(err));

    let mut writer = csv::Writer::from_path(path).map_err(to_io)?;
    writer.write_record(CSV_HEADER).map_err(to_io)?;
    for result in results {
        writer.write_record(csv_row(result)).map_err(to_io)?;
    }
    writer.flush().map_err(|err| EvalError::io(path, err))?;
    Ok(())
}

pub(super) fn csv_row(result: &EvalResult) -> Vec<String> {
    let metrics = MetricCells::new(result.status, result.metrics.as_ref());
    vec![
        result.case.id.clone(),
        result.case.query.clone(),
        result.status.as_str().to_string(),
        metrics.recall,
        metrics.precision,
        metrics.first_relevant_rank,
        metrics.reciprocal_rank,
        join_ids(result.case.ground_truth.iter()),
        join_ids(result.hits.iter().map(|hit| &hit.document_id)),
        result.attempts.to_string(),
        result.error.clone().unwrap_or_default(),
        result.evaluated_at.clone(),
    ]
}

struct MetricCells {
    recall: String,
    precision: String,
    first_relevant_rank: String,
    reciprocal_rank: String,
}

impl MetricCells {
    fn new(status: QueryStatus, metrics: Option<&QueryMetrics>) -> Self {
        let metrics = match (status, metrics) {
            (QueryStatus::Failed, _) | (_, None) => {
                return Self {
                    recall: String::new(),
                    precision: String::new(),
                    first_relevant_rank: String::new(),
                    reciprocal_rank: String::new(),
                };
            }
            (_, Some(metrics)) => metrics,
        };

        if !metrics.is_defined() {
            return Self {
                recall: "undefined".to_string(),
                precision: "undefined".to_string(),
                first_relevant_rank: "undefined".to_string(),
                reciprocal_rank: "undefined".to_string(),
            };
        }

        Self {
            recall: format_metric(metrics.recall_at_k),
            precision: format_metric(metrics.precision_at_k),
            first_relevant_rank: metrics
                .first_relevant_rank
                .map_or_else(|| "not_found".to_string(), |rank| rank.to_string()),
            reciprocal_rank: format_metric(metrics.reciprocal_rank),
        }
    }
}

fn format_metric(value: Option<f64>) -> String {
    value.map_or_else(|| "undefined".to_string(), |value| format!("{value:.6}"))
}

fn join_ids<'a>(ids: impl Iterator<Item = &'a String>) -> String {
    ids.map(String::as_str).collect::<Vec<&str>>().join(";")
}
