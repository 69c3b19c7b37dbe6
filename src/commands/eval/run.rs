use std::io::{self, Write};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use futures::StreamExt;
use tracing::{debug, info, warn};

use super::EvalContext;
use super::dispatch::dispatch_query;
use super::export::{ExportPaths, export_run};
use super::rerank::rerank_hits;
use super::scoring::{aggregate, score_hits};
use crate::cli::EvalArgs;
use crate::model::{EvalResult, QueryCase, QueryStatus, RunSummary, load_query_cases};
use crate::params::EvalConfig;
use crate::search::{build_http_client, http_clients};
use crate::util::{now_utc_string, sha256_file, utc_string};

const SUMMARY_VERSION: u32 = 1;

pub(super) struct QuerySource {
    pub path: String,
    pub sha256: String,
}

pub(super) struct RunReport {
    pub results: Vec<EvalResult>,
    pub summary: RunSummary,
    pub paths: ExportPaths,
}

pub(super) struct EvaluationOutcome {
    pub results: Vec<EvalResult>,
    pub timed_out: bool,
}

pub fn run(args: EvalArgs) -> Result<()> {
    let config = EvalConfig::load(&args.config, &args.overrides)?;
    let cases = load_query_cases(&args.queries)?;
    let source = QuerySource {
        path: args.queries.display().to_string(),
        sha256: sha256_file(&args.queries)?,
    };

    info!(
        config = %args.config.display(),
        queries = %source.path,
        case_count = cases.len(),
        concurrency = config.run.concurrency,
        eval_topk = config.params.eval_topk,
        num_returned_hits = config.params.num_returned_hits,
        skip_rerank = config.params.skip_rerank,
        "evaluation started"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    let report = runtime.block_on(async {
        let client = build_http_client()?;
        let (backend, reranker) = http_clients(&config, &client);
        let ctx = EvalContext::new(&config, backend, reranker);
        execute_run(&config, &ctx, cases, source).await
    })?;

    write_text_summary(&report)
}

pub(super) async fn execute_run(
    config: &EvalConfig,
    ctx: &EvalContext,
    cases: Vec<QueryCase>,
    source: QuerySource,
) -> Result<RunReport> {
    let started_at = Utc::now();
    let run_timeout = (config.run.run_timeout_secs > 0)
        .then(|| Duration::from_secs(config.run.run_timeout_secs));

    let outcome = evaluate_cases(ctx, cases, run_timeout).await;
    let aggregate = aggregate(&outcome.results);

    let summary = RunSummary {
        summary_version: SUMMARY_VERSION,
        started_at: utc_string(started_at),
        finished_at: now_utc_string(),
        queries_path: source.path,
        queries_sha256: source.sha256,
        eval_topk: config.params.eval_topk,
        timed_out: outcome.timed_out,
        parameters: config.params.clone(),
        aggregate,
    };

    let paths = export_run(
        &config.export,
        started_at,
        &config.params,
        &outcome.results,
        &summary,
    )
    .context("failed to export evaluation results")?;

    info!(
        folder = %paths.folder.display(),
        results = %paths.results_csv.display(),
        parameters = %paths.parameters_json.display(),
        summary = %paths.summary_json.display(),
        total = summary.aggregate.total,
        evaluated = summary.aggregate.evaluated,
        failed = summary.aggregate.failed,
        undefined = summary.aggregate.undefined,
        degraded = summary.aggregate.degraded,
        mean_recall_at_k = ?summary.aggregate.mean_recall_at_k,
        mean_precision_at_k = ?summary.aggregate.mean_precision_at_k,
        timed_out = summary.timed_out,
        "evaluation exported"
    );

    Ok(RunReport {
        results: outcome.results,
        summary,
        paths,
    })
}

/// Runs every case through dispatch, rerank and scoring with bounded
/// concurrency. Results always come back in input order.
pub(super) async fn evaluate_cases(
    ctx: &EvalContext,
    cases: Vec<QueryCase>,
    run_timeout: Option<Duration>,
) -> EvaluationOutcome {
    let mut slots = (0..cases.len())
        .map(|_| None)
        .collect::<Vec<Option<EvalResult>>>();

    let mut pending = futures::stream::iter(cases.iter().cloned().enumerate().map(|(index, case)| {
        let ctx = ctx.clone();
        async move { (index, evaluate_case(&ctx, case).await) }
    }))
    .buffer_unordered(ctx.run.concurrency.max(1));

    let deadline = run_timeout.map(|timeout| tokio::time::Instant::now() + timeout);
    let mut timed_out = false;
    loop {
        let next = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, pending.next()).await {
                Ok(next) => next,
                Err(_) => {
                    timed_out = true;
                    break;
                }
            },
            None => pending.next().await,
        };
        let Some((index, result)) = next else {
            break;
        };
        slots[index] = Some(result);
    }
    // Dropping the stream cancels any in-flight requests.
    drop(pending);

    let unfinished = slots.iter().filter(|slot| slot.is_none()).count();
    if timed_out {
        warn!(unfinished, "run timeout exceeded; exporting completed results");
    }

    let results = slots
        .into_iter()
        .zip(cases)
        .map(|(slot, case)| {
            slot.unwrap_or_else(|| {
                failed_result(case, 0, "cancelled: run timeout exceeded".to_string())
            })
        })
        .collect();

    EvaluationOutcome { results, timed_out }
}

async fn evaluate_case(ctx: &EvalContext, case: QueryCase) -> EvalResult {
    let dispatched = dispatch_query(ctx, &case.query).await;
    let hits = match dispatched.result {
        Ok(hits) => hits,
        Err(err) => {
            warn!(
                case_id = %case.id,
                attempts = dispatched.attempts,
                error = %err,
                "query failed"
            );
            return failed_result(case, dispatched.attempts, err.to_string());
        }
    };

    let reranked = rerank_hits(ctx, &case.query, hits).await;
    let metrics = score_hits(&reranked.hits, &case.ground_truth, ctx.params.eval_topk);
    let status = if reranked.degraded.is_some() {
        QueryStatus::Degraded
    } else {
        QueryStatus::Ok
    };

    debug!(
        case_id = %case.id,
        status = status.as_str(),
        hit_count = reranked.hits.len(),
        recall_at_k = ?metrics.recall_at_k,
        first_relevant_rank = ?metrics.first_relevant_rank,
        "query evaluated"
    );

    EvalResult {
        case,
        status,
        hits: reranked.hits,
        metrics: Some(metrics),
        attempts: dispatched.attempts,
        error: reranked.degraded,
        evaluated_at: now_utc_string(),
    }
}

fn failed_result(case: QueryCase, attempts: u32, error: String) -> EvalResult {
    EvalResult {
        case,
        status: QueryStatus::Failed,
        hits: Vec::new(),
        metrics: None,
        attempts,
        error: Some(error),
        evaluated_at: now_utc_string(),
    }
}

fn write_text_summary(report: &RunReport) -> Result<()> {
    let aggregate = &report.summary.aggregate;
    let mut output = io::BufWriter::new(io::stdout().lock());

    writeln!(output, "Export: {}", report.paths.folder.display())?;
    writeln!(
        output,
        "Cases: total={} evaluated={} failed={} undefined={} degraded={} timed_out={}",
        aggregate.total,
        aggregate.evaluated,
        aggregate.failed,
        aggregate.undefined,
        aggregate.degraded,
        report.summary.timed_out,
    )?;
    writeln!(
        output,
        "Metrics@{}: recall={} precision={} mrr={}",
        report.summary.eval_topk,
        format_mean(aggregate.mean_recall_at_k),
        format_mean(aggregate.mean_precision_at_k),
        format_mean(aggregate.mean_reciprocal_rank),
    )?;

    for result in report
        .results
        .iter()
        .filter(|result| result.status != QueryStatus::Ok)
    {
        writeln!(
            output,
            "\t{}\t{}\t{}",
            result.case.id,
            result.status.as_str(),
            result.error.as_deref().unwrap_or_default()
        )?;
    }

    output.flush()?;
    Ok(())
}

fn format_mean(value: Option<f64>) -> String {
    value.map_or_else(|| "n/a".to_string(), |value| format!("{value:.4}"))
}
