use std::collections::{BTreeSet, HashSet};

use crate::model::{AggregateMetrics, EvalResult, Hit, QueryMetrics, QueryStatus};

/// Scores ordered hits against ground truth at cutoff `k`.
///
/// Precision divides by `k` even when fewer than `k` hits came back. An
/// empty ground-truth set leaves every metric undefined.
pub(crate) fn score_hits(hits: &[Hit], ground_truth: &BTreeSet<String>, k: usize) -> QueryMetrics {
    if ground_truth.is_empty() || k == 0 {
        return QueryMetrics {
            recall_at_k: None,
            precision_at_k: None,
            first_relevant_rank: None,
            reciprocal_rank: None,
        };
    }

    let relevant_in_top_k = hits
        .iter()
        .take(k)
        .map(|hit| hit.document_id.as_str())
        .filter(|doc_id| ground_truth.contains(*doc_id))
        .collect::<HashSet<&str>>()
        .len();

    let first_relevant_rank = hits
        .iter()
        .position(|hit| ground_truth.contains(&hit.document_id));

    QueryMetrics {
        recall_at_k: Some(relevant_in_top_k as f64 / ground_truth.len() as f64),
        precision_at_k: Some(relevant_in_top_k as f64 / k as f64),
        first_relevant_rank,
        reciprocal_rank: Some(first_relevant_rank.map_or(0.0, |rank| 1.0 / (rank + 1) as f64)),
    }
}

pub(crate) fn aggregate(results: &[EvalResult]) -> AggregateMetrics {
    let mut recall = Vec::<f64>::new();
    let mut precision = Vec::<f64>::new();
    let mut reciprocal = Vec::<f64>::new();
    let mut failed = 0_usize;
    let mut degraded = 0_usize;
    let mut undefined = 0_usize;

    for result in results {
        match result.status {
            QueryStatus::Failed => {
                failed += 1;
                continue;
            }
            QueryStatus::Degraded => degraded += 1,
            QueryStatus::Ok => {}
        }

        let Some(metrics) = result.metrics.as_ref().filter(|metrics| metrics.is_defined()) else {
            undefined += 1;
            continue;
        };
        recall.extend(metrics.recall_at_k);
        precision.extend(metrics.precision_at_k);
        reciprocal.extend(metrics.reciprocal_rank);
    }

    AggregateMetrics {
        total: results.len(),
        evaluated: recall.len(),
        failed,
        undefined,
        degraded,
        mean_recall_at_k: mean(&recall),
        mean_precision_at_k: mean(&precision),
        mean_reciprocal_rank: mean(&reciprocal),
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}
