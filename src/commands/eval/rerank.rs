use tracing::warn;

use super::EvalContext;
use crate::error::EvalError;
use crate::model::Hit;

pub(crate) struct RerankOutcome {
    pub hits: Vec<Hit>,
    /// Set when reranking was requested but fell back to dispatcher order.
    pub degraded: Option<String>,
}

pub(crate) async fn rerank_hits(ctx: &EvalContext, query: &str, hits: Vec<Hit>) -> RerankOutcome {
    if ctx.params.skip_rerank || hits.is_empty() {
        return RerankOutcome {
            hits,
            degraded: None,
        };
    }

    let scores = match ctx.reranker.as_ref() {
        Some(reranker) => {
            let passages = hits.iter().map(passage_text).collect::<Vec<String>>();
            reranker.score(query, &passages).await
        }
        None => Err(EvalError::RerankUnavailable(
            "no reranker configured".to_string(),
        )),
    };

    let outcome = scores.and_then(|scores| apply_rerank_scores(hits.clone(), &scores));
    match outcome {
        Ok(reranked) => RerankOutcome {
            hits: reranked,
            degraded: None,
        },
        Err(err) => {
            warn!(query = %query, error = %err, "rerank degraded; keeping dispatcher order");
            RerankOutcome {
                hits,
                degraded: Some(err.to_string()),
            }
        }
    }
}

pub(super) fn apply_rerank_scores(hits: Vec<Hit>, scores: &[f64]) -> Result<Vec<Hit>, EvalError> {
    if scores.len() != hits.len() {
        return Err(EvalError::RerankUnavailable(format!(
            "expected {} scores, got {}",
            hits.len(),
            scores.len()
        )));
    }

    let mut reranked = hits
        .into_iter()
        .zip(scores.iter().copied())
        .map(|(mut hit, score)| {
            hit.rerank_score = Some(score);
            hit
        })
        .collect::<Vec<Hit>>();

    // Stable sort: equal scores keep dispatcher order.
    reranked.sort_by(|left, right| {
        let left_score = left.rerank_score.unwrap_or(f64::NEG_INFINITY);
        let right_score = right.rerank_score.unwrap_or(f64::NEG_INFINITY);
        right_score.total_cmp(&left_score)
    });
    for (rank, hit) in reranked.iter_mut().enumerate() {
        hit.rank = rank;
    }

    Ok(reranked)
}

fn passage_text(hit: &Hit) -> String {
    match (hit.title.is_empty(), hit.snippet.is_empty()) {
        (true, _) => hit.snippet.clone(),
        (false, true) => hit.title.clone(),
        (false, false) => format!("{}\n{}", hit.title, hit.snippet),
    }
}
