use std::collections::HashMap;
use std::time::Duration;

use tracing::warn;

use super::EvalContext;
use crate::error::EvalError;
use crate::model::Hit;
use crate::search::{RawHit, SearchRequest};

const MAX_SNIPPET_CHARS: usize = 512;
const MAX_BACKOFF_EXPONENT: u32 = 10;

pub(crate) struct DispatchOutcome {
    pub result: Result<Vec<Hit>, EvalError>,
    pub attempts: u32,
}

/// Runs one hybrid query, retrying transient backend failures with backoff.
pub(crate) async fn dispatch_query(ctx: &EvalContext, query: &str) -> DispatchOutcome {
    let request = SearchRequest::new(query, &ctx.params, ctx.filters.clone());
    let limit = ctx.params.num_returned_hits;

    let mut attempts = 0_u32;
    loop {
        attempts += 1;
        match ctx.backend.search(&request).await {
            Ok(raw_hits) => {
                return DispatchOutcome {
                    result: Ok(rank_hits(raw_hits, limit)),
                    attempts,
                };
            }
            Err(err) if err.is_transient() && attempts <= ctx.run.max_retries => {
                let delay = backoff_delay(ctx.run.retry_backoff_ms, attempts);
                warn!(
                    query = %query,
                    attempt = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient retrieval failure; retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                return DispatchOutcome {
                    result: Err(err),
                    attempts,
                };
            }
        }
    }
}

pub(super) fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
    Duration::from_millis(base_ms.saturating_mul(1_u64 << exponent))
}

/// Collapses chunk-level hits to one per document and orders them
/// best-first, ties by document id.
pub(super) fn rank_hits(raw_hits: Vec<RawHit>, limit: usize) -> Vec<Hit> {
    let mut dedup = HashMap::<String, RawHit>::new();
    for mut raw in raw_hits {
        raw.document_id = raw.document_id.trim().to_string();
        if raw.document_id.is_empty() {
            continue;
        }
        upsert_hit(&mut dedup, raw);
    }

    let mut ordered = dedup.into_values().collect::<Vec<RawHit>>();
    ordered.sort_by(|left, right| {
        right
            .score
            .total_cmp(&left.score)
            .then(left.document_id.cmp(&right.document_id))
    });
    ordered.truncate(limit);

    ordered
        .into_iter()
        .enumerate()
        .map(|(rank, raw)| Hit {
            document_id: raw.document_id,
            score: raw.score,
            rank,
            title: raw.title.unwrap_or_default().trim().to_string(),
            snippet: snippet(raw.content.as_deref().unwrap_or_default()),
            rerank_score: None,
        })
        .collect()
}

fn upsert_hit(dedup: &mut HashMap<String, RawHit>, candidate: RawHit) {
    let Some(existing) = dedup.get_mut(&candidate.document_id) else {
        dedup.insert(candidate.document_id.clone(), candidate);
        return;
    };

    if candidate.score > existing.score {
        let title = existing.title.take();
        *existing = candidate;
        existing.title = existing.title.take().or(title);
    } else if existing.title.is_none() {
        existing.title = candidate.title;
    }
}

fn snippet(content: &str) -> String {
    let normalized = content.split_whitespace().collect::<Vec<&str>>().join(" ");
    if normalized.chars().count() <= MAX_SNIPPET_CHARS {
        return normalized;
    }
    normalized.chars().take(MAX_SNIPPET_CHARS).collect()
}
