use std::time::Instant;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tracing::info;

use super::output::{write_json_response, write_text_response};
use crate::cli::{ConfigOverrides, QueryArgs};
use crate::commands::eval::{EvalContext, dispatch_query, rerank_hits};
use crate::model::Hit;
use crate::params::EvalConfig;
use crate::search::{build_http_client, http_clients};

#[derive(Debug, Serialize)]
pub(super) struct RetrievalMetadata {
    pub rank_profile: &'static str,
    pub hybrid_alpha: f64,
    pub hybrid_alpha_keyword: f64,
    pub doc_time_decay: f64,
    pub title_content_ratio: f64,
    pub offset: usize,
    pub num_returned_hits: usize,
    pub access_control_list: Vec<String>,
    pub rerank_requested: bool,
    pub rerank_degraded: Option<String>,
    pub attempts: u32,
    pub query_duration_ms: f64,
}

#[derive(Debug, Serialize)]
pub(super) struct QueryResponse {
    pub query: String,
    pub returned: usize,
    pub retrieval: RetrievalMetadata,
    pub hits: Vec<Hit>,
}

pub fn run(args: QueryArgs) -> Result<()> {
    let query_started = Instant::now();
    let query_text = args.query.trim();
    if query_text.is_empty() {
        bail!("query must not be empty");
    }

    let overrides = ConfigOverrides {
        skip_rerank: args.skip_rerank,
        ..ConfigOverrides::default()
    };
    let config = EvalConfig::load(&args.config, &overrides)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    let (hits, attempts, rerank_degraded) = runtime.block_on(async {
        let client = build_http_client()?;
        let (backend, reranker) = http_clients(&config, &client);
        let ctx = EvalContext::new(&config, backend, reranker);

        let dispatched = dispatch_query(&ctx, query_text).await;
        let hits = dispatched
            .result
            .with_context(|| format!("query failed after {} attempt(s)", dispatched.attempts))?;
        let reranked = rerank_hits(&ctx, query_text, hits).await;
        anyhow::Ok((reranked.hits, dispatched.attempts, reranked.degraded))
    })?;

    let params = &config.params;
    let retrieval = RetrievalMetadata {
        rank_profile: params.rank_profile.as_str(),
        hybrid_alpha: params.hybrid_alpha,
        hybrid_alpha_keyword: params.hybrid_alpha_keyword,
        doc_time_decay: params.doc_time_decay,
        title_content_ratio: params.title_content_ratio,
        offset: params.offset,
        num_returned_hits: params.num_returned_hits,
        access_control_list: params.access_control_list(),
        rerank_requested: !params.skip_rerank,
        rerank_degraded,
        attempts,
        query_duration_ms: query_started.elapsed().as_secs_f64() * 1000.0,
    };

    info!(
        query = %query_text,
        rank_profile = retrieval.rank_profile,
        rerank_requested = retrieval.rerank_requested,
        rerank_degraded = retrieval.rerank_degraded.is_some(),
        attempts,
        query_duration_ms = retrieval.query_duration_ms,
        result_count = hits.len(),
        "query completed"
    );

    let response = QueryResponse {
        query: query_text.to_string(),
        returned: hits.len(),
        retrieval,
        hits,
    };

    if args.json {
        write_json_response(&response)
    } else {
        write_text_response(&response)
    }
}
