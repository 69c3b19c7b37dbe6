mod backend;
mod filters;
mod reranker;

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::params::EvalConfig;

pub use backend::{HttpSearchBackend, RawHit, SearchBackend, SearchRequest};
pub use filters::{IndexFilters, build_index_filters};
pub use reranker::{HttpReranker, Reranker};

/// Builds the HTTP client shared by the backend and reranker for one run.
pub fn build_http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("search-eval/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build http client")
}

pub fn http_clients(
    config: &EvalConfig,
    client: &reqwest::Client,
) -> (Arc<dyn SearchBackend>, Option<Arc<dyn Reranker>>) {
    let backend: Arc<dyn SearchBackend> =
        Arc::new(HttpSearchBackend::new(client.clone(), &config.search));
    let reranker = config.reranker.as_ref().map(|reranker| {
        Arc::new(HttpReranker::new(client.clone(), reranker)) as Arc<dyn Reranker>
    });
    (backend, reranker)
}
