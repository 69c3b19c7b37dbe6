mod dispatch;
mod export;
mod rerank;
mod run;
mod scoring;

use std::sync::Arc;

use crate::params::{EvalConfig, ParameterSet, RunConfig};
use crate::search::{IndexFilters, Reranker, SearchBackend, build_index_filters};

pub(crate) use dispatch::dispatch_query;
pub(crate) use rerank::rerank_hits;
pub(crate) use run::run;

/// Everything a per-query pipeline needs, passed explicitly and cloned
/// cheaply into each concurrent task.
#[derive(Clone)]
pub(crate) struct EvalContext {
    pub params: Arc<ParameterSet>,
    pub filters: IndexFilters,
    pub run: RunConfig,
    pub backend: Arc<dyn SearchBackend>,
    pub reranker: Option<Arc<dyn Reranker>>,
}

impl EvalContext {
    pub(crate) fn new(
        config: &EvalConfig,
        backend: Arc<dyn SearchBackend>,
        reranker: Option<Arc<dyn Reranker>>,
    ) -> Self {
        Self {
            params: Arc::new(config.params.clone()),
            filters: build_index_filters(&config.params, &config.search),
            run: config.run.clone(),
            backend,
            reranker,
        }
    }
}
