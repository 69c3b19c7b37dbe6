use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Utc};
use regex::Regex;
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::cli::ConfigOverrides;
use crate::error::EvalError;

pub const DEFAULT_HYBRID_ALPHA: f64 = 0.5;
pub const DEFAULT_HYBRID_ALPHA_KEYWORD: f64 = 0.4;
pub const DEFAULT_DOC_TIME_DECAY: f64 = 0.5;
pub const DEFAULT_NUM_RETURNED_HITS: usize = 50;
pub const DEFAULT_TITLE_CONTENT_RATIO: f64 = 0.1;
pub const DEFAULT_EVAL_TOPK: usize = 5;
pub const DEFAULT_EXPORT_FOLDER: &str = "eval-%Y-%m-%d-%H-%M-%S";
pub const DEFAULT_EXPORT_ROOT: &str = "eval-output";

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RankProfile {
    #[default]
    Semantic,
    Keyword,
    Admin,
}

impl RankProfile {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Semantic => "semantic",
            Self::Keyword => "keyword",
            Self::Admin => "admin",
        }
    }
}

/// Retrieval and scoring knobs for one evaluation run.
///
/// Built once from the config file, validated, then shared behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ParameterSet {
    #[serde(alias = "HYBRID_ALPHA")]
    pub hybrid_alpha: f64,
    #[serde(alias = "HYBRID_ALPHA_KEYWORD")]
    pub hybrid_alpha_keyword: f64,
    #[serde(alias = "DOC_TIME_DECAY")]
    pub doc_time_decay: f64,
    #[serde(alias = "NUM_RETURNED_HITS")]
    pub num_returned_hits: usize,
    #[serde(alias = "RANK_PROFILE")]
    pub rank_profile: RankProfile,
    #[serde(alias = "OFFSET")]
    pub offset: usize,
    #[serde(alias = "TITLE_CONTENT_RATIO")]
    pub title_content_ratio: f64,
    #[serde(alias = "USER_EMAIL")]
    pub user_email: Option<String>,
    #[serde(alias = "SKIP_RERANK")]
    pub skip_rerank: bool,
    #[serde(alias = "EVAL_TOPK")]
    pub eval_topk: usize,
}

impl Default for ParameterSet {
    fn default() -> Self {
        Self {
            hybrid_alpha: DEFAULT_HYBRID_ALPHA,
            hybrid_alpha_keyword: DEFAULT_HYBRID_ALPHA_KEYWORD,
            doc_time_decay: DEFAULT_DOC_TIME_DECAY,
            num_returned_hits: DEFAULT_NUM_RETURNED_HITS,
            rank_profile: RankProfile::Semantic,
            offset: 0,
            title_content_ratio: DEFAULT_TITLE_CONTENT_RATIO,
            user_email: None,
            skip_rerank: false,
            eval_topk: DEFAULT_EVAL_TOPK,
        }
    }
}

impl ParameterSet {
    /// Checks everything that does not depend on the rest of the config.
    pub fn validate(&self) -> Result<(), EvalError> {
        check_ratio("hybrid_alpha", self.hybrid_alpha)?;
        check_ratio("hybrid_alpha_keyword", self.hybrid_alpha_keyword)?;
        check_ratio("title_content_ratio", self.title_content_ratio)?;

        if !self.doc_time_decay.is_finite() || self.doc_time_decay < 0.0 {
            return Err(EvalError::config(format!(
                "doc_time_decay must be a finite value >= 0 (got {})",
                self.doc_time_decay
            )));
        }
        if self.num_returned_hits == 0 {
            return Err(EvalError::config("num_returned_hits must be > 0"));
        }
        if self.eval_topk == 0 {
            return Err(EvalError::config("eval_topk must be > 0"));
        }
        if self.eval_topk > self.num_returned_hits {
            return Err(EvalError::config(format!(
                "eval_topk ({}) must not exceed num_returned_hits ({})",
                self.eval_topk, self.num_returned_hits
            )));
        }

        if let Some(email) = self.user_email.as_deref() {
            let pattern = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$")
                .map_err(|err| EvalError::config(format!("failed to compile email regex: {err}")))?;
            if !pattern.is_match(email.trim()) {
                return Err(EvalError::config(format!(
                    "user_email is not a valid address: {email:?}"
                )));
            }
        }

        Ok(())
    }

    /// Access-control entries the test identity can see.
    pub fn access_control_list(&self) -> Vec<String> {
        let mut acl = vec!["PUBLIC".to_string()];
        if let Some(email) = self.user_email.as_deref() {
            acl.push(format!("user_email:{}", email.trim()));
        }
        acl
    }
}

fn check_ratio(name: &str, value: f64) -> Result<(), EvalError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        return Ok(());
    }
    Err(EvalError::config(format!(
        "{name} must be within [0, 1] (got {value})"
    )))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SearchConfig {
    pub endpoint: String,
    #[serde(default = "default_request_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub include_hidden: bool,
    #[serde(default)]
    pub source_types: Vec<String>,
    #[serde(default)]
    pub document_sets: Vec<String>,
    #[serde(default)]
    pub tags: Vec<TagFilter>,
    /// Only documents updated at or after this instant are searched.
    #[serde(default)]
    pub time_cutoff: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TagFilter {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RerankerConfig {
    pub endpoint: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_request_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    pub concurrency: usize,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    /// Zero disables the run-level timeout.
    pub run_timeout_secs: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            max_retries: 3,
            retry_backoff_ms: 250,
            run_timeout_secs: 1800,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExportConfig {
    pub root: PathBuf,
    #[serde(alias = "EXPORT_FOLDER")]
    pub folder: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(DEFAULT_EXPORT_ROOT),
            folder: DEFAULT_EXPORT_FOLDER.to_string(),
        }
    }
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

/// Unknown keys in any section are rejected so a misspelled option cannot
/// silently fall back to its default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EvalConfig {
    #[serde(default)]
    pub params: ParameterSet,
    pub search: SearchConfig,
    #[serde(default)]
    pub reranker: Option<RerankerConfig>,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub export: ExportConfig,
}

impl EvalConfig {
    pub fn load(path: &Path, overrides: &ConfigOverrides) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {}", path.display()))?;
        let mut config = Self::parse(&raw)
            .with_context(|| format!("failed to parse config: {}", path.display()))?;
        config.apply_overrides(overrides);
        config.validate()?;
        Ok(config)
    }

    pub fn parse(raw: &str) -> Result<Self, EvalError> {
        serde_yaml::from_str::<Self>(raw).map_err(|err| EvalError::config(err.to_string()))
    }

    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(root) = overrides.export_root.as_ref() {
            self.export.root = root.clone();
        }
        if let Some(concurrency) = overrides.concurrency {
            self.run.concurrency = concurrency;
        }
        if let Some(timeout_secs) = overrides.run_timeout_secs {
            self.run.run_timeout_secs = timeout_secs;
        }
        if overrides.skip_rerank {
            self.params.skip_rerank = true;
        }
    }

    pub fn validate(&self) -> Result<(), EvalError> {
        self.params.validate()?;

        match (self.reranker.as_ref(), self.params.skip_rerank) {
            (None, true) => {
                return Err(EvalError::config(
                    "skip_rerank is set but no reranker is configured; it only bypasses a configured rerank stage",
                ));
            }
            (None, false) => {
                return Err(EvalError::config(
                    "rerank stage requires reranker.endpoint to be configured",
                ));
            }
            (Some(reranker), _) => check_endpoint("reranker.endpoint", &reranker.endpoint)?,
        }

        check_endpoint("search.endpoint", &self.search.endpoint)?;

        if self.run.concurrency == 0 {
            return Err(EvalError::config("run.concurrency must be > 0"));
        }

        if self.export.folder.trim().is_empty() {
            return Err(EvalError::config("export.folder must not be empty"));
        }
        if StrftimeItems::new(&self.export.folder).any(|item| matches!(item, Item::Error)) {
            return Err(EvalError::config(format!(
                "export.folder contains an invalid strftime token: {:?}",
                self.export.folder
            )));
        }

        Ok(())
    }
}

fn check_endpoint(name: &str, value: &str) -> Result<(), EvalError> {
    let url = Url::parse(value.trim())
        .map_err(|err| EvalError::config(format!("{name} is not a valid URL ({value:?}): {err}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(EvalError::config(format!(
            "{name} must use http or https (got {})",
            url.scheme()
        )));
    }
    Ok(())
}
