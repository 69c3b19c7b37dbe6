use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::params::ParameterSet;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryCase {
    #[serde(default)]
    pub id: String,
    #[serde(alias = "question")]
    pub query: String,
    #[serde(default, alias = "expected_documents")]
    pub ground_truth: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    pub document_id: String,
    pub score: f64,
    pub rank: usize,
    pub title: String,
    pub snippet: String,
    pub rerank_score: Option<f64>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryStatus {
    Ok,
    Degraded,
    Failed,
}

impl QueryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Degraded => "degraded",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryMetrics {
    /// `None` when the case has no ground truth.
    pub recall_at_k: Option<f64>,
    pub precision_at_k: Option<f64>,
    /// 0-based rank over the full returned list.
    pub first_relevant_rank: Option<usize>,
    pub reciprocal_rank: Option<f64>,
}

impl QueryMetrics {
    pub fn is_defined(&self) -> bool {
        self.recall_at_k.is_some() && self.precision_at_k.is_some()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EvalResult {
    pub case: QueryCase,
    pub status: QueryStatus,
    pub hits: Vec<Hit>,
    pub metrics: Option<QueryMetrics>,
    pub attempts: u32,
    pub error: Option<String>,
    pub evaluated_at: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AggregateMetrics {
    pub total: usize,
    pub evaluated: usize,
    pub failed: usize,
    pub undefined: usize,
    pub degraded: usize,
    pub mean_recall_at_k: Option<f64>,
    pub mean_precision_at_k: Option<f64>,
    pub mean_reciprocal_rank: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub summary_version: u32,
    pub started_at: String,
    pub finished_at: String,
    pub queries_path: String,
    pub queries_sha256: String,
    pub eval_topk: usize,
    pub timed_out: bool,
    pub parameters: ParameterSet,
    pub aggregate: AggregateMetrics,
}

pub fn load_query_cases(path: &Path) -> Result<Vec<QueryCase>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read query cases: {}", path.display()))?;

    let is_yaml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"))
        .unwrap_or(false);

    let cases = if is_yaml {
        serde_yaml::from_str::<Vec<QueryCase>>(&raw)
            .with_context(|| format!("failed to parse query cases: {}", path.display()))?
    } else {
        serde_json::from_str::<Vec<QueryCase>>(&raw)
            .with_context(|| format!("failed to parse query cases: {}", path.display()))?
    };

    normalize_query_cases(cases)
}

pub fn normalize_query_cases(cases: Vec<QueryCase>) -> Result<Vec<QueryCase>> {
    let mut out = Vec::with_capacity(cases.len());
    for (index, mut case) in cases.into_iter().enumerate() {
        case.query = case.query.trim().to_string();
        if case.query.is_empty() {
            bail!("query case {} has empty query text", index + 1);
        }

        case.id = case.id.trim().to_string();
        if case.id.is_empty() {
            case.id = format!("q-{:04}", index + 1);
        }

        case.ground_truth = case
            .ground_truth
            .into_iter()
            .map(|doc_id| doc_id.trim().to_string())
            .filter(|doc_id| !doc_id.is_empty())
            .collect();

        out.push(case);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_cases_get_positional_ids_and_trimmed_ground_truth() {
        let raw = r#"
        [
          {"query": " refund policy ", "ground_truth": ["doc42", " "]},
          {"id": "vacation", "question": "vacation days", "ground_truth": []}
        ]
        "#;
        let cases: Vec<QueryCase> = serde_json::from_str(raw).expect("cases should parse");
        let cases = normalize_query_cases(cases).expect("cases should normalize");

        assert_eq!(cases[0].id, "q-0001");
        assert_eq!(cases[0].query, "refund policy");
        assert_eq!(
            cases[0].ground_truth.iter().cloned().collect::<Vec<_>>(),
            vec!["doc42".to_string()]
        );
        assert_eq!(cases[1].id, "vacation");
        assert!(cases[1].ground_truth.is_empty());
    }

    #[test]
    fn empty_query_text_is_rejected() {
        let cases = vec![QueryCase {
            id: String::new(),
            query: "   ".to_string(),
            ground_truth: BTreeSet::new(),
        }];
        let error = normalize_query_cases(cases).expect_err("blank query should fail");
        assert!(error.to_string().contains("empty query text"));
    }

    #[test]
    fn yaml_query_files_are_detected_by_extension() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cases.yaml");
        fs::write(
            &path,
            "- query: refund policy\n  ground_truth: [doc42]\n- query: onboarding\n",
        )
        .expect("write cases");

        let cases = load_query_cases(&path).expect("yaml cases should load");
        assert_eq!(cases.len(), 2);
        assert!(cases[0].ground_truth.contains("doc42"));
        assert_eq!(cases[1].id, "q-0002");
    }
}
