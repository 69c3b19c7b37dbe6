use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::EvalError;
use crate::params::RerankerConfig;

/// Secondary relevance model: one score per passage, same order as the input.
#[async_trait]
pub trait Reranker: Send + Sync {
    async fn score(&self, query: &str, passages: &[String]) -> Result<Vec<f64>, EvalError>;
}

#[derive(Debug, Serialize)]
struct RerankRequest<'a> {
    query: &'a str,
    passages: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct RerankResponse {
    scores: Vec<f64>,
}

pub struct HttpReranker {
    client: reqwest::Client,
    endpoint: String,
    model: Option<String>,
    timeout: Duration,
}

impl HttpReranker {
    pub fn new(client: reqwest::Client, config: &RerankerConfig) -> Self {
        Self {
            client,
            endpoint: config.endpoint.trim().to_string(),
            model: config.model.clone(),
            timeout: Duration::from_millis(config.timeout_ms.max(1)),
        }
    }
}

#[async_trait]
impl Reranker for HttpReranker {
    async fn score(&self, query: &str, passages: &[String]) -> Result<Vec<f64>, EvalError> {
        let request = RerankRequest {
            query,
            passages,
            model: self.model.as_deref(),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|err| EvalError::RerankUnavailable(format!("request failed: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(EvalError::RerankUnavailable(format!(
                "reranker returned {status}"
            )));
        }

        let payload = response
            .json::<RerankResponse>()
            .await
            .map_err(|err| EvalError::RerankUnavailable(format!("invalid response: {err}")))?;
        Ok(payload.scores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(endpoint: String) -> RerankerConfig {
        RerankerConfig {
            endpoint,
            model: Some("mixedbread-ai/mxbai-rerank-xsmall-v1".to_string()),
            timeout_ms: 2_000,
        }
    }

    #[tokio::test]
    async fn http_reranker_posts_passages_and_reads_scores() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/rerank")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "query": "refund policy",
                "passages": ["Returns", "Refunds"],
                "model": "mixedbread-ai/mxbai-rerank-xsmall-v1"
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"scores": [0.1, 0.9]}"#)
            .create_async()
            .await;

        let reranker = HttpReranker::new(reqwest::Client::new(), &config(format!(
            "{}/rerank",
            server.url()
        )));
        let passages = vec!["Returns".to_string(), "Refunds".to_string()];
        let scores = reranker
            .score("refund policy", &passages)
            .await
            .expect("rerank should succeed");
        assert_eq!(scores, vec![0.1, 0.9]);
    }

    #[tokio::test]
    async fn unreachable_reranker_is_reported_as_unavailable() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/rerank")
            .with_status(502)
            .create_async()
            .await;

        let reranker = HttpReranker::new(reqwest::Client::new(), &config(format!(
            "{}/rerank",
            server.url()
        )));
        let error = reranker
            .score("refund policy", &["Returns".to_string()])
            .await
            .expect_err("502 should fail");
        assert!(matches!(error, EvalError::RerankUnavailable(_)));
    }
}
