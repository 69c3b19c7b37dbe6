use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::filters::IndexFilters;
use crate::error::EvalError;
use crate::params::{ParameterSet, SearchConfig};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchRequest {
    pub query: String,
    pub hybrid_alpha: f64,
    pub hybrid_alpha_keyword: f64,
    pub doc_time_decay: f64,
    pub title_content_ratio: f64,
    pub rank_profile: &'static str,
    pub offset: usize,
    pub limit: usize,
    pub filters: IndexFilters,
}

impl SearchRequest {
    pub fn new(query: &str, params: &ParameterSet, filters: IndexFilters) -> Self {
        Self {
            query: query.to_string(),
            hybrid_alpha: params.hybrid_alpha,
            hybrid_alpha_keyword: params.hybrid_alpha_keyword,
            doc_time_decay: params.doc_time_decay,
            title_content_ratio: params.title_content_ratio,
            rank_profile: params.rank_profile.as_str(),
            offset: params.offset,
            limit: params.num_returned_hits,
            filters,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawHit {
    #[serde(alias = "documentid")]
    pub document_id: String,
    #[serde(alias = "relevance")]
    pub score: f64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    hits: Vec<RawHit>,
}

#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn search(&self, request: &SearchRequest) -> Result<Vec<RawHit>, EvalError>;
}

pub struct HttpSearchBackend {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpSearchBackend {
    pub fn new(client: reqwest::Client, config: &SearchConfig) -> Self {
        Self {
            client,
            endpoint: config.endpoint.trim().to_string(),
            timeout: Duration::from_millis(config.timeout_ms.max(1)),
        }
    }
}

#[async_trait]
impl SearchBackend for HttpSearchBackend {
    async fn search(&self, request: &SearchRequest) -> Result<Vec<RawHit>, EvalError> {
        let response = self
            .client
            .post(&self.endpoint)
            .timeout(self.timeout)
            .json(request)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!(
                "search backend returned {status}: {}",
                truncate(&body, 200)
            );
            return Err(if is_transient_status(status) {
                EvalError::transient(message)
            } else {
                EvalError::permanent(message)
            });
        }

        // A body cut off mid-stream is a transport failure; only a complete
        // body that fails to decode is permanent.
        let body = response
            .bytes()
            .await
            .map_err(|err| EvalError::transient(format!("failed to read search response: {err}")))?;
        let payload = serde_json::from_slice::<SearchResponse>(&body)
            .map_err(|err| EvalError::permanent(format!("invalid search response: {err}")))?;
        Ok(payload.hits)
    }
}

fn classify_transport_error(err: reqwest::Error) -> EvalError {
    if err.is_timeout() || err.is_connect() || err.is_body() {
        EvalError::transient(format!("search request failed: {err}"))
    } else {
        EvalError::permanent(format!("search request failed: {err}"))
    }
}

fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

fn truncate(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    let mut out = value.chars().take(max_chars).collect::<String>();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;
    use crate::search::build_index_filters;

    fn search_config(endpoint: String) -> SearchConfig {
        SearchConfig {
            endpoint,
            timeout_ms: 2_000,
            include_hidden: false,
            source_types: Vec::new(),
            document_sets: Vec::new(),
            tags: Vec::new(),
            time_cutoff: None,
        }
    }

    fn request(config: &SearchConfig) -> SearchRequest {
        let params = ParameterSet::default();
        SearchRequest::new("refund policy", &params, build_index_filters(&params, config))
    }

    #[test]
    fn request_carries_weights_and_pagination() {
        let config = search_config("http://localhost/search".to_string());
        let request = request(&config);
        let json = serde_json::to_value(&request).expect("serialize request");
        assert_eq!(json["query"], "refund policy");
        assert_eq!(json["hybrid_alpha"], 0.5);
        assert_eq!(json["hybrid_alpha_keyword"], 0.4);
        assert_eq!(json["rank_profile"], "semantic");
        assert_eq!(json["offset"], 0);
        assert_eq!(json["limit"], 50);
        assert_eq!(json["filters"]["access_control_list"][0], "PUBLIC");
        assert!(json["filters"].get("tags").is_none());
        assert!(json["filters"].get("time_cutoff").is_none());
    }

    #[tokio::test]
    async fn http_backend_decodes_hits() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/search")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "query": "refund policy",
                "limit": 50
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"hits": [
                    {"document_id": "doc7", "score": 0.9, "title": "Returns"},
                    {"document_id": "doc42", "score": 0.8, "content": "Refunds are issued"}
                ]}"#,
            )
            .create_async()
            .await;

        let config = search_config(format!("{}/search", server.url()));
        let backend = HttpSearchBackend::new(reqwest::Client::new(), &config);
        let hits = backend.search(&request(&config)).await.expect("search should succeed");

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].document_id, "doc7");
        assert_eq!(hits[0].title.as_deref(), Some("Returns"));
        assert_eq!(hits[1].content.as_deref(), Some("Refunds are issued"));
    }

    #[tokio::test]
    async fn server_errors_are_transient_and_client_errors_are_not() {
        let mut server = mockito::Server::new_async().await;
        let _unavailable = server
            .mock("POST", "/unavailable")
            .with_status(503)
            .with_body("overloaded")
            .create_async()
            .await;
        let _bad_request = server
            .mock("POST", "/bad")
            .with_status(400)
            .with_body("bad yql")
            .create_async()
            .await;

        let client = reqwest::Client::new();
        let unavailable = search_config(format!("{}/unavailable", server.url()));
        let error = HttpSearchBackend::new(client.clone(), &unavailable)
            .search(&request(&unavailable))
            .await
            .expect_err("503 should fail");
        assert!(error.is_transient());

        let bad = search_config(format!("{}/bad", server.url()));
        let error = HttpSearchBackend::new(client, &bad)
            .search(&request(&bad))
            .await
            .expect_err("400 should fail");
        assert!(!error.is_transient());
        assert!(error.to_string().contains("bad yql"));
    }

    #[tokio::test]
    async fn refused_connection_is_transient() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("local addr");
        drop(listener);

        let config = search_config(format!("http://{addr}/search"));
        let error = HttpSearchBackend::new(reqwest::Client::new(), &config)
            .search(&request(&config))
            .await
            .expect_err("closed port should fail");
        assert!(error.is_transient());
    }

    #[tokio::test]
    async fn unbuildable_request_is_permanent() {
        let config = search_config("not a url".to_string());
        let error = HttpSearchBackend::new(reqwest::Client::new(), &config)
            .search(&request(&config))
            .await
            .expect_err("invalid endpoint should fail");
        assert!(!error.is_transient());
    }

    #[tokio::test]
    async fn body_cut_off_mid_stream_is_transient() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            read_full_request(&mut socket).await;
            socket
                .write_all(
                    b"HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 400\r\n\r\n{\"hits\": [{\"document_id\": \"doc",
                )
                .await
                .expect("write partial response");
            socket.shutdown().await.expect("shutdown");
        });

        let config = search_config(format!("http://{addr}/search"));
        let error = HttpSearchBackend::new(reqwest::Client::new(), &config)
            .search(&request(&config))
            .await
            .expect_err("truncated body should fail");
        assert!(error.is_transient(), "unexpected error: {error}");
        server.await.expect("server task");
    }

    async fn read_full_request(socket: &mut tokio::net::TcpStream) {
        let mut buf = Vec::new();
        let mut chunk = [0_u8; 4096];
        loop {
            let count = socket.read(&mut chunk).await.expect("read request");
            if count == 0 {
                return;
            }
            buf.extend_from_slice(&chunk[..count]);
            let Some(header_end) = buf.windows(4).position(|window| window == b"\r\n\r\n") else {
                continue;
            };
            let headers = String::from_utf8_lossy(&buf[..header_end]).to_ascii_lowercase();
            let body_len = headers
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|value| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= header_end + 4 + body_len {
                return;
            }
        }
    }

    #[tokio::test]
    async fn malformed_body_is_a_permanent_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/search")
            .with_status(200)
            .with_body("not json")
            .create_async()
            .await;

        let config = search_config(format!("{}/search", server.url()));
        let error = HttpSearchBackend::new(reqwest::Client::new(), &config)
            .search(&request(&config))
            .await
            .expect_err("invalid body should fail");
        assert!(matches!(error, EvalError::Retrieval { transient: false, .. }));
    }
}
