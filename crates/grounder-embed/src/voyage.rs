//! Voyage AI client: dense, contextualized and rerank endpoints.

use std::fmt;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::EmbedError;
use crate::provider::{
    BoxFuture, ContextualEmbedder, DenseEmbedder, InputType, RerankHit, Reranker,
};
use crate::retry::{RetryPolicy, with_retry};

pub const DEFAULT_BASE_URL: &str = "https://api.voyageai.com/v1";

const PROVIDER: &str = "voyage";

/// One Voyage model endpoint. A separate instance is built per model
/// (docs, code, rerank) so each carries its own settings.
#[derive(Clone)]
pub struct VoyageClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    output_dimension: Option<u32>,
    output_dtype: String,
    retry: RetryPolicy,
}

impl fmt::Debug for VoyageClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VoyageClient")
            .field("client", &"<reqwest::Client>")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("output_dimension", &self.output_dimension)
            .field("output_dtype", &self.output_dtype)
            .field("retry", &self.retry)
            .finish()
    }
}

impl VoyageClient {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        api_key: String,
        mut base_url: String,
        model: String,
        timeout: Duration,
    ) -> Result<Self, EmbedError> {
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Ok(Self {
            client: crate::http::build_client(timeout)?,
            api_key,
            base_url,
            model,
            output_dimension: None,
            output_dtype: "float".into(),
            retry: RetryPolicy::default(),
        })
    }

    #[must_use]
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    #[must_use]
    pub fn with_output_dimension(mut self, dimension: u32) -> Self {
        self.output_dimension = Some(dimension);
        self
    }

    #[must_use]
    pub fn with_output_dtype(mut self, dtype: impl Into<String>) -> Self {
        self.output_dtype = dtype.into();
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    async fn post_json<B, R>(&self, endpoint: &str, body: &B) -> Result<R, EmbedError>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let url = format!("{}/{endpoint}", self.base_url);
        let url = url.as_str();
        let client = &self.client;
        let api_key = self.api_key.as_str();

        with_retry(&self.retry, endpoint, move || async move {
            let response = client.post(url).bearer_auth(api_key).json(body).send().await?;
            let response = crate::http::check_status(PROVIDER, response).await?;
            let text = response.text().await?;
            Ok(serde_json::from_str::<R>(&text)?)
        })
        .await
    }

    async fn embed_flat(
        &self,
        texts: Vec<String>,
        input_type: InputType,
    ) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let expected = texts.len();
        let body = EmbeddingRequest {
            input: &texts,
            model: &self.model,
            input_type: input_type.as_str(),
            output_dimension: self.output_dimension,
            output_dtype: &self.output_dtype,
        };
        let resp: EmbeddingResponse = self.post_json("embeddings", &body).await?;
        if let Some(usage) = resp.usage {
            tracing::debug!(model = %self.model, total_tokens = usage.total_tokens, "voyage embeddings");
        }
        ordered_embeddings(resp.data, expected)
    }

    async fn embed_contextual(
        &self,
        documents: Vec<Vec<String>>,
        input_type: InputType,
    ) -> Result<Vec<Vec<Vec<f32>>>, EmbedError> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }
        let body = ContextualizedRequest {
            inputs: &documents,
            model: &self.model,
            input_type: input_type.as_str(),
            output_dimension: self.output_dimension,
            output_dtype: &self.output_dtype,
        };
        let resp: ContextualizedResponse =
            self.post_json("contextualizedembeddings", &body).await?;
        if let Some(usage) = resp.usage {
            tracing::debug!(model = %self.model, total_tokens = usage.total_tokens, "voyage contextualized embeddings");
        }

        let mut per_doc = resp.data;
        if per_doc.len() != documents.len() {
            return Err(EmbedError::Shape {
                expected: documents.len(),
                got: per_doc.len(),
            });
        }
        per_doc.sort_by_key(|d| d.index);
        per_doc
            .into_iter()
            .zip(&documents)
            .map(|(doc, chunks)| ordered_embeddings(doc.data, chunks.len()))
            .collect()
    }

    async fn rerank_documents(
        &self,
        query: String,
        documents: Vec<String>,
        top_k: usize,
    ) -> Result<Vec<RerankHit>, EmbedError> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }
        let body = RerankRequest {
            query: &query,
            documents: &documents,
            model: &self.model,
            top_k: top_k.min(documents.len()),
            truncation: true,
        };
        let resp: RerankResponse = self.post_json("rerank", &body).await?;
        let mut hits: Vec<RerankHit> = resp
            .data
            .into_iter()
            .filter(|r| r.index < documents.len())
            .map(|r| RerankHit {
                index: r.index,
                relevance_score: r.relevance_score,
            })
            .collect();
        hits.sort_by(|a, b| {
            b.relevance_score
                .total_cmp(&a.relevance_score)
                .then(a.index.cmp(&b.index))
        });
        hits.truncate(top_k);
        Ok(hits)
    }
}

fn ordered_embeddings(
    mut data: Vec<EmbeddingData>,
    expected: usize,
) -> Result<Vec<Vec<f32>>, EmbedError> {
    if data.is_empty() && expected > 0 {
        return Err(EmbedError::EmptyResponse { provider: PROVIDER });
    }
    if data.len() != expected {
        return Err(EmbedError::Shape {
            expected,
            got: data.len(),
        });
    }
    data.sort_by_key(|d| d.index);
    Ok(data.into_iter().map(|d| d.embedding).collect())
}

impl DenseEmbedder for VoyageClient {
    fn embed(
        &self,
        texts: Vec<String>,
        input_type: InputType,
    ) -> BoxFuture<'_, Result<Vec<Vec<f32>>, EmbedError>> {
        Box::pin(self.embed_flat(texts, input_type))
    }

    fn name(&self) -> &'static str {
        PROVIDER
    }
}

impl ContextualEmbedder for VoyageClient {
    fn embed_documents(
        &self,
        documents: Vec<Vec<String>>,
        input_type: InputType,
    ) -> BoxFuture<'_, Result<Vec<Vec<Vec<f32>>>, EmbedError>> {
        Box::pin(self.embed_contextual(documents, input_type))
    }

    fn name(&self) -> &'static str {
        PROVIDER
    }
}

impl Reranker for VoyageClient {
    fn rerank(
        &self,
        query: String,
        documents: Vec<String>,
        top_k: usize,
    ) -> BoxFuture<'_, Result<Vec<RerankHit>, EmbedError>> {
        Box::pin(self.rerank_documents(query, documents, top_k))
    }

    fn name(&self) -> &'static str {
        PROVIDER
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a [String],
    model: &'a str,
    input_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_dimension: Option<u32>,
    output_dtype: &'a str,
}

#[derive(Serialize)]
struct ContextualizedRequest<'a> {
    inputs: &'a [Vec<String>],
    model: &'a str,
    input_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_dimension: Option<u32>,
    output_dtype: &'a str,
}

#[derive(Serialize)]
struct RerankRequest<'a> {
    query: &'a str,
    documents: &'a [String],
    model: &'a str,
    top_k: usize,
    truncation: bool,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[derive(Deserialize)]
struct ContextualizedResponse {
    data: Vec<ContextualizedDocument>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ContextualizedDocument {
    data: Vec<EmbeddingData>,
    index: usize,
}

#[derive(Deserialize)]
struct RerankResponse {
    data: Vec<RerankData>,
}

#[derive(Deserialize)]
struct RerankData {
    relevance_score: f32,
    index: usize,
}

#[derive(Deserialize)]
struct Usage {
    total_tokens: u64,
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn client(server: &MockServer, model: &str) -> VoyageClient {
        VoyageClient::new(
            "test-key".into(),
            format!("{}/", server.uri()),
            model.into(),
            Duration::from_secs(5),
        )
        .unwrap()
        .with_output_dimension(4)
        .with_retry(RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        })
    }

    #[test]
    fn debug_redacts_api_key() {
        let c = VoyageClient::new(
            "secret".into(),
            DEFAULT_BASE_URL.into(),
            "voyage-code-3".into(),
            Duration::from_secs(1),
        )
        .unwrap();
        let dbg = format!("{c:?}");
        assert!(!dbg.contains("secret"));
        assert!(dbg.contains("<redacted>"));
    }

    #[test]
    fn embedding_request_serialization() {
        let input = vec!["fn main() {}".to_string()];
        let body = EmbeddingRequest {
            input: &input,
            model: "voyage-code-3",
            input_type: "document",
            output_dimension: Some(1024),
            output_dtype: "float",
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model"], "voyage-code-3");
        assert_eq!(json["input_type"], "document");
        assert_eq!(json["output_dimension"], 1024);
    }

    #[tokio::test]
    async fn embed_orders_by_index() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_partial_json(serde_json::json!({"input_type": "query"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    {"embedding": [0.0, 1.0, 0.0, 0.0], "index": 1},
                    {"embedding": [1.0, 0.0, 0.0, 0.0], "index": 0}
                ],
                "usage": {"total_tokens": 7}
            })))
            .mount(&server)
            .await;

        let vectors = client(&server, "voyage-code-3")
            .embed(vec!["a".into(), "b".into()], InputType::Query)
            .await
            .unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0, 0.0, 0.0], vec![0.0, 1.0, 0.0, 0.0]]);
    }

    #[tokio::test]
    async fn embed_retries_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"embedding": [0.5, 0.5, 0.5, 0.5], "index": 0}]
            })))
            .mount(&server)
            .await;

        let vectors = client(&server, "voyage-code-3")
            .embed(vec!["x".into()], InputType::Document)
            .await
            .unwrap();
        assert_eq!(vectors.len(), 1);
    }

    #[tokio::test]
    async fn embed_bad_request_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad"))
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server, "voyage-code-3")
            .embed(vec!["x".into()], InputType::Document)
            .await
            .unwrap_err();
        assert!(matches!(err, EmbedError::Status { status: 400, .. }));
    }

    #[tokio::test]
    async fn embed_shape_mismatch_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"embedding": [0.5, 0.5, 0.5, 0.5], "index": 0}]
            })))
            .mount(&server)
            .await;

        let err = client(&server, "voyage-code-3")
            .embed(vec!["x".into(), "y".into()], InputType::Document)
            .await
            .unwrap_err();
        assert!(matches!(err, EmbedError::Shape { expected: 2, got: 1 }));
    }

    #[tokio::test]
    async fn contextualized_embeddings_per_document() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/contextualizedembeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    {"index": 1, "data": [{"embedding": [3.0], "index": 0}]},
                    {"index": 0, "data": [
                        {"embedding": [2.0], "index": 1},
                        {"embedding": [1.0], "index": 0}
                    ]}
                ]
            })))
            .mount(&server)
            .await;

        let out = client(&server, "voyage-context-3")
            .embed_documents(
                vec![vec!["a".into(), "b".into()], vec!["c".into()]],
                InputType::Document,
            )
            .await
            .unwrap();
        assert_eq!(out, vec![vec![vec![1.0], vec![2.0]], vec![vec![3.0]]]);
    }

    #[tokio::test]
    async fn rerank_sorted_by_relevance() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rerank"))
            .and(body_partial_json(serde_json::json!({"truncation": true, "top_k": 2})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    {"relevance_score": 0.2, "index": 0},
                    {"relevance_score": 0.9, "index": 2}
                ]
            })))
            .mount(&server)
            .await;

        let hits = client(&server, "rerank-2.5")
            .rerank("q".into(), vec!["a".into(), "b".into(), "c".into()], 2)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].index, 2);
        assert_eq!(hits[1].index, 0);
    }

    #[tokio::test]
    async fn rate_limit_exhausts_to_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rerank"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0"))
            .mount(&server)
            .await;

        let err = client(&server, "rerank-2.5")
            .rerank("q".into(), vec!["a".into()], 1)
            .await
            .unwrap_err();
        assert!(matches!(err, EmbedError::RateLimited { .. }));
    }
}
