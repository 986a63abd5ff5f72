//! Sparse lexical encoders.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::EmbedError;
use crate::provider::{BoxFuture, InputType, SparseEncoder, SparseVector};
use crate::retry::{RetryPolicy, with_retry};

const TEI_PROVIDER: &str = "tei";

/// Client for a text-embeddings-inference server running a SPLADE-style model.
#[derive(Clone)]
pub struct TeiSparseClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    retry: RetryPolicy,
}

impl fmt::Debug for TeiSparseClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TeiSparseClient")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl TeiSparseClient {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(mut base_url: String, timeout: Duration) -> Result<Self, EmbedError> {
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Ok(Self {
            client: crate::http::build_client(timeout)?,
            base_url,
            api_key: None,
            retry: RetryPolicy::default(),
        })
    }

    #[must_use]
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn encode_batch(&self, texts: Vec<String>) -> Result<Vec<SparseVector>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/embed_sparse", self.base_url);
        let url = url.as_str();
        let client = &self.client;
        let api_key = self.api_key.as_deref();
        let body = TeiSparseRequest {
            inputs: &texts,
            truncate: true,
        };
        let body = &body;

        let resp: Vec<Vec<TeiSparseValue>> = with_retry(&self.retry, "embed_sparse", move || async move {
            let mut req = client.post(url).json(body);
            if let Some(key) = api_key {
                req = req.bearer_auth(key);
            }
            let response = crate::http::check_status(TEI_PROVIDER, req.send().await?).await?;
            let text = response.text().await?;
            Ok::<_, EmbedError>(serde_json::from_str(&text)?)
        })
        .await?;

        if resp.len() != texts.len() {
            return Err(EmbedError::Shape {
                expected: texts.len(),
                got: resp.len(),
            });
        }
        Ok(resp.into_iter().map(normalize_sparse).collect())
    }
}

/// Merge duplicate indices and sort ascending, dropping non-positive weights.
fn normalize_sparse(values: Vec<TeiSparseValue>) -> SparseVector {
    let mut merged: BTreeMap<u32, f32> = BTreeMap::new();
    for v in values {
        if v.value > 0.0 {
            *merged.entry(v.index).or_default() += v.value;
        }
    }
    let (indices, values) = merged.into_iter().unzip();
    SparseVector { indices, values }
}

impl SparseEncoder for TeiSparseClient {
    fn encode(
        &self,
        texts: Vec<String>,
        _input_type: InputType,
    ) -> BoxFuture<'_, Result<Vec<SparseVector>, EmbedError>> {
        Box::pin(self.encode_batch(texts))
    }

    fn name(&self) -> &'static str {
        TEI_PROVIDER
    }
}

#[derive(Serialize)]
struct TeiSparseRequest<'a> {
    inputs: &'a [String],
    truncate: bool,
}

#[derive(Deserialize)]
struct TeiSparseValue {
    index: u32,
    value: f32,
}

/// Local sparse encoder: hashed term frequencies with `1 + ln(tf)` weights.
///
/// Deterministic across runs and machines, so query and document vectors
/// built by separate processes land in the same index space.
#[derive(Debug, Clone, Copy)]
pub struct HashingSparseEncoder {
    bits: u32,
}

impl Default for HashingSparseEncoder {
    fn default() -> Self {
        Self { bits: 20 }
    }
}

impl HashingSparseEncoder {
    /// `bits` sets the index space to `2^bits`; clamped to `8..=31`.
    #[must_use]
    pub fn new(bits: u32) -> Self {
        Self {
            bits: bits.clamp(8, 31),
        }
    }

    fn bucket(&self, token: &str) -> u32 {
        let hash = blake3::hash(token.as_bytes());
        let bytes = hash.as_bytes();
        let raw = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        raw & ((1u32 << self.bits) - 1)
    }

    #[must_use]
    pub fn encode_one(&self, text: &str) -> SparseVector {
        let mut tf: BTreeMap<u32, u32> = BTreeMap::new();
        for token in tokens(text) {
            *tf.entry(self.bucket(&token)).or_default() += 1;
        }
        #[allow(clippy::cast_precision_loss)]
        let (indices, values) = tf
            .into_iter()
            .map(|(idx, count)| (idx, 1.0 + (count as f32).ln()))
            .unzip();
        SparseVector { indices, values }
    }
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

impl SparseEncoder for HashingSparseEncoder {
    fn encode(
        &self,
        texts: Vec<String>,
        _input_type: InputType,
    ) -> BoxFuture<'_, Result<Vec<SparseVector>, EmbedError>> {
        let out = texts.iter().map(|t| self.encode_one(t)).collect();
        Box::pin(async move { Ok(out) })
    }

    fn name(&self) -> &'static str {
        "hashing"
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[test]
    fn hashing_is_deterministic_and_sorted() {
        let enc = HashingSparseEncoder::default();
        let a = enc.encode_one("Runner run_async runner SessionService");
        let b = enc.encode_one("runner SessionService run_async Runner");
        assert_eq!(a, b);
        assert!(a.indices.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn repeated_terms_get_log_weight() {
        let enc = HashingSparseEncoder::default();
        let v = enc.encode_one("agent agent agent");
        assert_eq!(v.indices.len(), 1);
        assert!((v.values[0] - (1.0 + 3f32.ln())).abs() < 1e-6);
    }

    #[test]
    fn shared_terms_score_higher() {
        let enc = HashingSparseEncoder::default();
        let q = enc.encode_one("tool callback");
        let hit = enc.encode_one("before tool callback hook");
        let miss = enc.encode_one("session state storage");
        assert!(q.dot(&hit) > q.dot(&miss));
    }

    #[test]
    fn empty_text_is_empty_vector() {
        assert!(HashingSparseEncoder::default().encode_one("  ,, ").is_empty());
    }

    #[test]
    fn bits_are_clamped() {
        let enc = HashingSparseEncoder::new(2);
        let v = enc.encode_one("a b c d e f g h");
        assert!(v.indices.iter().all(|&i| i < 256));
    }

    #[tokio::test]
    async fn tei_parses_and_sorts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embed_sparse"))
            .and(body_partial_json(serde_json::json!({"truncate": true})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                [{"index": 9, "value": 0.5}, {"index": 2, "value": 1.5}, {"index": 4, "value": 0.0}],
                []
            ])))
            .mount(&server)
            .await;

        let client = TeiSparseClient::new(server.uri(), Duration::from_secs(5)).unwrap();
        let out = client
            .encode(vec!["a".into(), "b".into()], InputType::Document)
            .await
            .unwrap();
        assert_eq!(out[0].indices, vec![2, 9]);
        assert_eq!(out[0].values, vec![1.5, 0.5]);
        assert!(out[1].is_empty());
    }

    #[tokio::test]
    async fn tei_count_mismatch_is_shape_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embed_sparse"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([[]])))
            .mount(&server)
            .await;

        let client = TeiSparseClient::new(server.uri(), Duration::from_secs(5)).unwrap();
        let err = client
            .encode(vec!["a".into(), "b".into()], InputType::Query)
            .await
            .unwrap_err();
        assert!(matches!(err, EmbedError::Shape { expected: 2, got: 1 }));
    }

    #[tokio::test]
    async fn tei_retries_unavailable_server() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embed_sparse"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/embed_sparse"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!([[{"index": 3, "value": 1.0}]])),
            )
            .mount(&server)
            .await;

        let client = TeiSparseClient::new(server.uri(), Duration::from_secs(5))
            .unwrap()
            .with_retry(RetryPolicy {
                max_attempts: 2,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
            });
        let out = client
            .encode(vec!["a".into()], InputType::Query)
            .await
            .unwrap();
        assert_eq!(out[0].indices, vec![3]);
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }
}
