//! Provider-neutral embedding and rerank interfaces.

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::error::EmbedError;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Whether inputs are stored content or a search query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    Document,
    Query,
}

impl InputType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Query => "query",
        }
    }
}

/// Sparse lexical vector as parallel index/value arrays, indices ascending.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SparseVector {
    pub indices: Vec<u32>,
    pub values: Vec<f32>,
}

impl SparseVector {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Dot product against another sparse vector; both must be index-sorted.
    #[must_use]
    pub fn dot(&self, other: &Self) -> f32 {
        let (mut i, mut j) = (0, 0);
        let mut sum = 0.0;
        while i < self.indices.len() && j < other.indices.len() {
            match self.indices[i].cmp(&other.indices[j]) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => {
                    sum += self.values[i] * other.values[j];
                    i += 1;
                    j += 1;
                }
            }
        }
        sum
    }
}

/// Stateless per-text dense embedding (code model).
pub trait DenseEmbedder: Send + Sync {
    /// Embed a batch of texts, one vector per input in input order.
    fn embed(
        &self,
        texts: Vec<String>,
        input_type: InputType,
    ) -> BoxFuture<'_, Result<Vec<Vec<f32>>, EmbedError>>;

    fn name(&self) -> &'static str;
}

/// Contextual dense embedding: each document is an ordered list of chunks
/// from one file and the provider sees all of them together.
pub trait ContextualEmbedder: Send + Sync {
    /// Returns, per document, one vector per chunk in chunk order.
    fn embed_documents(
        &self,
        documents: Vec<Vec<String>>,
        input_type: InputType,
    ) -> BoxFuture<'_, Result<Vec<Vec<Vec<f32>>>, EmbedError>>;

    fn name(&self) -> &'static str;
}

/// Sparse lexical encoder.
pub trait SparseEncoder: Send + Sync {
    fn encode(
        &self,
        texts: Vec<String>,
        input_type: InputType,
    ) -> BoxFuture<'_, Result<Vec<SparseVector>, EmbedError>>;

    fn name(&self) -> &'static str;
}

/// One reranked document: position in the submitted list and its relevance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RerankHit {
    pub index: usize,
    pub relevance_score: f32,
}

/// Cross-encoder reranker.
pub trait Reranker: Send + Sync {
    /// Score `documents` against `query`, returning at most `top_k` hits
    /// ordered by descending relevance.
    fn rerank(
        &self,
        query: String,
        documents: Vec<String>,
        top_k: usize,
    ) -> BoxFuture<'_, Result<Vec<RerankHit>, EmbedError>>;

    fn name(&self) -> &'static str;
}
