//! Deterministic offline providers for tests and local runs.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::EmbedError;
use crate::provider::{
    BoxFuture, ContextualEmbedder, DenseEmbedder, InputType, RerankHit, Reranker,
};

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
}

/// Bag-of-words embedder: each word bumps one hashed dimension, then the
/// vector is L2-normalized. Texts sharing words get high cosine similarity.
#[derive(Debug, Clone)]
pub struct MockEmbedder {
    pub dim: usize,
    pub fail: bool,
    calls: Arc<AtomicUsize>,
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new(64)
    }
}

impl MockEmbedder {
    #[must_use]
    pub fn new(dim: usize) -> Self {
        Self {
            dim: dim.max(1),
            fail: false,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Number of provider calls made so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn vector(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dim];
        for w in words(text) {
            let h = blake3::hash(w.as_bytes());
            let b = h.as_bytes();
            let idx = u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]);
            #[allow(clippy::cast_possible_truncation)]
            let idx = (idx % self.dim as u64) as usize;
            v[idx] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        } else {
            v[0] = 1.0;
        }
        v
    }

    fn record(&self) -> Result<(), EmbedError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            Err(EmbedError::Unavailable("mock embedder failure".into()))
        } else {
            Ok(())
        }
    }
}

impl DenseEmbedder for MockEmbedder {
    fn embed(
        &self,
        texts: Vec<String>,
        _input_type: InputType,
    ) -> BoxFuture<'_, Result<Vec<Vec<f32>>, EmbedError>> {
        let result = self
            .record()
            .map(|()| texts.iter().map(|t| self.vector(t)).collect());
        Box::pin(async move { result })
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

impl ContextualEmbedder for MockEmbedder {
    fn embed_documents(
        &self,
        documents: Vec<Vec<String>>,
        _input_type: InputType,
    ) -> BoxFuture<'_, Result<Vec<Vec<Vec<f32>>>, EmbedError>> {
        let result = self.record().map(|()| {
            documents
                .iter()
                .map(|doc| doc.iter().map(|t| self.vector(t)).collect())
                .collect()
        });
        Box::pin(async move { result })
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Reranker scoring by the fraction of query words present in each document.
#[derive(Debug, Clone, Default)]
pub struct MockReranker {
    pub fail: bool,
    calls: Arc<AtomicUsize>,
}

impl MockReranker {
    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Reranker for MockReranker {
    fn rerank(
        &self,
        query: String,
        documents: Vec<String>,
        top_k: usize,
    ) -> BoxFuture<'_, Result<Vec<RerankHit>, EmbedError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Box::pin(async {
                Err(EmbedError::Status {
                    provider: "mock",
                    status: 503,
                    body: "mock reranker failure".into(),
                })
            });
        }
        let query_words: HashSet<String> = words(&query).collect();
        #[allow(clippy::cast_precision_loss)]
        let mut hits: Vec<RerankHit> = documents
            .iter()
            .enumerate()
            .map(|(index, doc)| {
                let doc_words: HashSet<String> = words(doc).collect();
                let shared = query_words.intersection(&doc_words).count();
                RerankHit {
                    index,
                    relevance_score: shared as f32 / query_words.len().max(1) as f32,
                }
            })
            .collect();
        hits.sort_by(|a, b| {
            b.relevance_score
                .total_cmp(&a.relevance_score)
                .then(a.index.cmp(&b.index))
        });
        hits.truncate(top_k);
        Box::pin(async move { Ok(hits) })
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
