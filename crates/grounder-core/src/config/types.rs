use grounder_embed::{BatchLimits, RetryPolicy, WindowLimits};
use grounder_index::{ChunkingConfig, CorpusSpec, LexicalConfig};
use grounder_retrieval::RetrievalConfig;
use serde::{Deserialize, Serialize};

use crate::secret::Secret;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub qdrant: QdrantConfig,
    #[serde(default)]
    pub voyage: VoyageConfig,
    #[serde(default)]
    pub sparse: SparseConfig,
    #[serde(default)]
    pub vectors: VectorsConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub lexical: LexicalConfig,
    #[serde(default)]
    pub ingestion: IngestionConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Read from the environment only; never serialized.
    #[serde(skip)]
    pub secrets: ResolvedSecrets,
}

#[derive(Debug, Default)]
pub struct ResolvedSecrets {
    pub voyage_api_key: Option<Secret>,
    pub qdrant_api_key: Option<Secret>,
    pub sparse_api_key: Option<Secret>,
}

fn default_qdrant_url() -> String {
    "http://localhost:6334".into()
}

fn default_collection() -> String {
    "grounder".into()
}

fn default_qdrant_timeout() -> u64 {
    30
}

fn default_upsert_batch_size() -> usize {
    64
}

fn default_upsert_parallelism() -> usize {
    2
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct QdrantConfig {
    /// gRPC endpoint.
    #[serde(default = "default_qdrant_url")]
    pub url: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_qdrant_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_upsert_batch_size")]
    pub upsert_batch_size: usize,
    #[serde(default = "default_upsert_parallelism")]
    pub upsert_parallelism: usize,
}

impl Default for QdrantConfig {
    fn default() -> Self {
        Self {
            url: default_qdrant_url(),
            collection: default_collection(),
            timeout_secs: default_qdrant_timeout(),
            upsert_batch_size: default_upsert_batch_size(),
            upsert_parallelism: default_upsert_parallelism(),
        }
    }
}

fn default_voyage_base_url() -> String {
    grounder_embed::voyage::DEFAULT_BASE_URL.into()
}

fn default_docs_model() -> String {
    "voyage-context-3".into()
}

fn default_code_model() -> String {
    "voyage-code-3".into()
}

fn default_rerank_model() -> String {
    "rerank-2.5".into()
}

fn default_voyage_timeout() -> u64 {
    120
}

fn default_output_dtype() -> String {
    "float".into()
}

fn default_doc_windows() -> WindowLimits {
    WindowLimits {
        max_chars: 96_000,
        overlap_chunks: 1,
    }
}

fn default_doc_requests() -> BatchLimits {
    BatchLimits::items_and_chars(1000, 400_000)
}

fn default_code_batches() -> BatchLimits {
    BatchLimits::items_and_chars(128, 400_000)
}

fn default_embed_parallelism() -> usize {
    4
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct VoyageConfig {
    #[serde(default = "default_voyage_base_url")]
    pub base_url: String,
    /// Contextual model for documentation chunks.
    #[serde(default = "default_docs_model")]
    pub docs_model: String,
    #[serde(default = "default_code_model")]
    pub code_model: String,
    #[serde(default = "default_rerank_model")]
    pub rerank_model: String,
    #[serde(default = "default_voyage_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_output_dtype")]
    pub output_dtype: String,
    /// Character window for one contextual request document.
    #[serde(default = "default_doc_windows")]
    pub doc_windows: WindowLimits,
    #[serde(default = "default_doc_requests")]
    pub doc_requests: BatchLimits,
    #[serde(default = "default_code_batches")]
    pub code_batches: BatchLimits,
    #[serde(default = "default_embed_parallelism")]
    pub embed_parallelism: usize,
}

impl Default for VoyageConfig {
    fn default() -> Self {
        Self {
            base_url: default_voyage_base_url(),
            docs_model: default_docs_model(),
            code_model: default_code_model(),
            rerank_model: default_rerank_model(),
            timeout_secs: default_voyage_timeout(),
            output_dtype: default_output_dtype(),
            doc_windows: default_doc_windows(),
            doc_requests: default_doc_requests(),
            code_batches: default_code_batches(),
            embed_parallelism: default_embed_parallelism(),
        }
    }
}

/// Sparse encoder backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SparseProvider {
    /// Local hashed term frequencies.
    #[default]
    Hashing,
    /// Remote sparse-embedding server (SPLADE-style `/embed_sparse`).
    Tei,
}

fn default_sparse_bits() -> u32 {
    20
}

fn default_sparse_batches() -> BatchLimits {
    BatchLimits::items(64)
}

fn default_sparse_timeout() -> u64 {
    60
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SparseConfig {
    #[serde(default)]
    pub provider: SparseProvider,
    /// Required for the `tei` provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_sparse_bits")]
    pub bits: u32,
    #[serde(default = "default_sparse_batches")]
    pub batches: BatchLimits,
    #[serde(default = "default_sparse_timeout")]
    pub timeout_secs: u64,
}

impl Default for SparseConfig {
    fn default() -> Self {
        Self {
            provider: SparseProvider::default(),
            url: None,
            bits: default_sparse_bits(),
            batches: default_sparse_batches(),
            timeout_secs: default_sparse_timeout(),
        }
    }
}

fn default_dense_dim() -> usize {
    1024
}

/// Both dense fields share one dimensionality.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct VectorsConfig {
    #[serde(default = "default_dense_dim")]
    pub dense_dim: usize,
    /// Requested output dimension for the docs model; must equal `dense_dim`.
    #[serde(default)]
    pub docs_output_dimension: Option<usize>,
    #[serde(default)]
    pub code_output_dimension: Option<usize>,
}

impl Default for VectorsConfig {
    fn default() -> Self {
        Self {
            dense_dim: default_dense_dim(),
            docs_output_dimension: None,
            code_output_dimension: None,
        }
    }
}

fn default_manifest_dir() -> String {
    "runs".into()
}

fn default_chunk_parallelism() -> usize {
    8
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct IngestionConfig {
    /// Run manifests are written here as `<run_id>.json`.
    #[serde(default = "default_manifest_dir")]
    pub manifest_dir: String,
    #[serde(default = "default_chunk_parallelism")]
    pub chunk_parallelism: usize,
    /// Delete points of a corpus that the current run did not produce.
    #[serde(default = "default_true")]
    pub prune_stale: bool,
    #[serde(default)]
    pub corpora: Vec<CorpusSpec>,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            manifest_dir: default_manifest_dir(),
            chunk_parallelism: default_chunk_parallelism(),
            prune_stale: true,
            corpora: Vec::new(),
        }
    }
}
