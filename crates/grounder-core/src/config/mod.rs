mod env;
mod types;


pub use types::*;

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, bail};
use grounder_index::IngestOptions;

use crate::secret::Secret;

impl Config {
    /// Load configuration from a TOML file with env var overrides.
    ///
    /// Falls back to defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str::<Self>(&content).context("failed to parse config file")?
        } else {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Check cross-field rules.
    ///
    /// # Errors
    ///
    /// Returns the first violated rule.
    pub fn validate(&self) -> anyhow::Result<()> {
        let dim = self.vectors.dense_dim;
        if dim == 0 {
            bail!("vectors.dense_dim must be greater than 0");
        }
        for (field, requested) in [
            ("docs_output_dimension", self.vectors.docs_output_dimension),
            ("code_output_dimension", self.vectors.code_output_dimension),
        ] {
            if let Some(requested) = requested
                && requested != dim
            {
                bail!("vectors.{field} ({requested}) must equal vectors.dense_dim ({dim})");
            }
        }

        let r = &self.retrieval;
        if !(r.coverage_ratio > 0.0 && r.coverage_ratio <= 0.5) {
            bail!(
                "retrieval.coverage_ratio must be in (0, 0.5], got {}",
                r.coverage_ratio
            );
        }
        if !(r.soft_dedupe_overlap > 0.0 && r.soft_dedupe_overlap <= 1.0) {
            bail!(
                "retrieval.soft_dedupe_overlap must be in (0, 1], got {}",
                r.soft_dedupe_overlap
            );
        }
        for (name, value) in [
            ("retrieval.top_k", r.top_k),
            ("retrieval.rerank_candidates", r.rerank_candidates),
            ("retrieval.rerank_max_documents", r.rerank_max_documents),
            ("retrieval.rerank_token_budget", r.rerank_token_budget),
            ("qdrant.upsert_batch_size", self.qdrant.upsert_batch_size),
            ("qdrant.upsert_parallelism", self.qdrant.upsert_parallelism),
            ("voyage.embed_parallelism", self.voyage.embed_parallelism),
            ("voyage.doc_requests.max_items", self.voyage.doc_requests.max_items),
            ("voyage.code_batches.max_items", self.voyage.code_batches.max_items),
            ("voyage.doc_windows.max_chars", self.voyage.doc_windows.max_chars),
            ("sparse.batches.max_items", self.sparse.batches.max_items),
            ("ingestion.chunk_parallelism", self.ingestion.chunk_parallelism),
            ("chunking.doc.target_chars", self.chunking.doc.target_chars),
            ("chunking.code.max_chars", self.chunking.code.max_chars),
        ] {
            if value == 0 {
                bail!("{name} must be greater than 0");
            }
        }
        if r.final_limit == 0 || r.widen_factor == 0 {
            bail!("retrieval.final_limit and retrieval.widen_factor must be greater than 0");
        }
        if self.chunking.doc.max_chars < self.chunking.doc.target_chars {
            bail!("chunking.doc.max_chars must be at least chunking.doc.target_chars");
        }
        if self.retry.max_attempts == 0 {
            bail!("retry.max_attempts must be at least 1");
        }
        if self.sparse.provider == SparseProvider::Tei && self.sparse.url.is_none() {
            bail!("sparse.url is required when sparse.provider = \"tei\"");
        }

        let mut names = HashSet::new();
        for corpus in &self.ingestion.corpora {
            if !names.insert(corpus.name.as_str()) {
                bail!("duplicate corpus name {:?}", corpus.name);
            }
        }
        Ok(())
    }

    /// Effective configuration for the run manifest. Secrets are never
    /// serialized; only their presence is recorded.
    #[must_use]
    pub fn redacted(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        if let Some(map) = value.as_object_mut() {
            let mark = |s: Option<&Secret>| {
                serde_json::Value::String(if s.is_some() { "[REDACTED]" } else { "unset" }.into())
            };
            map.insert(
                "secrets".into(),
                serde_json::json!({
                    "voyage_api_key": mark(self.secrets.voyage_api_key.as_ref()),
                    "qdrant_api_key": mark(self.secrets.qdrant_api_key.as_ref()),
                    "sparse_api_key": mark(self.secrets.sparse_api_key.as_ref()),
                }),
            );
        }
        value
    }

    /// Ingestion pipeline settings derived from the config sections.
    #[must_use]
    pub fn ingest_options(&self) -> IngestOptions {
        let mut options = IngestOptions::new(&self.qdrant.collection, self.vectors.dense_dim);
        options.chunking = self.chunking.clone();
        options.lexical = self.lexical.clone();
        options.doc_windows = self.voyage.doc_windows;
        options.doc_requests = self.voyage.doc_requests;
        options.code_batches = self.voyage.code_batches;
        options.sparse_batches = self.sparse.batches;
        options.chunk_parallelism = self.ingestion.chunk_parallelism;
        options.embed_parallelism = self.voyage.embed_parallelism;
        options.upsert_batch_size = self.qdrant.upsert_batch_size;
        options.upsert_parallelism = self.qdrant.upsert_parallelism;
        options.retry = self.retry;
        options.prune_stale = self.ingestion.prune_stale;
        options
    }

    #[must_use]
    pub fn voyage_timeout(&self) -> Duration {
        Duration::from_secs(self.voyage.timeout_secs)
    }

    #[must_use]
    pub fn qdrant_timeout(&self) -> Duration {
        Duration::from_secs(self.qdrant.timeout_secs)
    }
}
