use super::{Config, SparseProvider};
use crate::secret::Secret;

impl Config {
    pub(crate) fn apply_env_overrides(&mut self) {
        self.apply_env_overrides_store();
        self.apply_env_overrides_providers();
        self.apply_env_overrides_retrieval();
        self.apply_env_secrets();
    }

    fn apply_env_overrides_store(&mut self) {
        if let Ok(v) = std::env::var("GROUNDER_QDRANT_URL") {
            self.qdrant.url = v;
        }
        if let Ok(v) = std::env::var("GROUNDER_QDRANT_COLLECTION") {
            self.qdrant.collection = v;
        }
        if let Ok(v) = std::env::var("GROUNDER_QDRANT_TIMEOUT")
            && let Ok(secs) = v.parse::<u64>()
        {
            self.qdrant.timeout_secs = secs;
        }
        if let Ok(v) = std::env::var("GROUNDER_VECTORS_DENSE_DIM")
            && let Ok(dim) = v.parse::<usize>()
        {
            self.vectors.dense_dim = dim;
        }
        if let Ok(v) = std::env::var("GROUNDER_INGESTION_MANIFEST_DIR") {
            self.ingestion.manifest_dir = v;
        }
        if let Ok(v) = std::env::var("GROUNDER_INGESTION_PRUNE_STALE")
            && let Ok(enabled) = v.parse::<bool>()
        {
            self.ingestion.prune_stale = enabled;
        }
        if let Ok(v) = std::env::var("GROUNDER_RETRY_MAX_ATTEMPTS")
            && let Ok(n) = v.parse::<u32>()
        {
            self.retry.max_attempts = n;
        }
    }

    fn apply_env_overrides_providers(&mut self) {
        if let Ok(v) = std::env::var("GROUNDER_VOYAGE_BASE_URL") {
            self.voyage.base_url = v;
        }
        if let Ok(v) = std::env::var("GROUNDER_VOYAGE_DOCS_MODEL") {
            self.voyage.docs_model = v;
        }
        if let Ok(v) = std::env::var("GROUNDER_VOYAGE_CODE_MODEL") {
            self.voyage.code_model = v;
        }
        if let Ok(v) = std::env::var("GROUNDER_VOYAGE_RERANK_MODEL") {
            self.voyage.rerank_model = v;
        }
        if let Ok(v) = std::env::var("GROUNDER_VOYAGE_TIMEOUT")
            && let Ok(secs) = v.parse::<u64>()
        {
            self.voyage.timeout_secs = secs;
        }
        if let Ok(v) = std::env::var("GROUNDER_EMBED_PARALLELISM")
            && let Ok(n) = v.parse::<usize>()
        {
            self.voyage.embed_parallelism = n;
        }
        if let Ok(v) = std::env::var("GROUNDER_SPARSE_PROVIDER") {
            if let Ok(kind) =
                serde_json::from_value::<SparseProvider>(serde_json::Value::String(v.clone()))
            {
                self.sparse.provider = kind;
            } else {
                tracing::warn!("ignoring invalid GROUNDER_SPARSE_PROVIDER value: {v}");
            }
        }
        if let Ok(v) = std::env::var("GROUNDER_SPARSE_URL") {
            self.sparse.url = Some(v);
        }
    }

    fn apply_env_overrides_retrieval(&mut self) {
        if let Ok(v) = std::env::var("GROUNDER_RETRIEVAL_TOP_K")
            && let Ok(n) = v.parse::<usize>()
        {
            self.retrieval.top_k = n;
        }
        if let Ok(v) = std::env::var("GROUNDER_RETRIEVAL_RERANK")
            && let Ok(enabled) = v.parse::<bool>()
        {
            self.retrieval.rerank = enabled;
        }
        if let Ok(v) = std::env::var("GROUNDER_RETRIEVAL_MULTI_QUERY")
            && let Ok(enabled) = v.parse::<bool>()
        {
            self.retrieval.multi_query = enabled;
        }
        if let Ok(v) = std::env::var("GROUNDER_RETRIEVAL_COVERAGE_RATIO")
            && let Ok(ratio) = v.parse::<f64>()
        {
            self.retrieval.coverage_ratio = ratio;
        }
    }

    fn apply_env_secrets(&mut self) {
        let secret = |key: &str| {
            std::env::var(key)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(Secret::new)
        };
        if let Some(s) = secret("GROUNDER_VOYAGE_API_KEY") {
            self.secrets.voyage_api_key = Some(s);
        }
        if let Some(s) = secret("GROUNDER_QDRANT_API_KEY") {
            self.secrets.qdrant_api_key = Some(s);
        }
        if let Some(s) = secret("GROUNDER_SPARSE_API_KEY") {
            self.secrets.sparse_api_key = Some(s);
        }
    }
}
