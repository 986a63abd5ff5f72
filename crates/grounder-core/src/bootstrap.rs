//! Application bootstrap: config resolution and provider/store construction.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use grounder_embed::{
    ContextualEmbedder, DenseEmbedder, HashingSparseEncoder, Reranker, SparseEncoder,
    TeiSparseClient, VoyageClient,
};
use grounder_index::{Ingestor, RunManifest};
use grounder_retrieval::{EvidencePack, QueryRequest, Retriever};
use grounder_store::{QdrantStore, VectorStore};

use crate::config::{Config, SparseProvider};
use crate::secret::exposed;

/// Fully wired clients for one configuration.
pub struct Engine {
    config: Config,
    docs: Arc<dyn ContextualEmbedder>,
    code: Arc<dyn DenseEmbedder>,
    sparse: Arc<dyn SparseEncoder>,
    store: Arc<dyn VectorStore>,
    reranker: Option<Arc<dyn Reranker>>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("collection", &self.config.qdrant.collection)
            .field("docs", &self.docs.name())
            .field("code", &self.code.name())
            .field("sparse", &self.sparse.name())
            .field("reranker", &self.reranker.as_ref().map(|r| r.name()))
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Resolve the config path, load and validate the config, then build the
    /// clients.
    ///
    /// # Errors
    ///
    /// Returns an error if the config is invalid or a client cannot be built.
    pub fn from_env() -> anyhow::Result<Self> {
        let path = resolve_config_path();
        let config = Config::load(&path)
            .with_context(|| format!("failed to load config from {}", path.display()))?;
        config.validate()?;
        Self::from_config(config)
    }

    /// Build Voyage, sparse and Qdrant clients from a validated config.
    ///
    /// # Errors
    ///
    /// Returns an error if the Voyage API key is missing or a client cannot
    /// be constructed.
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let Some(api_key) = config.secrets.voyage_api_key.as_ref() else {
            bail!("GROUNDER_VOYAGE_API_KEY is not set");
        };
        let timeout = config.voyage_timeout();
        let voyage = |model: &str, dimension: Option<usize>| -> anyhow::Result<VoyageClient> {
            let mut client = VoyageClient::new(
                api_key.expose().to_owned(),
                config.voyage.base_url.clone(),
                model.to_owned(),
                timeout,
            )
            .with_context(|| format!("failed to build Voyage client for {model}"))?
            .with_output_dtype(config.voyage.output_dtype.clone())
            .with_retry(config.retry);
            if let Some(dimension) = dimension {
                let dimension =
                    u32::try_from(dimension).context("output dimension does not fit in u32")?;
                client = client.with_output_dimension(dimension);
            }
            Ok(client)
        };

        let docs = voyage(&config.voyage.docs_model, config.vectors.docs_output_dimension)?;
        let code = voyage(&config.voyage.code_model, config.vectors.code_output_dimension)?;
        let reranker = voyage(&config.voyage.rerank_model, None)?;

        let sparse: Arc<dyn SparseEncoder> = match config.sparse.provider {
            SparseProvider::Hashing => Arc::new(HashingSparseEncoder::new(config.sparse.bits)),
            SparseProvider::Tei => {
                let Some(url) = config.sparse.url.clone() else {
                    bail!("sparse.url is required for the tei provider");
                };
                let client = TeiSparseClient::new(
                    url,
                    std::time::Duration::from_secs(config.sparse.timeout_secs),
                )
                .context("failed to build sparse client")?
                .with_api_key(exposed(config.secrets.sparse_api_key.as_ref()))
                .with_retry(config.retry);
                Arc::new(client)
            }
        };

        let store = QdrantStore::new(
            &config.qdrant.url,
            exposed(config.secrets.qdrant_api_key.as_ref()),
            config.qdrant_timeout(),
        )
        .with_context(|| format!("failed to connect to Qdrant at {}", config.qdrant.url))?;

        tracing::info!(
            qdrant = %config.qdrant.url,
            collection = %config.qdrant.collection,
            docs_model = %config.voyage.docs_model,
            code_model = %config.voyage.code_model,
            sparse = ?config.sparse.provider,
            "engine configured"
        );

        Ok(Self::from_parts(
            config,
            Arc::new(docs),
            Arc::new(code),
            sparse,
            Arc::new(store),
        )
        .with_reranker(Arc::new(reranker)))
    }

    /// Assemble an engine from pre-built clients.
    #[must_use]
    pub fn from_parts(
        config: Config,
        docs: Arc<dyn ContextualEmbedder>,
        code: Arc<dyn DenseEmbedder>,
        sparse: Arc<dyn SparseEncoder>,
        store: Arc<dyn VectorStore>,
    ) -> Self {
        Self {
            config,
            docs,
            code,
            sparse,
            store,
            reranker: None,
        }
    }

    #[must_use]
    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn ingestor(&self) -> Ingestor {
        Ingestor::new(
            Arc::clone(&self.docs),
            Arc::clone(&self.code),
            Arc::clone(&self.sparse),
            Arc::clone(&self.store),
            self.config.ingest_options(),
        )
    }

    #[must_use]
    pub fn retriever(&self) -> Retriever {
        let retriever = Retriever::new(
            Arc::clone(&self.docs),
            Arc::clone(&self.code),
            Arc::clone(&self.sparse),
            Arc::clone(&self.store),
            self.config.qdrant.collection.clone(),
            self.config.retrieval.clone(),
        );
        match &self.reranker {
            Some(reranker) => retriever.with_reranker(Arc::clone(reranker)),
            None => retriever,
        }
    }

    /// Ingest every configured corpus and write the run manifest to
    /// `<manifest_dir>/<run_id>.json`.
    ///
    /// # Errors
    ///
    /// Returns an error if no corpora are configured, ingestion fails, or the
    /// manifest cannot be written.
    pub async fn ingest(&self) -> anyhow::Result<(RunManifest, PathBuf)> {
        let corpora = &self.config.ingestion.corpora;
        if corpora.is_empty() {
            bail!("no corpora configured under [[ingestion.corpora]]");
        }
        let manifest = self
            .ingestor()
            .run(corpora, self.config.redacted())
            .await
            .context("ingestion failed")?;
        let path = manifest_path(Path::new(&self.config.ingestion.manifest_dir), &manifest);
        manifest
            .write_json(&path)
            .context("failed to write run manifest")?;
        Ok((manifest, path))
    }

    /// Run one retrieval request.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty query, when every dense lane fails, or
    /// when the store query fails.
    pub async fn query(&self, request: QueryRequest) -> anyhow::Result<EvidencePack> {
        let pack = self.retriever().retrieve(request).await?;
        Ok(pack)
    }
}

#[must_use]
pub fn manifest_path(dir: &Path, manifest: &RunManifest) -> PathBuf {
    dir.join(format!("{}.json", manifest.run_id))
}

/// `GROUNDER_CONFIG` if set, otherwise `config/grounder.toml`.
#[must_use]
pub fn resolve_config_path() -> PathBuf {
    std::env::var("GROUNDER_CONFIG")
        .map_or_else(|_| PathBuf::from("config/grounder.toml"), PathBuf::from)
}
