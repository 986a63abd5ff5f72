//! Ingestion orchestrator: discover → chunk → embed → upsert → prune.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use futures::{StreamExt, TryStreamExt, stream};
use grounder_embed::batched::{embed_documents, embed_texts, encode_texts};
use grounder_embed::{
    BatchLimits, ContextualEmbedder, DenseEmbedder, InputType, RetryPolicy, SparseEncoder,
    WindowLimits, with_retry,
};
use grounder_store::{
    CollectionSchema, FieldValue, ScrollRequest, VectorFilter, VectorStore, upsert_in_batches,
};

use crate::chunker::{ChunkingConfig, FileContext, chunk_file};
use crate::discovery::{CorpusSpec, DiscoveredFile, discover};
use crate::error::{IngestError, Result};
use crate::lexical::LexicalConfig;
use crate::manifest::{CorpusCounts, CorpusReport, ManifestBuilder, RunManifest};
use crate::point::build_point;
use crate::record::{ChunkRecord, ContentKind};

/// Commit recorded when none is pinned and the checkout cannot be asked.
pub const UNKNOWN_COMMIT: &str = "unknown";

const SCROLL_PAGE: u32 = 256;

/// Tunables for one ingestion run.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub collection: String,
    pub dense_dim: usize,
    pub chunking: ChunkingConfig,
    pub lexical: LexicalConfig,
    pub doc_windows: WindowLimits,
    pub doc_requests: BatchLimits,
    pub code_batches: BatchLimits,
    pub sparse_batches: BatchLimits,
    pub chunk_parallelism: usize,
    pub embed_parallelism: usize,
    pub upsert_batch_size: usize,
    pub upsert_parallelism: usize,
    pub retry: RetryPolicy,
    /// Delete points of a corpus that the current run did not produce.
    pub prune_stale: bool,
}

impl IngestOptions {
    #[must_use]
    pub fn new(collection: impl Into<String>, dense_dim: usize) -> Self {
        Self {
            collection: collection.into(),
            dense_dim,
            chunking: ChunkingConfig::default(),
            lexical: LexicalConfig::default(),
            doc_windows: WindowLimits {
                max_chars: 96_000,
                overlap_chunks: 1,
            },
            doc_requests: BatchLimits::items_and_chars(1000, 400_000),
            code_batches: BatchLimits::items_and_chars(128, 400_000),
            sparse_batches: BatchLimits::items(64),
            chunk_parallelism: 8,
            embed_parallelism: 4,
            upsert_batch_size: 64,
            upsert_parallelism: 2,
            retry: RetryPolicy::default(),
            prune_stale: true,
        }
    }
}

/// Provenance shared by every file of a corpus, owned so chunking tasks can
/// move it onto the blocking pool.
#[derive(Debug)]
struct Provenance {
    corpus: ContentKind,
    source: String,
    repo: String,
    git_ref: String,
    commit: String,
}

pub struct Ingestor {
    docs: Arc<dyn ContextualEmbedder>,
    code: Arc<dyn DenseEmbedder>,
    sparse: Arc<dyn SparseEncoder>,
    store: Arc<dyn VectorStore>,
    options: IngestOptions,
}

impl Ingestor {
    #[must_use]
    pub fn new(
        docs: Arc<dyn ContextualEmbedder>,
        code: Arc<dyn DenseEmbedder>,
        sparse: Arc<dyn SparseEncoder>,
        store: Arc<dyn VectorStore>,
        options: IngestOptions,
    ) -> Self {
        Self {
            docs,
            code,
            sparse,
            store,
            options,
        }
    }

    #[must_use]
    pub fn options(&self) -> &IngestOptions {
        &self.options
    }

    /// Ingest every corpus into the collection and return the run manifest.
    ///
    /// # Errors
    ///
    /// Fails on an unreadable corpus root, or when embedding or upserting a
    /// batch still fails after retries.
    pub async fn run(
        &self,
        corpora: &[CorpusSpec],
        config_snapshot: serde_json::Value,
    ) -> Result<RunManifest> {
        let mut manifest = ManifestBuilder::new(&self.options.collection, config_snapshot);
        tracing::info!(
            run_id = %manifest.run_id(),
            collection = %self.options.collection,
            corpora = corpora.len(),
            "ingestion started"
        );

        let schema = CollectionSchema::new(&self.options.collection, self.options.dense_dim as u64);
        self.store.ensure_collection(&schema).await?;

        for spec in corpora {
            let report = self.ingest_corpus(spec, &mut manifest).await?;
            manifest.add_corpus(report);
        }

        let manifest = manifest.finalize();
        tracing::info!(
            run_id = %manifest.run_id,
            chunks = manifest.total_chunks,
            warnings = manifest.warnings.len(),
            "ingestion finished"
        );
        Ok(manifest)
    }

    /// Ingest one corpus, reporting chunk ids and warnings into `manifest`.
    ///
    /// # Errors
    ///
    /// See [`Ingestor::run`].
    pub async fn ingest_corpus(
        &self,
        spec: &CorpusSpec,
        manifest: &mut ManifestBuilder,
    ) -> Result<CorpusReport> {
        let commit = match &spec.commit {
            Some(pinned) => pinned.clone(),
            None => match resolve_commit(&spec.root).await {
                Some(head) => head,
                None => {
                    manifest.warn(format!(
                        "{}: could not resolve commit, recording {UNKNOWN_COMMIT:?}",
                        spec.name
                    ));
                    UNKNOWN_COMMIT.to_owned()
                }
            },
        };

        let discovery = {
            let spec = spec.clone();
            tokio::task::spawn_blocking(move || discover(&spec)).await??
        };
        for skipped in discovery.skipped.iter().filter(|s| s.reason.is_warning()) {
            manifest.warn(format!(
                "{}: skipped {}: {:?}",
                spec.name, skipped.rel_path, skipped.reason
            ));
        }

        let mut counts = CorpusCounts {
            files_discovered: discovery.files.len() + discovery.skipped.len(),
            files_skipped: discovery.skipped.len(),
            ..CorpusCounts::default()
        };

        let provenance = Arc::new(Provenance {
            corpus: spec.corpus,
            source: spec.name.clone(),
            repo: spec.repo.clone(),
            git_ref: spec.git_ref.clone(),
            commit: commit.clone(),
        });
        let per_file = self.chunk_files(provenance, discovery.files).await?;
        counts.files_chunked = per_file.iter().filter(|r| !r.is_empty()).count();
        let records: Vec<ChunkRecord> = per_file.iter().flatten().cloned().collect();
        counts.chunks = records.len();
        tracing::info!(corpus = %spec.name, files = counts.files_chunked, chunks = counts.chunks, "chunking complete");

        let dense = self.embed_dense(spec.corpus, &per_file).await?;
        let lexical: Vec<String> = records.iter().map(|r| r.lexical_text.clone()).collect();
        let sparse = encode_texts(
            self.sparse.as_ref(),
            &lexical,
            InputType::Document,
            &self.options.sparse_batches,
            self.options.embed_parallelism,
        )
        .await?;
        if dense.len() != records.len() || sparse.len() != records.len() {
            return Err(IngestError::Other(format!(
                "embedding count mismatch: {} records, {} dense, {} sparse",
                records.len(),
                dense.len(),
                sparse.len()
            )));
        }

        let mut points = Vec::with_capacity(records.len());
        for ((record, dense), sparse) in records.iter().zip(dense).zip(sparse) {
            if dense.len() != self.options.dense_dim {
                return Err(IngestError::Dimension {
                    expected: self.options.dense_dim,
                    got: dense.len(),
                });
            }
            points.push(build_point(record, dense, sparse)?);
        }
        let live: HashSet<String> = points.iter().map(|p| p.id.clone()).collect();

        counts.points_upserted = upsert_in_batches(
            self.store.as_ref(),
            &self.options.collection,
            points,
            self.options.upsert_batch_size,
            self.options.upsert_parallelism,
            &self.options.retry,
        )
        .await?;

        if self.options.prune_stale {
            counts.stale_pruned = self.prune_stale(&spec.name, &live).await?;
        }

        manifest.record_chunk_ids(records.into_iter().map(|r| r.chunk_id));
        tracing::info!(
            corpus = %spec.name,
            commit = %commit,
            upserted = counts.points_upserted,
            pruned = counts.stale_pruned,
            "corpus ingested"
        );

        Ok(CorpusReport {
            name: spec.name.clone(),
            corpus: spec.corpus,
            repo: spec.repo.clone(),
            git_ref: spec.git_ref.clone(),
            commit,
            counts,
        })
    }

    /// Chunk files on the blocking pool; output is ordered by path.
    async fn chunk_files(
        &self,
        provenance: Arc<Provenance>,
        files: Vec<DiscoveredFile>,
    ) -> Result<Vec<Vec<ChunkRecord>>> {
        let config = Arc::new((self.options.chunking.clone(), self.options.lexical.clone()));

        let mut chunked: Vec<(String, Vec<ChunkRecord>)> = stream::iter(files)
            .map(|file| {
                let provenance = Arc::clone(&provenance);
                let config = Arc::clone(&config);
                tokio::task::spawn_blocking(move || {
                    let ctx = FileContext {
                        corpus: provenance.corpus,
                        source: &provenance.source,
                        repo: &provenance.repo,
                        git_ref: &provenance.git_ref,
                        commit: &provenance.commit,
                        path: &file.rel_path,
                    };
                    let records = chunk_file(&ctx, &file.content, &config.0, &config.1);
                    (file.rel_path, records)
                })
            })
            .buffer_unordered(self.options.chunk_parallelism.max(1))
            .try_collect()
            .await?;

        chunked.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(chunked.into_iter().map(|(_, records)| records).collect())
    }

    /// One dense vector per record: the contextual model for docs, the
    /// per-text code model for code.
    async fn embed_dense(
        &self,
        corpus: ContentKind,
        per_file: &[Vec<ChunkRecord>],
    ) -> Result<Vec<Vec<f32>>> {
        let parallelism = self.options.embed_parallelism;
        match corpus {
            ContentKind::Doc => {
                let files: Vec<Vec<String>> = per_file
                    .iter()
                    .filter(|records| !records.is_empty())
                    .map(|records| records.iter().map(|r| r.text.clone()).collect())
                    .collect();
                let vectors = embed_documents(
                    self.docs.as_ref(),
                    &files,
                    InputType::Document,
                    &self.options.doc_windows,
                    &self.options.doc_requests,
                    parallelism,
                )
                .await?;
                Ok(vectors.into_iter().flatten().collect())
            }
            ContentKind::Code => {
                let texts: Vec<String> = per_file.iter().flatten().map(|r| r.text.clone()).collect();
                Ok(embed_texts(
                    self.code.as_ref(),
                    &texts,
                    InputType::Document,
                    &self.options.code_batches,
                    parallelism,
                )
                .await?)
            }
        }
    }

    /// Delete points of `source` whose ids the current run did not produce.
    async fn prune_stale(&self, source: &str, live: &HashSet<String>) -> Result<usize> {
        let filter = VectorFilter::default().must("source", FieldValue::Text(source.to_owned()));
        let collection = self.options.collection.as_str();
        let mut offset = None;
        let mut stale = Vec::new();
        loop {
            let page = self
                .store
                .scroll(
                    collection,
                    ScrollRequest {
                        filter: Some(filter.clone()),
                        limit: SCROLL_PAGE,
                        offset,
                        with_vectors: false,
                    },
                )
                .await?;
            stale.extend(
                page.points
                    .into_iter()
                    .map(|p| p.id)
                    .filter(|id| !live.contains(id)),
            );
            match page.next_offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }

        if !stale.is_empty() {
            let store = self.store.as_ref();
            with_retry(&self.options.retry, "delete_stale", || {
                store.delete_by_ids(collection, stale.clone())
            })
            .await?;
            tracing::info!(source, pruned = stale.len(), "stale points deleted");
        }
        Ok(stale.len())
    }
}

/// `git rev-parse HEAD` in `root`, or `None` if it is not a git checkout.
async fn resolve_commit(root: &Path) -> Option<String> {
    let output = tokio::process::Command::new("git")
        .arg("-C")
        .arg(root)
        .args(["rev-parse", "HEAD"])
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let head = String::from_utf8(output.stdout).ok()?.trim().to_owned();
    (!head.is_empty()).then_some(head)
}
