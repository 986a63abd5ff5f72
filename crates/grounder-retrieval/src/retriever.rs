//! Query orchestration: plan, embed, search, rerank, assemble.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use futures::future::{join_all, try_join_all};
use grounder_embed::{
    ContextualEmbedder, DenseEmbedder, EmbedError, InputType, Reranker, SparseEncoder,
    SparseVector,
};
use grounder_store::rrf::{self, RRF_K};
use grounder_store::{ScoredVectorPoint, VectorStore};
use serde::{Deserialize, Serialize};

use crate::config::RetrievalConfig;
use crate::error::{Result, RetrievalError};
use crate::evidence::{self, Candidate, Coverage, Degradation, EvidencePack};
use crate::intent::Intent;
use crate::planner::{self, Lane, QueryFilters, QueryPlan, QueryVectors};
use crate::rerank::{self, RerankLimits};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    /// Overrides classification when set.
    #[serde(default)]
    pub intent: Option<Intent>,
    #[serde(default)]
    pub filters: QueryFilters,
    #[serde(default)]
    pub top_k: Option<usize>,
}

impl QueryRequest {
    #[must_use]
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_intent(mut self, intent: Intent) -> Self {
        self.intent = Some(intent);
        self
    }
}

/// Read-only query side of the engine; one instance serves concurrent
/// requests.
pub struct Retriever {
    docs: Arc<dyn ContextualEmbedder>,
    code: Arc<dyn DenseEmbedder>,
    sparse: Arc<dyn SparseEncoder>,
    reranker: Option<Arc<dyn Reranker>>,
    store: Arc<dyn VectorStore>,
    collection: String,
    config: RetrievalConfig,
}

impl std::fmt::Debug for Retriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retriever")
            .field("docs", &self.docs.name())
            .field("code", &self.code.name())
            .field("sparse", &self.sparse.name())
            .field("reranker", &self.reranker.as_ref().map(|r| r.name()))
            .field("collection", &self.collection)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Retriever {
    #[must_use]
    pub fn new(
        docs: Arc<dyn ContextualEmbedder>,
        code: Arc<dyn DenseEmbedder>,
        sparse: Arc<dyn SparseEncoder>,
        store: Arc<dyn VectorStore>,
        collection: impl Into<String>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            docs,
            code,
            sparse,
            reranker: None,
            store,
            collection: collection.into(),
            config,
        }
    }

    #[must_use]
    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    #[must_use]
    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Answer one query with an evidence pack.
    ///
    /// Lane, rerank and coverage problems are reported in the pack's
    /// warnings.
    ///
    /// # Errors
    ///
    /// Returns `EmptyQuery` for a blank query, `NoDenseLanes` when no dense
    /// query embedding succeeds, and `Store` when the vector store fails.
    pub async fn retrieve(&self, request: QueryRequest) -> Result<EvidencePack> {
        let total = Instant::now();
        let mut timings = BTreeMap::new();
        let mut warnings = Vec::new();

        let started = Instant::now();
        let plan = planner::plan(
            &request.query,
            request.intent,
            &request.filters,
            &self.config,
        )?;
        let top_k = request.top_k.unwrap_or(self.config.top_k).max(1);
        let forced = plan.intent.is_corpus_forced();
        timings.insert("plan".to_owned(), elapsed_ms(started));

        let started = Instant::now();
        let vectors = self.embed_variations(&plan, &mut warnings).await?;
        let queried = queried_lanes(&plan, &vectors);
        timings.insert("embed".to_owned(), elapsed_ms(started));

        let started = Instant::now();
        let mut plan = plan;
        let (mut pool, mut skipped) = self.search(&plan, &vectors).await?;
        if !forced && !evidence::pool_satisfies_quota(&pool, top_k, self.config.coverage_ratio) {
            let factor = self.config.widen_factor;
            tracing::info!(
                factor,
                pool = pool.len(),
                "coverage quota unmet, widening candidate pool"
            );
            plan = plan.widened(factor);
            (pool, skipped) = self.search(&plan, &vectors).await?;
            warnings.push(Degradation::PoolWidened { factor });
        }
        warnings.extend(skipped);
        timings.insert("search".to_owned(), elapsed_ms(started));

        let started = Instant::now();
        let ranked = match self.reranker.as_ref().filter(|_| self.config.rerank) {
            Some(reranker) if !pool.is_empty() => {
                let limits = RerankLimits {
                    candidates: self.config.rerank_candidates,
                    max_documents: self.config.rerank_max_documents,
                    token_budget: self.config.rerank_token_budget,
                };
                match rerank::rerank(
                    reranker.as_ref(),
                    plan.intent,
                    &plan.query,
                    pool.clone(),
                    limits,
                )
                .await
                {
                    Ok(ranked) => ranked,
                    Err(e) => {
                        tracing::warn!(error = %e, "rerank failed, keeping fused order");
                        warnings.push(Degradation::RerankUnavailable {
                            reason: e.to_string(),
                        });
                        pool
                    }
                }
            }
            _ => pool,
        };
        timings.insert("rerank".to_owned(), elapsed_ms(started));

        let started = Instant::now();
        let selection = evidence::select(ranked, top_k, self.config.coverage_ratio, forced);
        if let Some(shortfall) = selection.shortfall {
            tracing::warn!(%shortfall, "best-effort evidence pack");
            warnings.push(shortfall);
        }
        let coverage = Coverage::of(&selection.items);
        let items = evidence::rank_items(selection.items);
        timings.insert("assemble".to_owned(), elapsed_ms(started));
        timings.insert("total".to_owned(), elapsed_ms(total));

        tracing::info!(
            intent = %plan.intent,
            items = items.len(),
            doc = coverage.doc,
            code = coverage.code,
            warnings = warnings.len(),
            "evidence pack assembled"
        );
        Ok(EvidencePack {
            query: plan.query.clone(),
            intent: plan.intent,
            items,
            coverage,
            warnings,
            plan: plan.summary(&queried),
            timings_ms: timings,
        })
    }

    /// Query vectors per variation, concurrently. Lanes whose embedding
    /// fails are left empty and reported once.
    async fn embed_variations(
        &self,
        plan: &QueryPlan,
        warnings: &mut Vec<Degradation>,
    ) -> Result<Vec<QueryVectors>> {
        let results = join_all(
            plan.variations
                .iter()
                .map(|text| self.embed_query(plan, text)),
        )
        .await;

        let mut dropped: Vec<Lane> = Vec::new();
        let mut causes = Vec::new();
        let mut vectors = Vec::with_capacity(results.len());
        for (docs, code, sparse) in results {
            let mut v = QueryVectors::default();
            for (lane, outcome) in [(Lane::DenseDocs, docs), (Lane::DenseCode, code)] {
                match outcome {
                    Ok(values) => match lane {
                        Lane::DenseDocs => v.dense_docs = values,
                        _ => v.dense_code = values,
                    },
                    Err(e) => {
                        if !dropped.contains(&lane) {
                            tracing::warn!(lane = lane.name(), error = %e, "dense lane dropped");
                            causes.push(format!("{}: {e}", lane.name()));
                            warnings.push(Degradation::LaneDropped {
                                lane,
                                reason: e.to_string(),
                            });
                            dropped.push(lane);
                        }
                    }
                }
            }
            match sparse {
                Ok(s) => v.sparse = s,
                Err(e) => {
                    if !dropped.contains(&Lane::SparseLexical) {
                        tracing::warn!(error = %e, "sparse lane dropped");
                        warnings.push(Degradation::SparseDropped {
                            reason: e.to_string(),
                        });
                        dropped.push(Lane::SparseLexical);
                    }
                }
            }
            vectors.push(v);
        }

        if vectors
            .iter()
            .all(|v| v.dense_docs.is_none() && v.dense_code.is_none())
        {
            return Err(RetrievalError::NoDenseLanes { causes });
        }
        Ok(vectors)
    }

    async fn embed_query(
        &self,
        plan: &QueryPlan,
        text: &str,
    ) -> (
        std::result::Result<Option<Vec<f32>>, EmbedError>,
        std::result::Result<Option<Vec<f32>>, EmbedError>,
        std::result::Result<Option<SparseVector>, EmbedError>,
    ) {
        let docs = async {
            if !plan.has_lane(Lane::DenseDocs) {
                return Ok(None);
            }
            let out = self
                .docs
                .embed_documents(vec![vec![text.to_owned()]], InputType::Query)
                .await?;
            first(out.into_iter().flatten()).map(Some)
        };
        let code = async {
            if !plan.has_lane(Lane::DenseCode) {
                return Ok(None);
            }
            let out = self.code.embed(vec![text.to_owned()], InputType::Query).await?;
            first(out).map(Some)
        };
        let sparse = async {
            if !plan.has_lane(Lane::SparseLexical) {
                return Ok(None);
            }
            let out = self
                .sparse
                .encode(vec![text.to_owned()], InputType::Query)
                .await?;
            first(out).map(Some)
        };
        tokio::join!(docs, code, sparse)
    }

    /// One hybrid query per variation, fused client-side when there are
    /// several, then converted and deduplicated.
    async fn search(
        &self,
        plan: &QueryPlan,
        vectors: &[QueryVectors],
    ) -> Result<(Vec<Candidate>, Vec<Degradation>)> {
        let queries = vectors
            .iter()
            .filter(|v| v.dense_docs.is_some() || v.dense_code.is_some())
            .map(|v| self.store.query(&self.collection, plan.hybrid_query(v)));
        let mut lists = try_join_all(queries).await?;

        let hits: Vec<ScoredVectorPoint> = if lists.len() == 1 {
            lists.pop().unwrap_or_default()
        } else {
            let named = lists
                .into_iter()
                .enumerate()
                .map(|(i, hits)| (format!("variation_{i}"), hits))
                .collect();
            #[allow(clippy::cast_possible_truncation)]
            let mut fused = rrf::fuse(named, RRF_K, plan.final_limit as usize);
            for hit in &mut fused {
                hit.lanes.retain(|l| !l.starts_with("variation_"));
            }
            fused
        };

        let mut skipped = Vec::new();
        let mut candidates = Vec::with_capacity(hits.len());
        for (i, hit) in hits.into_iter().enumerate() {
            let id = hit.id.clone();
            match Candidate::from_point(hit, i + 1) {
                Ok(c) => candidates.push(c),
                Err(e) => {
                    tracing::warn!(id = %id, error = %e, "point without provenance skipped");
                    skipped.push(Degradation::CandidateSkipped {
                        id,
                        reason: e.to_string(),
                    });
                }
            }
        }
        let fused = candidates.len();
        let deduped = evidence::dedupe(candidates, self.config.soft_dedupe_overlap);
        tracing::debug!(
            fused,
            kept = deduped.len(),
            widened = plan.widened,
            "candidates deduplicated"
        );
        Ok((deduped, skipped))
    }
}

fn first<T>(items: impl IntoIterator<Item = T>) -> std::result::Result<T, EmbedError> {
    items
        .into_iter()
        .next()
        .ok_or(EmbedError::Shape {
            expected: 1,
            got: 0,
        })
}

fn queried_lanes(plan: &QueryPlan, vectors: &[QueryVectors]) -> Vec<Lane> {
    plan.lanes
        .iter()
        .map(|l| l.lane)
        .filter(|lane| {
            vectors.iter().any(|v| match lane {
                Lane::DenseDocs => v.dense_docs.is_some(),
                Lane::DenseCode => v.dense_code.is_some(),
                Lane::SparseLexical => v.sparse.is_some(),
            })
        })
        .collect()
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
