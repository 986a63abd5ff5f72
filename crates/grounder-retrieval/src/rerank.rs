//! Cross-encoder rerank stage: candidate balancing, formatting and limits.

use std::fmt::Write;

use grounder_embed::{EmbedError, Reranker};
use grounder_index::ContentKind;

use crate::evidence::Candidate;
use crate::intent::Intent;

/// Provenance header plus chunk text, so the reranker scores identity and
/// content together.
#[must_use]
pub fn format_candidate(c: &Candidate) -> String {
    let mut out = String::with_capacity(c.text.len() + 160);
    let _ = writeln!(out, "SOURCE_TYPE: {}", c.corpus);
    let _ = writeln!(out, "REPO: {}", c.repo);
    let _ = writeln!(out, "REF: {}", c.commit);
    let _ = writeln!(out, "PATH: {}", c.path);
    match c.lines() {
        Some((s, e)) => {
            let _ = writeln!(out, "LINES: {s}-{e}");
        }
        None => out.push_str("LINES: none\n"),
    }
    let _ = writeln!(out, "CHUNK_ID: {}", c.chunk_id);
    out.push('\n');
    out.push_str(&c.text);
    out
}

#[must_use]
pub fn rerank_query(intent: Intent, query: &str) -> String {
    format!("{}\nQUERY: {query}", intent.rerank_instruction())
}

#[must_use]
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Indices into `pool` (best first) for up to `target` candidates: half per
/// corpus, with the other corpus filling any slots one side cannot. Returned
/// in pool order. Corpus-forced pools are cut without balancing.
#[must_use]
pub fn balance(pool: &[Candidate], target: usize, forced: bool) -> Vec<usize> {
    if forced || pool.len() <= target {
        return (0..pool.len().min(target)).collect();
    }
    let of = |kind: ContentKind| -> Vec<usize> {
        pool.iter()
            .enumerate()
            .filter(|(_, c)| c.corpus == kind)
            .map(|(i, _)| i)
            .collect()
    };
    let docs = of(ContentKind::Doc);
    let code = of(ContentKind::Code);

    let half = target / 2;
    let take_docs = docs.len().min(target - half.min(code.len()));
    let take_code = code.len().min(target - take_docs);

    let mut picked: Vec<usize> = docs[..take_docs]
        .iter()
        .chain(&code[..take_code])
        .copied()
        .collect();
    picked.sort_unstable();
    picked
}

/// Enforce the document count and aggregate token budget by dropping the
/// lowest-fused tail. `picked` must be in pool order.
#[must_use]
pub fn apply_limits(
    pool: &[Candidate],
    mut picked: Vec<usize>,
    max_documents: usize,
    token_budget: usize,
) -> Vec<usize> {
    picked.truncate(max_documents);
    let mut total: usize = picked
        .iter()
        .map(|&i| estimate_tokens(&format_candidate(&pool[i])))
        .sum();
    while total > token_budget
        && let Some(i) = picked.pop()
    {
        total -= estimate_tokens(&format_candidate(&pool[i]));
    }
    picked
}

/// Limits applied before a rerank call.
#[derive(Debug, Clone, Copy)]
pub struct RerankLimits {
    pub candidates: usize,
    pub max_documents: usize,
    pub token_budget: usize,
}

/// Rerank `pool` (fused order). Scored candidates come first by descending
/// relevance; candidates not sent or not returned follow in fused order.
///
/// # Errors
///
/// Returns the reranker's error; the caller keeps the fused order.
pub async fn rerank(
    reranker: &dyn Reranker,
    intent: Intent,
    query: &str,
    pool: Vec<Candidate>,
    limits: RerankLimits,
) -> Result<Vec<Candidate>, EmbedError> {
    let forced = intent.is_corpus_forced();
    let picked = apply_limits(
        &pool,
        balance(&pool, limits.candidates, forced),
        limits.max_documents,
        limits.token_budget,
    );
    if picked.is_empty() {
        return Ok(pool);
    }

    let documents: Vec<String> = picked.iter().map(|&i| format_candidate(&pool[i])).collect();
    let sent = documents.len();
    let hits = reranker
        .rerank(rerank_query(intent, query), documents, sent)
        .await?;
    tracing::debug!(reranker = reranker.name(), sent, returned = hits.len(), "rerank complete");

    let mut slots: Vec<Option<Candidate>> = pool.into_iter().map(Some).collect();
    let mut ordered = Vec::with_capacity(slots.len());
    for hit in hits {
        let Some(&pool_index) = picked.get(hit.index) else {
            tracing::warn!(index = hit.index, sent, "reranker returned out-of-range index");
            continue;
        };
        if let Some(mut c) = slots[pool_index].take() {
            c.rerank_score = Some(hit.relevance_score);
            ordered.push(c);
        }
    }
    ordered.extend(slots.into_iter().flatten());
    Ok(ordered)
}
