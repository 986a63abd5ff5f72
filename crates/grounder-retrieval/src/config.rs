use serde::{Deserialize, Serialize};

/// Query-side tuning. Lane limits come from the intent template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Items in the final evidence pack.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Fused candidates requested from the store.
    #[serde(default = "default_final_limit")]
    pub final_limit: u64,
    #[serde(default = "default_true")]
    pub rerank: bool,
    /// Candidates sent to the reranker after corpus balancing.
    #[serde(default = "default_rerank_candidates")]
    pub rerank_candidates: usize,
    #[serde(default = "default_rerank_max_documents")]
    pub rerank_max_documents: usize,
    /// Aggregate token budget for rerank documents, estimated as chars / 4.
    #[serde(default = "default_rerank_token_budget")]
    pub rerank_token_budget: usize,
    /// Minimum share of each corpus in a mixed pack.
    #[serde(default = "default_coverage_ratio")]
    pub coverage_ratio: f64,
    /// Multiplier for lane limits on the single widened re-issue.
    #[serde(default = "default_widen_factor")]
    pub widen_factor: u64,
    /// Minimum overlap, as a share of the shorter range, for soft dedupe.
    #[serde(default = "default_soft_overlap")]
    pub soft_dedupe_overlap: f64,
    #[serde(default = "default_hnsw_ef")]
    pub hnsw_ef: Option<u64>,
    #[serde(default)]
    pub exact: bool,
    /// Run code-, neutral- and doc-flavoured variations and fuse client-side.
    #[serde(default)]
    pub multi_query: bool,
}

fn default_top_k() -> usize {
    12
}

fn default_final_limit() -> u64 {
    150
}

fn default_true() -> bool {
    true
}

fn default_rerank_candidates() -> usize {
    60
}

fn default_rerank_max_documents() -> usize {
    100
}

fn default_rerank_token_budget() -> usize {
    120_000
}

fn default_coverage_ratio() -> f64 {
    0.30
}

fn default_widen_factor() -> u64 {
    2
}

fn default_soft_overlap() -> f64 {
    0.60
}

#[allow(clippy::unnecessary_wraps)]
fn default_hnsw_ef() -> Option<u64> {
    Some(128)
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            final_limit: default_final_limit(),
            rerank: default_true(),
            rerank_candidates: default_rerank_candidates(),
            rerank_max_documents: default_rerank_max_documents(),
            rerank_token_budget: default_rerank_token_budget(),
            coverage_ratio: default_coverage_ratio(),
            widen_factor: default_widen_factor(),
            soft_dedupe_overlap: default_soft_overlap(),
            hnsw_ef: default_hnsw_ef(),
            exact: false,
            multi_query: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_section_uses_defaults() {
        let cfg: RetrievalConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg, RetrievalConfig::default());
        assert_eq!(cfg.hnsw_ef, Some(128));
        assert!(cfg.rerank);
        assert!(!cfg.multi_query);
    }
}
