//! Candidate post-processing and evidence-pack assembly.
//!
//! Order is fixed: hard dedupe, soft dedupe, coverage quota, stable sort,
//! citation formatting.

use std::collections::{BTreeMap, HashSet};
use std::fmt::{self, Write};

use grounder_index::ContentKind;
use grounder_index::record::short_commit;
use grounder_store::ScoredVectorPoint;
use serde::{Deserialize, Serialize};

use crate::intent::Intent;
use crate::planner::{Lane, PlanSummary};

/// One retrieved chunk with its provenance, carried through dedupe and rerank.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub point_id: String,
    pub chunk_id: String,
    pub corpus: ContentKind,
    pub source: String,
    pub repo: String,
    pub git_ref: String,
    pub commit: String,
    pub path: String,
    pub start_line: Option<usize>,
    pub end_line: Option<usize>,
    pub symbol: Option<String>,
    pub text: String,
    /// 1-based position in the fused list.
    pub fused_rank: usize,
    pub fused_score: f32,
    pub rerank_score: Option<f32>,
    /// Lanes that returned the point; empty when fused server-side.
    pub lanes: Vec<String>,
}

#[derive(Deserialize)]
struct StoredChunk {
    chunk_id: String,
    corpus: ContentKind,
    #[serde(default)]
    source: String,
    repo: String,
    #[serde(rename = "ref", default)]
    git_ref: String,
    commit: String,
    path: String,
    #[serde(default)]
    start_line: Option<usize>,
    #[serde(default)]
    end_line: Option<usize>,
    #[serde(default)]
    symbol: Option<String>,
    text: String,
}

impl Candidate {
    /// Read the chunk fields back out of a stored point's payload.
    ///
    /// # Errors
    ///
    /// Returns an error if a required provenance field is missing or mistyped.
    pub fn from_point(point: ScoredVectorPoint, fused_rank: usize) -> serde_json::Result<Self> {
        let stored: StoredChunk =
            serde_json::from_value(serde_json::Value::Object(point.payload.into_iter().collect()))?;
        Ok(Self {
            point_id: point.id,
            chunk_id: stored.chunk_id,
            corpus: stored.corpus,
            source: stored.source,
            repo: stored.repo,
            git_ref: stored.git_ref,
            commit: stored.commit,
            path: stored.path,
            start_line: stored.start_line,
            end_line: stored.end_line,
            symbol: stored.symbol,
            text: stored.text,
            fused_rank,
            fused_score: point.score,
            rerank_score: None,
            lanes: point.lanes,
        })
    }

    #[must_use]
    pub fn lines(&self) -> Option<(usize, usize)> {
        match (self.start_line, self.end_line) {
            (Some(s), Some(e)) if s <= e => Some((s, e)),
            _ => None,
        }
    }
}

#[derive(Hash, PartialEq, Eq)]
enum HardKey<'a> {
    Span(&'a str, &'a str, usize, usize),
    Chunk(&'a str),
}

/// Collapse identical `(repo, path, start, end)` spans, keeping the first
/// (highest ranked). Items without lines key on `chunk_id`.
#[must_use]
pub fn hard_dedupe(candidates: Vec<Candidate>) -> Vec<Candidate> {
    let mut keep = vec![false; candidates.len()];
    {
        let mut seen = HashSet::new();
        for (i, c) in candidates.iter().enumerate() {
            let key = match c.lines() {
                Some((s, e)) => HardKey::Span(&c.repo, &c.path, s, e),
                None => HardKey::Chunk(&c.chunk_id),
            };
            keep[i] = seen.insert(key);
        }
    }
    candidates
        .into_iter()
        .zip(keep)
        .filter_map(|(c, k)| k.then_some(c))
        .collect()
}

/// Drop items whose line range overlaps an already kept item of the same
/// file by at least `min_overlap` of the shorter range.
#[must_use]
pub fn soft_dedupe(candidates: Vec<Candidate>, min_overlap: f64) -> Vec<Candidate> {
    let mut kept: Vec<Candidate> = Vec::with_capacity(candidates.len());
    for c in candidates {
        let duplicate = c.lines().is_some_and(|range| {
            kept.iter().any(|k| {
                k.repo == c.repo
                    && k.path == c.path
                    && k.lines()
                        .is_some_and(|other| overlap_share(range, other) >= min_overlap)
            })
        });
        if !duplicate {
            kept.push(c);
        }
    }
    kept
}

/// Overlap of two inclusive ranges as a share of the shorter one.
#[allow(clippy::cast_precision_loss)]
fn overlap_share(a: (usize, usize), b: (usize, usize)) -> f64 {
    let lo = a.0.max(b.0);
    let hi = a.1.min(b.1);
    if hi < lo {
        return 0.0;
    }
    let shorter = (a.1 - a.0 + 1).min(b.1 - b.0 + 1);
    (hi - lo + 1) as f64 / shorter as f64
}

#[must_use]
pub fn dedupe(candidates: Vec<Candidate>, min_overlap: f64) -> Vec<Candidate> {
    soft_dedupe(hard_dedupe(candidates), min_overlap)
}

/// Minimum items per corpus in a list of `n`: `ceil(ratio * n)`, capped at
/// `n / 2` so both corpora can always be reserved.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn quota(n: usize, ratio: f64) -> usize {
    // 1e-9 keeps products like 0.3 * 20 from rounding up past an integer.
    let wanted = (ratio * n as f64 - 1e-9).ceil().max(0.0) as usize;
    wanted.min(n / 2)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coverage {
    pub doc: usize,
    pub code: usize,
}

impl Coverage {
    #[must_use]
    pub fn of<'a>(items: impl IntoIterator<Item = &'a Candidate>) -> Self {
        let mut cov = Self::default();
        for c in items {
            match c.corpus {
                ContentKind::Doc => cov.doc += 1,
                ContentKind::Code => cov.code += 1,
            }
        }
        cov
    }
}

/// Whether `pool` holds enough of each corpus to fill a pack of `n` under
/// the quota.
#[must_use]
pub fn pool_satisfies_quota(pool: &[Candidate], n: usize, ratio: f64) -> bool {
    let required = quota(n.min(pool.len()), ratio);
    let cov = Coverage::of(pool);
    cov.doc >= required && cov.code >= required
}

#[derive(Debug)]
pub struct Selection {
    pub items: Vec<Candidate>,
    /// Set when the quota could not be met from the pool.
    pub shortfall: Option<Degradation>,
}

/// Take `n` items from `ranked` (best first). Unless `forced`, the top
/// `quota(n)` items of each corpus are reserved before the remaining slots
/// are filled in rank order. Output keeps `ranked` order.
#[must_use]
pub fn select(ranked: Vec<Candidate>, n: usize, ratio: f64, forced: bool) -> Selection {
    let n = n.min(ranked.len());
    if forced {
        let mut items = ranked;
        items.truncate(n);
        return Selection {
            items,
            shortfall: None,
        };
    }

    let required = quota(n, ratio);
    let mut chosen = vec![false; ranked.len()];
    for corpus in [ContentKind::Doc, ContentKind::Code] {
        for (i, _) in ranked
            .iter()
            .enumerate()
            .filter(|(_, c)| c.corpus == corpus)
            .take(required)
        {
            chosen[i] = true;
        }
    }
    let mut reserved = chosen.iter().filter(|c| **c).count();
    for flag in &mut chosen {
        if reserved >= n {
            break;
        }
        if !*flag {
            *flag = true;
            reserved += 1;
        }
    }

    let items: Vec<Candidate> = ranked
        .into_iter()
        .zip(chosen)
        .filter_map(|(c, k)| k.then_some(c))
        .collect();
    let cov = Coverage::of(&items);
    let shortfall = (cov.doc < required || cov.code < required).then_some(
        Degradation::CoverageShortfall {
            required,
            doc: cov.doc,
            code: cov.code,
        },
    );
    Selection { items, shortfall }
}

/// Stable sort: reranked items first by relevance, then the rest by fused
/// score; ties by `(repo, path, start_line)`.
pub fn sort_ranked(items: &mut [Candidate]) {
    items.sort_by(|a, b| {
        b.rerank_score
            .is_some()
            .cmp(&a.rerank_score.is_some())
            .then_with(|| match (a.rerank_score, b.rerank_score) {
                (Some(x), Some(y)) => y.total_cmp(&x),
                _ => b.fused_score.total_cmp(&a.fused_score),
            })
            .then_with(|| a.repo.cmp(&b.repo))
            .then_with(|| a.path.cmp(&b.path))
            .then_with(|| a.start_line.cmp(&b.start_line))
    });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Low,
}

/// Citation string and how precisely it locates the evidence.
#[must_use]
pub fn citation(c: &Candidate) -> (String, Confidence) {
    let base = format!("{}@{}:{}", c.repo, short_commit(&c.commit), c.path);
    match (c.corpus, c.lines()) {
        (ContentKind::Doc, _) => (format!("{base}#{}", c.chunk_id), Confidence::High),
        (ContentKind::Code, Some((s, e))) => (format!("{base}#L{s}-L{e}"), Confidence::High),
        (ContentKind::Code, None) => (format!("{base}#{}", c.chunk_id), Confidence::Low),
    }
}

/// Recoverable problems met while answering a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Degradation {
    /// A dense lane's query embedding failed; the lane was not queried.
    LaneDropped { lane: Lane, reason: String },
    SparseDropped { reason: String },
    /// Results are in fused order.
    RerankUnavailable { reason: String },
    /// The pool was widened and re-queried to meet the coverage quota.
    PoolWidened { factor: u64 },
    CoverageShortfall {
        required: usize,
        doc: usize,
        code: usize,
    },
    /// A stored point lacked provenance fields.
    CandidateSkipped { id: String, reason: String },
}

impl Degradation {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::LaneDropped { .. } => "lane_dropped",
            Self::SparseDropped { .. } => "sparse_dropped",
            Self::RerankUnavailable { .. } => "rerank_unavailable",
            Self::PoolWidened { .. } => "pool_widened",
            Self::CoverageShortfall { .. } => "coverage_shortfall",
            Self::CandidateSkipped { .. } => "candidate_skipped",
        }
    }
}

impl fmt::Display for Degradation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LaneDropped { lane, reason } => {
                write!(f, "lane {} dropped: {reason}", lane.name())
            }
            Self::SparseDropped { reason } => write!(f, "sparse lane dropped: {reason}"),
            Self::RerankUnavailable { reason } => {
                write!(f, "rerank unavailable, fused order kept: {reason}")
            }
            Self::PoolWidened { factor } => write!(f, "candidate pool widened x{factor}"),
            Self::CoverageShortfall {
                required,
                doc,
                code,
            } => write!(
                f,
                "coverage shortfall: need {required} per corpus, got doc={doc} code={code}"
            ),
            Self::CandidateSkipped { id, reason } => write!(f, "point {id} skipped: {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceItem {
    /// Equal to the chunk id.
    pub evidence_id: String,
    pub rank: usize,
    pub score: f32,
    pub fused_rank: usize,
    pub corpus: ContentKind,
    pub source: String,
    pub repo: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub commit: String,
    pub path: String,
    pub start_line: Option<usize>,
    pub end_line: Option<usize>,
    pub symbol: Option<String>,
    pub text: String,
    /// Contributing lanes followed by `reranked` or `fused`.
    pub retrieval_route: Vec<String>,
    pub citation: String,
    pub citation_confidence: Confidence,
}

impl EvidenceItem {
    #[must_use]
    pub fn new(c: Candidate, rank: usize) -> Self {
        let (citation, citation_confidence) = citation(&c);
        let mut retrieval_route = c.lanes;
        retrieval_route.push(if c.rerank_score.is_some() {
            "reranked".to_owned()
        } else {
            "fused".to_owned()
        });
        Self {
            evidence_id: c.chunk_id,
            rank,
            score: c.rerank_score.unwrap_or(c.fused_score),
            fused_rank: c.fused_rank,
            corpus: c.corpus,
            source: c.source,
            repo: c.repo,
            git_ref: c.git_ref,
            commit: c.commit,
            path: c.path,
            start_line: c.start_line,
            end_line: c.end_line,
            symbol: c.symbol,
            text: c.text,
            retrieval_route,
            citation,
            citation_confidence,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidencePack {
    pub query: String,
    pub intent: Intent,
    pub items: Vec<EvidenceItem>,
    pub coverage: Coverage,
    pub warnings: Vec<Degradation>,
    pub plan: PlanSummary,
    pub timings_ms: BTreeMap<String, u64>,
}

impl EvidencePack {
    #[must_use]
    pub fn has_warning(&self, code: &str) -> bool {
        self.warnings.iter().any(|w| w.code() == code)
    }

    /// Render the items as tagged blocks for prompt injection.
    #[must_use]
    pub fn format_as_context(&self) -> String {
        if self.items.is_empty() {
            return String::new();
        }
        let mut out = String::from("<evidence>\n");
        for item in &self.items {
            let _ = writeln!(
                out,
                "  <item rank=\"{}\" corpus=\"{}\" cite=\"{}\" score=\"{:.3}\">",
                item.rank, item.corpus, item.citation, item.score,
            );
            out.push_str(&item.text);
            out.push_str("\n  </item>\n");
        }
        out.push_str("</evidence>");
        out
    }
}

/// Sort the selected candidates and number them from 1.
#[must_use]
pub fn rank_items(mut selected: Vec<Candidate>) -> Vec<EvidenceItem> {
    sort_ranked(&mut selected);
    selected
        .into_iter()
        .enumerate()
        .map(|(i, c)| EvidenceItem::new(c, i + 1))
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashMap;

    use super::*;

    pub(crate) fn candidate(
        id: &str,
        corpus: ContentKind,
        path: &str,
        lines: Option<(usize, usize)>,
        fused_rank: usize,
    ) -> Candidate {
        #[allow(clippy::cast_precision_loss)]
        let fused_score = 1.0 / (60.0 + fused_rank as f32);
        Candidate {
            point_id: format!("p-{id}"),
            chunk_id: id.to_owned(),
            corpus,
            source: "src".into(),
            repo: "google/adk".into(),
            git_ref: "main".into(),
            commit: "0123456789abcdef".into(),
            path: path.into(),
            start_line: lines.map(|l| l.0),
            end_line: lines.map(|l| l.1),
            symbol: None,
            text: format!("text of {id}"),
            fused_rank,
            fused_score,
            rerank_score: None,
            lanes: vec!["dense_code".into()],
        }
    }

    fn ids(items: &[Candidate]) -> Vec<&str> {
        items.iter().map(|c| c.chunk_id.as_str()).collect()
    }

    #[test]
    fn from_point_reads_payload() {
        let payload: HashMap<String, serde_json::Value> = serde_json::json!({
            "chunk_id": "abc", "corpus": "code", "source": "adk_python",
            "repo": "google/adk-python", "ref": "main", "commit": "0123456789",
            "path": "a.py", "start_line": 3, "end_line": 9, "symbol": "run",
            "text": "def run(): ...", "kind": "function"
        })
        .as_object()
        .unwrap()
        .clone()
        .into_iter()
        .collect();
        let c = Candidate::from_point(
            ScoredVectorPoint {
                id: "uuid".into(),
                score: 0.5,
                payload,
                lanes: vec![],
            },
            1,
        )
        .unwrap();
        assert_eq!(c.lines(), Some((3, 9)));
        assert_eq!(c.git_ref, "main");
        assert_eq!(c.symbol.as_deref(), Some("run"));
    }

    #[test]
    fn from_point_rejects_missing_provenance() {
        let err = Candidate::from_point(
            ScoredVectorPoint {
                id: "uuid".into(),
                score: 0.5,
                payload: HashMap::new(),
                lanes: vec![],
            },
            1,
        );
        assert!(err.is_err());
    }

    #[test]
    fn hard_dedupe_keeps_highest_ranked() {
        let a = candidate("a", ContentKind::Code, "x.py", Some((1, 10)), 1);
        let b = candidate("b", ContentKind::Code, "x.py", Some((1, 10)), 2);
        let c = candidate("c", ContentKind::Code, "x.py", Some((11, 20)), 3);
        let d = candidate("d", ContentKind::Doc, "g.md", None, 4);
        let e = candidate("d", ContentKind::Doc, "g.md", None, 5);
        let out = hard_dedupe(vec![a, b, c, d, e]);
        assert_eq!(ids(&out), vec!["a", "c", "d"]);
        assert_eq!(out[2].fused_rank, 4);
    }

    #[test]
    fn soft_dedupe_uses_shorter_range() {
        let big = candidate("big", ContentKind::Code, "x.py", Some((1, 100)), 1);
        // Fully inside the bigger range.
        let inner = candidate("inner", ContentKind::Code, "x.py", Some((10, 14)), 2);
        // 5 of 10 lines overlap: below 60%.
        let edge = candidate("edge", ContentKind::Code, "y.py", Some((6, 15)), 3);
        let base = candidate("base", ContentKind::Code, "y.py", Some((1, 10)), 4);
        let other_file = candidate("other", ContentKind::Code, "z.py", Some((1, 100)), 5);
        let out = soft_dedupe(vec![big, inner, edge, base, other_file], 0.6);
        assert_eq!(ids(&out), vec!["big", "edge", "base", "other"]);
    }

    #[test]
    fn overlap_share_boundaries() {
        assert!((overlap_share((1, 10), (5, 14)) - 0.6).abs() < 1e-9);
        assert!(overlap_share((1, 5), (6, 9)).abs() < f64::EPSILON);
    }

    #[test]
    fn quota_rounds_up() {
        assert_eq!(quota(10, 0.3), 3);
        assert_eq!(quota(12, 0.3), 4);
        assert_eq!(quota(0, 0.3), 0);
        assert_eq!(quota(1, 0.3), 0);
        assert_eq!(quota(3, 0.5), 1);
    }

    #[test]
    fn selection_reserves_each_corpus() {
        let mut ranked: Vec<Candidate> = (1..=8)
            .map(|i| candidate(&format!("c{i}"), ContentKind::Code, &format!("c{i}.py"), None, i))
            .collect();
        ranked.push(candidate("d1", ContentKind::Doc, "d1.md", None, 9));
        ranked.push(candidate("d2", ContentKind::Doc, "d2.md", None, 10));
        ranked.push(candidate("d3", ContentKind::Doc, "d3.md", None, 11));

        let sel = select(ranked, 5, 0.3, false);
        assert!(sel.shortfall.is_none());
        let cov = Coverage::of(&sel.items);
        assert_eq!(cov, Coverage { doc: 2, code: 3 });
        assert_eq!(ids(&sel.items), vec!["c1", "c2", "c3", "d1", "d2"]);
    }

    #[test]
    fn selection_reports_shortfall() {
        let mut ranked: Vec<Candidate> = (1..=6)
            .map(|i| candidate(&format!("c{i}"), ContentKind::Code, &format!("c{i}.py"), None, i))
            .collect();
        ranked.push(candidate("d1", ContentKind::Doc, "d1.md", None, 7));
        let sel = select(ranked, 5, 0.3, false);
        assert_eq!(sel.items.len(), 5);
        assert_eq!(
            sel.shortfall,
            Some(Degradation::CoverageShortfall {
                required: 2,
                doc: 1,
                code: 4
            })
        );
    }

    #[test]
    fn forced_selection_ignores_quota() {
        let ranked: Vec<Candidate> = (1..=4)
            .map(|i| candidate(&format!("c{i}"), ContentKind::Code, "c.py", None, i))
            .collect();
        let sel = select(ranked, 3, 0.3, true);
        assert_eq!(sel.items.len(), 3);
        assert!(sel.shortfall.is_none());
    }

    #[test]
    fn sort_breaks_ties_by_location() {
        let mut a = candidate("a", ContentKind::Code, "b.py", Some((5, 6)), 1);
        let mut b = candidate("b", ContentKind::Code, "a.py", Some((9, 9)), 2);
        let mut c = candidate("c", ContentKind::Code, "a.py", Some((1, 2)), 3);
        let d = candidate("d", ContentKind::Doc, "z.md", None, 4);
        a.rerank_score = Some(0.5);
        b.rerank_score = Some(0.5);
        c.rerank_score = Some(0.9);
        let mut items = vec![d, a, b, c];
        sort_ranked(&mut items);
        assert_eq!(ids(&items), vec!["c", "b", "a", "d"]);
    }

    #[test]
    fn citations_follow_corpus_and_lines() {
        let doc = candidate("docid", ContentKind::Doc, "docs/agents.md", Some((1, 4)), 1);
        let code = candidate("codeid", ContentKind::Code, "src/runner.py", Some((12, 40)), 2);
        let bare = candidate("bareid", ContentKind::Code, "src/runner.py", None, 3);
        assert_eq!(
            citation(&doc),
            ("google/adk@0123456:docs/agents.md#docid".into(), Confidence::High)
        );
        assert_eq!(
            citation(&code),
            ("google/adk@0123456:src/runner.py#L12-L40".into(), Confidence::High)
        );
        assert_eq!(
            citation(&bare),
            ("google/adk@0123456:src/runner.py#bareid".into(), Confidence::Low)
        );
    }

    #[test]
    fn items_record_route_and_rank() {
        let mut a = candidate("a", ContentKind::Code, "a.py", Some((1, 2)), 2);
        a.rerank_score = Some(0.8);
        let b = candidate("b", ContentKind::Doc, "b.md", None, 1);
        let items = rank_items(vec![b, a]);
        assert_eq!(items[0].evidence_id, "a");
        assert_eq!(items[0].rank, 1);
        assert_eq!(items[0].retrieval_route, vec!["dense_code", "reranked"]);
        assert_eq!(items[1].retrieval_route, vec!["dense_code", "fused"]);
        assert_eq!(items[1].fused_rank, 1);
    }

    proptest::proptest! {
        #[test]
        fn selection_meets_quota_when_pool_allows(
            kinds in proptest::collection::vec(proptest::bool::ANY, 1..40),
            n in 1usize..20,
        ) {
            let ranked: Vec<Candidate> = kinds
                .iter()
                .enumerate()
                .map(|(i, is_doc)| {
                    let kind = if *is_doc { ContentKind::Doc } else { ContentKind::Code };
                    candidate(&format!("c{i}"), kind, &format!("f{i}"), None, i + 1)
                })
                .collect();
            let pool_ok = pool_satisfies_quota(&ranked, n, 0.3);
            let expected_len = n.min(ranked.len());
            let sel = select(ranked, n, 0.3, false);
            proptest::prop_assert_eq!(sel.items.len(), expected_len);
            proptest::prop_assert_eq!(sel.shortfall.is_none(), pool_ok);
            let ranks: Vec<usize> = sel.items.iter().map(|c| c.fused_rank).collect();
            let mut sorted = ranks.clone();
            sorted.sort_unstable();
            proptest::prop_assert_eq!(ranks, sorted);
        }
    }

    #[test]
    fn degradations_serialize_with_kind() {
        let w = Degradation::LaneDropped {
            lane: Lane::DenseDocs,
            reason: "503".into(),
        };
        let v = serde_json::to_value(&w).unwrap();
        assert_eq!(v["kind"], "lane_dropped");
        assert_eq!(v["lane"], "dense_docs");
        assert_eq!(w.code(), "lane_dropped");
    }
}
