//! Intent templates to hybrid query plans.

use grounder_embed::SparseVector;
use grounder_index::ContentKind;
use grounder_store::{
    DenseField, FieldValue, HybridQuery, LaneVector, QueryLane, SPARSE_FIELD, VectorFilter,
};
use serde::{Deserialize, Serialize};

use crate::config::RetrievalConfig;
use crate::error::{Result, RetrievalError};
use crate::intent::{self, Intent};

/// One retrieval lane, named after the vector field it searches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lane {
    DenseDocs,
    DenseCode,
    SparseLexical,
}

impl Lane {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::DenseDocs => DenseField::DenseDocs.name(),
            Self::DenseCode => DenseField::DenseCode.name(),
            Self::SparseLexical => SPARSE_FIELD,
        }
    }

    #[must_use]
    pub fn is_dense(self) -> bool {
        !matches!(self, Self::SparseLexical)
    }

    /// Corpus a dense lane narrows to.
    fn own_corpus(self) -> Option<ContentKind> {
        match self {
            Self::DenseDocs => Some(ContentKind::Doc),
            Self::DenseCode => Some(ContentKind::Code),
            Self::SparseLexical => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Template {
    Balanced,
    CodeFocused,
    CodeOnly,
    DocsOnly,
    TargetedFile,
}

impl Template {
    #[must_use]
    pub fn for_intent(intent: Intent) -> Self {
        match intent {
            Intent::General | Intent::HowTo | Intent::Conceptual | Intent::Migration => {
                Self::Balanced
            }
            Intent::Debug | Intent::ApiLookup | Intent::CodeExample => Self::CodeFocused,
            Intent::CodeOnly => Self::CodeOnly,
            Intent::DocsOnly => Self::DocsOnly,
            Intent::TargetedFile => Self::TargetedFile,
        }
    }

    /// Lanes with their candidate limits. The sparse lane is always widest.
    #[must_use]
    pub fn lanes(self) -> &'static [(Lane, u64)] {
        match self {
            Self::Balanced => &[
                (Lane::DenseDocs, 60),
                (Lane::DenseCode, 60),
                (Lane::SparseLexical, 80),
            ],
            Self::CodeFocused => &[
                (Lane::DenseCode, 80),
                (Lane::DenseDocs, 40),
                (Lane::SparseLexical, 100),
            ],
            Self::CodeOnly => &[(Lane::DenseCode, 80), (Lane::SparseLexical, 100)],
            Self::DocsOnly => &[(Lane::DenseDocs, 80), (Lane::SparseLexical, 100)],
            Self::TargetedFile => &[
                (Lane::DenseDocs, 40),
                (Lane::DenseCode, 40),
                (Lane::SparseLexical, 80),
            ],
        }
    }

    fn corpus_filter(self) -> Option<ContentKind> {
        match self {
            Self::CodeOnly => Some(ContentKind::Code),
            Self::DocsOnly => Some(ContentKind::Doc),
            _ => None,
        }
    }
}

/// Inclusive numeric bounds on a payload field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeFilter {
    pub field: String,
    #[serde(default)]
    pub gte: Option<f64>,
    #[serde(default)]
    pub lte: Option<f64>,
}

/// Caller-supplied restrictions, ANDed into the plan's global filter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryFilters {
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub repos: Vec<String>,
    /// Exact path equality.
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default)]
    pub corpora: Vec<ContentKind>,
    #[serde(default)]
    pub ranges: Vec<RangeFilter>,
}

impl QueryFilters {
    #[must_use]
    pub fn to_filter(&self) -> Option<VectorFilter> {
        let mut filter = VectorFilter::default();
        for (field, values) in [
            ("source", &self.sources),
            ("repo", &self.repos),
            ("path", &self.paths),
        ] {
            if let Some(value) = keyword_match(values) {
                filter = filter.must(field, value);
            }
        }
        let corpora: Vec<String> = self.corpora.iter().map(|c| c.as_str().to_owned()).collect();
        if let Some(value) = keyword_match(&corpora) {
            filter = filter.must("corpus", value);
        }
        for range in &self.ranges {
            filter = filter.must(
                range.field.clone(),
                FieldValue::Range {
                    gte: range.gte,
                    lte: range.lte,
                },
            );
        }
        (!filter.is_empty()).then_some(filter)
    }
}

fn keyword_match(values: &[String]) -> Option<FieldValue> {
    match values {
        [] => None,
        [one] => Some(FieldValue::Text(one.clone())),
        many => Some(FieldValue::Any(many.to_vec())),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LanePlan {
    pub lane: Lane,
    pub limit: u64,
    pub filter: Option<VectorFilter>,
}

/// Query vectors for one query text. A missing entry means that lane's
/// embedding failed and the lane is dropped.
#[derive(Debug, Clone, Default)]
pub struct QueryVectors {
    pub dense_docs: Option<Vec<f32>>,
    pub dense_code: Option<Vec<f32>>,
    pub sparse: Option<SparseVector>,
}

impl QueryVectors {
    fn lane_vector(&self, lane: Lane) -> Option<LaneVector> {
        match lane {
            Lane::DenseDocs => self.dense_docs.clone().map(|values| LaneVector::Dense {
                field: DenseField::DenseDocs,
                values,
            }),
            Lane::DenseCode => self.dense_code.clone().map(|values| LaneVector::Dense {
                field: DenseField::DenseCode,
                values,
            }),
            Lane::SparseLexical => self.sparse.clone().map(LaneVector::Sparse),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    /// Normalized query text.
    pub query: String,
    pub intent: Intent,
    pub template: Template,
    pub lanes: Vec<LanePlan>,
    pub filter: Option<VectorFilter>,
    pub final_limit: u64,
    pub hnsw_ef: Option<u64>,
    pub exact: bool,
    /// Query texts to run; more than one only with multi-query expansion.
    pub variations: Vec<String>,
    /// Path token the targeted-file template filters on.
    pub path_token: Option<String>,
    pub widened: bool,
}

impl QueryPlan {
    #[must_use]
    pub fn has_lane(&self, lane: Lane) -> bool {
        self.lanes.iter().any(|l| l.lane == lane)
    }

    /// Same plan with every lane limit and the final limit multiplied.
    #[must_use]
    pub fn widened(&self, factor: u64) -> Self {
        let factor = factor.max(1);
        let mut plan = self.clone();
        for lane in &mut plan.lanes {
            lane.limit = lane.limit.saturating_mul(factor);
        }
        plan.final_limit = plan.final_limit.saturating_mul(factor);
        plan.widened = true;
        plan
    }

    /// Store request over the lanes that have a vector.
    #[must_use]
    pub fn hybrid_query(&self, vectors: &QueryVectors) -> HybridQuery {
        let lanes = self
            .lanes
            .iter()
            .filter_map(|plan| {
                vectors.lane_vector(plan.lane).map(|vector| QueryLane {
                    vector,
                    limit: plan.limit,
                    filter: plan.filter.clone(),
                })
            })
            .collect();
        HybridQuery {
            lanes,
            filter: self.filter.clone(),
            final_limit: self.final_limit,
            hnsw_ef: self.hnsw_ef,
            exact: self.exact,
        }
    }

    #[must_use]
    pub fn summary(&self, queried: &[Lane]) -> PlanSummary {
        PlanSummary {
            template: self.template,
            lanes: self
                .lanes
                .iter()
                .filter(|l| queried.contains(&l.lane))
                .map(|l| LaneSummary {
                    lane: l.lane,
                    limit: l.limit,
                })
                .collect(),
            final_limit: self.final_limit,
            filtered: self.filter.is_some(),
            path_token: self.path_token.clone(),
            variations: self.variations.len(),
            widened: self.widened,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaneSummary {
    pub lane: Lane,
    pub limit: u64,
}

/// Lanes and limits actually queried, reported in the evidence pack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub template: Template,
    pub lanes: Vec<LaneSummary>,
    pub final_limit: u64,
    pub filtered: bool,
    pub path_token: Option<String>,
    pub variations: usize,
    pub widened: bool,
}

/// Trim and collapse internal whitespace.
#[must_use]
pub fn normalize_query(query: &str) -> String {
    query.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// The query plus code-, neutral- and doc-flavoured rewrites.
#[must_use]
pub fn variations(query: &str) -> Vec<String> {
    vec![
        query.to_owned(),
        format!("Source code class or function: {query}"),
        format!("Implementation pattern: {query}"),
        format!("Documentation guide: {query}"),
    ]
}

/// Build the plan for `query`.
///
/// # Errors
///
/// Returns `RetrievalError::EmptyQuery` when the query is blank.
pub fn plan(
    query: &str,
    explicit: Option<Intent>,
    filters: &QueryFilters,
    config: &RetrievalConfig,
) -> Result<QueryPlan> {
    let query = normalize_query(query);
    if query.is_empty() {
        return Err(RetrievalError::EmptyQuery);
    }
    let intent = intent::resolve(explicit, &query);
    let template = Template::for_intent(intent);

    let mut global = filters.to_filter();
    if let Some(corpus) = template.corpus_filter() {
        global = Some(
            global
                .unwrap_or_default()
                .must("corpus", FieldValue::Text(corpus.as_str().to_owned())),
        );
    }
    let path_token = if template == Template::TargetedFile {
        intent::path_token(&query)
    } else {
        None
    };
    if let Some(token) = &path_token {
        global = Some(
            global
                .unwrap_or_default()
                .must("path", FieldValue::Contains(token.clone())),
        );
    }
    if template == Template::TargetedFile && path_token.is_none() {
        tracing::debug!(query = %query, "targeted-file intent without a path token, path filter skipped");
    }

    let lanes = template
        .lanes()
        .iter()
        .map(|&(lane, limit)| LanePlan {
            lane,
            limit,
            filter: lane.own_corpus().map(|corpus| {
                VectorFilter::default().must("corpus", FieldValue::Text(corpus.as_str().to_owned()))
            }),
        })
        .collect();

    let variations = if config.multi_query {
        variations(&query)
    } else {
        vec![query.clone()]
    };

    tracing::debug!(%intent, ?template, variations = variations.len(), "query planned");
    Ok(QueryPlan {
        query,
        intent,
        template,
        lanes,
        filter: global,
        final_limit: config.final_limit,
        hnsw_ef: config.hnsw_ef,
        exact: config.exact,
        variations,
        path_token,
        widened: false,
    })
}
