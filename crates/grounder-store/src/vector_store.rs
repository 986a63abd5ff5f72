use std::collections::HashMap;
use std::fmt;

use grounder_embed::{BoxFuture, SparseVector, Transient};
use serde::{Deserialize, Serialize};

/// Name of the sparse lexical vector in every collection.
pub const SPARSE_FIELD: &str = "sparse_lexical";

/// Payload keys that get a keyword index.
pub const INDEXED_PAYLOAD_FIELDS: [&str; 5] = ["corpus", "source", "repo", "commit", "path"];

#[derive(Debug, thiserror::Error)]
pub enum VectorStoreError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("collection error: {0}")]
    Collection(String),
    #[error("collection {0} not found")]
    CollectionNotFound(String),
    #[error("upsert error: {0}")]
    Upsert(String),
    #[error("query error: {0}")]
    Query(String),
    #[error("count error: {0}")]
    Count(String),
    #[error("delete error: {0}")]
    Delete(String),
    #[error("scroll error: {0}")]
    Scroll(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("invalid point {id}: {reason}")]
    InvalidPoint { id: String, reason: String },
}

impl Transient for VectorStoreError {
    fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Upsert(_) | Self::Query(_) | Self::Delete(_)
        )
    }
}

/// One of the two named dense vector fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenseField {
    DenseDocs,
    DenseCode,
}

impl DenseField {
    pub const ALL: [Self; 2] = [Self::DenseDocs, Self::DenseCode];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::DenseDocs => "dense_docs",
            Self::DenseCode => "dense_code",
        }
    }
}

impl fmt::Display for DenseField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DenseVector {
    pub field: DenseField,
    pub values: Vec<f32>,
}

/// A stored point: exactly one named dense vector plus the sparse vector.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorPoint {
    /// UUID string.
    pub id: String,
    pub dense: DenseVector,
    pub sparse: SparseVector,
    pub payload: HashMap<String, serde_json::Value>,
}

/// Collection layout: two equal-dimension cosine dense fields, one sparse field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSchema {
    pub name: String,
    pub dense_dim: u64,
    pub payload_indexes: Vec<String>,
}

impl CollectionSchema {
    #[must_use]
    pub fn new(name: impl Into<String>, dense_dim: u64) -> Self {
        Self {
            name: name.into(),
            dense_dim,
            payload_indexes: INDEXED_PAYLOAD_FIELDS.iter().map(|s| (*s).to_owned()).collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VectorFilter {
    pub must: Vec<FieldCondition>,
    pub must_not: Vec<FieldCondition>,
}

impl VectorFilter {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.must.is_empty() && self.must_not.is_empty()
    }

    #[must_use]
    pub fn must(mut self, field: impl Into<String>, value: FieldValue) -> Self {
        self.must.push(FieldCondition {
            field: field.into(),
            value,
        });
        self
    }

    #[must_use]
    pub fn must_not(mut self, field: impl Into<String>, value: FieldValue) -> Self {
        self.must_not.push(FieldCondition {
            field: field.into(),
            value,
        });
        self
    }

    /// Conjunction of two filters.
    #[must_use]
    pub fn and(mut self, other: &Self) -> Self {
        self.must.extend(other.must.iter().cloned());
        self.must_not.extend(other.must_not.iter().cloned());
        self
    }

    /// Conjunction of optional filters; `None` when neither constrains anything.
    #[must_use]
    pub fn combine(a: Option<&Self>, b: Option<&Self>) -> Option<Self> {
        let merged = match (a, b) {
            (Some(a), Some(b)) => a.clone().and(b),
            (Some(f), None) | (None, Some(f)) => f.clone(),
            (None, None) => return None,
        };
        (!merged.is_empty()).then_some(merged)
    }

    /// Evaluate against a JSON payload, with the semantics the Qdrant
    /// conversion uses.
    #[must_use]
    pub fn matches(&self, payload: &HashMap<String, serde_json::Value>) -> bool {
        self.must
            .iter()
            .all(|c| payload.get(&c.field).is_some_and(|v| c.value.matches(v)))
            && !self
                .must_not
                .iter()
                .any(|c| payload.get(&c.field).is_some_and(|v| c.value.matches(v)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldCondition {
    pub field: String,
    pub value: FieldValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Integer(i64),
    /// Exact keyword match.
    Text(String),
    /// Keyword equal to any of the values.
    Any(Vec<String>),
    /// Substring match on a text field.
    Contains(String),
    Range {
        gte: Option<f64>,
        lte: Option<f64>,
    },
}

impl FieldValue {
    #[must_use]
    pub fn matches(&self, val: &serde_json::Value) -> bool {
        match self {
            Self::Integer(i) => val.as_i64() == Some(*i),
            Self::Text(s) => val.as_str() == Some(s.as_str()),
            Self::Any(values) => val
                .as_str()
                .is_some_and(|v| values.iter().any(|s| s == v)),
            Self::Contains(s) => val.as_str().is_some_and(|v| v.contains(s.as_str())),
            Self::Range { gte, lte } => val.as_f64().is_some_and(|v| {
                gte.is_none_or(|lo| v >= lo) && lte.is_none_or(|hi| v <= hi)
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LaneVector {
    Dense { field: DenseField, values: Vec<f32> },
    Sparse(SparseVector),
}

impl LaneVector {
    #[must_use]
    pub fn field_name(&self) -> &'static str {
        match self {
            Self::Dense { field, .. } => field.name(),
            Self::Sparse(_) => SPARSE_FIELD,
        }
    }
}

/// One prefetch lane of a hybrid query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryLane {
    pub vector: LaneVector,
    pub limit: u64,
    pub filter: Option<VectorFilter>,
}

impl QueryLane {
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.vector.field_name()
    }
}

/// Multi-lane query fused with reciprocal rank fusion in one round trip.
#[derive(Debug, Clone, PartialEq)]
pub struct HybridQuery {
    pub lanes: Vec<QueryLane>,
    /// ANDed into every lane's filter.
    pub filter: Option<VectorFilter>,
    pub final_limit: u64,
    pub hnsw_ef: Option<u64>,
    pub exact: bool,
}

impl HybridQuery {
    /// Effective filter for `lane`: its own conditions plus the global ones.
    #[must_use]
    pub fn lane_filter(&self, lane: &QueryLane) -> Option<VectorFilter> {
        VectorFilter::combine(lane.filter.as_ref(), self.filter.as_ref())
    }
}

#[derive(Debug, Clone)]
pub struct ScoredVectorPoint {
    pub id: String,
    pub score: f32,
    pub payload: HashMap<String, serde_json::Value>,
    /// Lanes that returned this point; empty when the backend fused server-side
    /// without reporting per-lane hits.
    pub lanes: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ScrollRequest {
    pub filter: Option<VectorFilter>,
    pub limit: u32,
    pub offset: Option<String>,
    pub with_vectors: bool,
}

#[derive(Debug, Clone)]
pub struct ScrolledPoint {
    pub id: String,
    pub payload: HashMap<String, serde_json::Value>,
    /// Names of the vectors stored on the point, sorted. Empty unless
    /// requested with `with_vectors`.
    pub vector_names: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ScrollPage {
    pub points: Vec<ScrolledPoint>,
    pub next_offset: Option<String>,
}

pub trait VectorStore: Send + Sync {
    /// Create the collection and payload indexes if missing.
    fn ensure_collection(
        &self,
        schema: &CollectionSchema,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>>;

    fn collection_exists(&self, collection: &str) -> BoxFuture<'_, Result<bool, VectorStoreError>>;

    fn delete_collection(&self, collection: &str) -> BoxFuture<'_, Result<(), VectorStoreError>>;

    /// Insert or fully replace points by id.
    fn upsert(
        &self,
        collection: &str,
        points: Vec<VectorPoint>,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>>;

    fn query(
        &self,
        collection: &str,
        query: HybridQuery,
    ) -> BoxFuture<'_, Result<Vec<ScoredVectorPoint>, VectorStoreError>>;

    fn count(
        &self,
        collection: &str,
        filter: Option<VectorFilter>,
    ) -> BoxFuture<'_, Result<u64, VectorStoreError>>;

    fn scroll(
        &self,
        collection: &str,
        request: ScrollRequest,
    ) -> BoxFuture<'_, Result<ScrollPage, VectorStoreError>>;

    fn delete_by_ids(
        &self,
        collection: &str,
        ids: Vec<String>,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>>;
}
