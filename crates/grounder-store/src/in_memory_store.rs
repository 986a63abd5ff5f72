use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use grounder_embed::{BoxFuture, SparseVector};

use crate::rrf;
use crate::vector_store::{
    CollectionSchema, DenseVector, HybridQuery, LaneVector, SPARSE_FIELD, ScoredVectorPoint,
    ScrollPage, ScrollRequest, ScrolledPoint, VectorFilter, VectorPoint, VectorStore,
    VectorStoreError,
};

struct StoredPoint {
    dense: DenseVector,
    sparse: SparseVector,
    payload: HashMap<String, serde_json::Value>,
}

struct InMemoryCollection {
    dense_dim: u64,
    // Ordered by id so scroll pagination is stable.
    points: BTreeMap<String, StoredPoint>,
}

/// Process-local store with the same query semantics as the Qdrant adapter:
/// per-lane scoring, reciprocal rank fusion with `k = 60`, payload filters.
pub struct InMemoryVectorStore {
    collections: RwLock<HashMap<String, InMemoryCollection>>,
}

impl InMemoryVectorStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryVectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryVectorStore")
            .finish_non_exhaustive()
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

fn lane_score(vector: &LaneVector, point: &StoredPoint) -> Option<f32> {
    match vector {
        LaneVector::Dense { field, values } => {
            (point.dense.field == *field).then(|| cosine_similarity(values, &point.dense.values))
        }
        LaneVector::Sparse(q) => {
            let score = q.dot(&point.sparse);
            (score > 0.0).then_some(score)
        }
    }
}

fn passes(filter: Option<&VectorFilter>, payload: &HashMap<String, serde_json::Value>) -> bool {
    filter.is_none_or(|f| f.matches(payload))
}

impl VectorStore for InMemoryVectorStore {
    fn ensure_collection(
        &self,
        schema: &CollectionSchema,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let name = schema.name.clone();
        let dense_dim = schema.dense_dim;
        Box::pin(async move {
            let mut cols = self
                .collections
                .write()
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            cols.entry(name).or_insert_with(|| InMemoryCollection {
                dense_dim,
                points: BTreeMap::new(),
            });
            Ok(())
        })
    }

    fn collection_exists(&self, collection: &str) -> BoxFuture<'_, Result<bool, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let cols = self
                .collections
                .read()
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            Ok(cols.contains_key(&collection))
        })
    }

    fn delete_collection(&self, collection: &str) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let mut cols = self
                .collections
                .write()
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            cols.remove(&collection);
            Ok(())
        })
    }

    fn upsert(
        &self,
        collection: &str,
        points: Vec<VectorPoint>,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let mut cols = self
                .collections
                .write()
                .map_err(|e| VectorStoreError::Upsert(e.to_string()))?;
            let col = cols
                .get_mut(&collection)
                .ok_or(VectorStoreError::CollectionNotFound(collection))?;
            for p in &points {
                if p.dense.values.len() as u64 != col.dense_dim {
                    return Err(VectorStoreError::InvalidPoint {
                        id: p.id.clone(),
                        reason: format!(
                            "{} has {} dimensions, collection expects {}",
                            p.dense.field,
                            p.dense.values.len(),
                            col.dense_dim
                        ),
                    });
                }
            }
            for p in points {
                col.points.insert(
                    p.id,
                    StoredPoint {
                        dense: p.dense,
                        sparse: p.sparse,
                        payload: p.payload,
                    },
                );
            }
            Ok(())
        })
    }

    fn query(
        &self,
        collection: &str,
        query: HybridQuery,
    ) -> BoxFuture<'_, Result<Vec<ScoredVectorPoint>, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let cols = self
                .collections
                .read()
                .map_err(|e| VectorStoreError::Query(e.to_string()))?;
            let col = cols
                .get(&collection)
                .ok_or(VectorStoreError::CollectionNotFound(collection))?;

            let mut lists = Vec::with_capacity(query.lanes.len());
            for lane in &query.lanes {
                let filter = query.lane_filter(lane);
                let mut hits: Vec<ScoredVectorPoint> = col
                    .points
                    .iter()
                    .filter(|(_, sp)| passes(filter.as_ref(), &sp.payload))
                    .filter_map(|(id, sp)| {
                        lane_score(&lane.vector, sp).map(|score| ScoredVectorPoint {
                            id: id.clone(),
                            score,
                            payload: sp.payload.clone(),
                            lanes: Vec::new(),
                        })
                    })
                    .collect();
                hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
                hits.truncate(usize::try_from(lane.limit).unwrap_or(usize::MAX));
                lists.push((lane.name().to_owned(), hits));
            }

            Ok(rrf::fuse(
                lists,
                rrf::RRF_K,
                usize::try_from(query.final_limit).unwrap_or(usize::MAX),
            ))
        })
    }

    fn count(
        &self,
        collection: &str,
        filter: Option<VectorFilter>,
    ) -> BoxFuture<'_, Result<u64, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let cols = self
                .collections
                .read()
                .map_err(|e| VectorStoreError::Count(e.to_string()))?;
            let col = cols
                .get(&collection)
                .ok_or(VectorStoreError::CollectionNotFound(collection))?;
            let n = col
                .points
                .values()
                .filter(|sp| passes(filter.as_ref(), &sp.payload))
                .count();
            Ok(n as u64)
        })
    }

    fn scroll(
        &self,
        collection: &str,
        request: ScrollRequest,
    ) -> BoxFuture<'_, Result<ScrollPage, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let cols = self
                .collections
                .read()
                .map_err(|e| VectorStoreError::Scroll(e.to_string()))?;
            let col = cols
                .get(&collection)
                .ok_or(VectorStoreError::CollectionNotFound(collection))?;

            let limit = request.limit.max(1) as usize;
            let start = request.offset.clone().unwrap_or_default();
            let mut matching = col
                .points
                .range(start..)
                .filter(|(_, sp)| passes(request.filter.as_ref(), &sp.payload));

            let mut points = Vec::new();
            for (id, sp) in matching.by_ref().take(limit) {
                let vector_names = if request.with_vectors {
                    let mut names = vec![sp.dense.field.name().to_owned(), SPARSE_FIELD.to_owned()];
                    names.sort();
                    names
                } else {
                    Vec::new()
                };
                points.push(ScrolledPoint {
                    id: id.clone(),
                    payload: sp.payload.clone(),
                    vector_names,
                });
            }
            let next_offset = matching.next().map(|(id, _)| id.clone());
            Ok(ScrollPage {
                points,
                next_offset,
            })
        })
    }

    fn delete_by_ids(
        &self,
        collection: &str,
        ids: Vec<String>,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            if ids.is_empty() {
                return Ok(());
            }
            let mut cols = self
                .collections
                .write()
                .map_err(|e| VectorStoreError::Delete(e.to_string()))?;
            let col = cols
                .get_mut(&collection)
                .ok_or(VectorStoreError::CollectionNotFound(collection))?;
            for id in &ids {
                col.points.remove(id);
            }
            Ok(())
        })
    }
}
