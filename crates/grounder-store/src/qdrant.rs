//! Qdrant adapter over gRPC.

use std::collections::HashMap;
use std::time::Duration;

use grounder_embed::BoxFuture;
use qdrant_client::Qdrant;
use qdrant_client::qdrant::{
    Condition, CountPointsBuilder, CreateCollectionBuilder, CreateFieldIndexCollectionBuilder,
    DeletePointsBuilder, Distance, FieldType, Filter, Fusion, NamedVectors, PointId, PointStruct,
    PointsIdsList, PrefetchQueryBuilder, Query, QueryPointsBuilder, Range, RetrievedPoint,
    ScoredPoint, ScrollPointsBuilder, SearchParamsBuilder, SparseVectorParamsBuilder,
    SparseVectorsConfigBuilder, UpsertPointsBuilder, Vector, VectorInput, VectorParamsBuilder,
    VectorsConfigBuilder, point_id::PointIdOptions, value::Kind, vectors_output::VectorsOptions,
};

use crate::vector_store::{
    CollectionSchema, DenseField, FieldCondition, FieldValue, HybridQuery, LaneVector,
    SPARSE_FIELD, ScoredVectorPoint, ScrollPage, ScrollRequest, ScrolledPoint, VectorFilter,
    VectorPoint, VectorStore, VectorStoreError,
};

/// Thin wrapper over [`Qdrant`] implementing [`VectorStore`].
#[derive(Clone)]
pub struct QdrantStore {
    client: Qdrant,
}

impl std::fmt::Debug for QdrantStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QdrantStore").finish_non_exhaustive()
    }
}

impl QdrantStore {
    /// Connect to the given gRPC URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the Qdrant client cannot be created.
    pub fn new(
        url: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, VectorStoreError> {
        let client = Qdrant::from_url(url)
            .api_key(api_key)
            .timeout(timeout)
            .build()
            .map_err(|e| VectorStoreError::Connection(e.to_string()))?;
        Ok(Self { client })
    }

    /// Access the underlying Qdrant client for advanced operations.
    #[must_use]
    pub fn client(&self) -> &Qdrant {
        &self.client
    }

    async fn create_collection(&self, schema: &CollectionSchema) -> Result<(), VectorStoreError> {
        let exists = self
            .client
            .collection_exists(&schema.name)
            .await
            .map_err(|e| VectorStoreError::Connection(e.to_string()))?;
        if exists {
            return Ok(());
        }

        let mut vectors = VectorsConfigBuilder::default();
        for field in DenseField::ALL {
            vectors.add_named_vector_params(
                field.name(),
                VectorParamsBuilder::new(schema.dense_dim, Distance::Cosine),
            );
        }
        let mut sparse = SparseVectorsConfigBuilder::default();
        sparse.add_named_vector_params(SPARSE_FIELD, SparseVectorParamsBuilder::default());

        self.client
            .create_collection(
                CreateCollectionBuilder::new(&schema.name)
                    .vectors_config(vectors)
                    .sparse_vectors_config(sparse),
            )
            .await
            .map_err(|e| VectorStoreError::Collection(e.to_string()))?;

        for field in &schema.payload_indexes {
            self.client
                .create_field_index(
                    CreateFieldIndexCollectionBuilder::new(
                        &schema.name,
                        field.as_str(),
                        FieldType::Keyword,
                    )
                    .wait(true),
                )
                .await
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
        }
        tracing::info!(
            collection = %schema.name,
            dim = schema.dense_dim,
            indexes = schema.payload_indexes.len(),
            "created collection"
        );
        Ok(())
    }

    async fn hybrid_query(
        &self,
        collection: &str,
        query: HybridQuery,
    ) -> Result<Vec<ScoredVectorPoint>, VectorStoreError> {
        let mut builder = QueryPointsBuilder::new(collection);
        for lane in &query.lanes {
            let input = match &lane.vector {
                LaneVector::Dense { values, .. } => VectorInput::new_dense(values.clone()),
                LaneVector::Sparse(s) => VectorInput::new_sparse(s.indices.clone(), s.values.clone()),
            };
            let mut prefetch = PrefetchQueryBuilder::default()
                .query(Query::new_nearest(input))
                .using(lane.name())
                .limit(lane.limit);
            if let Some(f) = query.lane_filter(lane) {
                prefetch = prefetch.filter(vector_filter_to_qdrant(f));
            }
            if query.hnsw_ef.is_some() || query.exact {
                let mut params = SearchParamsBuilder::default().exact(query.exact);
                if let Some(ef) = query.hnsw_ef {
                    params = params.hnsw_ef(ef);
                }
                prefetch = prefetch.params(params);
            }
            builder = builder.add_prefetch(prefetch);
        }
        if let Some(f) = query.filter.clone() {
            builder = builder.filter(vector_filter_to_qdrant(f));
        }

        let builder = builder
            .query(Fusion::Rrf)
            .limit(query.final_limit)
            .with_payload(true)
            .with_vectors(false);
        let response = self
            .client
            .query(builder)
            .await
            .map_err(|e| VectorStoreError::Query(e.to_string()))?;
        Ok(response.result.into_iter().map(scored_point_to_vector).collect())
    }

    async fn scroll_page(
        &self,
        collection: &str,
        request: ScrollRequest,
    ) -> Result<ScrollPage, VectorStoreError> {
        let mut builder = ScrollPointsBuilder::new(collection)
            .with_payload(true)
            .with_vectors(request.with_vectors)
            .limit(request.limit.max(1));
        if let Some(f) = request.filter {
            builder = builder.filter(vector_filter_to_qdrant(f));
        }
        if let Some(off) = request.offset {
            builder = builder.offset(PointId::from(off));
        }
        let response = self
            .client
            .scroll(builder)
            .await
            .map_err(|e| VectorStoreError::Scroll(e.to_string()))?;

        Ok(ScrollPage {
            points: response
                .result
                .into_iter()
                .map(retrieved_point_to_scrolled)
                .collect(),
            next_offset: response.next_page_offset.map(|p| point_id_to_string(Some(p))),
        })
    }
}

fn point_to_qdrant(point: VectorPoint) -> Result<PointStruct, VectorStoreError> {
    let payload: HashMap<String, qdrant_client::qdrant::Value> =
        serde_json::from_value(serde_json::Value::Object(point.payload.into_iter().collect()))
            .map_err(|e| VectorStoreError::Serialization(e.to_string()))?;
    let vectors = NamedVectors::default()
        .add_vector(point.dense.field.name(), Vector::new_dense(point.dense.values))
        .add_vector(
            SPARSE_FIELD,
            Vector::new_sparse(point.sparse.indices, point.sparse.values),
        );
    Ok(PointStruct::new(point.id, vectors, payload))
}

impl VectorStore for QdrantStore {
    fn ensure_collection(
        &self,
        schema: &CollectionSchema,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let schema = schema.clone();
        Box::pin(async move { self.create_collection(&schema).await })
    }

    fn collection_exists(&self, collection: &str) -> BoxFuture<'_, Result<bool, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            self.client
                .collection_exists(&collection)
                .await
                .map_err(|e| VectorStoreError::Connection(e.to_string()))
        })
    }

    fn delete_collection(&self, collection: &str) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            self.client
                .delete_collection(&collection)
                .await
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
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
            if points.is_empty() {
                return Ok(());
            }
            let qdrant_points = points
                .into_iter()
                .map(point_to_qdrant)
                .collect::<Result<Vec<_>, _>>()?;
            self.client
                .upsert_points(UpsertPointsBuilder::new(&collection, qdrant_points).wait(true))
                .await
                .map_err(|e| VectorStoreError::Upsert(e.to_string()))?;
            Ok(())
        })
    }

    fn query(
        &self,
        collection: &str,
        query: HybridQuery,
    ) -> BoxFuture<'_, Result<Vec<ScoredVectorPoint>, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move { self.hybrid_query(&collection, query).await })
    }

    fn count(
        &self,
        collection: &str,
        filter: Option<VectorFilter>,
    ) -> BoxFuture<'_, Result<u64, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let mut builder = CountPointsBuilder::new(&collection).exact(true);
            if let Some(f) = filter {
                builder = builder.filter(vector_filter_to_qdrant(f));
            }
            let response = self
                .client
                .count(builder)
                .await
                .map_err(|e| VectorStoreError::Count(e.to_string()))?;
            Ok(response.result.map_or(0, |r| r.count))
        })
    }

    fn scroll(
        &self,
        collection: &str,
        request: ScrollRequest,
    ) -> BoxFuture<'_, Result<ScrollPage, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move { self.scroll_page(&collection, request).await })
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
            let ids: Vec<PointId> = ids.into_iter().map(PointId::from).collect();
            self.client
                .delete_points(
                    DeletePointsBuilder::new(&collection)
                        .points(PointsIdsList { ids })
                        .wait(true),
                )
                .await
                .map_err(|e| VectorStoreError::Delete(e.to_string()))?;
            Ok(())
        })
    }
}

fn vector_filter_to_qdrant(filter: VectorFilter) -> Filter {
    let must: Vec<_> = filter
        .must
        .into_iter()
        .map(field_condition_to_qdrant)
        .collect();
    let must_not: Vec<_> = filter
        .must_not
        .into_iter()
        .map(field_condition_to_qdrant)
        .collect();

    let mut f = Filter::default();
    if !must.is_empty() {
        f.must = must;
    }
    if !must_not.is_empty() {
        f.must_not = must_not;
    }
    f
}

fn field_condition_to_qdrant(cond: FieldCondition) -> Condition {
    match cond.value {
        FieldValue::Integer(v) => Condition::matches(cond.field, v),
        FieldValue::Text(v) => Condition::matches(cond.field, v),
        FieldValue::Any(values) => Condition::matches(cond.field, values),
        // Without a full-text index Qdrant evaluates text match as a substring test.
        FieldValue::Contains(v) => Condition::matches_text(cond.field, v),
        FieldValue::Range { gte, lte } => Condition::range(
            cond.field,
            Range {
                gte,
                lte,
                ..Default::default()
            },
        ),
    }
}

fn qdrant_value_to_json(value: qdrant_client::qdrant::Value) -> Option<serde_json::Value> {
    let json = match value.kind? {
        Kind::StringValue(s) => serde_json::Value::String(s),
        Kind::IntegerValue(i) => serde_json::Value::Number(i.into()),
        Kind::DoubleValue(d) => serde_json::Number::from_f64(d).map(serde_json::Value::Number)?,
        Kind::BoolValue(b) => serde_json::Value::Bool(b),
        Kind::NullValue(_) => serde_json::Value::Null,
        Kind::ListValue(list) => serde_json::Value::Array(
            list.values
                .into_iter()
                .filter_map(qdrant_value_to_json)
                .collect(),
        ),
        Kind::StructValue(s) => serde_json::Value::Object(
            s.fields
                .into_iter()
                .filter_map(|(k, v)| qdrant_value_to_json(v).map(|v| (k, v)))
                .collect(),
        ),
    };
    Some(json)
}

fn payload_to_json(
    payload: HashMap<String, qdrant_client::qdrant::Value>,
) -> HashMap<String, serde_json::Value> {
    payload
        .into_iter()
        .filter_map(|(k, v)| qdrant_value_to_json(v).map(|v| (k, v)))
        .collect()
}

fn point_id_to_string(id: Option<PointId>) -> String {
    match id.and_then(|pid| pid.point_id_options) {
        Some(PointIdOptions::Uuid(u)) => u,
        Some(PointIdOptions::Num(n)) => n.to_string(),
        None => String::new(),
    }
}

fn scored_point_to_vector(point: ScoredPoint) -> ScoredVectorPoint {
    ScoredVectorPoint {
        id: point_id_to_string(point.id),
        score: point.score,
        payload: payload_to_json(point.payload),
        lanes: Vec::new(),
    }
}

fn retrieved_point_to_scrolled(point: RetrievedPoint) -> ScrolledPoint {
    let mut vector_names: Vec<String> = match point.vectors.and_then(|v| v.vectors_options) {
        Some(VectorsOptions::Vectors(named)) => named.vectors.into_keys().collect(),
        Some(VectorsOptions::Vector(_)) => vec![String::new()],
        None => Vec::new(),
    };
    vector_names.sort();
    ScrolledPoint {
        id: point_id_to_string(point.id),
        payload: payload_to_json(point.payload),
        vector_names,
    }
}

#[cfg(test)]
mod tests {
    use grounder_embed::SparseVector;

    use super::*;
    use crate::vector_store::DenseVector;

    #[test]
    fn new_valid_url() {
        let store = QdrantStore::new("http://localhost:6334", None, Duration::from_secs(5));
        assert!(store.is_ok());
    }

    #[test]
    fn debug_format() {
        let store = QdrantStore::new("http://localhost:6334", Some("k".into()), Duration::from_secs(5)).unwrap();
        let dbg = format!("{store:?}");
        assert!(dbg.contains("QdrantStore"));
    }

    #[test]
    fn point_carries_one_dense_and_sparse() {
        let p = VectorPoint {
            id: "4c1c7a5e-6d9e-5b52-9f56-0d2c1f1b0c11".into(),
            dense: DenseVector {
                field: DenseField::DenseCode,
                values: vec![0.1, 0.2],
            },
            sparse: SparseVector {
                indices: vec![3],
                values: vec![1.0],
            },
            payload: HashMap::from([
                ("corpus".into(), serde_json::json!("code")),
                ("start_line".into(), serde_json::json!(4)),
            ]),
        };
        let ps = point_to_qdrant(p).unwrap();
        assert_eq!(ps.payload.len(), 2);
        let Some(qdrant_client::qdrant::vectors::VectorsOptions::Vectors(named)) =
            ps.vectors.and_then(|v| v.vectors_options)
        else {
            panic!("expected named vectors");
        };
        let mut names: Vec<_> = named.vectors.keys().cloned().collect();
        names.sort();
        assert_eq!(names, vec!["dense_code", "sparse_lexical"]);
    }

    #[test]
    fn filter_conversion_keeps_clauses() {
        let f = VectorFilter::default()
            .must("corpus", FieldValue::Text("code".into()))
            .must("path", FieldValue::Contains("runners".into()))
            .must_not("repo", FieldValue::Any(vec!["x".into()]));
        let q = vector_filter_to_qdrant(f);
        assert_eq!(q.must.len(), 2);
        assert_eq!(q.must_not.len(), 1);
    }

    #[test]
    fn payload_round_trip_scalars_and_lists() {
        let json = serde_json::json!({
            "path": "docs/a.md",
            "start_line": 3,
            "heading_path": ["Intro", "Setup"],
            "symbol": null
        });
        let q: HashMap<String, qdrant_client::qdrant::Value> = serde_json::from_value(json).unwrap();
        let back = payload_to_json(q);
        assert_eq!(back["path"], "docs/a.md");
        assert_eq!(back["start_line"], 3);
        assert_eq!(back["heading_path"], serde_json::json!(["Intro", "Setup"]));
        assert!(back["symbol"].is_null());
    }
}
