//! Hybrid vector store adapter: named dense + sparse points, multi-lane
//! queries with reciprocal rank fusion.

pub mod in_memory_store;
pub mod qdrant;
pub mod rrf;
pub mod upsert;
pub mod vector_store;

pub use in_memory_store::InMemoryVectorStore;
pub use qdrant::QdrantStore;
pub use upsert::upsert_in_batches;
pub use vector_store::{
    CollectionSchema, DenseField, DenseVector, FieldCondition, FieldValue, HybridQuery,
    LaneVector, QueryLane, SPARSE_FIELD, ScoredVectorPoint, ScrollPage, ScrollRequest,
    ScrolledPoint, VectorFilter, VectorPoint, VectorStore, VectorStoreError,
};
