use std::collections::HashMap;
use std::time::Duration;

use grounder_embed::SparseVector;
use grounder_store::{
    CollectionSchema, DenseField, DenseVector, FieldValue, HybridQuery, LaneVector, QdrantStore,
    QueryLane, ScrollRequest, VectorFilter, VectorPoint, VectorStore,
};
use testcontainers::ContainerAsync;
use testcontainers::GenericImage;
use testcontainers::core::{ContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;

const QDRANT_GRPC_PORT: ContainerPort = ContainerPort::Tcp(6334);
const COLLECTION: &str = "grounding_test";

fn qdrant_image() -> GenericImage {
    GenericImage::new("qdrant/qdrant", "v1.16.0")
        .with_wait_for(WaitFor::message_on_stdout("gRPC listening"))
        .with_exposed_port(QDRANT_GRPC_PORT)
}

async fn setup_with_qdrant() -> (QdrantStore, ContainerAsync<GenericImage>) {
    let container = qdrant_image().start().await.unwrap();
    let grpc_port = container.get_host_port_ipv4(6334).await.unwrap();
    let url = format!("http://127.0.0.1:{grpc_port}");
    let store = QdrantStore::new(&url, None, Duration::from_secs(10)).unwrap();
    store
        .ensure_collection(&CollectionSchema::new(COLLECTION, 4))
        .await
        .unwrap();
    (store, container)
}

fn point(n: u8, field: DenseField, dense: [f32; 4], term: u32, corpus: &str) -> VectorPoint {
    VectorPoint {
        id: format!("00000000-0000-0000-0000-0000000000{n:02x}"),
        dense: DenseVector {
            field,
            values: dense.to_vec(),
        },
        sparse: SparseVector {
            indices: vec![term],
            values: vec![1.0],
        },
        payload: HashMap::from([
            ("corpus".into(), serde_json::json!(corpus)),
            ("path".into(), serde_json::json!(format!("src/file{n}.py"))),
        ]),
    }
}

async fn seed(store: &QdrantStore) {
    store
        .upsert(
            COLLECTION,
            vec![
                point(1, DenseField::DenseDocs, [1.0, 0.0, 0.0, 0.0], 7, "doc"),
                point(2, DenseField::DenseCode, [1.0, 0.0, 0.0, 0.0], 7, "code"),
                point(3, DenseField::DenseCode, [0.0, 1.0, 0.0, 0.0], 9, "code"),
            ],
        )
        .await
        .unwrap();
}

#[tokio::test]
#[ignore = "requires docker"]
async fn ensure_collection_is_idempotent() {
    let (store, _container) = setup_with_qdrant().await;
    store
        .ensure_collection(&CollectionSchema::new(COLLECTION, 4))
        .await
        .unwrap();
    assert!(store.collection_exists(COLLECTION).await.unwrap());
}

#[tokio::test]
#[ignore = "requires docker"]
async fn each_point_has_one_dense_vector() {
    let (store, _container) = setup_with_qdrant().await;
    seed(&store).await;

    let page = store
        .scroll(
            COLLECTION,
            ScrollRequest {
                limit: 10,
                with_vectors: true,
                ..ScrollRequest::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(page.points.len(), 3);
    for p in &page.points {
        let dense = p
            .vector_names
            .iter()
            .filter(|n| n.starts_with("dense_"))
            .count();
        assert_eq!(dense, 1, "{:?}", p.vector_names);
        assert!(p.vector_names.iter().any(|n| n == "sparse_lexical"));
    }
}

#[tokio::test]
#[ignore = "requires docker"]
async fn hybrid_query_respects_global_filter() {
    let (store, _container) = setup_with_qdrant().await;
    seed(&store).await;

    let query = HybridQuery {
        lanes: vec![
            QueryLane {
                vector: LaneVector::Dense {
                    field: DenseField::DenseCode,
                    values: vec![1.0, 0.0, 0.0, 0.0],
                },
                limit: 10,
                filter: None,
            },
            QueryLane {
                vector: LaneVector::Sparse(SparseVector {
                    indices: vec![7],
                    values: vec![1.0],
                }),
                limit: 10,
                filter: None,
            },
        ],
        filter: Some(VectorFilter::default().must("corpus", FieldValue::Text("code".into()))),
        final_limit: 10,
        hnsw_ef: Some(64),
        exact: false,
    };
    let hits = store.query(COLLECTION, query).await.unwrap();
    assert!(!hits.is_empty());
    assert!(hits.iter().all(|h| h.payload["corpus"] == "code"));
    assert_eq!(hits[0].payload["path"], "src/file2.py");
}

#[tokio::test]
#[ignore = "requires docker"]
async fn count_and_delete() {
    let (store, _container) = setup_with_qdrant().await;
    seed(&store).await;

    let code = VectorFilter::default().must("corpus", FieldValue::Text("code".into()));
    assert_eq!(store.count(COLLECTION, Some(code.clone())).await.unwrap(), 2);
    store
        .delete_by_ids(
            COLLECTION,
            vec!["00000000-0000-0000-0000-000000000003".into()],
        )
        .await
        .unwrap();
    assert_eq!(store.count(COLLECTION, Some(code)).await.unwrap(), 1);
}
