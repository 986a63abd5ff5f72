use std::time::Duration;

use grounder_embed::batched::{embed_documents, embed_texts};
use grounder_embed::{BatchLimits, InputType, RetryPolicy, VoyageClient, WindowLimits};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
    }
}

/// Answers `/embeddings` with `[len(text)]` per input, preserving indices.
struct EchoLengths;

impl Respond for EchoLengths {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
        let data: Vec<serde_json::Value> = body["input"]
            .as_array()
            .unwrap()
            .iter()
            .enumerate()
            .map(|(i, t)| serde_json::json!({"embedding": [t.as_str().unwrap().len()], "index": i}))
            .collect();
        ResponseTemplate::new(200).set_body_json(serde_json::json!({ "data": data }))
    }
}

/// Answers `/contextualizedembeddings` with `[doc_len, chunk_index]` per chunk.
struct EchoWindows;

impl Respond for EchoWindows {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
        let data: Vec<serde_json::Value> = body["inputs"]
            .as_array()
            .unwrap()
            .iter()
            .enumerate()
            .map(|(di, doc)| {
                let chunks = doc.as_array().unwrap();
                let inner: Vec<serde_json::Value> = (0..chunks.len())
                    .map(|ci| serde_json::json!({"embedding": [chunks.len(), ci], "index": ci}))
                    .collect();
                serde_json::json!({"index": di, "data": inner})
            })
            .collect();
        ResponseTemplate::new(200).set_body_json(serde_json::json!({ "data": data }))
    }
}

#[tokio::test]
async fn code_embedding_survives_two_server_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(EchoLengths)
        .mount(&server)
        .await;

    let client = VoyageClient::new(
        "k".into(),
        server.uri(),
        "voyage-code-3".into(),
        Duration::from_secs(5),
    )
    .unwrap()
    .with_retry(fast_retry());

    let texts: Vec<String> = vec!["a".into(), "bb".into(), "ccc".into()];
    let vectors = embed_texts(&client, &texts, InputType::Document, &BatchLimits::items(8), 1)
        .await
        .unwrap();
    assert_eq!(vectors, vec![vec![1.0], vec![2.0], vec![3.0]]);
}

#[tokio::test]
async fn code_embedding_gives_up_after_three_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let client = VoyageClient::new(
        "k".into(),
        server.uri(),
        "voyage-code-3".into(),
        Duration::from_secs(5),
    )
    .unwrap()
    .with_retry(fast_retry());

    let err = embed_texts(
        &client,
        &["x".to_string()],
        InputType::Document,
        &BatchLimits::items(8),
        1,
    )
    .await
    .unwrap_err();
    assert!(err.is_transient());
}

#[tokio::test]
async fn char_budget_splits_requests() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(EchoLengths)
        .expect(3)
        .mount(&server)
        .await;

    let client = VoyageClient::new(
        "k".into(),
        server.uri(),
        "voyage-code-3".into(),
        Duration::from_secs(5),
    )
    .unwrap();

    let texts: Vec<String> = ["aaaa", "bbbb", "cccc"].map(String::from).to_vec();
    let vectors = embed_texts(
        &client,
        &texts,
        InputType::Document,
        &BatchLimits::items_and_chars(10, 5),
        3,
    )
    .await
    .unwrap();
    assert_eq!(vectors.len(), 3);
}

#[tokio::test]
async fn contextual_windows_round_trip_through_voyage() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/contextualizedembeddings"))
        .respond_with(EchoWindows)
        .mount(&server)
        .await;

    let client = VoyageClient::new(
        "k".into(),
        server.uri(),
        "voyage-context-3".into(),
        Duration::from_secs(5),
    )
    .unwrap();

    let file: Vec<String> = (0..6).map(|_| "x".repeat(10)).collect();
    let window = WindowLimits {
        max_chars: 40,
        overlap_chunks: 2,
    };
    let out = embed_documents(
        &client,
        &[file.clone(), vec!["short".into()]],
        InputType::Document,
        &window,
        &BatchLimits::items(16),
        2,
    )
    .await
    .unwrap();

    assert_eq!(out.len(), 2);
    assert_eq!(out[0].len(), file.len());
    assert_eq!(out[1], vec![vec![1.0, 0.0]]);
}
