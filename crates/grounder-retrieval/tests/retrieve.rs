use std::path::Path;
use std::sync::Arc;

use grounder_embed::mock::{MockEmbedder, MockReranker};
use grounder_embed::{
    BoxFuture, EmbedError, HashingSparseEncoder, InputType, SparseEncoder, SparseVector,
};
use grounder_index::{ContentKind, CorpusSpec, IngestOptions, Ingestor};
use grounder_retrieval::{
    Confidence, Degradation, Intent, Lane, QueryRequest, RetrievalConfig, RetrievalError,
    Retriever,
};
use grounder_store::InMemoryVectorStore;

const DIM: usize = 32;
const COLLECTION: &str = "grounder_retrieval_test";
const COMMIT: &str = "abcdef0123456789";

const DOCS: &[(&str, &str)] = &[
    (
        "docs/sessions.md",
        "# Sessions\n\nA session holds the conversation between a user and an agent.\n\n## State\n\nSession state is a dictionary the agent reads and writes between turns.\n\n## Events\n\nEvery turn appends events to the session in order.\n",
    ),
    (
        "docs/tools.md",
        "# Tools\n\nTools let an agent call Python functions.\n\n## Function tools\n\nWrap a function with a docstring and pass it to the agent.\n\n## Long running tools\n\nLong running tools report progress while the runner waits.\n",
    ),
    (
        "docs/runners.md",
        "# Runners\n\nThe runner drives an agent for one session.\n\n## Running an agent\n\nCall run_async with a user message to stream events.\n",
    ),
];

const CODE: &[(&str, &str)] = &[
    (
        "adk/runners.py",
        "\"\"\"Runner entry points.\"\"\"\nimport asyncio\n\n\nclass Runner:\n    def __init__(self, agent, session_service):\n        self.agent = agent\n        self.session_service = session_service\n\n    async def run_async(self, session, message):\n        return await self.agent.handle(session, message)\n\n\ndef build_runner(agent, session_service):\n    return Runner(agent, session_service)\n",
    ),
    (
        "adk/sessions/state.py",
        "\"\"\"Session state.\"\"\"\n\n\nclass State:\n    def __init__(self):\n        self.values = {}\n\n    def get(self, key):\n        return self.values.get(key)\n\n\ndef merge_state(a, b):\n    return {**a.values, **b.values}\n",
    ),
    (
        "adk/tools/function_tool.py",
        "\"\"\"Function tool.\"\"\"\n\n\nclass FunctionTool:\n    def __init__(self, func):\n        self.func = func\n\n    def run(self, **kwargs):\n        return self.func(**kwargs)\n",
    ),
];

fn write_all(root: &Path, files: &[(&str, &str)]) {
    for (rel, content) in files {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }
}

async fn seeded(with_docs: bool) -> Arc<InMemoryVectorStore> {
    let docs = tempfile::tempdir().unwrap();
    let code = tempfile::tempdir().unwrap();
    if with_docs {
        write_all(docs.path(), DOCS);
    }
    write_all(code.path(), CODE);

    let mut doc_spec = CorpusSpec::new("adk_docs", ContentKind::Doc, docs.path(), "google/adk-docs");
    doc_spec.commit = Some(COMMIT.into());
    let mut code_spec =
        CorpusSpec::new("adk_python", ContentKind::Code, code.path(), "google/adk-python");
    code_spec.commit = Some(COMMIT.into());

    let store = Arc::new(InMemoryVectorStore::new());
    let embedder = Arc::new(MockEmbedder::new(DIM));
    Ingestor::new(
        embedder.clone(),
        embedder,
        Arc::new(HashingSparseEncoder::default()),
        store.clone(),
        IngestOptions::new(COLLECTION, DIM),
    )
    .run(&[doc_spec, code_spec], serde_json::Value::Null)
    .await
    .unwrap();
    store
}

fn retriever(store: Arc<InMemoryVectorStore>) -> Retriever {
    let embedder = Arc::new(MockEmbedder::new(DIM));
    Retriever::new(
        embedder.clone(),
        embedder,
        Arc::new(HashingSparseEncoder::default()),
        store,
        COLLECTION,
        RetrievalConfig::default(),
    )
}

struct FailingSparse;

impl SparseEncoder for FailingSparse {
    fn encode(
        &self,
        _texts: Vec<String>,
        _input_type: InputType,
    ) -> BoxFuture<'_, Result<Vec<SparseVector>, EmbedError>> {
        Box::pin(async { Err(EmbedError::Unavailable("sparse service down".into())) })
    }

    fn name(&self) -> &'static str {
        "failing"
    }
}

#[tokio::test]
async fn code_only_returns_only_code_from_code_and_sparse_lanes() {
    let store = seeded(true).await;
    let reranker = MockReranker::default();
    let r = retriever(store).with_reranker(Arc::new(reranker.clone()));

    let pack = r
        .retrieve(QueryRequest::new("Runner run_async session").with_intent(Intent::CodeOnly))
        .await
        .unwrap();

    assert!(!pack.items.is_empty());
    assert!(pack.items.iter().all(|i| i.corpus == ContentKind::Code));
    let lanes: Vec<Lane> = pack.plan.lanes.iter().map(|l| l.lane).collect();
    assert_eq!(lanes, vec![Lane::DenseCode, Lane::SparseLexical]);
    assert!(pack.warnings.is_empty(), "{:?}", pack.warnings);
    assert_eq!(reranker.calls(), 1);
    assert_eq!(pack.coverage.doc, 0);
    for (i, item) in pack.items.iter().enumerate() {
        assert_eq!(item.rank, i + 1);
    }
}

#[tokio::test]
async fn general_query_meets_coverage_quota() {
    let store = seeded(true).await;
    let r = retriever(store).with_reranker(Arc::new(MockReranker::default()));
    let mut request = QueryRequest::new("Runner run_async function");
    request.top_k = Some(6);

    let pack = r.retrieve(request).await.unwrap();
    assert_eq!(pack.intent, Intent::General);
    assert_eq!(pack.items.len(), 6);
    // ceil(0.30 * 6) = 2 per corpus.
    assert!(pack.coverage.doc >= 2, "{:?}", pack.coverage);
    assert!(pack.coverage.code >= 2, "{:?}", pack.coverage);
    assert!(!pack.has_warning("coverage_shortfall"));
    for key in ["plan", "embed", "search", "rerank", "assemble", "total"] {
        assert!(pack.timings_ms.contains_key(key), "missing timing {key}");
    }
}

#[tokio::test]
async fn single_corpus_pool_widens_once_then_reports_shortfall() {
    let store = seeded(false).await;
    let pack = retriever(store)
        .retrieve(QueryRequest::new("session state"))
        .await
        .unwrap();

    assert!(pack.plan.widened);
    assert!(pack.has_warning("pool_widened"));
    assert!(pack.has_warning("coverage_shortfall"));
    assert!(!pack.items.is_empty());
    assert!(pack.items.iter().all(|i| i.corpus == ContentKind::Code));
    let widened = pack
        .warnings
        .iter()
        .filter(|w| w.code() == "pool_widened")
        .count();
    assert_eq!(widened, 1);
}

#[tokio::test]
async fn rerank_failure_keeps_fused_order_with_warning() {
    let store = seeded(true).await;
    let r = retriever(store).with_reranker(Arc::new(MockReranker::failing()));

    let pack = r.retrieve(QueryRequest::new("function tool docstring")).await.unwrap();
    assert!(pack.has_warning("rerank_unavailable"));
    assert!(!pack.items.is_empty());
    for item in &pack.items {
        assert_eq!(item.retrieval_route.last().map(String::as_str), Some("fused"));
    }
    for pair in pack.items.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
}

#[tokio::test]
async fn both_dense_lanes_failing_is_an_error() {
    let store = seeded(true).await;
    let failing = Arc::new(MockEmbedder::failing());
    let r = Retriever::new(
        failing.clone(),
        failing,
        Arc::new(HashingSparseEncoder::default()),
        store,
        COLLECTION,
        RetrievalConfig::default(),
    );
    let err = r.retrieve(QueryRequest::new("session state")).await.unwrap_err();
    match err {
        RetrievalError::NoDenseLanes { causes } => assert_eq!(causes.len(), 2),
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn one_dense_lane_failing_is_dropped() {
    let store = seeded(true).await;
    let r = Retriever::new(
        Arc::new(MockEmbedder::failing()),
        Arc::new(MockEmbedder::new(DIM)),
        Arc::new(HashingSparseEncoder::default()),
        store,
        COLLECTION,
        RetrievalConfig::default(),
    );
    let pack = r.retrieve(QueryRequest::new("session state")).await.unwrap();
    assert!(pack.warnings.iter().any(|w| matches!(
        w,
        Degradation::LaneDropped {
            lane: Lane::DenseDocs,
            ..
        }
    )));
    assert!(pack.plan.lanes.iter().all(|l| l.lane != Lane::DenseDocs));
    assert!(!pack.items.is_empty());
}

#[tokio::test]
async fn sparse_failure_proceeds_dense_only() {
    let store = seeded(true).await;
    let embedder = Arc::new(MockEmbedder::new(DIM));
    let r = Retriever::new(
        embedder.clone(),
        embedder,
        Arc::new(FailingSparse),
        store,
        COLLECTION,
        RetrievalConfig::default(),
    );
    let pack = r.retrieve(QueryRequest::new("session state")).await.unwrap();
    assert!(pack.has_warning("sparse_dropped"));
    assert!(
        pack.plan
            .lanes
            .iter()
            .all(|l| l.lane != Lane::SparseLexical)
    );
    assert!(!pack.items.is_empty());
}

#[tokio::test]
async fn citations_follow_corpus_rules() {
    let store = seeded(true).await;
    let pack = retriever(store)
        .retrieve(QueryRequest::new("session state events"))
        .await
        .unwrap();
    for item in &pack.items {
        let prefix = format!("{}@abcdef0:{}", item.repo, item.path);
        assert!(item.citation.starts_with(&prefix), "{}", item.citation);
        match item.corpus {
            ContentKind::Doc => {
                assert_eq!(item.citation, format!("{prefix}#{}", item.evidence_id));
            }
            ContentKind::Code => {
                let (s, e) = (item.start_line.unwrap(), item.end_line.unwrap());
                assert_eq!(item.citation, format!("{prefix}#L{s}-L{e}"));
                assert_eq!(item.citation_confidence, Confidence::High);
            }
        }
    }
}

#[tokio::test]
async fn targeted_file_restricts_paths() {
    let store = seeded(true).await;
    let pack = retriever(store)
        .retrieve(QueryRequest::new("what is defined in adk/runners.py"))
        .await
        .unwrap();
    assert_eq!(pack.intent, Intent::TargetedFile);
    assert_eq!(pack.plan.path_token.as_deref(), Some("adk/runners.py"));
    assert!(!pack.items.is_empty());
    assert!(pack.items.iter().all(|i| i.path.contains("adk/runners.py")));
    assert!(!pack.has_warning("pool_widened"));
}

#[tokio::test]
async fn slash_joined_words_keep_both_corpora() {
    let store = seeded(true).await;
    let r = retriever(store);

    let pack = r
        .retrieve(QueryRequest::new(
            "overview of session state read/write between turns",
        ))
        .await
        .unwrap();

    assert_ne!(pack.intent, Intent::TargetedFile);
    assert!(pack.plan.path_token.is_none());
    assert!(pack.coverage.doc >= 1, "{:?}", pack.coverage);
    assert!(pack.coverage.code >= 1, "{:?}", pack.coverage);
}

#[tokio::test]
async fn multi_query_fuses_variations() {
    let store = seeded(true).await;
    let embedder = Arc::new(MockEmbedder::new(DIM));
    let r = Retriever::new(
        embedder.clone(),
        embedder.clone(),
        Arc::new(HashingSparseEncoder::default()),
        store,
        COLLECTION,
        RetrievalConfig {
            multi_query: true,
            ..RetrievalConfig::default()
        },
    );
    let calls_before = embedder.calls();
    let pack = r.retrieve(QueryRequest::new("session state")).await.unwrap();
    assert_eq!(pack.plan.variations, 4);
    // One docs and one code embedding per variation.
    assert_eq!(embedder.calls() - calls_before, 8);
    assert!(!pack.items.is_empty());
    for item in &pack.items {
        assert!(item.retrieval_route.iter().all(|r| !r.starts_with("variation_")));
    }
}

#[tokio::test]
async fn blank_query_is_rejected() {
    let store = seeded(true).await;
    let err = retriever(store)
        .retrieve(QueryRequest::new("   "))
        .await
        .unwrap_err();
    assert!(matches!(err, RetrievalError::EmptyQuery));
}
