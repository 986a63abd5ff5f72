//! Error types for grounder-retrieval.

/// Hard query failures. Recoverable problems are reported as
/// [`Degradation`](crate::evidence::Degradation) values instead.
#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("query is empty")]
    EmptyQuery,

    /// Every dense lane in the plan failed to embed the query.
    #[error("no dense lane available: {}", causes.join("; "))]
    NoDenseLanes { causes: Vec<String> },

    #[error("vector store error: {0}")]
    Store(#[from] grounder_store::VectorStoreError),

    #[error("unknown intent {0:?}")]
    UnknownIntent(String),
}

/// Result type alias using `RetrievalError`.
pub type Result<T> = std::result::Result<T, RetrievalError>;
