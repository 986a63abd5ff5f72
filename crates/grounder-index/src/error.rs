//! Error types for grounder-index.

use std::path::PathBuf;

/// Errors raised while walking a corpus root.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    /// The corpus root is missing or cannot be listed.
    #[error("corpus root {root} is unreadable: {source}")]
    RootUnreadable {
        root: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An include or exclude glob failed to compile.
    #[error("invalid glob {pattern:?}: {source}")]
    Glob {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },
}

/// Errors that abort an ingestion run.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("embedding failed: {0}")]
    Embed(#[from] grounder_embed::EmbedError),

    #[error("vector store error: {0}")]
    Store(#[from] grounder_store::VectorStoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("chunking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("embedding dimension {got} does not match collection dimension {expected}")]
    Dimension { expected: usize, got: usize },

    #[error("{0}")]
    Other(String),
}

/// Result type alias using `IngestError`.
pub type Result<T> = std::result::Result<T, IngestError>;
