//! Embedding, sparse encoding and rerank clients with shared batching and retry.

pub mod batched;
pub mod batching;
pub mod error;
pub mod http;
#[cfg(feature = "mock")]
pub mod mock;
pub mod provider;
pub mod retry;
pub mod sparse;
pub mod voyage;

pub use batching::{BatchLimits, WindowLimits};
pub use error::EmbedError;
pub use provider::{
    BoxFuture, ContextualEmbedder, DenseEmbedder, InputType, RerankHit, Reranker, SparseEncoder,
    SparseVector,
};
pub use retry::{RetryPolicy, Transient, with_retry};
pub use sparse::{HashingSparseEncoder, TeiSparseClient};
pub use voyage::VoyageClient;
