//! Corpus ingestion for the hybrid index.
//!
//! Files are discovered per corpus, chunked by content type (markdown
//! sections for docs, AST symbols for code), embedded with the matching dense
//! model plus a sparse lexical encoder, and upserted as points carrying
//! exactly one dense vector each.

pub mod chunker;
pub mod discovery;
pub mod error;
pub mod languages;
pub mod lexical;
pub mod manifest;
pub mod pipeline;
pub mod point;
pub mod record;

pub use chunker::{ChunkingConfig, CodeChunkConfig, DocChunkConfig, chunk_file};
pub use discovery::{CorpusSpec, Discovery, SkipReason, discover};
pub use error::{DiscoveryError, IngestError, Result};
pub use lexical::LexicalConfig;
pub use manifest::{CorpusCounts, CorpusReport, ManifestBuilder, RunManifest};
pub use pipeline::{IngestOptions, Ingestor};
pub use point::build_point;
pub use record::{ChunkKind, ChunkRecord, ContentKind};
