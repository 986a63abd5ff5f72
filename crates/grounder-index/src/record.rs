//! Chunk records and their deterministic identifiers.

use std::fmt;

use grounder_store::DenseField;
use serde::{Deserialize, Serialize};

/// Which corpus a file belongs to. Assigned at discovery from the corpus
/// configuration and never re-derived downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Doc,
    Code,
}

impl ContentKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Doc => "doc",
            Self::Code => "code",
        }
    }

    /// Dense vector field that stores this corpus.
    #[must_use]
    pub fn dense_field(self) -> DenseField {
        match self {
            Self::Doc => DenseField::DenseDocs,
            Self::Code => DenseField::DenseCode,
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structural kind of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    Section,
    ModuleHeader,
    Function,
    Class,
    Block,
    File,
}

impl ChunkKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Section => "section",
            Self::ModuleHeader => "module_header",
            Self::Function => "function",
            Self::Class => "class",
            Self::Block => "block",
            Self::File => "file",
        }
    }
}

impl fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One retrievable unit of a source file at a specific commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub chunk_id: String,
    pub corpus: ContentKind,
    /// Configured corpus name.
    pub source: String,
    pub repo: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub commit: String,
    pub path: String,
    pub kind: ChunkKind,
    pub language: Option<String>,
    pub chunk_index: usize,
    /// Provenance header followed by the body; this is what gets embedded and shown.
    pub text: String,
    /// Sparse-encoder input. Not stored in the payload.
    #[serde(skip_serializing)]
    #[serde(default)]
    pub lexical_text: String,
    pub text_hash: String,
    pub symbol: Option<String>,
    pub start_line: Option<usize>,
    pub end_line: Option<usize>,
    #[serde(default)]
    pub heading_path: Vec<String>,
}

impl ChunkRecord {
    /// Qdrant point id for this record.
    #[must_use]
    pub fn point_id(&self) -> String {
        point_id(&self.chunk_id)
    }
}

#[must_use]
pub fn blake3_hex(input: &str) -> String {
    blake3::hash(input.as_bytes()).to_hex().to_string()
}

/// Hash of the chunk text.
#[must_use]
pub fn text_hash(text: &str) -> String {
    blake3_hex(text)
}

/// Chunk id: a pure function of corpus, commit, path, position and content.
#[must_use]
pub fn chunk_id(
    corpus: ContentKind,
    commit: &str,
    path: &str,
    chunk_index: usize,
    text_hash: &str,
) -> String {
    let key = format!(
        "{}\x1f{commit}\x1f{path}\x1f{chunk_index}\x1f{text_hash}",
        corpus.as_str()
    );
    blake3_hex(&key)
}

/// UUIDv5 of `chunk_id` in the OID namespace; the store needs UUID ids.
#[must_use]
pub fn point_id(chunk_id: &str) -> String {
    uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_OID, chunk_id.as_bytes()).to_string()
}

/// First seven characters of a commit hash, or the whole value if shorter.
#[must_use]
pub fn short_commit(commit: &str) -> &str {
    commit.get(..7).unwrap_or(commit)
}
