//! Deterministic chunking for documentation and source files.
//!
//! Chunking never fails: the code chunker degrades through tree-sitter,
//! keyword and blank-line tiers down to a single capped `file` chunk.

pub mod code;
pub mod doc;

use serde::{Deserialize, Serialize};

use crate::languages::detect_language;
use crate::lexical::{LexicalConfig, code_lexical, doc_lexical};
use crate::record::{ChunkKind, ChunkRecord, ContentKind, chunk_id, short_commit, text_hash};

/// Markdown chunking parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocChunkConfig {
    /// Headings at or above this level open a new section.
    #[serde(default = "default_heading_level")]
    pub heading_level: u8,
    #[serde(default = "default_doc_target")]
    pub target_chars: usize,
    #[serde(default = "default_doc_max")]
    pub max_chars: usize,
    /// Characters of the previous chunk repeated at the start of the next.
    #[serde(default = "default_overlap")]
    pub overlap_chars: usize,
}

fn default_heading_level() -> u8 {
    2
}

fn default_doc_target() -> usize {
    1500
}

fn default_doc_max() -> usize {
    3000
}

fn default_overlap() -> usize {
    200
}

impl Default for DocChunkConfig {
    fn default() -> Self {
        Self {
            heading_level: default_heading_level(),
            target_chars: default_doc_target(),
            max_chars: default_doc_max(),
            overlap_chars: default_overlap(),
        }
    }
}

/// Source code chunking parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeChunkConfig {
    /// Symbols larger than this are split into `#partN` chunks.
    #[serde(default = "default_code_max")]
    pub max_chars: usize,
    /// Cap for the last-resort whole-file chunk.
    #[serde(default = "default_file_cap")]
    pub file_cap_chars: usize,
}

fn default_code_max() -> usize {
    4000
}

fn default_file_cap() -> usize {
    8000
}

impl Default for CodeChunkConfig {
    fn default() -> Self {
        Self {
            max_chars: default_code_max(),
            file_cap_chars: default_file_cap(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingConfig {
    #[serde(default)]
    pub doc: DocChunkConfig,
    #[serde(default)]
    pub code: CodeChunkConfig,
}

/// Chunk body and location, before provenance is attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawChunk {
    pub kind: ChunkKind,
    pub body: String,
    pub symbol: Option<String>,
    pub start_line: Option<usize>,
    pub end_line: Option<usize>,
    pub heading_path: Vec<String>,
}

/// Provenance shared by every chunk of one file.
#[derive(Debug, Clone, Copy)]
pub struct FileContext<'a> {
    pub corpus: ContentKind,
    pub source: &'a str,
    pub repo: &'a str,
    pub git_ref: &'a str,
    pub commit: &'a str,
    pub path: &'a str,
}

/// Chunk one file into records, routed by the corpus tag assigned at discovery.
#[must_use]
pub fn chunk_file(
    file: &FileContext<'_>,
    content: &str,
    config: &ChunkingConfig,
    lexical: &LexicalConfig,
) -> Vec<ChunkRecord> {
    let lang = detect_language(std::path::Path::new(file.path));
    let raw = match file.corpus {
        ContentKind::Doc => doc::chunk_markdown(content, &config.doc),
        ContentKind::Code => code::chunk_code(content, lang, &config.code),
    };

    let language = match file.corpus {
        ContentKind::Code => lang.map(|l| l.id().to_owned()),
        ContentKind::Doc => Some("markdown".to_owned()),
    };

    raw.into_iter()
        .enumerate()
        .map(|(chunk_index, chunk)| {
            let text = format!("{}{}", header(file, &chunk), chunk.body);
            let lexical_text = match file.corpus {
                ContentKind::Doc => doc_lexical(file.path, &chunk.body, lexical),
                ContentKind::Code => code_lexical(
                    file.path,
                    chunk.symbol.as_deref(),
                    &chunk.body,
                    lang,
                    lexical,
                ),
            };
            let text_hash = text_hash(&text);
            ChunkRecord {
                chunk_id: chunk_id(file.corpus, file.commit, file.path, chunk_index, &text_hash),
                corpus: file.corpus,
                source: file.source.to_owned(),
                repo: file.repo.to_owned(),
                git_ref: file.git_ref.to_owned(),
                commit: file.commit.to_owned(),
                path: file.path.to_owned(),
                kind: chunk.kind,
                language: language.clone(),
                chunk_index,
                text,
                lexical_text,
                text_hash,
                symbol: chunk.symbol,
                start_line: chunk.start_line,
                end_line: chunk.end_line,
                heading_path: chunk.heading_path,
            }
        })
        .collect()
}

/// Provenance header prepended to each chunk body.
fn header(file: &FileContext<'_>, chunk: &RawChunk) -> String {
    let mut out = format!(
        "[{}] {}@{}:{}\n",
        file.corpus,
        file.repo,
        short_commit(file.commit),
        file.path
    );
    match file.corpus {
        ContentKind::Doc => {
            if !chunk.heading_path.is_empty() {
                out.push_str("# ");
                out.push_str(&chunk.heading_path.join(" > "));
                out.push('\n');
            }
        }
        ContentKind::Code => {
            let name = chunk.symbol.as_deref().unwrap_or(chunk.kind.as_str());
            match (chunk.start_line, chunk.end_line) {
                (Some(a), Some(b)) => out.push_str(&format!("symbol: {name} (lines {a}-{b})\n")),
                _ => out.push_str(&format!("symbol: {name}\n")),
            }
        }
    }
    out
}

/// Byte offset to 1-based line number lookup.
pub(crate) struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    pub(crate) fn new(text: &str) -> Self {
        let mut starts = vec![0];
        starts.extend(text.match_indices('\n').map(|(i, _)| i + 1));
        Self { starts }
    }

    /// Line containing `byte`.
    pub(crate) fn line_of(&self, byte: usize) -> usize {
        self.starts.partition_point(|&s| s <= byte)
    }
}

pub(crate) fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// First `max` characters of `text`.
pub(crate) fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((i, _)) => &text[..i],
        None => text,
    }
}

/// Last `n` characters of `text`.
pub(crate) fn tail_chars(text: &str, n: usize) -> &str {
    if n == 0 {
        return "";
    }
    match text.char_indices().rev().nth(n - 1) {
        Some((i, _)) => &text[i..],
        None => text,
    }
}

/// Split `text` into pieces of at most `max` characters.
pub(crate) fn hard_split(text: &str, max: usize) -> Vec<(usize, &str)> {
    let max = max.max(1);
    let mut out = Vec::new();
    let mut start = 0;
    let mut count = 0;
    for (i, _) in text.char_indices() {
        if count == max {
            out.push((start, &text[start..i]));
            start = i;
            count = 0;
        }
        count += 1;
    }
    if start < text.len() {
        out.push((start, &text[start..]));
    }
    out
}

/// Group the inclusive row range `first..=last` of `lines` into ranges of at
/// most `max_chars`, preferring to cut at `cut_rows`. A segment between cuts
/// that alone exceeds the limit is split at line boundaries.
pub(crate) fn pack_rows(
    lines: &[&str],
    first: usize,
    last: usize,
    cut_rows: &[usize],
    max_chars: usize,
) -> Vec<(usize, usize)> {
    let row_chars = |a: usize, b: usize| -> usize {
        lines[a..=b].iter().map(|l| char_len(l) + 1).sum()
    };

    let mut bounds: Vec<usize> = cut_rows
        .iter()
        .copied()
        .filter(|&r| r > first && r <= last)
        .collect();
    bounds.sort_unstable();
    bounds.dedup();

    let mut segments = Vec::new();
    let mut seg_start = first;
    for b in bounds {
        segments.push((seg_start, b - 1));
        seg_start = b;
    }
    segments.push((seg_start, last));

    let mut pieces = Vec::new();
    for (a, b) in segments {
        if row_chars(a, b) <= max_chars {
            pieces.push((a, b));
            continue;
        }
        let mut start = a;
        let mut size = 0;
        for row in a..=b {
            let len = char_len(lines[row]) + 1;
            if size > 0 && size + len > max_chars {
                pieces.push((start, row - 1));
                start = row;
                size = 0;
            }
            size += len;
        }
        pieces.push((start, b));
    }

    let mut packed: Vec<(usize, usize)> = Vec::new();
    for (a, b) in pieces {
        if let Some(prev) = packed.last_mut()
            && row_chars(prev.0, b) <= max_chars
        {
            prev.1 = b;
            continue;
        }
        packed.push((a, b));
    }
    packed
}
