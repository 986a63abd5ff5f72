//! Corpus file discovery.

use std::path::{Path, PathBuf};

use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};

use crate::error::DiscoveryError;
use crate::record::ContentKind;

/// Bytes inspected for NUL when deciding whether a file is binary.
const BINARY_SNIFF_BYTES: usize = 8 * 1024;

/// One configured corpus: a checked-out repository root and its filters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorpusSpec {
    /// Corpus name stored as `source` on every chunk.
    pub name: String,
    /// Authoritative content tag for every file of this corpus.
    pub corpus: ContentKind,
    pub root: PathBuf,
    pub repo: String,
    #[serde(rename = "ref", default = "default_ref")]
    pub git_ref: String,
    /// Pinned commit; resolved from the checkout when absent.
    #[serde(default)]
    pub commit: Option<String>,
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
    /// Extensions without the leading dot; empty allows every extension.
    #[serde(default)]
    pub allowed_exts: Vec<String>,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
}

fn default_ref() -> String {
    "main".into()
}

fn default_max_file_bytes() -> u64 {
    500_000
}

impl CorpusSpec {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        corpus: ContentKind,
        root: impl Into<PathBuf>,
        repo: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            corpus,
            root: root.into(),
            repo: repo.into(),
            git_ref: default_ref(),
            commit: None,
            include: Vec::new(),
            exclude: Vec::new(),
            allowed_exts: Vec::new(),
            max_file_bytes: default_max_file_bytes(),
        }
    }
}

/// A file accepted for chunking.
#[derive(Debug, Clone)]
pub struct DiscoveredFile {
    /// Path relative to the corpus root, `/`-separated.
    pub rel_path: String,
    pub bytes: u64,
    pub corpus: ContentKind,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Excluded,
    NotIncluded,
    Extension,
    TooLarge { bytes: u64 },
    Binary,
    NotUtf8,
    Unreadable { error: String },
}

impl SkipReason {
    /// Whether the skip should surface as a run warning rather than routine
    /// filtering.
    #[must_use]
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            Self::Binary | Self::NotUtf8 | Self::Unreadable { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedFile {
    pub rel_path: String,
    pub reason: SkipReason,
}

#[derive(Debug, Default)]
pub struct Discovery {
    /// Sorted by `rel_path`.
    pub files: Vec<DiscoveredFile>,
    pub skipped: Vec<SkippedFile>,
}

/// Walk `spec.root` and apply the corpus filters in fixed order: exclude
/// globs, include globs, extension allow-list, size cap, binary check.
///
/// # Errors
///
/// Returns `RootUnreadable` if the root cannot be listed and `Glob` for an
/// invalid pattern. Per-file problems are reported in `skipped`.
pub fn discover(spec: &CorpusSpec) -> Result<Discovery, DiscoveryError> {
    std::fs::read_dir(&spec.root).map_err(|source| DiscoveryError::RootUnreadable {
        root: spec.root.clone(),
        source,
    })?;

    let include = compile(&spec.include)?;
    let exclude = compile(&spec.exclude)?;
    let exts: Vec<String> = spec
        .allowed_exts
        .iter()
        .map(|e| e.trim_start_matches('.').to_lowercase())
        .collect();

    let walker = ignore::WalkBuilder::new(&spec.root)
        .standard_filters(false)
        .filter_entry(|entry| entry.file_name() != ".git")
        .build();

    let mut discovery = Discovery::default();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(corpus = %spec.name, "walk error: {e}");
                continue;
            }
        };
        if !entry.file_type().is_some_and(|ft| ft.is_file()) {
            continue;
        }
        let Some(rel_path) = relative(&spec.root, entry.path()) else {
            continue;
        };

        match accept(entry.path(), &rel_path, spec, &include, &exclude, &exts) {
            Ok((bytes, content)) => discovery.files.push(DiscoveredFile {
                rel_path,
                bytes,
                corpus: spec.corpus,
                content,
            }),
            Err(reason) => discovery.skipped.push(SkippedFile { rel_path, reason }),
        }
    }

    discovery.files.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    discovery.skipped.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    tracing::info!(
        corpus = %spec.name,
        files = discovery.files.len(),
        skipped = discovery.skipped.len(),
        "discovery complete"
    );
    Ok(discovery)
}

fn compile(patterns: &[String]) -> Result<Vec<Pattern>, DiscoveryError> {
    patterns
        .iter()
        .map(|p| {
            Pattern::new(p).map_err(|source| DiscoveryError::Glob {
                pattern: p.clone(),
                source,
            })
        })
        .collect()
}

fn relative(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    (!parts.is_empty()).then(|| parts.join("/"))
}

fn accept(
    path: &Path,
    rel_path: &str,
    spec: &CorpusSpec,
    include: &[Pattern],
    exclude: &[Pattern],
    exts: &[String],
) -> Result<(u64, String), SkipReason> {
    let options = MatchOptions::new();
    if exclude.iter().any(|p| p.matches_with(rel_path, options)) {
        return Err(SkipReason::Excluded);
    }
    if !include.is_empty() && !include.iter().any(|p| p.matches_with(rel_path, options)) {
        return Err(SkipReason::NotIncluded);
    }
    if !exts.is_empty() {
        let ext = Path::new(rel_path)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase());
        if !ext.is_some_and(|e| exts.contains(&e)) {
            return Err(SkipReason::Extension);
        }
    }

    let bytes = std::fs::metadata(path)
        .map_err(|e| SkipReason::Unreadable {
            error: e.to_string(),
        })?
        .len();
    if bytes > spec.max_file_bytes {
        return Err(SkipReason::TooLarge { bytes });
    }

    let raw = std::fs::read(path).map_err(|e| SkipReason::Unreadable {
        error: e.to_string(),
    })?;
    decode(raw).map(|content| (bytes, content))
}

/// NUL in the first 8 KiB marks a file binary; otherwise strict UTF-8.
fn decode(raw: Vec<u8>) -> Result<String, SkipReason> {
    let sniff = &raw[..raw.len().min(BINARY_SNIFF_BYTES)];
    if sniff.contains(&0) {
        return Err(SkipReason::Binary);
    }
    String::from_utf8(raw).map_err(|_| SkipReason::NotUtf8)
}
