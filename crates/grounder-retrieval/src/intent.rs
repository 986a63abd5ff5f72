//! Query intent: explicit or classified from surface patterns.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::RetrievalError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Debug,
    ApiLookup,
    CodeExample,
    HowTo,
    Conceptual,
    Migration,
    TargetedFile,
    /// Explicit only; never produced by classification.
    CodeOnly,
    /// Explicit only; never produced by classification.
    DocsOnly,
    General,
}

impl Intent {
    pub const ALL: [Self; 10] = [
        Self::Debug,
        Self::ApiLookup,
        Self::CodeExample,
        Self::HowTo,
        Self::Conceptual,
        Self::Migration,
        Self::TargetedFile,
        Self::CodeOnly,
        Self::DocsOnly,
        Self::General,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::ApiLookup => "api_lookup",
            Self::CodeExample => "code_example",
            Self::HowTo => "how_to",
            Self::Conceptual => "conceptual",
            Self::Migration => "migration",
            Self::TargetedFile => "targeted_file",
            Self::CodeOnly => "code_only",
            Self::DocsOnly => "docs_only",
            Self::General => "general",
        }
    }

    /// Intents whose template restricts the corpus; the coverage quota does
    /// not apply to them.
    #[must_use]
    pub fn is_corpus_forced(self) -> bool {
        matches!(self, Self::CodeOnly | Self::DocsOnly | Self::TargetedFile)
    }

    /// Reranker instruction prepended to the query.
    #[must_use]
    pub fn rerank_instruction(self) -> &'static str {
        match self {
            Self::Debug => {
                "Rank evidence for debugging this error and understanding the library internals involved."
            }
            Self::ApiLookup => {
                "Rank evidence that states the exact signature, parameters and return values of the API in question."
            }
            Self::CodeExample => {
                "Rank evidence that shows working usage of the API in question. Prefer concrete code."
            }
            Self::HowTo | Self::General => {
                "Rank evidence for a correct implementation. Prefer official documentation and official library source."
            }
            Self::Conceptual => "Rank evidence for explaining concepts and architecture.",
            Self::Migration => {
                "Rank evidence about deprecations, version differences and migration steps."
            }
            Self::TargetedFile => "Rank evidence from the referenced file first.",
            Self::CodeOnly => "Rank source code evidence for the query.",
            Self::DocsOnly => "Rank documentation evidence for the query.",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Intent {
    type Err = RetrievalError;

    /// Accepts `code_only`, `CODE_ONLY` and `code-only`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|i| i.as_str() == wanted)
            .ok_or_else(|| RetrievalError::UnknownIntent(s.to_owned()))
    }
}

static ERROR_MARKERS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)traceback \(most recent call last\)|\b\w+(?:error|exception)\b|\berror(?:\[e\d+\])?:|panicked at|stack ?trace|\bline \d+, in\b",
    )
    .expect("valid regex")
});

const PATH_EXTENSIONS: &[&str] = &[
    "py", "pyi", "rs", "go", "js", "jsx", "ts", "tsx", "java", "md", "mdx", "rst", "txt", "toml",
    "yaml", "yml", "json", "cfg", "ini",
];

const KEYWORD_RULES: &[(&[&str], Intent)] = &[
    (
        &["parameter", "signature", "argument", "returns"],
        Intent::ApiLookup,
    ),
    (&["example", "used in", "usage"], Intent::CodeExample),
    (&["deprecated", "version", "migrat"], Intent::Migration),
    (
        &["implement", "build", "create", "how to", "how do"],
        Intent::HowTo,
    ),
    (
        &["concept", "overview", "what is", "explain", "architecture"],
        Intent::Conceptual,
    ),
];

/// Explicit intent wins; otherwise the query is classified.
#[must_use]
pub fn resolve(explicit: Option<Intent>, query: &str) -> Intent {
    explicit.unwrap_or_else(|| classify(query))
}

/// Ordered rule table: error markers, then path-like tokens, then keyword
/// groups, then `General`.
#[must_use]
pub fn classify(query: &str) -> Intent {
    if ERROR_MARKERS.is_match(query) {
        return Intent::Debug;
    }
    if path_token(query).is_some() {
        return Intent::TargetedFile;
    }
    let lower = query.to_lowercase();
    KEYWORD_RULES
        .iter()
        .find(|(needles, _)| needles.iter().any(|n| lower.contains(n)))
        .map_or(Intent::General, |(_, intent)| *intent)
}

/// Leading directories that mark an extensionless token as a repository path.
const SOURCE_ROOTS: &[&str] = &["src", "lib", "tests", "test", "docs", "crates", "pkg", "cmd"];

/// First token that looks like a repository path: a file name with a known
/// source extension, a `./`-relative path, or a `/`-separated path whose
/// last segment has a known extension or whose first segment is a source root.
#[must_use]
pub fn path_token(query: &str) -> Option<String> {
    query
        .split_whitespace()
        .map(|t| t.trim_end_matches('.'))
        .map(|t| t.trim_matches(|c: char| "\"'`()[]{}<>,;:!?".contains(c)))
        .find(|t| is_path_like(t))
        .map(str::to_owned)
}

fn has_source_extension(segment: &str) -> bool {
    segment
        .rsplit_once('.')
        .is_some_and(|(stem, ext)| !stem.is_empty() && PATH_EXTENSIONS.contains(&ext))
}

fn is_path_like(token: &str) -> bool {
    if token.is_empty() || token.contains("://") {
        return false;
    }
    let valid = |seg: &str| {
        !seg.is_empty()
            && seg
                .chars()
                .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
    };
    let relative = token.starts_with("./");
    let segments: Vec<&str> = token.trim_start_matches("./").split('/').collect();
    if !segments.iter().all(|s| valid(s)) {
        return false;
    }
    match segments.as_slice() {
        [] => false,
        [name] => relative || has_source_extension(name),
        [first, .., last] => {
            relative || has_source_extension(last) || SOURCE_ROOTS.contains(first)
        }
    }
}
