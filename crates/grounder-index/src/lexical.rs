//! Sparse-encoder input text.
//!
//! Lexical text is never shown to the consuming agent; it exists so the
//! sparse lane can match identifiers and paths that dense models blur.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::languages::Lang;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LexicalConfig {
    #[serde(default = "default_true")]
    pub include_path_tokens: bool,
    #[serde(default = "default_true")]
    pub include_comments: bool,
    #[serde(default = "default_true")]
    pub include_string_literals: bool,
}

fn default_true() -> bool {
    true
}

impl Default for LexicalConfig {
    fn default() -> Self {
        Self {
            include_path_tokens: true,
            include_comments: true,
            include_string_literals: true,
        }
    }
}

static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)*")
        .expect("valid identifier regex")
});

static STRING_LITERAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""(?:[^"\\\n]|\\.)*"|'(?:[^'\\\n]|\\.)*'|`[^`]*`"#).expect("valid literal regex")
});

static BLOCK_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)/\*.*?\*/").expect("valid block comment regex"));

static SLASH_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)//.*$").expect("valid line comment regex"));

static HASH_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)#.*$").expect("valid hash comment regex"));

/// Lexical text for a documentation chunk.
#[must_use]
pub fn doc_lexical(path: &str, body: &str, config: &LexicalConfig) -> String {
    let mut parts = Vec::new();
    if config.include_path_tokens {
        parts.extend(path_tokens(path));
    }
    parts.push(normalize(body));
    join_nonempty(parts)
}

/// Lexical text for a code chunk: path and symbol tokens, expanded
/// identifiers, then the normalized body.
#[must_use]
pub fn code_lexical(
    path: &str,
    symbol: Option<&str>,
    body: &str,
    lang: Option<Lang>,
    config: &LexicalConfig,
) -> String {
    let mut body = body.to_owned();
    if !config.include_comments {
        body = strip_comments(&body, lang);
    }
    if !config.include_string_literals {
        body = STRING_LITERAL.replace_all(&body, " ").into_owned();
    }

    let mut parts = Vec::new();
    if config.include_path_tokens {
        parts.extend(path_tokens(path));
    }
    if let Some(symbol) = symbol {
        let base = symbol.split('#').next().unwrap_or(symbol);
        parts.push(base.to_lowercase());
        parts.extend(split_identifier(base));
    }
    parts.extend(expand_identifiers(&body));
    parts.push(normalize(&body));
    join_nonempty(parts)
}

/// Lower-case and collapse whitespace.
#[must_use]
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Path components and their word parts: `src/http_client.rs` yields
/// `src http_client.rs http client rs` (components first).
#[must_use]
pub fn path_tokens(path: &str) -> Vec<String> {
    let mut out = Vec::new();
    for component in path.split(['/', '\\']).filter(|c| !c.is_empty()) {
        out.push(component.to_lowercase());
        let words: Vec<String> = component
            .split(['.', '-', '_'])
            .filter(|w| !w.is_empty())
            .flat_map(split_case)
            .collect();
        if words.len() > 1 {
            out.extend(words);
        }
    }
    out
}

/// Identifiers whose word split adds information: snake_case and camelCase
/// names expand to their words, dotted names are kept whole and split.
#[must_use]
pub fn expand_identifiers(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    for m in IDENTIFIER.find_iter(text) {
        let ident = m.as_str();
        if ident.contains('.') {
            out.push(ident.to_lowercase());
            for part in ident.split('.') {
                out.extend(split_identifier(part));
            }
        } else {
            out.extend(split_identifier(ident));
        }
    }
    out
}

/// Words of a compound identifier, or nothing if it is a single word.
fn split_identifier(ident: &str) -> Vec<String> {
    let words: Vec<String> = ident
        .split('_')
        .filter(|w| !w.is_empty())
        .flat_map(split_case)
        .collect();
    if words.len() > 1 { words } else { Vec::new() }
}

/// Split camelCase / PascalCase / `HTTPServer` style words.
fn split_case(word: &str) -> Vec<String> {
    let chars: Vec<char> = word.chars().collect();
    let mut out = Vec::new();
    let mut current = String::new();
    for (i, &c) in chars.iter().enumerate() {
        let boundary = i > 0
            && c.is_uppercase()
            && (chars[i - 1].is_lowercase()
                || chars[i - 1].is_ascii_digit()
                || (chars[i - 1].is_uppercase()
                    && chars.get(i + 1).is_some_and(|n| n.is_lowercase())));
        if boundary && !current.is_empty() {
            out.push(current.to_lowercase());
            current.clear();
        }
        current.push(c);
    }
    if !current.is_empty() {
        out.push(current.to_lowercase());
    }
    out
}

fn strip_comments(body: &str, lang: Option<Lang>) -> String {
    match lang {
        Some(Lang::Python) => HASH_COMMENT.replace_all(body, "").into_owned(),
        Some(_) => {
            let without_block = BLOCK_COMMENT.replace_all(body, " ");
            SLASH_COMMENT.replace_all(&without_block, "").into_owned()
        }
        None => {
            let without_block = BLOCK_COMMENT.replace_all(body, " ");
            let without_slash = SLASH_COMMENT.replace_all(&without_block, "");
            HASH_COMMENT.replace_all(&without_slash, "").into_owned()
        }
    }
}

fn join_nonempty(parts: Vec<String>) -> String {
    parts
        .into_iter()
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
