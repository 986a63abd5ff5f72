//! Language detection and tree-sitter grammar registry.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::record::ChunkKind;

/// Supported source language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lang {
    Rust,
    Python,
    JavaScript,
    TypeScript,
    Tsx,
    Go,
}

impl Lang {
    /// Identifier used in payloads.
    #[must_use]
    pub fn id(self) -> &'static str {
        match self {
            Self::Rust => "rust",
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Tsx => "tsx",
            Self::Go => "go",
        }
    }

    /// Get the tree-sitter grammar. Returns `None` if the
    /// corresponding feature is not enabled.
    #[must_use]
    pub fn grammar(self) -> Option<tree_sitter::Language> {
        match self {
            #[cfg(feature = "lang-rust")]
            Self::Rust => Some(tree_sitter_rust::LANGUAGE.into()),
            #[cfg(feature = "lang-python")]
            Self::Python => Some(tree_sitter_python::LANGUAGE.into()),
            #[cfg(feature = "lang-js")]
            Self::JavaScript => Some(tree_sitter_javascript::LANGUAGE.into()),
            #[cfg(feature = "lang-js")]
            Self::TypeScript => Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
            #[cfg(feature = "lang-js")]
            Self::Tsx => Some(tree_sitter_typescript::LANGUAGE_TSX.into()),
            #[cfg(feature = "lang-go")]
            Self::Go => Some(tree_sitter_go::LANGUAGE.into()),
            #[allow(unreachable_patterns)]
            _ => None,
        }
    }

    /// Chunk kind for a top-level AST node, or `None` if the node is not a
    /// symbol boundary. Wrapper nodes (decorators, `export`) are unwrapped by
    /// the chunker before this is consulted.
    #[must_use]
    pub fn symbol_kind(self, node_kind: &str) -> Option<ChunkKind> {
        let kind = match (self, node_kind) {
            (Self::Rust, "function_item" | "macro_definition")
            | (Self::Python, "function_definition")
            | (
                Self::JavaScript | Self::TypeScript | Self::Tsx,
                "function_declaration" | "generator_function_declaration",
            )
            | (Self::Go, "function_declaration" | "method_declaration") => ChunkKind::Function,
            (
                Self::Rust,
                "struct_item" | "enum_item" | "trait_item" | "impl_item" | "mod_item" | "union_item",
            )
            | (Self::Python, "class_definition")
            | (
                Self::JavaScript | Self::TypeScript | Self::Tsx,
                "class_declaration"
                | "abstract_class_declaration"
                | "interface_declaration"
                | "enum_declaration"
                | "type_alias_declaration",
            )
            | (Self::Go, "type_declaration") => ChunkKind::Class,
            _ => return None,
        };
        Some(kind)
    }

    /// Node kinds that attach to the symbol directly below them
    /// (attributes, doc comments).
    #[must_use]
    pub fn attached_kinds(self) -> &'static [&'static str] {
        match self {
            Self::Rust => &["attribute_item", "line_comment", "block_comment"],
            Self::Python | Self::JavaScript | Self::TypeScript | Self::Tsx | Self::Go => {
                &["comment"]
            }
        }
    }
}

impl std::fmt::Display for Lang {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// Detect language from file extension.
#[must_use]
pub fn detect_language(path: &Path) -> Option<Lang> {
    let ext = path.extension()?.to_str()?;
    match ext {
        "rs" => Some(Lang::Rust),
        "py" | "pyi" => Some(Lang::Python),
        "js" | "jsx" | "mjs" | "cjs" => Some(Lang::JavaScript),
        "ts" | "mts" | "cts" => Some(Lang::TypeScript),
        "tsx" => Some(Lang::Tsx),
        "go" => Some(Lang::Go),
        _ => None,
    }
}

/// Column-0 definition line: optional visibility/async/export prefixes, a
/// definition keyword, then the name.
static DEFINITION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:pub(?:\([^)]*\))?\s+)?(?:export\s+)?(?:default\s+)?(?:async\s+)?(?:unsafe\s+)?(def|class|fn|func|function|struct|impl|trait|enum|interface|type)\b\s*(?:\([^)]*\)\s*)?(?:<[^>]*>\s*)?([A-Za-z_][A-Za-z0-9_]*)?",
    )
    .expect("valid definition regex")
});

/// Match a definition line for the keyword fallback tier, returning the chunk
/// kind and the defined name if present.
#[must_use]
pub fn match_definition(line: &str) -> Option<(ChunkKind, Option<String>)> {
    let caps = DEFINITION.captures(line)?;
    let kind = match &caps[1] {
        "def" | "fn" | "func" | "function" => ChunkKind::Function,
        _ => ChunkKind::Class,
    };
    Some((kind, caps.get(2).map(|m| m.as_str().to_owned())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_language_rs() {
        assert_eq!(detect_language(Path::new("src/main.rs")), Some(Lang::Rust));
    }

    #[test]
    fn detect_language_py() {
        assert_eq!(detect_language(Path::new("script.py")), Some(Lang::Python));
    }

    #[test]
    fn detect_language_ts_variants() {
        for ext in &["ts", "mts", "cts"] {
            let path = format!("file.{ext}");
            assert_eq!(
                detect_language(Path::new(&path)),
                Some(Lang::TypeScript),
                "failed for .{ext}"
            );
        }
        assert_eq!(detect_language(Path::new("App.tsx")), Some(Lang::Tsx));
    }

    #[test]
    fn detect_language_unknown_ext_returns_none() {
        assert_eq!(detect_language(Path::new("file.xyz")), None);
        assert_eq!(detect_language(Path::new("README.md")), None);
        assert_eq!(detect_language(Path::new("file")), None);
    }

    #[test]
    fn symbol_kinds_per_language() {
        assert_eq!(
            Lang::Python.symbol_kind("class_definition"),
            Some(ChunkKind::Class)
        );
        assert_eq!(
            Lang::Rust.symbol_kind("function_item"),
            Some(ChunkKind::Function)
        );
        assert_eq!(Lang::Go.symbol_kind("type_declaration"), Some(ChunkKind::Class));
        assert_eq!(Lang::Python.symbol_kind("import_statement"), None);
    }

    #[test]
    fn grammar_returns_some_for_enabled_features() {
        #[cfg(feature = "lang-rust")]
        assert!(Lang::Rust.grammar().is_some());
        #[cfg(feature = "lang-python")]
        assert!(Lang::Python.grammar().is_some());
        #[cfg(feature = "lang-js")]
        {
            assert!(Lang::JavaScript.grammar().is_some());
            assert!(Lang::TypeScript.grammar().is_some());
            assert!(Lang::Tsx.grammar().is_some());
        }
        #[cfg(feature = "lang-go")]
        assert!(Lang::Go.grammar().is_some());
    }

    /// Angle-bracket casts only parse under the plain TypeScript grammar; the
    /// TSX grammar reads them as JSX.
    #[cfg(feature = "lang-js")]
    #[test]
    fn typescript_and_tsx_use_their_own_grammars() {
        let src = "function widen(x: unknown) {\n  return <string>x;\n}\n";
        let parse = |lang: Lang| {
            let mut parser = tree_sitter::Parser::new();
            parser.set_language(&lang.grammar().unwrap()).unwrap();
            parser.parse(src, None).unwrap().root_node().has_error()
        };
        assert!(!parse(Lang::TypeScript));
        assert!(parse(Lang::Tsx));
    }

    #[test]
    fn definition_lines() {
        assert_eq!(
            match_definition("def run_async(self):"),
            Some((ChunkKind::Function, Some("run_async".into())))
        );
        assert_eq!(
            match_definition("pub(crate) async fn load() {"),
            Some((ChunkKind::Function, Some("load".into())))
        );
        assert_eq!(
            match_definition("export default class Runner {"),
            Some((ChunkKind::Class, Some("Runner".into())))
        );
        assert_eq!(
            match_definition("func (s *Server) Start() error {"),
            Some((ChunkKind::Function, Some("Start".into())))
        );
        assert_eq!(
            match_definition("impl<T> Store for Memory<T> {"),
            Some((ChunkKind::Class, Some("Store".into())))
        );
        assert!(match_definition("    def nested(self):").is_none());
        assert!(match_definition("definitely_not = 1").is_none());
        assert!(match_definition("types = []").is_none());
    }

    #[test]
    fn lang_id_display() {
        for lang in [
            Lang::Rust,
            Lang::Python,
            Lang::JavaScript,
            Lang::TypeScript,
            Lang::Tsx,
            Lang::Go,
        ] {
            assert_eq!(lang.to_string(), lang.id());
        }
    }
}
