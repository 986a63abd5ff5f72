//! Source code chunking with a three-tier fallback ladder.

use tree_sitter::{Node, Parser};

use super::{CodeChunkConfig, RawChunk, char_len, hard_split, pack_rows, truncate_chars};
use crate::languages::{Lang, match_definition};
use crate::record::ChunkKind;

/// Contiguous row range destined to become one or more chunks.
#[derive(Debug)]
struct Span {
    kind: ChunkKind,
    first: usize,
    last: usize,
    symbol: Option<String>,
    /// Preferred rows to split at if the span is oversized.
    cuts: Vec<usize>,
}

impl Span {
    fn plain(kind: ChunkKind, first: usize, last: usize) -> Self {
        Self {
            kind,
            first,
            last,
            symbol: None,
            cuts: Vec::new(),
        }
    }
}

/// Chunk a source file. Never fails: each tier that cannot produce chunks
/// hands over to the next, ending with one capped `file` chunk.
#[must_use]
pub fn chunk_code(content: &str, lang: Option<Lang>, config: &CodeChunkConfig) -> Vec<RawChunk> {
    if content.trim().is_empty() {
        return Vec::new();
    }
    let lines: Vec<&str> = content.lines().collect();

    let spans = lang
        .and_then(|lang| syntax_spans(content, &lines, lang))
        .or_else(|| keyword_spans(&lines))
        .or_else(|| blank_line_spans(&lines, config.max_chars));

    match spans {
        Some(spans) => {
            let chunks = emit(spans, &lines, config.max_chars);
            if chunks.is_empty() {
                vec![file_chunk(content, config.file_cap_chars)]
            } else {
                chunks
            }
        }
        None => {
            tracing::debug!(
                language = lang.map(Lang::id),
                "no structure found, using file chunk"
            );
            vec![file_chunk(content, config.file_cap_chars)]
        }
    }
}

/// Tier 1: top-level symbols from the tree-sitter AST.
fn syntax_spans(content: &str, lines: &[&str], lang: Lang) -> Option<Vec<Span>> {
    let grammar = lang.grammar()?;
    let mut parser = Parser::new();
    parser.set_language(&grammar).ok()?;
    let tree = parser.parse(content, None)?;
    let root = tree.root_node();
    if root.has_error() {
        tracing::debug!(language = lang.id(), "syntax errors, falling back to keyword tier");
        return None;
    }

    let child_count = u32::try_from(root.named_child_count()).unwrap_or(u32::MAX);
    let children: Vec<Node> = (0..child_count).filter_map(|i| root.named_child(i)).collect();
    let symbols: Vec<(usize, ChunkKind, Node)> = children
        .iter()
        .enumerate()
        .filter_map(|(i, child)| symbol_node(lang, *child).map(|(k, n)| (i, k, n)))
        .collect();
    if symbols.is_empty() {
        return None;
    }

    let attached = lang.attached_kinds();
    let mut spans = Vec::new();
    let mut cursor = 0usize;
    let mut seen_symbol = false;

    for (idx, kind, inner) in symbols {
        let mut first_idx = idx;
        while first_idx > 0 {
            let prev = children[first_idx - 1];
            let adjacent = children[first_idx].start_position().row <= last_row(prev) + 1;
            if !attached.contains(&prev.kind()) || !adjacent || prev.start_position().row < cursor {
                break;
            }
            first_idx -= 1;
        }

        let start = children[first_idx].start_position().row.max(cursor);
        let end = last_row(children[idx]).min(lines.len().saturating_sub(1));
        if start > end {
            continue;
        }
        if start > cursor {
            let kind = if seen_symbol {
                ChunkKind::Block
            } else {
                ChunkKind::ModuleHeader
            };
            spans.push(Span::plain(kind, cursor, start - 1));
        }
        spans.push(Span {
            kind,
            first: start,
            last: end,
            symbol: symbol_name(inner, content),
            cuts: body_cuts(inner),
        });
        cursor = end + 1;
        seen_symbol = true;
    }

    if cursor < lines.len() {
        spans.push(Span::plain(ChunkKind::Block, cursor, lines.len() - 1));
    }
    Some(spans)
}

/// Resolve a top-level node to the definition it introduces, unwrapping
/// decorators and exports.
fn symbol_node<'t>(lang: Lang, node: Node<'t>) -> Option<(ChunkKind, Node<'t>)> {
    let inner = match node.kind() {
        "decorated_definition" => node.child_by_field_name("definition")?,
        "export_statement" => node.child_by_field_name("declaration")?,
        _ => node,
    };
    if let Some(kind) = lang.symbol_kind(inner.kind()) {
        return Some((kind, inner));
    }
    // `const handler = () => {}` and friends.
    if matches!(lang, Lang::JavaScript | Lang::TypeScript | Lang::Tsx)
        && matches!(inner.kind(), "lexical_declaration" | "variable_declaration")
    {
        let declarator = inner.named_child(0)?;
        let value = declarator.child_by_field_name("value")?;
        if matches!(value.kind(), "arrow_function" | "function_expression" | "function") {
            return Some((ChunkKind::Function, declarator));
        }
    }
    None
}

fn symbol_name(node: Node, content: &str) -> Option<String> {
    node.child_by_field_name("name")
        .or_else(|| node.child_by_field_name("type"))
        .or_else(|| {
            // Go `type X struct {}` keeps the name on the inner type_spec.
            node.named_child(0)
                .and_then(|spec| spec.child_by_field_name("name"))
        })
        .map(|n| content[n.byte_range()].to_string())
}

/// Start rows of the body's named children.
fn body_cuts(node: Node) -> Vec<usize> {
    let Some(body) = node.child_by_field_name("body") else {
        return Vec::new();
    };
    let count = u32::try_from(body.named_child_count()).unwrap_or(u32::MAX);
    (0..count)
        .filter_map(|i| body.named_child(i))
        .map(|child| child.start_position().row)
        .collect()
}

/// Last row a node occupies, ignoring a trailing newline.
fn last_row(node: Node) -> usize {
    let end = node.end_position();
    if end.column == 0 && end.row > node.start_position().row {
        end.row - 1
    } else {
        end.row
    }
}

/// Tier 2: column-0 definition keywords.
fn keyword_spans(lines: &[&str]) -> Option<Vec<Span>> {
    let defs: Vec<(usize, ChunkKind, Option<String>)> = lines
        .iter()
        .enumerate()
        .filter_map(|(row, line)| match_definition(line).map(|(k, name)| (row, k, name)))
        .collect();
    if defs.is_empty() {
        return None;
    }

    let mut starts = Vec::with_capacity(defs.len());
    let mut floor = 0;
    for (row, _, _) in &defs {
        let mut first = *row;
        while first > floor && is_attachment(lines[first - 1]) {
            first -= 1;
        }
        starts.push(first);
        floor = row + 1;
    }

    let mut spans = Vec::new();
    if starts[0] > 0 {
        spans.push(Span::plain(ChunkKind::ModuleHeader, 0, starts[0] - 1));
    }
    for (n, (_, kind, name)) in defs.into_iter().enumerate() {
        let last = starts.get(n + 1).map_or(lines.len() - 1, |next| next - 1);
        spans.push(Span {
            kind,
            first: starts[n],
            last,
            symbol: name,
            cuts: blank_rows(lines, starts[n], last),
        });
    }
    Some(spans)
}

fn is_attachment(line: &str) -> bool {
    line.starts_with('@') || line.starts_with('#') || line.starts_with("//")
}

/// Tier 3: blank-line-delimited blocks packed up to `max_chars`. Needs at
/// least one separator between non-blank runs.
fn blank_line_spans(lines: &[&str], max_chars: usize) -> Option<Vec<Span>> {
    let starts: Vec<usize> = (0..lines.len())
        .filter(|&row| {
            !lines[row].trim().is_empty() && (row == 0 || lines[row - 1].trim().is_empty())
        })
        .collect();
    if starts.len() < 2 {
        return None;
    }
    let spans = pack_rows(lines, 0, lines.len() - 1, &starts, max_chars)
        .into_iter()
        .map(|(a, b)| Span::plain(ChunkKind::Block, a, b))
        .collect();
    Some(spans)
}

fn blank_rows(lines: &[&str], first: usize, last: usize) -> Vec<usize> {
    (first..=last)
        .filter(|&row| lines[row].trim().is_empty())
        .collect()
}

/// Drop leading and trailing blank rows; `None` if nothing remains.
fn trim_rows(lines: &[&str], first: usize, last: usize) -> Option<(usize, usize)> {
    let a = (first..=last).find(|&r| !lines[r].trim().is_empty())?;
    let b = (a..=last).rev().find(|&r| !lines[r].trim().is_empty())?;
    Some((a, b))
}

fn rows_text(lines: &[&str], first: usize, last: usize) -> String {
    lines[first..=last].join("\n")
}

fn emit(spans: Vec<Span>, lines: &[&str], max_chars: usize) -> Vec<RawChunk> {
    let mut out = Vec::new();
    for span in spans {
        let Some((first, last)) = trim_rows(lines, span.first, span.last) else {
            continue;
        };
        let body = rows_text(lines, first, last);
        if char_len(&body) <= max_chars {
            out.push(RawChunk {
                kind: span.kind,
                body,
                symbol: span.symbol,
                start_line: Some(first + 1),
                end_line: Some(last + 1),
                heading_path: Vec::new(),
            });
            continue;
        }

        let cuts = if span.cuts.is_empty() {
            blank_rows(lines, first, last)
        } else {
            span.cuts
        };
        let mut part = 0;
        for (a, b) in pack_rows(lines, first, last, &cuts, max_chars) {
            let Some((a, b)) = trim_rows(lines, a, b) else {
                continue;
            };
            for (start, end, body) in cap_rows(&rows_text(lines, a, b), a, max_chars) {
                part += 1;
                out.push(RawChunk {
                    kind: span.kind,
                    body,
                    symbol: span.symbol.as_ref().map(|s| format!("{s}#part{part}")),
                    start_line: Some(start + 1),
                    end_line: Some(end + 1),
                    heading_path: Vec::new(),
                });
            }
        }
    }
    out
}

/// `text` (rows from `first`) as pieces of at most `max_chars` with their row
/// ranges. Only a row that alone exceeds the limit is cut mid-line.
fn cap_rows(text: &str, first: usize, max_chars: usize) -> Vec<(usize, usize, String)> {
    if char_len(text) <= max_chars {
        return vec![(first, first + text.matches('\n').count(), text.to_owned())];
    }
    hard_split(text, max_chars)
        .into_iter()
        .filter(|(_, piece)| !piece.trim().is_empty())
        .map(|(offset, piece)| {
            let start = first + text[..offset].matches('\n').count();
            (start, start + piece.matches('\n').count(), piece.to_owned())
        })
        .collect()
}

fn file_chunk(content: &str, cap: usize) -> RawChunk {
    let body = truncate_chars(content.trim_end(), cap).to_string();
    let end_line = body.lines().count().max(1);
    RawChunk {
        kind: ChunkKind::File,
        body,
        symbol: None,
        start_line: Some(1),
        end_line: Some(end_line),
        heading_path: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CodeChunkConfig {
        CodeChunkConfig::default()
    }

    const PYTHON: &str = r#""""Greeting helpers."""
import os


class Greeter:
    def __init__(self, name):
        self.name = name

    def greet(self):
        return f"hi {self.name}"

    def shout(self):
        return self.greet().upper()


def main():
    print(Greeter(os.getlogin()).greet())
"#;

    #[cfg(feature = "lang-python")]
    #[test]
    fn python_class_and_function() {
        let chunks = chunk_code(PYTHON, Some(Lang::Python), &config());
        let kinds: Vec<ChunkKind> = chunks.iter().map(|c| c.kind).collect();
        assert_eq!(
            kinds,
            vec![ChunkKind::ModuleHeader, ChunkKind::Class, ChunkKind::Function]
        );
        assert_eq!((chunks[0].start_line, chunks[0].end_line), (Some(1), Some(2)));
        assert_eq!(chunks[1].symbol.as_deref(), Some("Greeter"));
        assert_eq!((chunks[1].start_line, chunks[1].end_line), (Some(5), Some(13)));
        assert_eq!(chunks[2].symbol.as_deref(), Some("main"));
        assert_eq!((chunks[2].start_line, chunks[2].end_line), (Some(16), Some(17)));
    }

    #[cfg(feature = "lang-python")]
    #[test]
    fn python_decorator_included() {
        let src = "import functools\n\n@functools.cache\ndef cached():\n    return 1\n";
        let chunks = chunk_code(src, Some(Lang::Python), &config());
        let func = chunks.iter().find(|c| c.kind == ChunkKind::Function).unwrap();
        assert!(func.body.starts_with("@functools.cache"));
        assert_eq!(func.start_line, Some(3));
        assert_eq!(func.symbol.as_deref(), Some("cached"));
    }

    #[cfg(feature = "lang-rust")]
    #[test]
    fn rust_doc_comments_attach_to_item() {
        let src = "use std::fmt;\n\n/// A point.\n#[derive(Debug)]\nstruct P {\n    x: i32,\n}\n\nconst LIMIT: u32 = 3;\n";
        let chunks = chunk_code(src, Some(Lang::Rust), &config());
        assert_eq!(chunks[0].kind, ChunkKind::ModuleHeader);
        assert_eq!(chunks[1].kind, ChunkKind::Class);
        assert!(chunks[1].body.starts_with("/// A point."));
        assert_eq!(chunks[1].start_line, Some(3));
        assert_eq!(chunks[2].kind, ChunkKind::Block);
        assert!(chunks[2].body.contains("LIMIT"));
    }

    #[cfg(feature = "lang-python")]
    #[test]
    fn oversized_symbol_split_into_parts() {
        let mut src = String::from("class Big:\n");
        for i in 0..40 {
            src.push_str(&format!("    def m{i}(self):\n        return {i}\n\n"));
        }
        let cfg = CodeChunkConfig {
            max_chars: 200,
            file_cap_chars: 8000,
        };
        let chunks = chunk_code(&src, Some(Lang::Python), &cfg);
        assert!(chunks.len() > 1);
        assert_eq!(chunks[0].symbol.as_deref(), Some("Big#part1"));
        assert_eq!(chunks[1].symbol.as_deref(), Some("Big#part2"));
        for c in &chunks {
            assert!(char_len(&c.body) <= 200);
        }
        for pair in chunks.windows(2) {
            assert!(pair[0].end_line < pair[1].start_line);
        }
    }

    #[cfg(feature = "lang-python")]
    #[test]
    fn syntax_error_degrades_to_keyword_tier() {
        let src = "def ok():\n    return 1\n\ndef broken(:\n    pass\n";
        let chunks = chunk_code(src, Some(Lang::Python), &config());
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].symbol.as_deref(), Some("ok"));
        assert_eq!(chunks[1].symbol.as_deref(), Some("broken"));
        assert_eq!(chunks[1].start_line, Some(4));
    }

    #[test]
    fn unknown_language_uses_keywords() {
        let src = "# header\nlocal x = 1\n\nfunction run()\n  return x\nend\n";
        let chunks = chunk_code(src, None, &config());
        assert_eq!(chunks[0].kind, ChunkKind::ModuleHeader);
        assert_eq!(chunks[1].kind, ChunkKind::Function);
        assert_eq!(chunks[1].symbol.as_deref(), Some("run"));
        assert_eq!(chunks[1].end_line, Some(6));
    }

    #[test]
    fn blank_line_tier() {
        let src = "a = 1\nb = 2\n\nc = 3\n";
        let cfg = CodeChunkConfig {
            max_chars: 14,
            file_cap_chars: 100,
        };
        let chunks = chunk_code(src, None, &cfg);
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.kind == ChunkKind::Block));
        assert_eq!(chunks[1].start_line, Some(4));
    }

    #[cfg(feature = "lang-python")]
    #[test]
    fn long_line_inside_symbol_is_cut_under_cap() {
        let src = format!(
            "def payload():\n    data = \"{}\"\n    return data\n",
            "x".repeat(10_000)
        );
        let cfg = CodeChunkConfig {
            max_chars: 4000,
            file_cap_chars: 20_000,
        };
        let chunks = chunk_code(&src, Some(Lang::Python), &cfg);
        assert!(chunks.len() >= 3);
        for c in &chunks {
            assert!(c.body.chars().count() <= 4000, "{}", c.body.chars().count());
            assert!(c.symbol.as_deref().is_some_and(|s| s.starts_with("payload#part")));
        }
        let total: usize = chunks.iter().map(|c| c.body.matches('x').count()).sum();
        assert_eq!(total, 10_000);
        assert_eq!(chunks[1].start_line, Some(2));
        assert_eq!(chunks[1].end_line, Some(2));
    }

    #[test]
    fn minified_line_in_block_tier_is_cut_under_cap() {
        let src = format!("x = [{}]\n\ny = 2\n", "1,".repeat(3000));
        let cfg = CodeChunkConfig {
            max_chars: 1000,
            file_cap_chars: 20_000,
        };
        let chunks = chunk_code(&src, None, &cfg);
        assert!(chunks.len() > 6);
        assert!(chunks.iter().all(|c| c.body.chars().count() <= 1000));
        assert_eq!(chunks.last().unwrap().body, "y = 2");
    }

    #[test]
    fn file_chunk_is_capped() {
        let src = "x".repeat(50);
        let cfg = CodeChunkConfig {
            max_chars: 4000,
            file_cap_chars: 10,
        };
        let chunks = chunk_code(&src, None, &cfg);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].kind, ChunkKind::File);
        assert_eq!(chunks[0].body.len(), 10);
    }

    #[test]
    fn whitespace_file_is_empty() {
        assert!(chunk_code("\n\n   \n", None, &config()).is_empty());
    }
}
