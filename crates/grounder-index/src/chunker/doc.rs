//! Markdown chunking by heading sections.

use pulldown_cmark::{Event, Options, Parser, Tag};

use super::{DocChunkConfig, LineIndex, RawChunk, char_len, hard_split, pack_rows, tail_chars};
use crate::record::ChunkKind;

/// A top-level markdown block as a byte range of the source.
#[derive(Debug)]
struct Block {
    start: usize,
    end: usize,
    heading: Option<(u8, String)>,
    code: bool,
}

/// A paragraph-sized byte range. Heading units are packed together with the
/// unit that follows them.
#[derive(Debug, Clone, Copy)]
struct Unit {
    start: usize,
    end: usize,
    heading: bool,
}

#[derive(Debug, Default)]
struct Section {
    heading_path: Vec<String>,
    units: Vec<Unit>,
}

/// Split a markdown document into section chunks.
#[must_use]
pub fn chunk_markdown(content: &str, config: &DocChunkConfig) -> Vec<RawChunk> {
    let lines = LineIndex::new(content);
    let mut out = Vec::new();
    let mut previous: Option<String> = None;
    // Room left for the overlap prefix and its separator.
    let budget = if config.overlap_chars > 0 {
        config
            .max_chars
            .saturating_sub(config.overlap_chars + 2)
            .max(config.max_chars / 2)
            .max(1)
    } else {
        config.max_chars
    };

    for section in sections(content, config, budget) {
        let target = config.target_chars.min(budget);
        for (start, end, own) in pack_units(content, &section.units, target, budget) {
            let room = config.max_chars.saturating_sub(char_len(&own) + 2);
            let body = match previous.as_deref() {
                Some(prev) if config.overlap_chars > 0 && room > 0 => {
                    let tail = tail_chars(prev, config.overlap_chars.min(room));
                    format!("{tail}\n\n{own}")
                }
                _ => own,
            };
            out.push(RawChunk {
                kind: ChunkKind::Section,
                body: body.clone(),
                symbol: None,
                start_line: Some(lines.line_of(start)),
                end_line: Some(lines.line_of(end.saturating_sub(1).max(start))),
                heading_path: section.heading_path.clone(),
            });
            previous = Some(body);
        }
    }
    out
}

fn blocks(content: &str) -> Vec<Block> {
    let options = Options::ENABLE_TABLES
        | Options::ENABLE_STRIKETHROUGH
        | Options::ENABLE_TASKLISTS
        | Options::ENABLE_FOOTNOTES;
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut current: Option<Block> = None;

    for (event, range) in Parser::new_ext(content, options).into_offset_iter() {
        match event {
            Event::Start(tag) => {
                if depth == 0 {
                    let heading = match &tag {
                        Tag::Heading { level, .. } => Some((*level as u8, String::new())),
                        _ => None,
                    };
                    current = Some(Block {
                        start: range.start,
                        end: range.end,
                        heading,
                        code: matches!(tag, Tag::CodeBlock(_)),
                    });
                }
                depth += 1;
            }
            Event::End(_) => {
                depth = depth.saturating_sub(1);
                if depth == 0
                    && let Some(block) = current.take()
                {
                    out.push(block);
                }
            }
            Event::Text(text) | Event::Code(text) => {
                if let Some(Block {
                    heading: Some((_, title)),
                    ..
                }) = current.as_mut()
                {
                    title.push_str(&text);
                }
            }
            Event::Rule if depth == 0 => out.push(Block {
                start: range.start,
                end: range.end,
                heading: None,
                code: false,
            }),
            _ => {}
        }
    }

    for block in &mut out {
        let trimmed = content[block.start..block.end].trim_end();
        block.end = block.start + trimmed.len();
    }
    out.retain(|b| b.end > b.start);
    out
}

fn sections(content: &str, config: &DocChunkConfig, budget: usize) -> Vec<Section> {
    let mut out = Vec::new();
    let mut stack: Vec<(u8, String)> = Vec::new();
    let mut current = Section::default();
    // Characters of headings still waiting for their first body unit.
    let mut pending = 0usize;

    for block in blocks(content) {
        if let Some((level, title)) = &block.heading
            && *level <= config.heading_level
        {
            if !current.units.is_empty() {
                out.push(std::mem::take(&mut current));
                pending = 0;
            }
            stack.retain(|(l, _)| l < level);
            stack.push((*level, title.trim().to_owned()));
            current.heading_path = stack.iter().map(|(_, t)| t.clone()).collect();
        }
        let heading = block.heading.is_some();
        let room = budget.saturating_sub(pending);
        let limit = if room >= budget / 2 { room } else { budget };
        let units = split_block(content, &block, if heading { budget } else { limit });
        if heading {
            pending += units
                .iter()
                .map(|&(a, b)| char_len(&content[a..b]) + 2)
                .sum::<usize>();
        } else {
            pending = 0;
        }
        current.units.extend(units.into_iter().map(|(start, end)| Unit {
            start,
            end,
            heading,
        }));
    }
    if !current.units.is_empty() {
        out.push(current);
    }
    out
}

/// Break a block larger than `max_chars` into units: fenced code at line
/// boundaries, prose at sentence boundaries, with a hard split as last resort.
fn split_block(content: &str, block: &Block, max_chars: usize) -> Vec<(usize, usize)> {
    let text = &content[block.start..block.end];
    if char_len(text) <= max_chars {
        return vec![(block.start, block.end)];
    }

    if block.code {
        let lines: Vec<&str> = text.split('\n').collect();
        let mut offsets = Vec::with_capacity(lines.len());
        let mut pos = 0;
        for line in &lines {
            offsets.push(pos);
            pos += line.len() + 1;
        }
        return pack_rows(&lines, 0, lines.len() - 1, &[], max_chars)
            .into_iter()
            .flat_map(|(a, b)| {
                let start = block.start + offsets[a];
                cap_span(content, start, block.start + offsets[b] + lines[b].len(), max_chars)
            })
            .collect();
    }

    let mut pieces: Vec<(usize, usize)> = Vec::new();
    for (offset, sentence) in sentences(text) {
        let start = block.start + offset;
        pieces.extend(cap_span(content, start, start + sentence.len(), max_chars));
    }

    let mut packed: Vec<(usize, usize)> = Vec::new();
    for (a, b) in pieces {
        if let Some(last) = packed.last_mut()
            && char_len(&content[last.0..b]) <= max_chars
        {
            last.1 = b;
            continue;
        }
        packed.push((a, b));
    }
    packed
}

/// Hard-split a byte span that is longer than `max_chars`.
fn cap_span(content: &str, start: usize, end: usize, max_chars: usize) -> Vec<(usize, usize)> {
    let text = &content[start..end];
    if char_len(text) <= max_chars {
        return vec![(start, end)];
    }
    hard_split(text, max_chars)
        .into_iter()
        .map(|(o, s)| (start + o, start + o + s.len()))
        .collect()
}

/// Sentence spans as `(byte offset, text)`, split after `.`, `!` or `?`
/// followed by whitespace.
fn sentences(text: &str) -> Vec<(usize, &str)> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        let boundary = matches!(c, '.' | '!' | '?')
            && chars.peek().is_some_and(|(_, next)| next.is_whitespace());
        if boundary {
            let end = i + c.len_utf8();
            push_trimmed(&mut out, text, start, end);
            start = end;
        }
    }
    push_trimmed(&mut out, text, start, text.len());
    out
}

fn push_trimmed<'a>(out: &mut Vec<(usize, &'a str)>, text: &'a str, start: usize, end: usize) {
    let slice = &text[start..end];
    let lead = slice.len() - slice.trim_start().len();
    let trimmed = slice.trim();
    if !trimmed.is_empty() {
        out.push((start + lead, trimmed));
    }
}

/// Greedily pack units up to `target` characters. Trailing headings move
/// forward with the unit after them as long as the group fits in `budget`.
/// Returns the source byte span and the joined text of each chunk.
fn pack_units(
    content: &str,
    units: &[Unit],
    target: usize,
    budget: usize,
) -> Vec<(usize, usize, String)> {
    let mut out = Vec::new();
    let mut current: Vec<Unit> = Vec::new();

    for &unit in units {
        let len = char_len(&content[unit.start..unit.end]);
        if !current.is_empty() && joined_len(content, &current) + 2 + len > target {
            let lead = if unit.heading {
                0
            } else {
                current.iter().rev().take_while(|u| u.heading).count()
            };
            let split = current.len() - lead;
            let fits = joined_len(content, &current[split..]) + 2 + len <= budget;
            if lead > 0 && fits {
                if split > 0 {
                    out.push(join_units(content, &current[..split]));
                    current.drain(..split);
                }
            } else {
                out.push(join_units(content, &current));
                current.clear();
            }
        }
        current.push(unit);
    }
    if !current.is_empty() {
        out.push(join_units(content, &current));
    }
    out
}

fn joined_len(content: &str, units: &[Unit]) -> usize {
    units
        .iter()
        .map(|u| char_len(&content[u.start..u.end]))
        .sum::<usize>()
        + 2 * units.len().saturating_sub(1)
}

fn join_units(content: &str, units: &[Unit]) -> (usize, usize, String) {
    let text = units
        .iter()
        .map(|u| &content[u.start..u.end])
        .collect::<Vec<_>>()
        .join("\n\n");
    let start = units.first().map_or(0, |u| u.start);
    let end = units.last().map_or(0, |u| u.end);
    (start, end, text)
}
