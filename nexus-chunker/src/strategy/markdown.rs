//! Heading-aware chunking for markdown documents.

use crate::config::ChunkingConfig;
use crate::model::{Chunk, ChunkMetadata, ChunkType, DocumentMetadata};
use crate::packing::pack_units;
use crate::source::SourceText;
use crate::tokens::estimate_tokens;
use regex::Regex;
use std::ops::Range;
use std::sync::LazyLock;

static HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^ {0,3}(#{1,6})(?:[ \t]+(.*?))?[ \t]*#*[ \t]*$").expect("valid regex")
});
static FENCE_OPEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^ {0,3}(`{3,}|~{3,})[ \t]*([^`\s]*)").expect("valid regex"));
static LIST_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:[-*+]|\d+[.)])\s+\S").expect("valid regex"));
static TABLE_SEPARATOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*\|?\s*:?-{3,}:?\s*(?:\|\s*:?-{3,}:?\s*)*\|?\s*$").expect("valid regex")
});

/// A fenced block: ```` ``` ```` or `~~~` delimited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Fence {
    /// Opening marker line through closing marker line
    pub range: Range<usize>,
    /// Text between the markers
    pub body: Range<usize>,
    /// First word of the info string, lowercased (`rust`, `mermaid`)
    pub info: String,
    /// 0-based line indices of the opening and closing markers
    pub lines: (usize, usize),
}

/// Find every fenced block. An unterminated fence runs to the end of the text.
pub(crate) fn find_fences(source: &SourceText<'_>) -> Vec<Fence> {
    let mut fences = Vec::new();
    let line_count = source.line_count();
    let mut line = 0;
    while line < line_count {
        let text = source.slice(source.line_range(line));
        let Some(open) = FENCE_OPEN.captures(text) else {
            line += 1;
            continue;
        };
        let marker = &open[1];
        let marker_char = marker.chars().next().unwrap_or('`');
        let info = open
            .get(2)
            .map(|m| m.as_str().to_ascii_lowercase())
            .unwrap_or_default();

        let close = (line + 1..line_count).find(|&candidate| {
            let trimmed = source.slice(source.line_range(candidate)).trim();
            trimmed.len() >= marker.len() && trimmed.chars().all(|c| c == marker_char)
        });
        let last = close.unwrap_or(line_count - 1);

        let body_start = if line + 1 < line_count {
            source.line_range(line + 1).start
        } else {
            source.line_range(line).end
        };
        let body_end = match close {
            Some(close) if close > line + 1 => source.line_range(close - 1).end,
            Some(_) => body_start,
            None => source.line_range(last).end,
        };

        fences.push(Fence {
            range: source.lines_range(line, last),
            body: body_start..body_end,
            info,
            lines: (line, last),
        });
        line = last + 1;
    }
    fences
}

#[derive(Debug)]
enum Segment {
    Section {
        level: u8,
        title: String,
        heading: Range<usize>,
        range: Range<usize>,
    },
    Body(Range<usize>),
    Code(Fence),
}

/// Splits markdown at headings; fenced code becomes separate code-block chunks.
///
/// Header chunks carry importance `1.0 - 0.1 * (level - 1)`; other chunks 0.5.
#[derive(Debug, Clone)]
pub struct MarkdownStrategy {
    config: ChunkingConfig,
}

impl MarkdownStrategy {
    pub fn new(config: ChunkingConfig) -> Self {
        Self { config }
    }

    pub fn chunk(&self, content: &str, metadata: &DocumentMetadata) -> Vec<Chunk> {
        let source = SourceText::new(content);
        let mut chunks = Vec::new();
        for segment in segments(&source) {
            match segment {
                Segment::Section {
                    level,
                    title,
                    heading,
                    range,
                } => self.emit_section(&source, metadata, level, &title, heading, range, &mut chunks),
                Segment::Body(range) => self.emit_body(&source, metadata, range, &mut chunks),
                Segment::Code(fence) => self.emit_code(&source, metadata, &fence, &mut chunks),
            }
        }
        chunks
    }

    #[allow(clippy::too_many_arguments)]
    fn emit_section(
        &self,
        source: &SourceText<'_>,
        metadata: &DocumentMetadata,
        level: u8,
        title: &str,
        heading: Range<usize>,
        range: Range<usize>,
        chunks: &mut Vec<Chunk>,
    ) {
        let budget = self.config.budget();
        let header_metadata = ChunkMetadata {
            importance: heading_importance(level),
            level: Some(level),
            name: Some(title.to_string()),
            ..ChunkMetadata::default()
        };

        if estimate_tokens(source.slice(range.clone())) <= budget {
            chunks.push(
                Chunk::new(
                    &metadata.id,
                    source.slice(range.clone()),
                    ChunkType::Header,
                    source.position(range),
                )
                .with_metadata(header_metadata),
            );
            return;
        }

        let mut units = vec![heading.clone()];
        units.extend(split_paragraphs(source, heading.end..range.end, budget));
        for (index, packed) in pack_units(source.text(), &units, budget, 0)
            .into_iter()
            .enumerate()
        {
            let content = source.slice(packed.range.clone());
            let position = source.position(packed.range.clone());
            let chunk = if index == 0 {
                Chunk::new(&metadata.id, content, ChunkType::Header, position).with_metadata(
                    ChunkMetadata {
                        oversized: packed.oversized,
                        ..header_metadata.clone()
                    },
                )
            } else {
                Chunk::new(&metadata.id, content, ChunkType::Section, position).with_metadata(
                    ChunkMetadata {
                        level: Some(level),
                        name: Some(title.to_string()),
                        oversized: packed.oversized,
                        ..ChunkMetadata::default()
                    },
                )
            };
            chunks.push(chunk);
        }
    }

    fn emit_body(
        &self,
        source: &SourceText<'_>,
        metadata: &DocumentMetadata,
        range: Range<usize>,
        chunks: &mut Vec<Chunk>,
    ) {
        let budget = self.config.budget();
        let units = if estimate_tokens(source.slice(range.clone())) <= budget {
            vec![range]
        } else {
            split_paragraphs(source, range, budget)
        };
        for packed in pack_units(source.text(), &units, budget, 0) {
            let content = source.slice(packed.range.clone());
            chunks.push(
                Chunk::new(
                    &metadata.id,
                    content,
                    classify(content),
                    source.position(packed.range),
                )
                .with_metadata(ChunkMetadata {
                    oversized: packed.oversized,
                    ..ChunkMetadata::default()
                }),
            );
        }
    }

    fn emit_code(
        &self,
        source: &SourceText<'_>,
        metadata: &DocumentMetadata,
        fence: &Fence,
        chunks: &mut Vec<Chunk>,
    ) {
        let budget = self.config.budget();
        let language = (!fence.info.is_empty()).then(|| fence.info.clone());
        let units = if estimate_tokens(source.slice(fence.range.clone())) <= budget {
            vec![fence.range.clone()]
        } else {
            source.lines(fence.range.clone())
        };
        for packed in pack_units(source.text(), &units, budget, 0) {
            chunks.push(
                Chunk::new(
                    &metadata.id,
                    source.slice(packed.range.clone()),
                    ChunkType::CodeBlock,
                    source.position(packed.range),
                )
                .with_metadata(ChunkMetadata {
                    language: language.clone(),
                    oversized: packed.oversized,
                    ..ChunkMetadata::default()
                }),
            );
        }
    }
}

/// Importance of a header chunk: H1 = 1.0 down to H6 = 0.5.
pub fn heading_importance(level: u8) -> f32 {
    let level = level.clamp(1, 6);
    (10 - (level - 1)) as f32 / 10.0
}

/// Paragraph units of a span, with paragraphs over budget broken into sentences.
fn split_paragraphs(
    source: &SourceText<'_>,
    span: Range<usize>,
    budget: usize,
) -> Vec<Range<usize>> {
    let mut units = Vec::new();
    for paragraph in source.paragraphs(span) {
        if estimate_tokens(source.slice(paragraph.clone())) > budget {
            units.extend(source.sentences(paragraph));
        } else {
            units.push(paragraph);
        }
    }
    units
}

/// Walk the lines outside fences and group them under their headings.
fn segments(source: &SourceText<'_>) -> Vec<Segment> {
    let fences = find_fences(source);
    let mut segments = Vec::new();
    let mut current: Option<(Option<(u8, String, Range<usize>)>, Range<usize>)> = None;

    let flush = |current: &mut Option<(Option<(u8, String, Range<usize>)>, Range<usize>)>,
                 segments: &mut Vec<Segment>| {
        if let Some((heading, range)) = current.take() {
            let range = source.trim(range);
            match heading {
                Some((level, title, heading)) => segments.push(Segment::Section {
                    level,
                    title,
                    range: heading.start..range.end.max(heading.end),
                    heading,
                }),
                None if !range.is_empty() => segments.push(Segment::Body(range)),
                None => {}
            }
        }
    };

    let mut fence_iter = fences.into_iter().peekable();
    let mut line = 0;
    while line < source.line_count() {
        if let Some(fence) = fence_iter.next_if(|f| f.lines.0 == line) {
            flush(&mut current, &mut segments);
            line = fence.lines.1 + 1;
            segments.push(Segment::Code(fence));
            continue;
        }

        let range = source.line_range(line);
        if let Some(caps) = HEADING.captures(source.slice(range.clone())) {
            flush(&mut current, &mut segments);
            let level = caps[1].len() as u8;
            let title = caps
                .get(2)
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_default();
            current = Some((Some((level, title, range.clone())), range));
        } else {
            match current.as_mut() {
                Some((_, span)) => span.end = range.end,
                None => current = Some((None, range)),
            }
        }
        line += 1;
    }
    flush(&mut current, &mut segments);
    segments
}

/// Post-classify a body chunk as a table, list or paragraph.
fn classify(content: &str) -> ChunkType {
    let lines: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();
    if lines.is_empty() {
        return ChunkType::Paragraph;
    }
    let table_rows = lines
        .iter()
        .filter(|l| l.trim_start().starts_with('|'))
        .count();
    let has_separator = lines.iter().any(|l| TABLE_SEPARATOR.is_match(l));
    if has_separator && table_rows >= 2 && table_rows * 2 > lines.len() {
        return ChunkType::Table;
    }
    let list_lines = lines.iter().filter(|l| LIST_LINE.is_match(l)).count();
    if list_lines * 2 > lines.len() {
        ChunkType::List
    } else {
        ChunkType::Paragraph
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ContentType;

    fn metadata() -> DocumentMetadata {
        DocumentMetadata::new("guide", "Guide", ContentType::Markdown)
    }

    fn filler(words: usize) -> String {
        (0..words)
            .map(|i| format!("w{}", i % 10))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn test_heading_importance_by_level() {
        let doc = format!(
            "# Title\n\n{}\n\n## A\n\n{}\n\n## B\n\n{}\n",
            filler(60),
            filler(60),
            filler(60)
        );
        let strategy = MarkdownStrategy::new(ChunkingConfig::new(1000));
        let chunks = strategy.chunk(&doc, &metadata());

        assert_eq!(chunks.len(), 3);
        let importance: Vec<f32> = chunks.iter().map(|c| c.metadata.importance).collect();
        assert_eq!(importance, vec![1.0, 0.9, 0.9]);
        assert!(chunks.iter().all(|c| c.chunk_type == ChunkType::Header));
        assert_eq!(chunks[1].metadata.name.as_deref(), Some("A"));
        assert_eq!(chunks[1].metadata.level, Some(2));
        assert!(chunks[0].content.starts_with("# Title"));
    }

    #[test]
    fn test_heading_importance_floor() {
        assert_eq!(heading_importance(6), 0.5);
        assert_eq!(heading_importance(3), 0.8);
    }

    #[test]
    fn test_fenced_code_is_separate_and_hides_headings() {
        let doc = "# Setup\n\nRun this:\n\n```bash\n# not a heading\ncargo build\n```\n\nDone.";
        let strategy = MarkdownStrategy::new(ChunkingConfig::default());
        let chunks = strategy.chunk(doc, &metadata());

        let types: Vec<ChunkType> = chunks.iter().map(|c| c.chunk_type).collect();
        assert_eq!(
            types,
            vec![ChunkType::Header, ChunkType::CodeBlock, ChunkType::Paragraph]
        );
        assert_eq!(chunks[0].content, "# Setup\n\nRun this:");
        assert_eq!(chunks[1].metadata.language.as_deref(), Some("bash"));
        assert!(chunks[1].content.contains("# not a heading"));
        assert_eq!(chunks[2].content, "Done.");
        assert_eq!(chunks[2].metadata.importance, 0.5);
    }

    #[test]
    fn test_list_and_table_classification() {
        assert_eq!(classify("- a\n- b\n- c"), ChunkType::List);
        assert_eq!(classify("1. a\n2. b"), ChunkType::List);
        assert_eq!(
            classify("| a | b |\n|---|---|\n| 1 | 2 |"),
            ChunkType::Table
        );
        assert_eq!(classify("| not | a table"), ChunkType::Paragraph);
        assert_eq!(classify("Plain prose."), ChunkType::Paragraph);
    }

    #[test]
    fn test_oversized_section_keeps_heading_first() {
        let doc = format!(
            "## Big\n\n{}\n\n{}\n\n{}",
            filler(30),
            filler(30),
            filler(30)
        );
        // Each paragraph is 23 tokens, so no two paragraphs share a chunk.
        let strategy = MarkdownStrategy::new(ChunkingConfig::new(40));
        let chunks = strategy.chunk(&doc, &metadata());

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].chunk_type, ChunkType::Header);
        assert!(chunks[0].content.starts_with("## Big"));
        assert_eq!(chunks[0].metadata.importance, 0.9);
        for chunk in &chunks[1..] {
            assert_eq!(chunk.chunk_type, ChunkType::Section);
            assert_eq!(chunk.metadata.level, Some(2));
            assert_eq!(chunk.metadata.importance, 0.5);
        }
        for chunk in &chunks {
            assert!(chunk.tokens <= 40);
        }
    }

    #[test]
    fn test_find_fences() {
        let text = "intro\n~~~mermaid\ngraph TD\n~~~\n```\nopen";
        let source = SourceText::new(text);
        let fences = find_fences(&source);
        assert_eq!(fences.len(), 2);
        assert_eq!(fences[0].info, "mermaid");
        assert_eq!(source.slice(fences[0].body.clone()), "graph TD");
        assert_eq!(fences[0].lines, (1, 3));
        assert_eq!(source.slice(fences[1].body.clone()), "open");
    }
}
