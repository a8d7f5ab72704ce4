//! Paragraph-based chunking for prose.

use crate::config::ChunkingConfig;
use crate::model::{Chunk, ChunkMetadata, ChunkType, DocumentMetadata};
use crate::packing::pack_units;
use crate::page::get_page_number;
use crate::scoring;
use crate::source::SourceText;
use crate::tokens::estimate_tokens;
use regex::Regex;
use std::ops::Range;
use std::sync::LazyLock;

static LIST_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:[-*+]|\d+[.)])\s+\S").expect("valid regex"));

/// Splits prose on blank lines and packs paragraphs under the token budget.
///
/// Text without any paragraph break is grouped by sentences instead. A
/// paragraph (or sentence group) over budget is broken into sentences; a
/// single sentence over budget is emitted alone and flagged `oversized`.
#[derive(Debug, Clone)]
pub struct TextStrategy {
    config: ChunkingConfig,
}

impl TextStrategy {
    pub fn new(config: ChunkingConfig) -> Self {
        Self { config }
    }

    pub fn chunk(&self, content: &str, metadata: &DocumentMetadata) -> Vec<Chunk> {
        let source = SourceText::new(content);
        self.chunk_span(&source, 0..content.len(), metadata)
    }

    /// Chunk one byte span of a larger document, keeping document positions.
    pub fn chunk_span(
        &self,
        source: &SourceText<'_>,
        span: Range<usize>,
        metadata: &DocumentMetadata,
    ) -> Vec<Chunk> {
        let units = self.units(source, span);
        let budget = self.config.budget();

        pack_units(
            source.text(),
            &units,
            budget,
            self.config.text_overlap_units,
        )
        .into_iter()
        .map(|packed| {
            let content = source.slice(packed.range.clone());
            let position = source.position(packed.range.clone());
            let chunk_metadata = ChunkMetadata {
                importance: scoring::text_importance(content),
                semantic_density: scoring::semantic_density(content),
                contains_key_info: scoring::contains_key_info(content),
                page_number: get_page_number(position.start, metadata.pages.as_deref()),
                oversized: packed.oversized,
                ..ChunkMetadata::default()
            };
            Chunk::new(&metadata.id, content, classify(content), position)
                .with_metadata(chunk_metadata)
        })
        .collect()
    }

    /// Packing units for a span: paragraphs, or sentence groups when the span
    /// has a single paragraph. Units over budget are broken into sentences.
    fn units(&self, source: &SourceText<'_>, span: Range<usize>) -> Vec<Range<usize>> {
        let paragraphs = source.paragraphs(span);
        let base = match paragraphs.as_slice() {
            [single] => {
                let sentences = source.sentences(single.clone());
                sentences
                    .chunks(self.config.sentences_per_group.max(1))
                    .map(|group| group[0].start..group[group.len() - 1].end)
                    .collect()
            }
            _ => paragraphs,
        };

        let budget = self.config.budget();
        let mut units = Vec::with_capacity(base.len());
        for unit in base {
            if estimate_tokens(source.slice(unit.clone())) > budget {
                units.extend(source.sentences(unit));
            } else {
                units.push(unit);
            }
        }
        units
    }
}

/// Classify prose as a list when most of its lines are list items.
fn classify(content: &str) -> ChunkType {
    let lines: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();
    let list_lines = lines.iter().filter(|l| LIST_LINE.is_match(l)).count();
    if !lines.is_empty() && list_lines * 2 > lines.len() {
        ChunkType::List
    } else {
        ChunkType::Paragraph
    }
}
