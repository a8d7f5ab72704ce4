//! Byte-range bookkeeping over a document's text.
//!
//! Strategies slice the text by byte ranges; chunk positions are reported in
//! characters and 1-based lines. [`SourceText`] converts between the two.

use crate::model::ChunkPosition;
use regex::Regex;
use std::ops::Range;
use std::sync::LazyLock;

static BLANK_LINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t]*(?:\r?\n[ \t]*)+").expect("valid regex"));

#[derive(Debug)]
pub struct SourceText<'a> {
    text: &'a str,
    line_starts: Vec<usize>,
    /// Byte offset of every char, only built for non-ASCII text
    char_starts: Option<Vec<usize>>,
}

impl<'a> SourceText<'a> {
    pub fn new(text: &'a str) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(text.match_indices('\n').map(|(i, _)| i + 1));
        let char_starts = (!text.is_ascii()).then(|| text.char_indices().map(|(i, _)| i).collect());
        Self {
            text,
            line_starts,
            char_starts,
        }
    }

    pub fn text(&self) -> &'a str {
        self.text
    }

    pub fn slice(&self, range: Range<usize>) -> &'a str {
        &self.text[range]
    }

    /// Character offset of a byte offset.
    pub fn char_offset(&self, byte: usize) -> usize {
        match &self.char_starts {
            Some(starts) => starts.partition_point(|&b| b < byte),
            None => byte,
        }
    }

    /// 1-based line containing a byte offset.
    pub fn line_of(&self, byte: usize) -> usize {
        self.line_starts.partition_point(|&start| start <= byte)
    }

    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }

    /// Byte range of 0-based line `index`, without its line terminator.
    pub fn line_range(&self, index: usize) -> Range<usize> {
        let start = self.line_starts[index];
        let mut end = self
            .line_starts
            .get(index + 1)
            .map(|next| next - 1)
            .unwrap_or(self.text.len());
        if end > start && self.text.as_bytes()[end - 1] == b'\r' {
            end -= 1;
        }
        start..end
    }

    /// Byte range covering 0-based lines `first..=last`.
    pub fn lines_range(&self, first: usize, last: usize) -> Range<usize> {
        self.line_range(first).start..self.line_range(last).end
    }

    /// Chunk position of a byte range.
    pub fn position(&self, range: Range<usize>) -> ChunkPosition {
        let last_byte = if range.end > range.start {
            range.end - 1
        } else {
            range.start
        };
        ChunkPosition {
            start: self.char_offset(range.start),
            end: self.char_offset(range.end),
            line_start: Some(self.line_of(range.start)),
            line_end: Some(self.line_of(last_byte)),
        }
    }

    /// Narrow a range so it starts and ends on non-whitespace.
    pub fn trim(&self, range: Range<usize>) -> Range<usize> {
        let slice = &self.text[range.clone()];
        let leading = slice.len() - slice.trim_start().len();
        let trimmed = slice.trim();
        let start = range.start + leading;
        start..start + trimmed.len()
    }

    /// Blank-line separated paragraphs within `span`, trimmed, empty ones dropped.
    pub fn paragraphs(&self, span: Range<usize>) -> Vec<Range<usize>> {
        let slice = &self.text[span.clone()];
        let mut paragraphs = Vec::new();
        let mut cursor = 0;
        for separator in BLANK_LINES.find_iter(slice) {
            paragraphs.push(span.start + cursor..span.start + separator.start());
            cursor = separator.end();
        }
        paragraphs.push(span.start + cursor..span.end);
        paragraphs
            .into_iter()
            .map(|r| self.trim(r))
            .filter(|r| !r.is_empty())
            .collect()
    }

    /// Sentences within `span`. A sentence ends at `.`, `!` or `?` followed by
    /// whitespace, or at the end of the span.
    pub fn sentences(&self, span: Range<usize>) -> Vec<Range<usize>> {
        let slice = &self.text[span.clone()];
        let mut sentences = Vec::new();
        let mut start = 0;
        let mut chars = slice.char_indices().peekable();
        while let Some((i, c)) = chars.next() {
            if matches!(c, '.' | '!' | '?') {
                let next_is_space = chars.peek().is_none_or(|(_, n)| n.is_whitespace());
                if next_is_space {
                    let end = i + c.len_utf8();
                    sentences.push(span.start + start..span.start + end);
                    start = end;
                }
            }
        }
        if start < slice.len() {
            sentences.push(span.start + start..span.end);
        }
        sentences
            .into_iter()
            .map(|r| self.trim(r))
            .filter(|r| !r.is_empty())
            .collect()
    }

    /// Non-blank lines within `span`, trimmed of trailing whitespace only so
    /// indentation survives.
    pub fn lines(&self, span: Range<usize>) -> Vec<Range<usize>> {
        let slice = &self.text[span.clone()];
        let mut lines = Vec::new();
        let mut offset = 0;
        for line in slice.split('\n') {
            let content = line.trim_end();
            if !content.trim().is_empty() {
                lines.push(span.start + offset..span.start + offset + content.len());
            }
            offset += line.len() + 1;
        }
        lines
    }
}
