//! Result optimizer: turns a strategy's selection into the final context
//! string and enforces the token budget on it.
//!
//! ```text
//! ## Table of Contents          (full-document mode, more than 3 headings)
//! # Retrieved Documents
//! - Title (type)
//! ## Title                      (one section per document)
//! outline / full text / chunks
//! ## Document Context           (when summaries were attached)
//! ```

use crate::retrieval::intent::QueryIntent;
use crate::retrieval::model::{
    DocumentRef, RetrievalMetadata, RetrievalResult, RetrievalStrategyKind,
};
use crate::retrieval::strategies::Retrieved;
use itertools::Itertools;
use nexus_chunker::tokens::truncate_to_tokens;
use nexus_chunker::{Chunk, estimate_tokens};
use tracing::debug;

const TOC_MIN_HEADINGS: usize = 4;

fn header(documents: &[DocumentRef]) -> String {
    let listing = documents
        .iter()
        .map(|doc| format!("- {} ({})", doc.title, doc.content_type))
        .join("\n");
    format!("# Retrieved Documents\n\n{listing}")
}

/// Tokens the document listing and per-document headings add for
/// `documents`.
pub fn header_tokens(documents: &[DocumentRef]) -> usize {
    let headings: String = documents
        .iter()
        .map(|doc| format!("\n\n## {}\n\n", doc.title))
        .collect();
    estimate_tokens(&format!("{}{headings}", header(documents)))
}

/// Headings outside fenced code blocks as `(level, title)`.
fn headings(text: &str) -> Vec<(usize, String)> {
    let mut in_fence = false;
    let mut found = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }
        let level = trimmed.chars().take_while(|c| *c == '#').count();
        if (1..=6).contains(&level) && trimmed[level..].starts_with(' ') {
            found.push((level, trimmed[level..].trim().to_string()));
        }
    }
    found
}

fn table_of_contents(headings: &[(usize, String)]) -> String {
    let top = headings.iter().map(|(level, _)| *level).min().unwrap_or(1);
    let entries = headings
        .iter()
        .map(|(level, title)| format!("{}- {title}", "  ".repeat(level - top)))
        .join("\n");
    format!("## Table of Contents\n\n{entries}")
}

/// Working copy of a selection while the budget guard trims it.
struct Draft {
    documents: Vec<DocumentRef>,
    full_text: Option<String>,
    outlines: Vec<(String, String)>,
    chunks: Vec<Chunk>,
    full_document_mode: bool,
}

impl Draft {
    fn new(retrieved: &mut Retrieved, full_document_mode: bool) -> Self {
        let documents = std::mem::take(&mut retrieved.documents);
        let mut chunks = std::mem::take(&mut retrieved.chunks);

        // Render order: grouped by document, documents in listing order,
        // stray chunks last. The sort is stable so groups keep rank order.
        let rank = |chunk: &Chunk| {
            documents
                .iter()
                .position(|doc| doc.id == chunk.document_id)
                .unwrap_or(documents.len())
        };
        chunks.sort_by_key(|chunk| rank(chunk));

        let mut documents = documents;
        for chunk in &chunks {
            if !documents.iter().any(|doc| doc.id == chunk.document_id) {
                documents.push(DocumentRef {
                    id: chunk.document_id.clone(),
                    title: chunk.document_id.clone(),
                    content_type: Default::default(),
                    summary: None,
                });
            }
        }

        Self {
            documents,
            full_text: retrieved.full_text.take(),
            outlines: std::mem::take(&mut retrieved.outlines)
                .into_iter()
                .map(|(id, outline)| (id, outline.to_markdown().trim_end().to_string()))
                .collect(),
            chunks,
            full_document_mode,
        }
    }

    fn body(&self, document: &DocumentRef, first: bool) -> Vec<&str> {
        let mut parts: Vec<&str> = self
            .outlines
            .iter()
            .filter(|(id, _)| *id == document.id)
            .map(|(_, outline)| outline.as_str())
            .collect();
        if first {
            if let Some(text) = &self.full_text {
                parts.push(text.trim_end());
            }
        }
        parts.extend(
            self.chunks
                .iter()
                .filter(|chunk| chunk.document_id == document.id)
                .map(|chunk| chunk.content.trim_end()),
        );
        parts
    }

    fn render(&self) -> String {
        let mut sections: Vec<String> = Vec::new();
        let mut document_text = String::new();

        let documents: Vec<(&DocumentRef, Vec<&str>)> = self
            .documents
            .iter()
            .enumerate()
            .map(|(i, doc)| (doc, self.body(doc, i == 0)))
            .filter(|(_, body)| !body.is_empty())
            .collect();
        if documents.is_empty() {
            return String::new();
        }

        let listed: Vec<DocumentRef> = documents.iter().map(|(doc, _)| (*doc).clone()).collect();
        sections.push(header(&listed));
        for (doc, body) in &documents {
            let body = body.join("\n\n");
            document_text.push_str(&body);
            document_text.push('\n');
            sections.push(format!("## {}\n\n{body}", doc.title));
        }

        let context = documents
            .iter()
            .filter_map(|(doc, _)| {
                doc.summary
                    .as_ref()
                    .map(|summary| format!("- **{}**: {summary}", doc.title))
            })
            .join("\n");
        if !context.is_empty() {
            sections.push(format!("## Document Context\n\n{context}"));
        }

        if self.full_document_mode {
            let found = headings(&document_text);
            if found.len() >= TOC_MIN_HEADINGS {
                sections.insert(0, table_of_contents(&found));
            }
        }

        sections.join("\n\n")
    }

    /// Remove one piece of content, least essential first. Returns false when
    /// nothing is left to remove.
    fn drop_one(&mut self) -> bool {
        if let Some(doc) = self.documents.iter_mut().rev().find(|d| d.summary.is_some()) {
            doc.summary = None;
            return true;
        }
        if self.chunks.pop().is_some() {
            return true;
        }
        self.outlines.pop().is_some()
    }
}

/// Format a strategy's selection into a [`RetrievalResult`] of at most
/// `budget` tokens.
pub fn optimize(
    strategy: RetrievalStrategyKind,
    mut retrieved: Retrieved,
    intent: QueryIntent,
    budget: usize,
) -> RetrievalResult {
    let full_document_mode =
        strategy == RetrievalStrategyKind::FullDocument && retrieved.fallback.is_none();
    let mut draft = Draft::new(&mut retrieved, full_document_mode);

    let mut content = draft.render();
    let mut dropped = 0;
    while estimate_tokens(&content) > budget && draft.drop_one() {
        dropped += 1;
        content = draft.render();
    }
    if estimate_tokens(&content) > budget {
        content = truncate_to_tokens(&content, budget).to_string();
    }
    if dropped > 0 {
        debug!("Dropped {} pieces of content to fit {} tokens", dropped, budget);
    }

    let rendered: Vec<DocumentRef> = draft
        .documents
        .iter()
        .enumerate()
        .filter(|(i, doc)| !draft.body(doc, *i == 0).is_empty())
        .map(|(_, doc)| doc.clone())
        .collect();

    RetrievalResult {
        metadata: RetrievalMetadata {
            strategy,
            fallback: retrieved.fallback,
            tokens: estimate_tokens(&content),
            documents: rendered,
            counters: retrieved.counters,
            intent,
        },
        content,
        chunks: draft.chunks,
        relevance: retrieved.relevance,
    }
}
