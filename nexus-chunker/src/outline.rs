//! Document-level summary and outline built from the final chunk list.

use crate::model::{Chunk, DocumentMetadata, DocumentOutline, DocumentSummary, OutlineSection};
use crate::scoring;

const SUMMARY_METHOD: &str = "extractive";
const UNTITLED: &str = "Untitled";

/// Extractive summary from the `limit` most important candidate chunks.
///
/// Candidates carry key information, have importance above 0.7, or are
/// headings of level 1 or 2. They are ranked by importance and reported in
/// document order. Without candidates the first chunk stands in.
pub fn summarize_document(chunks: &[Chunk], limit: usize) -> DocumentSummary {
    let mut candidates: Vec<usize> = chunks
        .iter()
        .enumerate()
        .filter(|(_, c)| {
            c.metadata.contains_key_info
                || c.metadata.importance > 0.7
                || c.header_level().is_some_and(|level| level <= 2)
        })
        .map(|(i, _)| i)
        .collect();

    candidates.sort_by(|a, b| {
        chunks[*b]
            .metadata
            .importance
            .total_cmp(&chunks[*a].metadata.importance)
            .then(a.cmp(b))
    });
    candidates.truncate(limit.max(1));
    candidates.sort_unstable();
    if candidates.is_empty() && !chunks.is_empty() {
        candidates.push(0);
    }

    let key_points: Vec<String> = candidates
        .iter()
        .map(|&i| {
            chunks[i]
                .summary
                .clone()
                .unwrap_or_else(|| scoring::summarize(&chunks[i].content))
        })
        .filter(|point| !point.is_empty())
        .collect();

    DocumentSummary {
        summary: key_points.join(" "),
        key_points,
        method: SUMMARY_METHOD.to_string(),
    }
}

/// Nested outline from header chunks.
///
/// A section ends at the chunk before the next header of the same or a higher
/// level, or at the last chunk. The title is the metadata title, else the
/// first level-1 heading, else "Untitled".
pub fn build_outline(chunks: &[Chunk], metadata: &DocumentMetadata) -> DocumentOutline {
    struct Node {
        section: OutlineSection,
        children: Vec<usize>,
    }

    let headers: Vec<(usize, u8)> = chunks
        .iter()
        .enumerate()
        .filter_map(|(i, c)| c.header_level().map(|level| (i, level)))
        .collect();

    let mut nodes: Vec<Node> = Vec::with_capacity(headers.len());
    let mut roots: Vec<usize> = Vec::new();
    let mut stack: Vec<(u8, usize)> = Vec::new();

    for (n, &(index, level)) in headers.iter().enumerate() {
        let end = headers[n + 1..]
            .iter()
            .find(|(_, next_level)| *next_level <= level)
            .map_or(chunks.len() - 1, |(next_index, _)| next_index - 1);

        nodes.push(Node {
            section: OutlineSection {
                title: heading_title(&chunks[index]),
                level,
                start_chunk_id: chunks[index].id.clone(),
                end_chunk_id: chunks[end].id.clone(),
                subsections: Vec::new(),
            },
            children: Vec::new(),
        });

        while stack.last().is_some_and(|(open, _)| *open >= level) {
            stack.pop();
        }
        match stack.last() {
            Some(&(_, parent)) => nodes[parent].children.push(n),
            None => roots.push(n),
        }
        stack.push((level, n));
    }

    // Children always come after their parent, so assembling back to front
    // finishes every subtree before its parent takes it.
    let mut built: Vec<Option<OutlineSection>> = vec![None; nodes.len()];
    for n in (0..nodes.len()).rev() {
        let mut section = nodes[n].section.clone();
        section.subsections = nodes[n]
            .children
            .iter()
            .filter_map(|&child| built[child].take())
            .collect();
        built[n] = Some(section);
    }
    let sections = roots.iter().filter_map(|&r| built[r].take()).collect();

    let title = Some(metadata.title.trim())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .or_else(|| {
            headers
                .iter()
                .find(|(_, level)| *level == 1)
                .map(|(i, _)| heading_title(&chunks[*i]))
        })
        .unwrap_or_else(|| UNTITLED.to_string());

    DocumentOutline { title, sections }
}

fn heading_title(chunk: &Chunk) -> String {
    chunk.metadata.name.clone().unwrap_or_else(|| {
        chunk
            .content
            .lines()
            .next()
            .unwrap_or_default()
            .trim_start_matches('#')
            .trim()
            .to_string()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChunkMetadata, ChunkPosition, ChunkType, ContentType};

    fn header(level: u8, title: &str) -> Chunk {
        Chunk::new(
            "doc",
            format!("{} {title}\nBody.", "#".repeat(level as usize)),
            ChunkType::Header,
            ChunkPosition::default(),
        )
        .with_metadata(ChunkMetadata {
            level: Some(level),
            importance: 1.0 - 0.1 * f32::from(level - 1),
            ..ChunkMetadata::default()
        })
    }

    fn paragraph(text: &str, importance: f32) -> Chunk {
        Chunk::new("doc", text, ChunkType::Paragraph, ChunkPosition::default()).with_metadata(
            ChunkMetadata {
                importance,
                ..ChunkMetadata::default()
            },
        )
    }

    #[test]
    fn test_outline_nesting_and_ends() {
        let chunks = vec![
            header(1, "Guide"),
            header(2, "Install"),
            paragraph("steps", 0.5),
            header(3, "Linux"),
            header(2, "Usage"),
            paragraph("run it", 0.5),
        ];
        let outline = build_outline(&chunks, &DocumentMetadata::default());

        assert_eq!(outline.title, "Guide");
        assert_eq!(outline.sections.len(), 1);
        let guide = &outline.sections[0];
        assert_eq!(guide.end_chunk_id, chunks[5].id);
        assert_eq!(guide.subsections.len(), 2);

        let install = &guide.subsections[0];
        assert_eq!(install.title, "Install");
        assert_eq!(install.start_chunk_id, chunks[1].id);
        assert_eq!(install.end_chunk_id, chunks[3].id);
        assert_eq!(install.subsections[0].title, "Linux");
        assert_eq!(install.subsections[0].end_chunk_id, chunks[3].id);

        assert_eq!(guide.subsections[1].title, "Usage");
        assert_eq!(guide.subsections[1].end_chunk_id, chunks[5].id);
    }

    #[test]
    fn test_outline_title_sources() {
        let metadata = DocumentMetadata::new("doc", "Manual", ContentType::Markdown);
        assert_eq!(build_outline(&[header(1, "Guide")], &metadata).title, "Manual");
        let untitled = build_outline(&[paragraph("x", 0.5)], &DocumentMetadata::default());
        assert_eq!(untitled.title, "Untitled");
        assert!(untitled.sections.is_empty());
    }

    #[test]
    fn test_summary_picks_top_chunks_in_document_order() {
        let mut chunks = vec![
            paragraph("Low value filler.", 0.4),
            paragraph("Second best point.", 0.8),
            paragraph("More filler.", 0.5),
            paragraph("Best point overall.", 0.95),
        ];
        chunks[2].metadata.contains_key_info = true;
        let summary = summarize_document(&chunks, 2);

        assert_eq!(summary.method, "extractive");
        assert_eq!(
            summary.key_points,
            vec!["Second best point.", "Best point overall."]
        );
        assert_eq!(summary.summary, "Second best point. Best point overall.");
    }

    #[test]
    fn test_summary_falls_back_to_first_chunk() {
        let chunks = vec![paragraph("Only words.", 0.5), paragraph("Others.", 0.5)];
        let summary = summarize_document(&chunks, 5);
        assert_eq!(summary.key_points, vec!["Only words."]);
        assert!(summarize_document(&[], 5).key_points.is_empty());
    }
}
