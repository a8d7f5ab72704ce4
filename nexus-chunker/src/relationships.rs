//! Typed edges between the chunks of one document.

use crate::config::ChunkingConfig;
use crate::model::{Chunk, ChunkRelationship, RelationshipType};
use nexus_embed::hashing::terms;
use std::collections::HashSet;
use tracing::debug;

const SEQUENCE_WEIGHT: f32 = 1.0;
const PARENT_WEIGHT: f32 = 1.0;
const CONTAINS_WEIGHT: f32 = 0.9;

/// Builds FOLLOWS, PARENT_OF, CONTAINS and SIMILAR_TO edges.
///
/// PARENT_OF and CONTAINS give every chunk at most one parent, so together
/// they form a forest. SIMILAR_TO is quadratic in the chunk count and is only
/// computed below the configured guard.
#[derive(Debug, Clone)]
pub struct RelationshipBuilder {
    similarity_guard: usize,
    similarity_threshold: f32,
}

impl RelationshipBuilder {
    pub fn new(config: &ChunkingConfig) -> Self {
        Self {
            similarity_guard: config.similarity_guard,
            similarity_threshold: config.similarity_threshold,
        }
    }

    pub fn build(&self, chunks: &[Chunk]) -> Vec<ChunkRelationship> {
        let mut relationships: Vec<ChunkRelationship> = chunks
            .windows(2)
            .map(|pair| {
                ChunkRelationship::new(
                    &pair[0].id,
                    &pair[1].id,
                    RelationshipType::Follows,
                    SEQUENCE_WEIGHT,
                )
            })
            .collect();

        relationships.extend(hierarchy(chunks));

        if chunks.len() < self.similarity_guard {
            relationships.extend(self.similarities(chunks));
        } else {
            debug!(
                "Skipping similarity edges for {} chunks (guard {})",
                chunks.len(),
                self.similarity_guard
            );
        }
        relationships
    }

    /// One SIMILAR_TO edge per unordered pair whose term sets have a Jaccard
    /// score at or above the threshold.
    fn similarities(&self, chunks: &[Chunk]) -> Vec<ChunkRelationship> {
        let term_sets: Vec<HashSet<String>> =
            chunks.iter().map(|c| terms(&c.content).collect()).collect();

        let mut relationships = Vec::new();
        for i in 0..chunks.len() {
            for j in i + 1..chunks.len() {
                let score = jaccard(&term_sets[i], &term_sets[j]);
                if score >= self.similarity_threshold {
                    relationships.push(ChunkRelationship::new(
                        &chunks[i].id,
                        &chunks[j].id,
                        RelationshipType::SimilarTo,
                        score,
                    ));
                }
            }
        }
        relationships
    }
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let shared = a.intersection(b).count();
    shared as f32 / (a.len() + b.len() - shared) as f32
}

/// Heading nesting (PARENT_OF between headers, CONTAINS from the open header
/// to body chunks) and code scopes (CONTAINS from a class or function chunk to
/// every later chunk that starts before its scope ends).
fn hierarchy(chunks: &[Chunk]) -> Vec<ChunkRelationship> {
    let mut relationships = Vec::new();
    let mut headers: Vec<(u8, &str)> = Vec::new();
    let mut scopes: Vec<(usize, &str)> = Vec::new();

    for chunk in chunks {
        if let Some(level) = chunk.header_level() {
            while headers.last().is_some_and(|(open, _)| *open >= level) {
                headers.pop();
            }
            if let Some((_, parent)) = headers.last() {
                relationships.push(ChunkRelationship::new(
                    *parent,
                    &chunk.id,
                    RelationshipType::ParentOf,
                    PARENT_WEIGHT,
                ));
            }
            headers.push((level, &chunk.id));
            scopes.clear();
            continue;
        }

        let line = chunk.position.line_start;
        while scopes
            .last()
            .is_some_and(|(end, _)| line.is_none_or(|line| line > *end))
        {
            scopes.pop();
        }

        let parent = scopes
            .last()
            .map(|(_, id)| *id)
            .or_else(|| headers.last().map(|(_, id)| *id));
        if let Some(parent) = parent {
            relationships.push(ChunkRelationship::new(
                parent,
                &chunk.id,
                RelationshipType::Contains,
                CONTAINS_WEIGHT,
            ));
        }

        if let Some(end) = chunk.metadata.scope_end.filter(|_| chunk.chunk_type.is_code()) {
            scopes.push((end, &chunk.id));
        }
    }
    relationships
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChunkMetadata, ChunkPosition, ChunkType};

    fn header(level: u8, text: &str) -> Chunk {
        Chunk::new("doc", text, ChunkType::Header, ChunkPosition::default()).with_metadata(
            ChunkMetadata {
                level: Some(level),
                ..ChunkMetadata::default()
            },
        )
    }

    fn body(text: &str) -> Chunk {
        Chunk::new("doc", text, ChunkType::Paragraph, ChunkPosition::default())
    }

    fn code(chunk_type: ChunkType, lines: (usize, usize), scope_end: Option<usize>) -> Chunk {
        let position = ChunkPosition {
            line_start: Some(lines.0),
            line_end: Some(lines.1),
            ..ChunkPosition::default()
        };
        Chunk::new("doc", format!("lines {lines:?}"), chunk_type, position).with_metadata(
            ChunkMetadata {
                scope_end,
                ..ChunkMetadata::default()
            },
        )
    }

    fn edges(
        relationships: &[ChunkRelationship],
        kind: RelationshipType,
    ) -> Vec<(String, String)> {
        relationships
            .iter()
            .filter(|r| r.relationship_type == kind)
            .map(|r| (r.source_id.clone(), r.target_id.clone()))
            .collect()
    }

    fn builder() -> RelationshipBuilder {
        RelationshipBuilder::new(&ChunkingConfig::default())
    }

    #[test]
    fn test_follows_edges() {
        let chunks = vec![body("alpha"), body("beta"), body("gamma"), body("delta")];
        let relationships = builder().build(&chunks);
        let follows = edges(&relationships, RelationshipType::Follows);
        assert_eq!(follows.len(), 3);
        assert_eq!(follows[0], (chunks[0].id.clone(), chunks[1].id.clone()));
        assert_eq!(follows[2], (chunks[2].id.clone(), chunks[3].id.clone()));
        assert!(builder().build(&[]).is_empty());
    }

    #[test]
    fn test_heading_chain() {
        let chunks = vec![
            header(1, "# Guide"),
            header(2, "## Install"),
            header(3, "### Linux"),
            body("apt install it"),
            header(2, "## Usage"),
        ];
        let relationships = builder().build(&chunks);
        let id = |i: usize| chunks[i].id.clone();

        assert_eq!(
            edges(&relationships, RelationshipType::ParentOf),
            vec![(id(0), id(1)), (id(1), id(2)), (id(0), id(4))]
        );
        assert_eq!(
            edges(&relationships, RelationshipType::Contains),
            vec![(id(2), id(3))]
        );
    }

    #[test]
    fn test_code_scopes() {
        let chunks = vec![
            code(ChunkType::CodeBlock, (1, 2), None),
            code(ChunkType::Class, (4, 6), Some(30)),
            code(ChunkType::Function, (8, 15), Some(15)),
            code(ChunkType::Function, (17, 29), Some(29)),
            code(ChunkType::Function, (32, 40), Some(40)),
        ];
        let relationships = builder().build(&chunks);
        let id = |i: usize| chunks[i].id.clone();

        assert_eq!(
            edges(&relationships, RelationshipType::Contains),
            vec![(id(1), id(2)), (id(1), id(3))]
        );
    }

    #[test]
    fn test_every_chunk_has_at_most_one_parent() {
        let chunks = vec![
            header(1, "# Top"),
            code(ChunkType::Function, (3, 9), Some(9)),
            code(ChunkType::Function, (5, 9), None),
            body("after"),
        ];
        let relationships = builder().build(&chunks);
        for chunk in &chunks {
            let parents = relationships
                .iter()
                .filter(|r| {
                    r.target_id == chunk.id
                        && matches!(
                            r.relationship_type,
                            RelationshipType::Contains | RelationshipType::ParentOf
                        )
                })
                .count();
            assert!(parents <= 1);
        }
        let contains = edges(&relationships, RelationshipType::Contains);
        assert!(contains.contains(&(chunks[1].id.clone(), chunks[2].id.clone())));
        assert!(contains.contains(&(chunks[0].id.clone(), chunks[1].id.clone())));
    }

    #[test]
    fn test_similarity_edges_and_guard() {
        let chunks = vec![
            body("vector search with cosine similarity"),
            body("cosine similarity for vector search"),
            body("completely unrelated gardening advice"),
        ];
        let relationships = builder().build(&chunks);
        let similar: Vec<&ChunkRelationship> = relationships
            .iter()
            .filter(|r| r.relationship_type == RelationshipType::SimilarTo)
            .collect();
        assert_eq!(similar.len(), 1);
        assert_eq!(similar[0].source_id, chunks[0].id);
        assert_eq!(similar[0].target_id, chunks[1].id);
        assert!((similar[0].weight - 4.0 / 6.0).abs() < 1e-6);

        let guarded = RelationshipBuilder::new(&ChunkingConfig::default().with_similarity_guard(3));
        assert!(
            guarded
                .build(&chunks)
                .iter()
                .all(|r| r.relationship_type != RelationshipType::SimilarTo)
        );
    }
}
