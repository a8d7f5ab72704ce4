//! Path-preserving chunking for JSON and JSON-compatible YAML.

use crate::config::ChunkingConfig;
use crate::model::{Chunk, ChunkMetadata, ChunkType, DocumentMetadata};
use crate::packing::pack_units;
use crate::source::SourceText;
use crate::tokens::estimate_tokens;
use serde_json::{Map, Value};
use tracing::warn;

const IMPORTANT_KEYS: &[&str] = &[
    "id", "name", "title", "type", "config", "settings", "api", "key", "version", "url",
    "endpoint", "auth", "token", "schema",
];

/// Path of the document root when it is a scalar.
const ROOT_PATH: &str = "$";

/// Flattens parsed data into `(path, value)` leaves and packs the leaves into
/// chunks whose content is a pretty-printed object keyed by path.
#[derive(Debug, Clone)]
pub struct StructuredStrategy {
    config: ChunkingConfig,
}

impl StructuredStrategy {
    pub fn new(config: ChunkingConfig) -> Self {
        Self { config }
    }

    pub fn chunk(&self, content: &str, metadata: &DocumentMetadata) -> Vec<Chunk> {
        if content.trim().is_empty() {
            return Vec::new();
        }
        let format = metadata
            .format
            .as_deref()
            .unwrap_or("json")
            .to_ascii_lowercase();

        let parsed = match format.as_str() {
            "json" | "yaml" | "yml" => {
                serde_json::from_str::<Value>(content).map_err(|e| e.to_string())
            }
            other => Err(format!("unsupported structured format '{other}'")),
        };

        match parsed {
            Ok(value) => {
                let leaves = flatten(
                    &value,
                    self.config.structured_max_depth,
                    self.config.structured_array_batch.max(1),
                );
                self.pack_leaves(content, leaves, metadata)
            }
            Err(error) => {
                warn!(
                    "Could not parse structured document {}: {}; falling back to line chunking",
                    metadata.id, error
                );
                self.line_fallback(content, metadata)
            }
        }
    }

    fn pack_leaves(
        &self,
        content: &str,
        leaves: Vec<(String, Value)>,
        metadata: &DocumentMetadata,
    ) -> Vec<Chunk> {
        let budget = self.config.budget();
        let mut groups: Vec<Map<String, Value>> = Vec::new();
        let mut current = Map::new();

        for (path, value) in leaves {
            current.insert(path.clone(), value.clone());
            if current.len() > 1 && pretty_tokens(&current) > budget {
                current.remove(&path);
                groups.push(std::mem::take(&mut current));
                current.insert(path, value);
            }
        }
        if !current.is_empty() {
            groups.push(current);
        }

        let source = SourceText::new(content);
        let starts = locate_groups(content, &groups);
        groups
            .into_iter()
            .enumerate()
            .map(|(i, group)| {
                let end = starts.get(i + 1).copied().unwrap_or(content.len());
                let range = source.trim(starts[i]..end.max(starts[i]));
                let paths: Vec<String> = group.keys().cloned().collect();
                let text = serde_json::to_string_pretty(&Value::Object(group))
                    .unwrap_or_default();
                let (importance, contains_key_info) = score_paths(&paths);
                let oversized = paths.len() == 1 && estimate_tokens(&text) > budget;

                Chunk::new(&metadata.id, text, ChunkType::Structured, source.position(range))
                    .with_metadata(ChunkMetadata {
                        importance,
                        contains_key_info,
                        paths,
                        oversized,
                        ..ChunkMetadata::default()
                    })
            })
            .collect()
    }

    fn line_fallback(&self, content: &str, metadata: &DocumentMetadata) -> Vec<Chunk> {
        let source = SourceText::new(content);
        let lines = source.lines(0..content.len());
        pack_units(content, &lines, self.config.budget(), 0)
            .into_iter()
            .map(|packed| {
                Chunk::new(
                    &metadata.id,
                    source.slice(packed.range.clone()),
                    ChunkType::Paragraph,
                    source.position(packed.range),
                )
                .with_metadata(ChunkMetadata {
                    oversized: packed.oversized,
                    ..ChunkMetadata::default()
                })
            })
            .collect()
    }
}

fn pretty_tokens(group: &Map<String, Value>) -> usize {
    // Serializing a map of JSON values cannot fail.
    serde_json::to_string_pretty(group)
        .map(|text| estimate_tokens(&text))
        .unwrap_or(usize::MAX)
}

fn is_scalar(value: &Value) -> bool {
    !matches!(value, Value::Object(_) | Value::Array(_))
}

fn child_key(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{parent}.{key}")
    }
}

fn leaf_path(path: String) -> String {
    if path.is_empty() {
        ROOT_PATH.to_string()
    } else {
        path
    }
}

/// Depth-first flattening with an explicit stack so deeply nested input
/// cannot exhaust the call stack. Containers at `max_depth` become one leaf.
///
/// Arrays of scalars are kept whole up to `batch` elements and otherwise
/// split into `path[i-j]` batches; arrays holding containers recurse per
/// element as `path[i]`.
pub fn flatten(value: &Value, max_depth: usize, batch: usize) -> Vec<(String, Value)> {
    let mut leaves = Vec::new();
    let mut stack: Vec<(String, &Value, usize)> = vec![(String::new(), value, 0)];

    while let Some((path, value, depth)) = stack.pop() {
        match value {
            Value::Object(map) if !map.is_empty() && depth < max_depth => {
                for (key, child) in map.iter().rev() {
                    stack.push((child_key(&path, key), child, depth + 1));
                }
            }
            Value::Array(items) if !items.is_empty() && depth < max_depth => {
                if items.iter().all(is_scalar) {
                    if items.len() <= batch {
                        leaves.push((leaf_path(path), value.clone()));
                    } else {
                        for (n, slice) in items.chunks(batch).enumerate() {
                            let first = n * batch;
                            let last = first + slice.len() - 1;
                            leaves.push((
                                format!("{path}[{first}-{last}]"),
                                Value::Array(slice.to_vec()),
                            ));
                        }
                    }
                } else {
                    for (i, child) in items.iter().enumerate().rev() {
                        stack.push((format!("{path}[{i}]"), child, depth + 1));
                    }
                }
            }
            _ => leaves.push((leaf_path(path), value.clone())),
        }
    }
    leaves
}

/// Final key of a path without any index suffix: `a.items[0-9]` -> `items`.
fn last_key(path: &str) -> Option<&str> {
    if path == ROOT_PATH {
        return None;
    }
    let segment = path.rsplit('.').next().unwrap_or(path);
    let key = segment.split('[').next().unwrap_or(segment);
    (!key.is_empty()).then_some(key)
}

fn score_paths(paths: &[String]) -> (f32, bool) {
    let mut importance: f32 = 0.5;
    if paths.iter().any(|p| !p.contains('.')) {
        importance += 0.3;
    }
    let important = paths.iter().any(|path| {
        path.split('.')
            .filter_map(|segment| segment.split('[').next())
            .any(|key| IMPORTANT_KEYS.contains(&key.to_ascii_lowercase().as_str()))
    });
    if important {
        importance += 0.2;
    }
    (importance.min(1.0), important)
}

/// Approximate byte offset where each group starts in the original text, by
/// searching forward for the quoted final key of the group's first path.
fn locate_groups(content: &str, groups: &[Map<String, Value>]) -> Vec<usize> {
    let mut cursor = 0;
    groups
        .iter()
        .map(|group| {
            let key = group.keys().next().and_then(|p| last_key(p));
            if let Some(key) = key {
                let needle = format!("\"{key}\"");
                if let Some(found) = content[cursor..].find(&needle) {
                    cursor += found;
                }
            }
            cursor
        })
        .collect()
}
