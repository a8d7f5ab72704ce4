//! Data model shared by the chunking and retrieval engines.
//!
//! Everything here serializes to JSON so chunks, relationships, summaries and
//! outlines can be persisted by a store and read back by the retriever.

use crate::tokens::estimate_tokens;
use nexus_embed::{Embedding, VisualKind};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Content type tag of a document. Selects the chunking strategy.
///
/// Tags are parsed leniently: any unrecognized tag becomes [`ContentType::Text`],
/// which is how unknown content falls back to the text strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ContentType {
    Code,
    Markdown,
    #[default]
    Text,
    StructuredData,
    Multimodal,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Code => "code",
            ContentType::Markdown => "markdown",
            ContentType::Text => "text",
            ContentType::StructuredData => "structured_data",
            ContentType::Multimodal => "multimodal",
        }
    }

    /// Parse a content type tag. Unknown tags map to `Text`.
    pub fn from_tag(tag: &str) -> Self {
        match tag.trim().to_ascii_lowercase().as_str() {
            "code" | "source" => ContentType::Code,
            "markdown" | "md" => ContentType::Markdown,
            "structured_data" | "structured" | "data" | "json" | "yaml" => {
                ContentType::StructuredData
            }
            "multimodal" | "mixed" => ContentType::Multimodal,
            _ => ContentType::Text,
        }
    }

    /// Infer the content type from a file extension.
    pub fn from_path(path: &Path) -> Self {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match extension.as_str() {
            "rs" | "py" | "js" | "mjs" | "cjs" | "jsx" | "ts" | "tsx" | "java" | "cs" | "go"
            | "c" | "h" | "cpp" | "cc" | "cxx" | "hpp" | "hh" => ContentType::Code,
            "md" | "markdown" | "mdx" => ContentType::Markdown,
            "json" | "yaml" | "yml" => ContentType::StructuredData,
            _ => ContentType::Text,
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for ContentType {
    fn from(tag: String) -> Self {
        Self::from_tag(&tag)
    }
}

impl From<&str> for ContentType {
    fn from(tag: &str) -> Self {
        Self::from_tag(tag)
    }
}

impl From<ContentType> for String {
    fn from(content_type: ContentType) -> Self {
        content_type.as_str().to_string()
    }
}

/// One row of a document's page-boundary table. Offsets are in characters,
/// `[start_char, end_char)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub page_number: u32,
    pub start_char: usize,
    pub end_char: usize,
}

/// Metadata describing a document handed to the chunking engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DocumentMetadata {
    pub id: String,
    pub title: String,
    #[serde(rename = "type")]
    pub content_type: ContentType,
    /// Source format, usually a file extension (`rs`, `json`, `md`)
    pub format: Option<String>,
    /// Size in bytes
    pub size: usize,
    pub tags: Vec<String>,
    /// Programming language for code documents
    pub language: Option<String>,
    pub pages: Option<Vec<PageInfo>>,
    pub custom: serde_json::Map<String, serde_json::Value>,
}

impl DocumentMetadata {
    pub fn new<I: Into<String>, T: Into<String>>(
        id: I,
        title: T,
        content_type: ContentType,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            content_type,
            ..Self::default()
        }
    }

    /// Build metadata for a file path: the title is the file name, the format
    /// its extension, and the content type is inferred from the extension.
    pub fn from_path<I: Into<String>>(id: I, path: &Path) -> Self {
        let title = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        let format = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase());
        Self {
            format,
            ..Self::new(id, title, ContentType::from_path(path))
        }
    }

    pub fn with_format<S: Into<String>>(self, format: S) -> Self {
        Self {
            format: Some(format.into()),
            ..self
        }
    }

    pub fn with_language<S: Into<String>>(self, language: S) -> Self {
        Self {
            language: Some(language.into()),
            ..self
        }
    }

    pub fn with_pages(self, pages: Vec<PageInfo>) -> Self {
        Self {
            pages: Some(pages),
            ..self
        }
    }

    pub fn with_tags(self, tags: Vec<String>) -> Self {
        Self { tags, ..self }
    }

    pub fn with_size(self, size: usize) -> Self {
        Self { size, ..self }
    }
}

/// Structural role of a chunk within its document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    Header,
    Section,
    CodeBlock,
    Function,
    Class,
    Paragraph,
    List,
    Table,
    Image,
    Structured,
}

impl ChunkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkType::Header => "header",
            ChunkType::Section => "section",
            ChunkType::CodeBlock => "code_block",
            ChunkType::Function => "function",
            ChunkType::Class => "class",
            ChunkType::Paragraph => "paragraph",
            ChunkType::List => "list",
            ChunkType::Table => "table",
            ChunkType::Image => "image",
            ChunkType::Structured => "structured",
        }
    }

    /// Chunk types produced from source code.
    pub fn is_code(&self) -> bool {
        matches!(
            self,
            ChunkType::CodeBlock | ChunkType::Function | ChunkType::Class
        )
    }
}

impl fmt::Display for ChunkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a chunk sits in its document. `start`/`end` are character offsets,
/// lines are 1-based and inclusive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkPosition {
    pub start: usize,
    pub end: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_start: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_end: Option<usize>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Per-chunk metadata computed by the strategies and the semantic enhancer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkMetadata {
    /// 0.0 to 1.0
    pub importance: f32,
    /// 0.0 to 1.0
    pub semantic_density: f32,
    pub contains_key_info: bool,
    /// Heading level for markdown headers and their continuation sections
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Symbol name for code units, heading text for sections
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// A single atomic unit that could not be split under the token budget
    #[serde(skip_serializing_if = "is_false")]
    pub oversized: bool,
    /// Last source line (1-based) of the class or function this chunk opens
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope_end: Option<usize>,
    /// Original data paths flattened into a structured chunk
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visual_kind: Option<VisualKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    /// Image URL, or the fence language of a diagram
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Ids of image chunks adjacent to this text chunk
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub nearby_images: Vec<String>,
    /// Ids of image chunks this text explicitly refers to
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub referenced_images: Vec<String>,
}

impl Default for ChunkMetadata {
    fn default() -> Self {
        Self {
            importance: 0.5,
            semantic_density: 0.0,
            contains_key_info: false,
            level: None,
            page_number: None,
            dependencies: Vec::new(),
            language: None,
            name: None,
            oversized: false,
            scope_end: None,
            paths: Vec::new(),
            visual_kind: None,
            caption: None,
            source: None,
            nearby_images: Vec::new(),
            referenced_images: Vec::new(),
        }
    }
}

/// A token-bounded semantic unit of a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub content: String,
    #[serde(rename = "type")]
    pub chunk_type: ChunkType,
    pub position: ChunkPosition,
    #[serde(default)]
    pub metadata: ChunkMetadata,
    pub tokens: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Embedding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Transient score assigned during retrieval
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevance: Option<f32>,
}

impl Chunk {
    /// Create a chunk with a fresh id and a token estimate for `content`.
    pub fn new<D: Into<String>, C: Into<String>>(
        document_id: D,
        content: C,
        chunk_type: ChunkType,
        position: ChunkPosition,
    ) -> Self {
        let content = content.into();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            document_id: document_id.into(),
            tokens: estimate_tokens(&content),
            content,
            chunk_type,
            position,
            metadata: ChunkMetadata::default(),
            embedding: None,
            summary: None,
            relevance: None,
        }
    }

    pub fn with_metadata(self, metadata: ChunkMetadata) -> Self {
        Self { metadata, ..self }
    }

    /// Heading level of a header chunk, `None` for every other type.
    pub fn header_level(&self) -> Option<u8> {
        match self.chunk_type {
            ChunkType::Header => self.metadata.level,
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationshipType {
    Follows,
    SimilarTo,
    Contains,
    ParentOf,
}

/// A weighted, typed edge between two chunks of the same document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRelationship {
    pub source_id: String,
    pub target_id: String,
    pub relationship_type: RelationshipType,
    pub weight: f32,
}

impl ChunkRelationship {
    pub fn new<S: Into<String>, T: Into<String>>(
        source_id: S,
        target_id: T,
        relationship_type: RelationshipType,
        weight: f32,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            target_id: target_id.into(),
            relationship_type,
            weight,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub summary: String,
    pub key_points: Vec<String>,
    pub method: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlineSection {
    pub title: String,
    pub level: u8,
    pub start_chunk_id: String,
    pub end_chunk_id: String,
    #[serde(default)]
    pub subsections: Vec<OutlineSection>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentOutline {
    pub title: String,
    pub sections: Vec<OutlineSection>,
}

impl DocumentOutline {
    /// Render the outline as an indented markdown list.
    pub fn to_markdown(&self) -> String {
        fn render(sections: &[OutlineSection], depth: usize, out: &mut String) {
            for section in sections {
                out.push_str(&"  ".repeat(depth));
                out.push_str("- ");
                out.push_str(&section.title);
                out.push('\n');
                render(&section.subsections, depth + 1, out);
            }
        }

        let mut out = format!("**{}**\n", self.title);
        render(&self.sections, 0, &mut out);
        out
    }
}

/// Everything produced by chunking one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkingResult {
    pub chunks: Vec<Chunk>,
    pub relationships: Vec<ChunkRelationship>,
    pub summary: DocumentSummary,
    pub outline: DocumentOutline,
}
