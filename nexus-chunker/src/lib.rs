//! # nexus-chunker
//!
//! Content-aware chunking for the Nexus RAG core. Documents are split into
//! token-bounded chunks that follow their structure, linked by typed
//! relationships, and summarized with an outline.
//!
//! ## Key Modules
//!
//! - **[`strategy`]**: code, markdown, text, structured-data and multimodal strategies
//! - **[`engine`]**: [`ChunkingEngine`], the per-document pipeline
//! - **[`relationships`]**: FOLLOWS, PARENT_OF, CONTAINS and SIMILAR_TO edges
//! - **[`outline`]**: extractive document summary and nested outline
//! - **[`page`]**: page-number lookup for paginated sources
//!
//! ## Pipeline
//!
//! ```text
//! bytes → strategy → page numbers → enhancer → relationships → summary + outline
//! ```
//!
//! Token counts everywhere are estimated as `ceil(chars / 4)`.

pub mod config;
pub mod engine;
pub mod enhance;
pub mod model;
pub mod outline;
pub mod packing;
pub mod page;
pub mod relationships;
pub mod scoring;
pub mod source;
pub mod strategy;
pub mod tokens;

pub use config::ChunkingConfig;
pub use engine::ChunkingEngine;
pub use model::{
    Chunk, ChunkMetadata, ChunkPosition, ChunkRelationship, ChunkType, ChunkingResult,
    ContentType, DocumentMetadata, DocumentOutline, DocumentSummary, OutlineSection, PageInfo,
    RelationshipType,
};
pub use page::get_page_number;
pub use strategy::ChunkingStrategy;
pub use tokens::estimate_tokens;
