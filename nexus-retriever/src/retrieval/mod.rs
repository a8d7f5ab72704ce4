//! Query-time retrieval.
//!
//! ## Key Components
//!
//! - **[`intent`]**: Classifies a query and extracts the entities it names
//! - **[`selector`]**: Maps an analysis and caller options to a strategy
//! - **[`strategies`]**: The five retrieval algorithms
//! - **[`optimizer`]**: Formats the selection and enforces the token budget
//! - **[`cache`]**: TTL cache with single-flight coalescing
//! - **[`engine`]**: [`RetrievalEngine`](engine::RetrievalEngine), which ties them together
//!
//! ## Flow
//!
//! ```text
//! query ─→ IntentAnalyzer ─→ select_strategy ─→ strategy ─→ optimize ─→ RetrievalResult
//!                                                  │
//!                          VectorStore / GraphStore / DocumentStore
//! ```

pub mod cache;
pub mod engine;
pub mod intent;
pub mod model;
pub mod optimizer;
pub mod selector;
pub mod strategies;

pub use cache::{CacheStats, QueryCache};
pub use engine::RetrievalEngine;
pub use intent::{IntentAnalyzer, QueryAnalysis, QueryIntent};
pub use model::{DocumentRef, RetrievalMetadata, RetrievalResult, RetrievalStrategyKind, RetrieveOptions};
