//! Maps a query analysis and the caller's options to a retrieval strategy.

use crate::retrieval::intent::{QueryAnalysis, QueryIntent};
use crate::retrieval::model::{RetrievalStrategyKind, RetrieveOptions};

/// Pick the strategy for a query. An explicit strategy in the options always
/// wins, then a request for full documents, then the intent.
pub fn select_strategy(analysis: &QueryAnalysis, options: &RetrieveOptions) -> RetrievalStrategyKind {
    if let Some(strategy) = options.strategy {
        return strategy;
    }
    if options.include_full_document {
        return RetrievalStrategyKind::FullDocument;
    }
    match analysis.intent {
        QueryIntent::FullDocument => RetrievalStrategyKind::FullDocument,
        QueryIntent::SpecificSection => RetrievalStrategyKind::Hierarchical,
        QueryIntent::CodeSearch => RetrievalStrategyKind::SemanticChunks,
        QueryIntent::SummaryRequest => RetrievalStrategyKind::Hierarchical,
        QueryIntent::General => RetrievalStrategyKind::Adaptive,
    }
}
