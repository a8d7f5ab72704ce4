//! Query intent analysis.
//!
//! A query is matched against an ordered list of patterns and the first match
//! decides its intent. Entities (document names, code symbols and section
//! topics) are extracted independently of the intent.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

const CONFIDENCE: f32 = 0.85;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryIntent {
    FullDocument,
    SpecificSection,
    CodeSearch,
    SummaryRequest,
    #[default]
    General,
}

impl QueryIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryIntent::FullDocument => "full_document",
            QueryIntent::SpecificSection => "specific_section",
            QueryIntent::CodeSearch => "code_search",
            QueryIntent::SummaryRequest => "summary_request",
            QueryIntent::General => "general",
        }
    }

    /// Expected size of a good answer, used as the default token budget.
    pub fn estimated_tokens(&self) -> usize {
        match self {
            QueryIntent::FullDocument => 8000,
            QueryIntent::SpecificSection => 2000,
            QueryIntent::CodeSearch => 3000,
            QueryIntent::SummaryRequest => 1000,
            QueryIntent::General => 4000,
        }
    }
}

impl fmt::Display for QueryIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    DocumentName,
    CodeSymbol,
    SectionTopic,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub kind: EntityKind,
    pub value: String,
}

/// What a query asks for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryAnalysis {
    pub intent: QueryIntent,
    pub entities: Vec<Entity>,
    pub requires_full_context: bool,
    pub estimated_tokens: usize,
    pub confidence: f32,
}

impl QueryAnalysis {
    /// Values of all entities of one kind, in query order.
    pub fn entities_of(&self, kind: EntityKind) -> impl Iterator<Item = &str> {
        self.entities
            .iter()
            .filter(move |e| e.kind == kind)
            .map(|e| e.value.as_str())
    }
}

static INTENT_PATTERNS: LazyLock<Vec<(QueryIntent, Regex)>> = LazyLock::new(|| {
    [
        (
            QueryIntent::FullDocument,
            r"(?i)\b(entire|whole|full|complete)\s+(document|doc|file|text|contents?|article|paper|report|spec)\b|\b(show|give|read)\s+(me\s+)?(all\s+of\s+)?the\s+(document|file|article)\b",
        ),
        (
            QueryIntent::SpecificSection,
            r"(?i)\b(section|chapter|part|paragraph|heading)\s+(about|on|titled|called|named|\d+)\b|\bthe\s+[\w-]+\s+(section|chapter)\b",
        ),
        (
            QueryIntent::CodeSearch,
            r"(?i)\b(code|function|method|class|struct|enum|trait|interface|impl(ementation|ements?|emented)?|snippet|module|variable|def|fn|signature)\b",
        ),
        (
            QueryIntent::SummaryRequest,
            r"(?i)\b(summary|summari[sz]e|overview|tl;?dr|gist|key\s+points|briefly|outline)\b",
        ),
    ]
    .into_iter()
    .map(|(intent, pattern)| (intent, Regex::new(pattern).expect("valid regex")))
    .collect()
});

static QUOTED_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""([^"]+)"|`([^`]+)`"#).expect("valid regex"));

const CODE_KEYWORDS: &str = "function|method|class|struct|enum|trait|interface|def|fn|type|module";

static SYMBOL_AFTER_KEYWORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i:\b(?:{CODE_KEYWORDS}))\s+(?P<symbol>[A-Za-z_][A-Za-z0-9_]*)"
    ))
    .expect("valid regex")
});

static SYMBOL_BEFORE_KEYWORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"\b(?P<symbol>[A-Za-z_][A-Za-z0-9_]*)\s+(?i:(?:{CODE_KEYWORDS}))\b"
    ))
    .expect("valid regex")
});

static SECTION_TOPIC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(?:section|chapter|part)\s+(?:about|on|titled|called|named)\s+"?(?P<topic>[^".?!,;]+)"#)
        .expect("valid regex")
});

const STOPWORDS: &[&str] = &[
    "a", "an", "the", "this", "that", "these", "those", "for", "of", "to", "in", "on", "and",
    "or", "is", "are", "me", "my", "our", "your", "which", "what", "how", "where", "does", "do",
    "with", "from", "by", "any", "some", "each", "every", "main",
];

fn is_stopword(word: &str) -> bool {
    STOPWORDS.contains(&word.to_ascii_lowercase().as_str())
}

fn is_code_keyword(word: &str) -> bool {
    CODE_KEYWORDS
        .split('|')
        .any(|keyword| keyword.eq_ignore_ascii_case(word))
}

/// Looks like an identifier rather than an English word: camelCase,
/// PascalCase past the first letter, snake_case or containing digits.
fn is_identifier_shaped(word: &str) -> bool {
    word.contains('_')
        || word.chars().skip(1).any(|c| c.is_ascii_uppercase())
        || word.chars().any(|c| c.is_ascii_digit())
}

/// Classifies queries and extracts the entities they mention.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntentAnalyzer;

impl IntentAnalyzer {
    pub fn new() -> Self {
        Self
    }

    pub fn analyze(&self, query: &str) -> QueryAnalysis {
        let intent = INTENT_PATTERNS
            .iter()
            .find(|(_, pattern)| pattern.is_match(query))
            .map(|(intent, _)| *intent)
            .unwrap_or_default();

        QueryAnalysis {
            intent,
            entities: extract_entities(query),
            requires_full_context: intent == QueryIntent::FullDocument,
            estimated_tokens: intent.estimated_tokens(),
            confidence: CONFIDENCE,
        }
    }
}

fn extract_entities(query: &str) -> Vec<Entity> {
    let mut entities: Vec<Entity> = Vec::new();
    let mut push = |kind: EntityKind, value: &str| {
        let value = value.trim();
        if !value.is_empty() && !entities.iter().any(|e| e.kind == kind && e.value == value) {
            entities.push(Entity {
                kind,
                value: value.to_string(),
            });
        }
    };

    for caps in QUOTED_NAME.captures_iter(query) {
        if let Some(name) = caps.get(1).or_else(|| caps.get(2)) {
            push(EntityKind::DocumentName, name.as_str());
        }
    }

    for caps in SYMBOL_AFTER_KEYWORD.captures_iter(query) {
        let symbol = &caps["symbol"];
        if !is_stopword(symbol) && !is_code_keyword(symbol) {
            push(EntityKind::CodeSymbol, symbol);
        }
    }
    for caps in SYMBOL_BEFORE_KEYWORD.captures_iter(query) {
        let symbol = &caps["symbol"];
        if is_identifier_shaped(symbol) {
            push(EntityKind::CodeSymbol, symbol);
        }
    }

    for caps in SECTION_TOPIC.captures_iter(query) {
        push(EntityKind::SectionTopic, &caps["topic"]);
    }

    entities
}
