//! Heuristic importance, density and key-information scores.

use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

static KEY_TERMS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(important|importantly|note|warning|caution|critical|must|required|conclusion|in summary|summary|key point|definition|deprecated|breaking)\b",
    )
    .expect("valid regex")
});

static LIST_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*(?:[-*+]|\d+[.)])\s+\S").expect("valid regex"));

/// Importance of prose in `[0, 1]`: 0.5 base, raised by key terms, questions
/// and list structure.
pub fn text_importance(text: &str) -> f32 {
    let mut score: f32 = 0.5;
    let key_terms = KEY_TERMS.find_iter(text).count();
    if key_terms > 0 {
        score += 0.2 + 0.05 * (key_terms.min(4) - 1) as f32;
    }
    if text.contains('?') {
        score += 0.1;
    }
    if LIST_MARKER.is_match(text) {
        score += 0.1;
    }
    score.min(1.0)
}

/// Semantic density in `[0, 1]`: word uniqueness weighted 0.6 plus average
/// word length (saturating at 10 chars) weighted 0.4.
pub fn semantic_density(text: &str) -> f32 {
    let words: Vec<String> = text
        .split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|w| !w.is_empty())
        .collect();
    if words.is_empty() {
        return 0.0;
    }

    let unique: HashSet<&str> = words.iter().map(String::as_str).collect();
    let uniqueness = unique.len() as f32 / words.len() as f32;
    let average_length =
        words.iter().map(|w| w.chars().count()).sum::<usize>() as f32 / words.len() as f32;

    (uniqueness * 0.6 + (average_length / 10.0).min(1.0) * 0.4).min(1.0)
}

/// Whether the text carries key information markers.
pub fn contains_key_info(text: &str) -> bool {
    KEY_TERMS.is_match(text)
}

/// One-line extractive summary: the first sentence of the first meaningful
/// line, stripped of markdown and comment markers, cut to 160 chars.
pub fn summarize(text: &str) -> String {
    const MAX_CHARS: usize = 160;

    let line = text
        .lines()
        .map(|l| {
            l.trim()
                .trim_start_matches(['#', '/', '*', '-', '>', '!'])
                .trim()
        })
        .find(|l| !l.is_empty() && !l.starts_with("```"))
        .unwrap_or_default();

    let sentence = match line.find(". ") {
        Some(end) => &line[..=end],
        None => line,
    };

    if sentence.chars().count() > MAX_CHARS {
        let cut: String = sentence.chars().take(MAX_CHARS - 3).collect();
        format!("{}...", cut.trim_end())
    } else {
        sentence.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_importance() {
        assert_eq!(text_importance("plain words here"), 0.5);
        assert!(text_importance("Important: back up first.") > 0.65);
        assert!(text_importance("Why does this fail?") > 0.55);
        assert!(text_importance("- one\n- two") > 0.55);
        assert!(
            text_importance("Important note! Warning: must read? In summary:\n- a") <= 1.0
        );
    }

    #[test]
    fn test_semantic_density() {
        assert_eq!(semantic_density(""), 0.0);
        let repetitive = semantic_density("a a a a a a a a");
        let varied = semantic_density("distributed consensus requires quorum acknowledgement");
        assert!(varied > repetitive);
        assert!(varied > 0.7);
        assert!(varied <= 1.0);
    }

    #[test]
    fn test_contains_key_info() {
        assert!(contains_key_info("NOTE: this is deprecated"));
        assert!(!contains_key_info("nothing special"));
        assert!(!contains_key_info("denote"));
    }

    #[test]
    fn test_summarize() {
        assert_eq!(summarize("## Setup\nInstall it."), "Setup");
        assert_eq!(summarize("First sentence. Second one."), "First sentence.");
        assert_eq!(summarize("/// Parses headers\nfn parse() {}"), "Parses headers");
        let long = "x".repeat(400);
        assert_eq!(summarize(&long).chars().count(), 160);
    }
}
