//! Chunking for documents that mix prose with images, diagrams and charts.
//!
//! Every visual becomes its own `image` chunk whose content is a textual
//! description, so it can be embedded and retrieved like prose. Text between
//! visuals goes through the text strategy and remembers which visuals sit
//! next to it and which ones it refers to.

use super::markdown::find_fences;
use super::text::TextStrategy;
use crate::config::ChunkingConfig;
use crate::model::{Chunk, ChunkMetadata, ChunkType, DocumentMetadata};
use crate::page::get_page_number;
use crate::source::SourceText;
use crate::tokens::estimate_tokens;
use futures::future::join_all;
use nexus_embed::{VisionProvider, VisualKind, VisualReference};
use regex::Regex;
use std::ops::Range;
use std::sync::{Arc, LazyLock};
use tracing::{debug, warn};

static MARKDOWN_IMAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"!\[(?P<alt>[^\]]*)\]\((?P<src>[^)\s]+)(?:\s+"(?P<title>[^"]*)")?\s*\)"#)
        .expect("valid regex")
});
static HTML_IMAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<img\b[^>]*>").expect("valid regex"));
static HTML_ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(src|alt|title)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("valid regex")
});
static FIGURE_CAPTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*[*_]*(?:Figure|Fig\.)\s*\d+\s*[:.]").expect("valid regex")
});
static FIGURE_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:figure|fig\.|diagram|image|chart)\s*(\d+)").expect("valid regex")
});
static POSITIONAL_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:shown|illustrated|depicted)\s+(above|below)").expect("valid regex")
});

const DIAGRAM_LANGUAGES: &[&str] = &["mermaid", "plantuml", "graphviz", "dot"];
const CHART_LANGUAGES: &[&str] = &["chart", "vega", "vega-lite", "chartjs"];

/// A visual and the bytes it occupies, caption line included.
#[derive(Debug, Clone)]
struct Visual {
    range: Range<usize>,
    reference: VisualReference,
}

#[derive(Clone)]
pub struct MultimodalStrategy {
    text: TextStrategy,
    budget: usize,
    vision: Option<Arc<dyn VisionProvider>>,
}

impl std::fmt::Debug for MultimodalStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultimodalStrategy")
            .field("text", &self.text)
            .field("budget", &self.budget)
            .field(
                "vision",
                &self.vision.as_ref().map(|provider| provider.provider_name()),
            )
            .finish()
    }
}

impl MultimodalStrategy {
    pub fn new(config: ChunkingConfig, vision: Option<Arc<dyn VisionProvider>>) -> Self {
        Self {
            budget: config.budget(),
            text: TextStrategy::new(config),
            vision,
        }
    }

    pub async fn chunk(&self, content: &str, metadata: &DocumentMetadata) -> Vec<Chunk> {
        let source = SourceText::new(content);
        let visuals = find_visuals(&source);
        debug!(
            "Found {} visuals in document {}",
            visuals.len(),
            metadata.id
        );

        let descriptions = self.describe_all(&visuals).await;
        let visual_chunks: Vec<Chunk> = visuals
            .iter()
            .zip(descriptions)
            .map(|(visual, description)| {
                visual_chunk(&source, visual, description, metadata, self.budget)
            })
            .collect();
        let visual_ids: Vec<&str> = visual_chunks.iter().map(|c| c.id.as_str()).collect();

        let mut chunks = Vec::new();
        let mut cursor = 0;
        for index in 0..=visuals.len() {
            let segment_end = visuals.get(index).map_or(content.len(), |v| v.range.start);
            let previous = index.checked_sub(1).map(|i| visual_ids[i]);
            let next = visual_ids.get(index).copied();

            for mut chunk in self
                .text
                .chunk_span(&source, cursor..segment_end, metadata)
            {
                chunk.metadata.nearby_images =
                    previous.into_iter().chain(next).map(str::to_string).collect();
                chunk.metadata.referenced_images =
                    referenced_visuals(&chunk.content, &visual_ids, previous, next);
                chunks.push(chunk);
            }
            if let (Some(visual), Some(chunk)) = (visuals.get(index), visual_chunks.get(index)) {
                chunks.push(chunk.clone());
                cursor = visual.range.end;
            }
        }
        chunks
    }

    /// Ask the vision provider for every description at once. Failures fall
    /// back to alt text, caption, or a generic label.
    async fn describe_all(&self, visuals: &[Visual]) -> Vec<String> {
        let described: Vec<Option<String>> = match &self.vision {
            Some(provider) => join_all(visuals.iter().map(|visual| async move {
                match provider.describe(&visual.reference).await {
                    Ok(description) if !description.trim().is_empty() => {
                        Some(description.trim().to_string())
                    }
                    Ok(_) => None,
                    Err(e) => {
                        warn!(
                            "Vision provider {} failed to describe {}: {}",
                            provider.provider_name(),
                            visual.reference.source,
                            e
                        );
                        None
                    }
                }
            }))
            .await,
            None => vec![None; visuals.len()],
        };

        visuals
            .iter()
            .zip(described)
            .map(|(visual, description)| {
                description.unwrap_or_else(|| fallback_description(&visual.reference))
            })
            .collect()
    }
}

fn fallback_description(reference: &VisualReference) -> String {
    let non_empty = |text: &Option<String>| text.clone().filter(|t| !t.trim().is_empty());
    non_empty(&reference.alt_text)
        .or_else(|| non_empty(&reference.caption))
        .unwrap_or_else(|| {
            let language = reference.language.as_deref().unwrap_or("unknown");
            match reference.kind {
                VisualKind::Image => "Image".to_string(),
                VisualKind::Diagram => format!("Diagram ({language})"),
                VisualKind::Chart => format!("Chart ({language})"),
            }
        })
}

fn visual_chunk(
    source: &SourceText<'_>,
    visual: &Visual,
    description: String,
    metadata: &DocumentMetadata,
    budget: usize,
) -> Chunk {
    let reference = &visual.reference;
    let mut content = match reference.kind {
        VisualKind::Image => format!("[Image: {description}]"),
        VisualKind::Diagram => format!("[Diagram: {description}]"),
        VisualKind::Chart => format!("[Chart: {description}]"),
    };
    if let Some(caption) = &reference.caption {
        content.push_str(&format!("\nCaption: {caption}"));
    }
    match reference.kind {
        VisualKind::Image => content.push_str(&format!("\nSource: {}", reference.source)),
        VisualKind::Diagram | VisualKind::Chart => content.push_str(&format!(
            "\n```{}\n{}\n```",
            reference.language.as_deref().unwrap_or_default(),
            reference.source.trim_end()
        )),
    }

    // A visual is never split, so a large diagram stays whole and is tagged.
    let oversized = estimate_tokens(&content) > budget;
    let position = source.position(visual.range.clone());
    let page_number = get_page_number(position.start, metadata.pages.as_deref());
    Chunk::new(&metadata.id, content, ChunkType::Image, position).with_metadata(ChunkMetadata {
        importance: 0.7,
        oversized,
        page_number,
        visual_kind: Some(reference.kind),
        caption: reference.caption.clone(),
        source: match reference.kind {
            VisualKind::Image => Some(reference.source.clone()),
            _ => reference.language.clone(),
        },
        name: reference.alt_text.clone().filter(|alt| !alt.is_empty()),
        ..ChunkMetadata::default()
    })
}

/// Ids of the visuals a text chunk points at: `Figure N` style references
/// resolve to the N-th visual, `shown above/below` to the nearest visual on
/// that side.
fn referenced_visuals(
    text: &str,
    visual_ids: &[&str],
    previous: Option<&str>,
    next: Option<&str>,
) -> Vec<String> {
    let mut referenced: Vec<String> = Vec::new();
    let mut add = |id: &str| {
        if !referenced.iter().any(|r| r == id) {
            referenced.push(id.to_string());
        }
    };

    for caps in FIGURE_REFERENCE.captures_iter(text) {
        let ordinal: usize = caps[1].parse().unwrap_or(0);
        if let Some(id) = ordinal.checked_sub(1).and_then(|i| visual_ids.get(i)) {
            add(id);
        }
    }
    for caps in POSITIONAL_REFERENCE.captures_iter(text) {
        let target = if caps[1].eq_ignore_ascii_case("above") {
            previous
        } else {
            next
        };
        if let Some(id) = target {
            add(id);
        }
    }
    referenced
}

/// Every visual in document order. Images inside fenced blocks are code, not
/// visuals.
fn find_visuals(source: &SourceText<'_>) -> Vec<Visual> {
    let text = source.text();
    let fences = find_fences(source);
    let in_fence = |offset: usize| fences.iter().any(|f| f.range.contains(&offset));
    let mut visuals = Vec::new();

    for fence in &fences {
        let language = fence.info.as_str();
        let kind = if DIAGRAM_LANGUAGES.contains(&language) {
            VisualKind::Diagram
        } else if CHART_LANGUAGES.contains(&language) {
            VisualKind::Chart
        } else {
            continue;
        };
        let (caption, end) = caption_after(source, fence.range.end);
        visuals.push(Visual {
            range: fence.range.start..end.unwrap_or(fence.range.end),
            reference: VisualReference {
                kind,
                source: source.slice(fence.body.clone()).to_string(),
                alt_text: None,
                caption,
                language: Some(fence.info.clone()),
            },
        });
    }

    for caps in MARKDOWN_IMAGE.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        if in_fence(whole.start()) {
            continue;
        }
        let title = caps.name("title").map(|m| m.as_str().to_string());
        visuals.push(image_visual(
            source,
            whole.range(),
            caps["src"].to_string(),
            Some(caps["alt"].to_string()),
            title,
        ));
    }

    for tag in HTML_IMAGE.find_iter(text) {
        if in_fence(tag.start()) {
            continue;
        }
        let mut src = None;
        let mut alt = None;
        let mut title = None;
        for attribute in HTML_ATTRIBUTE.captures_iter(tag.as_str()) {
            let value = attribute
                .get(2)
                .or_else(|| attribute.get(3))
                .map(|m| m.as_str().to_string());
            match attribute[1].to_ascii_lowercase().as_str() {
                "src" => src = value,
                "alt" => alt = value,
                _ => title = value,
            }
        }
        if let Some(src) = src {
            visuals.push(image_visual(source, tag.range(), src, alt, title));
        }
    }

    visuals.sort_by_key(|v| v.range.start);
    let mut last_end = 0;
    visuals.retain(|visual| {
        let keep = visual.range.start >= last_end;
        if keep {
            last_end = visual.range.end;
        }
        keep
    });
    visuals
}

fn image_visual(
    source: &SourceText<'_>,
    range: Range<usize>,
    src: String,
    alt: Option<String>,
    title: Option<String>,
) -> Visual {
    let (caption_line, end) = caption_after(source, range.end);
    let caption = title.filter(|t| !t.is_empty()).or(caption_line);
    Visual {
        range: range.start..end.unwrap_or(range.end),
        reference: VisualReference {
            kind: VisualKind::Image,
            source: src,
            alt_text: alt,
            caption,
            language: None,
        },
    }
}

/// A `Figure N:` caption on the first non-blank line after `offset`, and the
/// byte offset where that line ends.
fn caption_after(source: &SourceText<'_>, offset: usize) -> (Option<String>, Option<usize>) {
    let text = source.text();
    let line = source.line_of(offset);
    // line_of is 1-based, so `line` indexes the following line.
    let next = (line..source.line_count())
        .take(2)
        .map(|i| source.line_range(i))
        .find(|range| !text[range.clone()].trim().is_empty());

    match next {
        Some(range) if FIGURE_CAPTION.is_match(&text[range.clone()]) => {
            let caption = text[range.clone()]
                .trim()
                .trim_matches(|c| c == '*' || c == '_')
                .trim()
                .to_string();
            (Some(caption), Some(range.end))
        }
        _ => (None, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ContentType;
    use async_trait::async_trait;
    use tracing_test::traced_test;

    struct EchoVision;

    #[async_trait]
    impl VisionProvider for EchoVision {
        async fn describe(&self, visual: &VisualReference) -> nexus_embed::Result<String> {
            Ok(format!("A rendering of {}", visual.source.trim()))
        }

        fn provider_name(&self) -> &str {
            "echo"
        }
    }

    struct BrokenVision;

    #[async_trait]
    impl VisionProvider for BrokenVision {
        async fn describe(&self, _visual: &VisualReference) -> nexus_embed::Result<String> {
            Err(nexus_embed::ProviderError::malformed("model offline"))
        }

        fn provider_name(&self) -> &str {
            "broken"
        }
    }

    const DOCUMENT: &str = "Intro paragraph.\n\n![Architecture](arch.png \"System overview\")\n\nAs shown above, the system has layers. See Figure 2 for the flow.\n\n```mermaid\ngraph TD; A-->B\n```\n\nClosing words.";

    fn metadata() -> DocumentMetadata {
        DocumentMetadata::new("mm-1", "Design", ContentType::Multimodal)
    }

    #[tokio::test]
    async fn test_visuals_become_image_chunks() {
        let strategy = MultimodalStrategy::new(ChunkingConfig::default(), Some(Arc::new(EchoVision)));
        let chunks = strategy.chunk(DOCUMENT, &metadata()).await;

        let types: Vec<ChunkType> = chunks.iter().map(|c| c.chunk_type).collect();
        assert_eq!(
            types,
            vec![
                ChunkType::Paragraph,
                ChunkType::Image,
                ChunkType::Paragraph,
                ChunkType::Image,
                ChunkType::Paragraph
            ]
        );

        let image = &chunks[1];
        assert!(image.content.contains("A rendering of arch.png"));
        assert!(image.content.contains("Caption: System overview"));
        assert!(image.content.contains("Source: arch.png"));
        assert_eq!(image.metadata.visual_kind, Some(VisualKind::Image));
        assert_eq!(image.metadata.importance, 0.7);

        let diagram = &chunks[3];
        assert_eq!(diagram.metadata.visual_kind, Some(VisualKind::Diagram));
        assert_eq!(diagram.metadata.source.as_deref(), Some("mermaid"));
        assert!(diagram.content.contains("graph TD; A-->B"));

        let middle = &chunks[2];
        assert_eq!(middle.metadata.nearby_images, vec![image.id.clone(), diagram.id.clone()]);
        assert_eq!(
            middle.metadata.referenced_images,
            vec![diagram.id.clone(), image.id.clone()]
        );
        assert_eq!(chunks[0].metadata.nearby_images, vec![image.id.clone()]);
        assert!(chunks[0].metadata.referenced_images.is_empty());
    }

    #[tokio::test]
    async fn test_without_provider_uses_fallbacks() {
        let strategy = MultimodalStrategy::new(ChunkingConfig::default(), None);
        let chunks = strategy.chunk(DOCUMENT, &metadata()).await;
        assert!(chunks[1].content.starts_with("[Image: Architecture]"));
        assert!(chunks[3].content.starts_with("[Diagram: Diagram (mermaid)]"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_provider_failure_is_not_fatal() {
        let strategy =
            MultimodalStrategy::new(ChunkingConfig::default(), Some(Arc::new(BrokenVision)));
        let chunks = strategy.chunk(DOCUMENT, &metadata()).await;
        assert_eq!(chunks.len(), 5);
        assert!(chunks[1].content.starts_with("[Image: Architecture]"));
        assert!(logs_contain("failed to describe"));
    }

    #[tokio::test]
    async fn test_html_images_and_figure_captions() {
        let text = "Before.\n\n<img src=\"plot.svg\" alt=\"\">\n*Figure 1: Throughput over time*\n\nAfter the figure 1 discussion.";
        let strategy = MultimodalStrategy::new(ChunkingConfig::default(), None);
        let chunks = strategy.chunk(text, &metadata()).await;

        assert_eq!(chunks.len(), 3);
        let image = &chunks[1];
        assert_eq!(
            image.metadata.caption.as_deref(),
            Some("Figure 1: Throughput over time")
        );
        assert!(image.content.starts_with("[Image: Figure 1: Throughput over time]"));
        assert_eq!(chunks[2].content, "After the figure 1 discussion.");
        assert_eq!(chunks[2].metadata.referenced_images, vec![image.id.clone()]);
    }

    #[tokio::test]
    async fn test_large_diagram_stays_whole_and_is_tagged() {
        let edges: String = (0..200).map(|i| format!("    N{i} --> N{}\n", i + 1)).collect();
        let text = format!("Topology:\n\n```mermaid\ngraph TD\n{edges}```\n\nSmall: ![dot](dot.png)\n");
        let strategy = MultimodalStrategy::new(ChunkingConfig::new(100), None);
        let chunks = strategy.chunk(&text, &metadata()).await;

        let visuals: Vec<&Chunk> = chunks
            .iter()
            .filter(|c| c.chunk_type == ChunkType::Image)
            .collect();
        assert_eq!(visuals.len(), 2);
        assert!(visuals[0].tokens > 100);
        assert!(visuals[0].metadata.oversized);
        assert!(visuals[0].content.contains("N199 --> N200"));
        assert!(!visuals[1].metadata.oversized);
    }

    #[tokio::test]
    async fn test_images_inside_code_fences_are_ignored() {
        let text = "Example:\n\n```markdown\n![logo](logo.png)\n```\n";
        let strategy = MultimodalStrategy::new(ChunkingConfig::default(), None);
        let chunks = strategy.chunk(text, &metadata()).await;
        assert!(chunks.iter().all(|c| c.chunk_type != ChunkType::Image));
    }
}
