//! HTTP providers for remote model APIs.
//!
//! [`HttpProvider`] speaks the Voyage-style embeddings and rerank API.
//! [`HttpVisionProvider`] asks an OpenAI-compatible chat completions endpoint
//! to describe images, and to explain diagram or chart source text.

use crate::config::{ProviderConfig, VisionConfig};
use crate::error::{ProviderError, Result};
use crate::provider::{
    EmbedOptions, EmbeddingProvider, EmbeddingResult, RankedIndex, VisionProvider, VisualKind,
    VisualReference, normalize_to_f16,
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Serialize)]
struct EmbeddingsRequest<'a> {
    input: &'a [String],
    model: &'a str,
    input_type: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    embedding: Vec<f32>,
    index: usize,
}

#[derive(Debug, Serialize)]
struct RerankRequest<'a> {
    query: &'a str,
    documents: &'a [String],
    model: &'a str,
    top_k: usize,
}

#[derive(Debug, Deserialize)]
struct RerankResponse {
    data: Vec<RerankItem>,
}

#[derive(Debug, Deserialize)]
struct RerankItem {
    index: usize,
    relevance_score: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

/// Embedding and rerank provider backed by a remote API.
#[derive(Debug, Clone)]
pub struct HttpProvider {
    client: reqwest::Client,
    config: ProviderConfig,
    api_key: String,
}

impl HttpProvider {
    /// Validate the configuration, resolve the API key and build the client.
    pub fn new(config: ProviderConfig) -> Result<Self> {
        config.validate()?;
        let api_key = config.resolve_api_key()?;
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;
        tracing::info!(
            "HTTP provider ready: {} ({})",
            config.base_url,
            config.embedding_model
        );
        Ok(Self {
            client,
            config,
            api_key,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn post<B: Serialize + ?Sized + Sync, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R> {
        let response = self
            .client
            .post(self.endpoint(path))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;
        parse_response(response).await
    }
}

async fn parse_response<R: DeserializeOwned>(response: reqwest::Response) -> Result<R> {
    let status = response.status();
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(ProviderError::Api {
            status: status.as_u16(),
            message,
        });
    }
    Ok(response.json::<R>().await?)
}

/// Order embedding items by their `index` and check one came back per input.
fn collect_embeddings(mut items: Vec<EmbeddingItem>, expected: usize) -> Result<Vec<Vec<f32>>> {
    if items.len() != expected {
        return Err(ProviderError::malformed(format!(
            "expected {expected} embeddings, got {}",
            items.len()
        )));
    }
    items.sort_by_key(|item| item.index);
    Ok(items.into_iter().map(|item| item.embedding).collect())
}

fn ranked_from_items(
    items: Vec<RerankItem>,
    documents: usize,
    top_k: usize,
) -> Result<Vec<RankedIndex>> {
    let mut ranked = Vec::with_capacity(items.len());
    for item in items {
        if item.index >= documents {
            return Err(ProviderError::malformed(format!(
                "rerank index {} out of range for {documents} documents",
                item.index
            )));
        }
        ranked.push(RankedIndex {
            index: item.index,
            score: item.relevance_score,
        });
    }
    ranked.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    ranked.truncate(top_k);
    Ok(ranked)
}

#[async_trait]
impl EmbeddingProvider for HttpProvider {
    async fn embed_batch(
        &self,
        texts: &[String],
        options: &EmbedOptions,
    ) -> Result<EmbeddingResult> {
        if texts.is_empty() {
            return Ok(EmbeddingResult::new(vec![]));
        }

        let mut all_embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.config.batch_size) {
            debug!("Requesting embeddings for batch of {} texts", batch.len());
            let request = EmbeddingsRequest {
                input: batch,
                model: &self.config.embedding_model,
                input_type: options.input_type.as_str(),
            };
            let response: EmbeddingsResponse = self.post("embeddings", &request).await?;
            for values in collect_embeddings(response.data, batch.len())? {
                all_embeddings.push(normalize_to_f16(&values));
            }
        }

        Ok(EmbeddingResult::new(all_embeddings))
    }

    async fn rerank(
        &self,
        query: &str,
        documents: &[String],
        top_k: usize,
    ) -> Result<Vec<RankedIndex>> {
        if documents.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }
        let request = RerankRequest {
            query,
            documents,
            model: &self.config.rerank_model,
            top_k,
        };
        let response: RerankResponse = self.post("rerank", &request).await?;
        ranked_from_items(response.data, documents.len(), top_k)
    }

    fn embedding_dimension(&self) -> usize {
        self.config.dimension
    }

    fn provider_name(&self) -> &str {
        "http"
    }
}

/// Vision provider backed by an OpenAI-compatible chat completions API.
#[derive(Debug, Clone)]
pub struct HttpVisionProvider {
    client: reqwest::Client,
    config: VisionConfig,
    api_key: String,
}

impl HttpVisionProvider {
    pub fn new(config: VisionConfig) -> Result<Self> {
        let api_key = config.resolve_api_key()?;
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;
        Ok(Self {
            client,
            config,
            api_key,
        })
    }
}

/// Build the chat completions request body for a visual.
///
/// Images are sent as `image_url` parts; diagram and chart sources are sent
/// as text since the model reads them directly.
fn describe_request(model: &str, max_tokens: u32, visual: &VisualReference) -> serde_json::Value {
    let content = match visual.kind {
        VisualKind::Image => {
            let mut prompt =
                "Describe this image for a search index in two or three sentences.".to_string();
            if let Some(alt) = &visual.alt_text {
                prompt.push_str(&format!(" The author's alt text is: {alt}"));
            }
            serde_json::json!([
                {"type": "text", "text": prompt},
                {"type": "image_url", "image_url": {"url": visual.source}}
            ])
        }
        VisualKind::Diagram | VisualKind::Chart => {
            let language = visual.language.as_deref().unwrap_or("text");
            let prompt = format!(
                "Explain what this {language} {} shows in two or three sentences.\n\n{}",
                if visual.kind == VisualKind::Chart {
                    "chart"
                } else {
                    "diagram"
                },
                visual.source
            );
            serde_json::json!([{"type": "text", "text": prompt}])
        }
    };

    serde_json::json!({
        "model": model,
        "max_tokens": max_tokens,
        "messages": [{"role": "user", "content": content}]
    })
}

#[async_trait]
impl VisionProvider for HttpVisionProvider {
    async fn describe(&self, visual: &VisualReference) -> Result<String> {
        let body = describe_request(&self.config.model, self.config.max_tokens, visual);
        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        let response: ChatResponse = parse_response(response).await?;
        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or_else(|| ProviderError::malformed("chat completion contained no text"))
    }

    fn provider_name(&self) -> &str {
        "http-vision"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embeddings_request_shape() {
        let input = vec!["a".to_string(), "b".to_string()];
        let request = EmbeddingsRequest {
            input: &input,
            model: "voyage-3",
            input_type: EmbedOptions::query().input_type.as_str(),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["input"], serde_json::json!(["a", "b"]));
        assert_eq!(json["model"], "voyage-3");
        assert_eq!(json["input_type"], "query");
    }

    #[test]
    fn test_collect_embeddings_sorts_by_index() {
        let response: EmbeddingsResponse = serde_json::from_str(
            r#"{"data": [
                {"embedding": [0.0, 1.0], "index": 1},
                {"embedding": [1.0, 0.0], "index": 0}
            ]}"#,
        )
        .unwrap();
        let vectors = collect_embeddings(response.data, 2).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn test_collect_embeddings_count_mismatch() {
        let err = collect_embeddings(vec![], 1).unwrap_err();
        assert!(matches!(err, ProviderError::MalformedResponse { .. }));
    }

    #[test]
    fn test_rerank_items_sorted_and_truncated() {
        let response: RerankResponse = serde_json::from_str(
            r#"{"data": [
                {"index": 0, "relevance_score": 0.2},
                {"index": 2, "relevance_score": 0.9},
                {"index": 1, "relevance_score": 0.5}
            ]}"#,
        )
        .unwrap();
        let ranked = ranked_from_items(response.data, 3, 2).unwrap();
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].index, 2);
        assert_eq!(ranked[1].index, 1);
    }

    #[test]
    fn test_rerank_index_out_of_range() {
        let items = vec![RerankItem {
            index: 5,
            relevance_score: 1.0,
        }];
        assert!(ranked_from_items(items, 2, 10).is_err());
    }

    #[test]
    fn test_describe_request_for_image_and_diagram() {
        let image = VisualReference {
            kind: VisualKind::Image,
            source: "https://example.com/arch.png".to_string(),
            alt_text: Some("Architecture".to_string()),
            caption: None,
            language: None,
        };
        let body = describe_request("gpt-4o-mini", 300, &image);
        assert_eq!(body["model"], "gpt-4o-mini");
        let parts = &body["messages"][0]["content"];
        assert_eq!(parts[1]["image_url"]["url"], "https://example.com/arch.png");
        assert!(parts[0]["text"].as_str().unwrap().contains("Architecture"));

        let diagram = VisualReference {
            kind: VisualKind::Diagram,
            source: "graph TD; A-->B".to_string(),
            alt_text: None,
            caption: None,
            language: Some("mermaid".to_string()),
        };
        let body = describe_request("gpt-4o-mini", 300, &diagram);
        let text = body["messages"][0]["content"][0]["text"].as_str().unwrap();
        assert!(text.contains("mermaid diagram"));
        assert!(text.contains("A-->B"));
    }

    #[test]
    fn test_new_requires_api_key() {
        let config = ProviderConfig {
            api_key_env: "NEXUS_TEST_KEY_THAT_IS_NEVER_SET".to_string(),
            ..ProviderConfig::default()
        };
        assert!(HttpProvider::new(config).is_err());
        assert!(HttpProvider::new(ProviderConfig::default().with_api_key("k")).is_ok());
    }
}
