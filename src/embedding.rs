//! Concrete embedding providers.
//!
//! The core defines [`EmbeddingProvider`] together with the offline
//! [`DisabledProvider`] and [`HashEmbedder`]. This module adds
//! [`OpenAIEmbedder`], which calls an OpenAI-compatible `/embeddings`
//! endpoint, and [`create_provider`], which picks a provider from config.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

use hybrid_search_core::embedding::{DisabledProvider, EmbeddingProvider, HashEmbedder};
use hybrid_search_core::error::EngineError;

use crate::config::EmbeddingConfig;
use crate::openai::OpenAIClient;

/// Embedding provider using an OpenAI-compatible API.
///
/// Texts are sent in batches of `embedding.batch_size`; a failed batch fails
/// only its own texts, which the engine then indexes sparse-only.
pub struct OpenAIEmbedder {
    client: OpenAIClient,
    model: String,
    dims: usize,
    batch_size: usize,
}

impl OpenAIEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for OpenAI provider"))?;

        Ok(Self {
            client: OpenAIClient::from_env(config.timeout_secs, config.max_retries)?,
            model,
            dims,
            batch_size: config.batch_size.max(1),
        })
    }

    fn error(&self, message: impl Into<String>) -> EngineError {
        EngineError::Embedding {
            provider: format!("openai:{}", self.model),
            message: message.into(),
        }
    }

    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EngineError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = self
            .client
            .post_json("embeddings", &body)
            .await
            .map_err(|e| self.error(e))?;
        let vectors = parse_embeddings_response(&json).map_err(|e| self.error(e.to_string()))?;
        if vectors.len() != texts.len() {
            return Err(self.error(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                vectors.len()
            )));
        }
        Ok(vectors)
    }

    fn check_dims(&self, vector: Vec<f32>) -> Result<Vec<f32>, EngineError> {
        if vector.len() != self.dims {
            return Err(self.error(format!(
                "expected {} dims, got {}",
                self.dims,
                vector.len()
            )));
        }
        Ok(vector)
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EngineError> {
        let mut vectors = self.request(&[text.to_string()]).await?;
        let vector = vectors
            .pop()
            .ok_or_else(|| self.error("empty embedding response"))?;
        self.check_dims(vector)
    }

    async fn embed_batch(&self, texts: &[String]) -> Vec<Result<Vec<f32>, EngineError>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            match self.request(batch).await {
                Ok(vectors) => out.extend(vectors.into_iter().map(|v| self.check_dims(v))),
                Err(e) => {
                    warn!(batch = batch.len(), error = %e, "embedding batch failed");
                    let message = e.to_string();
                    out.extend(batch.iter().map(|_| Err(self.error(message.clone()))));
                }
            }
        }
        out
    }
}

/// Parse an `/embeddings` response into vectors ordered by `data[].index`.
pub fn parse_embeddings_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid embeddings response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());

    for (pos, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid embeddings response: missing embedding"))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);

        let mut vec = Vec::with_capacity(embedding.len());
        for v in embedding {
            match v.as_f64() {
                Some(x) => vec.push(x as f32),
                None => bail!("Invalid embeddings response: non-numeric component"),
            }
        }
        indexed.push((index, vec));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

/// Create the [`EmbeddingProvider`] selected by `[embedding].provider`.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledProvider`] |
/// | `"hash"` | [`HashEmbedder`] (offline, deterministic) |
/// | `"openai"` | [`OpenAIEmbedder`] |
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledProvider)),
        "hash" => {
            let dims = config
                .dims
                .ok_or_else(|| anyhow::anyhow!("embedding.dims required for hash provider"))?;
            Ok(Arc::new(HashEmbedder::new(dims)))
        }
        "openai" => Ok(Arc::new(OpenAIEmbedder::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_response_orders_by_index() {
        let json = serde_json::json!({
            "data": [
                { "index": 1, "embedding": [0.0, 1.0] },
                { "index": 0, "embedding": [1.0, 0.0] }
            ]
        });
        let vectors = parse_embeddings_response(&json).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn test_parse_response_rejects_garbage() {
        assert!(parse_embeddings_response(&serde_json::json!({})).is_err());
        let bad = serde_json::json!({ "data": [ { "embedding": ["x"] } ] });
        assert!(parse_embeddings_response(&bad).is_err());
    }

    #[tokio::test]
    async fn test_create_provider() {
        let disabled = create_provider(&EmbeddingConfig::default()).unwrap();
        assert_eq!(disabled.model_name(), "disabled");
        assert!(disabled.embed("text").await.is_err());

        let hash = create_provider(&EmbeddingConfig {
            provider: "hash".to_string(),
            dims: Some(32),
            ..EmbeddingConfig::default()
        })
        .unwrap();
        assert_eq!(hash.dims(), 32);
        assert_eq!(hash.embed("hybrid retrieval").await.unwrap().len(), 32);

        let unknown = create_provider(&EmbeddingConfig {
            provider: "nope".to_string(),
            ..EmbeddingConfig::default()
        });
        assert!(unknown.is_err());
    }
}
