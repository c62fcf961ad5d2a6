//! Embedding client for generating story vectors
//!
//! Supports OpenAI-compatible embedding APIs (Together AI, OpenAI) and Ollama.
//!
//! Author: hephaex@gmail.com

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use story_core::{ConfigError, EmbeddingConfig, EmbeddingProvider, Result, StoryError};

// ============================================================================
// Embedding Trait
// ============================================================================

/// Trait for embedding generation
///
/// One remote call per `embed`; no retries, batching, or caching.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Generate the embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Output dimension, when the model is a known one
    fn dimension(&self) -> Option<usize>;

    /// Model identifier sent to the provider
    fn model(&self) -> &str;
}

fn generation_failed(reason: impl Into<String>) -> StoryError {
    StoryError::EmbeddingGenerationFailed {
        reason: reason.into(),
    }
}

fn ensure_text(text: &str) -> Result<()> {
    if text.is_empty() {
        return Err(StoryError::InvalidArgument(
            "Input story cannot be empty.".to_string(),
        ));
    }
    Ok(())
}

fn build_http_client(timeout_secs: u64) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| StoryError::Config(format!("Failed to build HTTP client: {e}")))
}

/// Known output dimension for a model name
pub fn model_dimension(model: &str) -> Option<usize> {
    let dimension = match model {
        "BAAI/bge-large-en-v1.5" => 1024,
        "BAAI/bge-base-en-v1.5" => 768,
        "text-embedding-3-small" => 1536,
        "text-embedding-3-large" => 3072,
        "text-embedding-ada-002" => 1536,
        "mxbai-embed-large" => 1024,
        "nomic-embed-text" => 768,
        "all-minilm" => 384,
        _ => return None,
    };
    Some(dimension)
}

// ============================================================================
// OpenAI-compatible Embedding Client
// ============================================================================

/// Client for `/embeddings` endpoints speaking the OpenAI wire format
pub struct OpenAiCompatibleEmbedding {
    client: Client,
    api_key: String,
    endpoint: String,
    model: String,
    dimension: Option<usize>,
}

#[derive(Debug, Serialize)]
struct OpenAiEmbeddingRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbeddingResponse {
    #[serde(default)]
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

impl OpenAiEmbeddingResponse {
    /// The vector for the first input
    fn into_first(self) -> Result<Vec<f32>> {
        self.data
            .into_iter()
            .min_by_key(|d| d.index)
            .map(|d| d.embedding)
            .filter(|e| !e.is_empty())
            .ok_or_else(|| generation_failed("No embedding returned"))
    }
}

impl OpenAiCompatibleEmbedding {
    /// Create a new client against `base_url` (e.g. `https://api.together.xyz/v1`)
    pub fn new(
        api_key: impl Into<String>,
        base_url: &str,
        model: impl Into<String>,
        timeout_secs: u64,
    ) -> Result<Self> {
        let model = model.into();
        Ok(Self {
            client: build_http_client(timeout_secs)?,
            api_key: api_key.into(),
            endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
            dimension: model_dimension(&model),
            model,
        })
    }

    /// Create from config
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = config.api_key().filter(|k| !k.trim().is_empty()).ok_or_else(|| {
            let var = match config.provider {
                EmbeddingProvider::OpenAI => "OPENAI_API_KEY",
                _ => "TOGETHER_API_KEY",
            };
            StoryError::from(ConfigError::MissingRequired(var.to_string()))
        })?;

        Self::new(
            api_key.trim(),
            &config.resolved_base_url(),
            config.model.clone(),
            config.timeout_secs,
        )
    }
}

#[async_trait]
impl EmbeddingClient for OpenAiCompatibleEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        ensure_text(text)?;

        let request = OpenAiEmbeddingRequest {
            model: &self.model,
            input: vec![text],
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| generation_failed(format!("Embedding request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(generation_failed(format!(
                "Embedding provider returned {status}: {error_text}"
            )));
        }

        let result: OpenAiEmbeddingResponse = response
            .json()
            .await
            .map_err(|e| generation_failed(format!("Failed to parse embedding response: {e}")))?;

        result.into_first()
    }

    fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// Ollama Embedding Client
// ============================================================================

/// Ollama embedding API client
pub struct OllamaEmbedding {
    client: Client,
    base_url: String,
    model: String,
    dimension: Option<usize>,
}

#[derive(Debug, Serialize)]
struct OllamaEmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct OllamaEmbeddingResponse {
    #[serde(default)]
    embedding: Vec<f32>,
}

impl OllamaEmbedding {
    /// Create a new Ollama embedding client
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, timeout_secs: u64) -> Result<Self> {
        let model = model.into();
        Ok(Self {
            client: build_http_client(timeout_secs)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            dimension: model_dimension(&model),
            model,
        })
    }

    /// Create from config
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        Self::new(
            config.resolved_base_url(),
            config.model.clone(),
            config.timeout_secs,
        )
    }
}

#[async_trait]
impl EmbeddingClient for OllamaEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        ensure_text(text)?;

        let request = OllamaEmbeddingRequest {
            model: &self.model,
            prompt: text,
        };

        let response = self
            .client
            .post(format!("{}/api/embeddings", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| generation_failed(format!("Ollama embedding request failed: {e}")))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(generation_failed(format!(
                "Ollama embedding error: {error_text}"
            )));
        }

        let result: OllamaEmbeddingResponse = response
            .json()
            .await
            .map_err(|e| generation_failed(format!("Failed to parse embedding response: {e}")))?;

        if result.embedding.is_empty() {
            return Err(generation_failed("No embedding returned"));
        }
        Ok(result.embedding)
    }

    fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// Factory function
// ============================================================================

/// Create an embedding client from config
pub fn create_embedding_client(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingClient>> {
    match config.provider {
        EmbeddingProvider::Together | EmbeddingProvider::OpenAI => {
            Ok(Box::new(OpenAiCompatibleEmbedding::from_config(config)?))
        }
        EmbeddingProvider::Ollama => Ok(Box::new(OllamaEmbedding::from_config(config)?)),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_dimension() {
        assert_eq!(model_dimension("BAAI/bge-large-en-v1.5"), Some(1024));
        assert_eq!(model_dimension("text-embedding-3-small"), Some(1536));
        assert_eq!(model_dimension("nomic-embed-text"), Some(768));
        assert_eq!(model_dimension("my-org/custom-embedder"), None);
    }

    #[test]
    fn test_from_config_requires_key() {
        let config = EmbeddingConfig::default();
        let err = OpenAiCompatibleEmbedding::from_config(&config).err().unwrap();
        assert_eq!(
            err.to_string(),
            "Configuration error: Missing required configuration: TOGETHER_API_KEY"
        );

        let config = EmbeddingConfig {
            together_api_key: Some("tg-key".to_string()),
            ..Default::default()
        };
        let client = OpenAiCompatibleEmbedding::from_config(&config).unwrap();
        assert_eq!(client.endpoint, "https://api.together.xyz/v1/embeddings");
        assert_eq!(client.dimension(), Some(1024));
        assert_eq!(client.model(), "BAAI/bge-large-en-v1.5");
    }

    #[test]
    fn test_ollama_needs_no_key() {
        let config = EmbeddingConfig {
            provider: EmbeddingProvider::Ollama,
            model: "mxbai-embed-large".to_string(),
            ..Default::default()
        };
        let client = create_embedding_client(&config).unwrap();
        assert_eq!(client.dimension(), Some(1024));
    }

    #[tokio::test]
    async fn test_empty_text_rejected_locally() {
        // Unroutable endpoint: the call must fail before any request is sent
        let client =
            OpenAiCompatibleEmbedding::new("key", "http://127.0.0.1:9", "BAAI/bge-large-en-v1.5", 1)
                .unwrap();
        let err = client.embed("").await.unwrap_err();
        assert!(matches!(err, StoryError::InvalidArgument(_)));
    }

    #[test]
    fn test_response_takes_first_input() {
        let response: OpenAiEmbeddingResponse = serde_json::from_value(serde_json::json!({
            "object": "list",
            "data": [
                {"object": "embedding", "index": 1, "embedding": [9.0]},
                {"object": "embedding", "index": 0, "embedding": [0.1, 0.2]}
            ],
            "model": "BAAI/bge-large-en-v1.5"
        }))
        .unwrap();
        assert_eq!(response.into_first().unwrap(), vec![0.1, 0.2]);
    }

    #[test]
    fn test_empty_response_is_generation_failure() {
        let response: OpenAiEmbeddingResponse =
            serde_json::from_value(serde_json::json!({"data": []})).unwrap();
        assert!(matches!(
            response.into_first(),
            Err(StoryError::EmbeddingGenerationFailed { .. })
        ));
    }
}
