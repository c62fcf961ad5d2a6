//! Story Ingestion Configuration Management
//!
//! Handles configuration from environment variables and config files
//! with defaults matching the hosted deployment.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Embedding provider configuration
    pub embedding: EmbeddingConfig,

    /// Vector index configuration
    pub vector_store: VectorStoreConfig,

    /// Ingestion pipeline behaviour
    pub ingest: IngestConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup (defaults for unset keys)
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        config.apply_overrides(lookup)?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileReadError {
            path: path.clone(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path,
            message: e.to_string(),
        })
    }

    /// Merge with environment variables (env takes precedence)
    pub fn with_env_override(mut self) -> Result<Self, ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(self)
    }

    /// Overwrite every field whose key the lookup knows
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Embedding provider
        if let Some(provider) = lookup("EMBEDDING_PROVIDER") {
            self.embedding.provider = provider.parse()?;
        }
        if let Some(key) = lookup("TOGETHER_API_KEY") {
            self.embedding.together_api_key = Some(key);
        }
        if let Some(key) = lookup("OPENAI_API_KEY") {
            self.embedding.openai_api_key = Some(key);
        }
        if let Some(model) = lookup("EMBEDDING_MODEL") {
            self.embedding.model = model;
        }
        if let Some(url) = lookup("EMBEDDING_BASE_URL") {
            self.embedding.base_url = Some(url);
        }
        if let Some(url) = lookup("OLLAMA_URL") {
            self.embedding.ollama_url = url;
        }
        if let Some(secs) = lookup("EMBEDDING_TIMEOUT_SECS") {
            self.embedding.timeout_secs = parse_value("EMBEDDING_TIMEOUT_SECS", secs)?;
        }

        // Vector store
        if let Some(backend) = lookup("VECTOR_BACKEND") {
            self.vector_store.backend = backend.parse()?;
        }
        if let Some(key) = lookup("PINECONE_API_KEY") {
            self.vector_store.pinecone_api_key = Some(key);
        }
        if let Some(name) = lookup("PINECONE_INDEX_NAME") {
            self.vector_store.index_name = name;
        }
        if let Some(cloud) = lookup("PINECONE_CLOUD") {
            self.vector_store.cloud = cloud;
        }
        if let Some(region) = lookup("PINECONE_REGION") {
            self.vector_store.region = region;
        }
        if let Some(namespace) = lookup("PINECONE_NAMESPACE") {
            self.vector_store.namespace = Some(namespace).filter(|n| !n.is_empty());
        }
        if let Some(url) = lookup("PINECONE_CONTROLLER_URL") {
            self.vector_store.pinecone_controller_url = url;
        }
        if let Some(url) = lookup("QDRANT_URL") {
            self.vector_store.qdrant_url = url;
        }
        if let Some(key) = lookup("QDRANT_API_KEY") {
            self.vector_store.qdrant_api_key = Some(key);
        }
        if let Some(dimension) = lookup("VECTOR_DIMENSION") {
            self.vector_store.dimension = parse_value("VECTOR_DIMENSION", dimension)?;
        }
        if let Some(top_k) = lookup("VECTOR_TOP_K") {
            self.vector_store.top_k = parse_value("VECTOR_TOP_K", top_k)?;
        }
        if let Some(secs) = lookup("VECTOR_TIMEOUT_SECS") {
            self.vector_store.timeout_secs = parse_value("VECTOR_TIMEOUT_SECS", secs)?;
        }

        // Pipeline
        if let Some(policy) = lookup("WRITE_FAILURE_POLICY") {
            self.ingest.write_failure_policy = policy.parse()?;
        }

        // Logging
        if let Some(level) = lookup("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("LOG_FORMAT") {
            self.logging.json_format = match format.to_lowercase().as_str() {
                "json" => true,
                "text" | "pretty" => false,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: "LOG_FORMAT".to_string(),
                        value: format,
                    })
                }
            };
        }

        Ok(())
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: String) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value,
    })
}

/// Embedding provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Provider to use
    pub provider: EmbeddingProvider,

    /// Together AI API key
    pub together_api_key: Option<String>,

    /// OpenAI API key
    pub openai_api_key: Option<String>,

    /// Base URL override for OpenAI-compatible APIs
    pub base_url: Option<String>,

    /// Ollama server URL
    pub ollama_url: String,

    /// Embedding model name
    pub model: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl EmbeddingConfig {
    /// Base URL for the configured provider, honouring an override
    pub fn resolved_base_url(&self) -> String {
        match (&self.base_url, self.provider) {
            (Some(url), _) => url.clone(),
            (None, EmbeddingProvider::Ollama) => self.ollama_url.clone(),
            (None, provider) => provider.default_base_url().to_string(),
        }
    }

    /// API key for the configured provider
    pub fn api_key(&self) -> Option<&str> {
        match self.provider {
            EmbeddingProvider::Together => self.together_api_key.as_deref(),
            EmbeddingProvider::OpenAI => self.openai_api_key.as_deref(),
            EmbeddingProvider::Ollama => None,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::Together,
            together_api_key: None,
            openai_api_key: None,
            base_url: None,
            ollama_url: "http://localhost:11434".to_string(),
            model: "BAAI/bge-large-en-v1.5".to_string(),
            timeout_secs: 60,
        }
    }
}

/// Supported embedding providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    Together,
    OpenAI,
    Ollama,
}

impl EmbeddingProvider {
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::Together => "https://api.together.xyz/v1",
            Self::OpenAI => "https://api.openai.com/v1",
            Self::Ollama => "http://localhost:11434",
        }
    }
}

impl std::str::FromStr for EmbeddingProvider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "together" => Ok(Self::Together),
            "openai" => Ok(Self::OpenAI),
            "ollama" => Ok(Self::Ollama),
            _ => Err(ConfigError::InvalidValue {
                key: "EMBEDDING_PROVIDER".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Vector index configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorStoreConfig {
    /// Backend to use
    pub backend: VectorBackend,

    /// Index (collection) name
    pub index_name: String,

    /// Vector dimension (must match embedding model)
    pub dimension: usize,

    /// Serverless cloud provider for index placement
    pub cloud: String,

    /// Serverless region for index placement
    pub region: String,

    /// Pinecone API key
    pub pinecone_api_key: Option<String>,

    /// Pinecone control-plane URL
    pub pinecone_controller_url: String,

    /// Pinecone namespace (default namespace when unset)
    pub namespace: Option<String>,

    /// Qdrant gRPC URL
    pub qdrant_url: String,

    /// Qdrant API key
    pub qdrant_api_key: Option<String>,

    /// Default number of neighbours returned by a query
    pub top_k: usize,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            backend: VectorBackend::Pinecone,
            index_name: "friendly-app".to_string(),
            dimension: 1024, // BAAI/bge-large-en-v1.5
            cloud: "gcp".to_string(),
            region: "us-central1".to_string(),
            pinecone_api_key: None,
            pinecone_controller_url: "https://api.pinecone.io".to_string(),
            namespace: None,
            qdrant_url: "http://localhost:6334".to_string(),
            qdrant_api_key: None,
            top_k: 5,
            timeout_secs: 30,
        }
    }
}

/// Supported vector store backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorBackend {
    Pinecone,
    Qdrant,
}

impl std::str::FromStr for VectorBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pinecone" => Ok(Self::Pinecone),
            "qdrant" => Ok(Self::Qdrant),
            _ => Err(ConfigError::InvalidValue {
                key: "VECTOR_BACKEND".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Ingestion pipeline configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// What an upsert failure does to the overall result
    pub write_failure_policy: WriteFailurePolicy,
}

/// How store write failures affect the reported result
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteFailurePolicy {
    /// Log the failure and still report success
    #[default]
    Lenient,
    /// Report a failed upsert as the request's error
    Strict,
}

impl std::str::FromStr for WriteFailurePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "lenient" => Ok(Self::Lenient),
            "strict" => Ok(Self::Strict),
            _ => Err(ConfigError::InvalidValue {
                key: "WRITE_FAILURE_POLICY".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// JSON format for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.vector_store.index_name, "friendly-app");
        assert_eq!(config.vector_store.dimension, 1024);
        assert_eq!(config.vector_store.cloud, "gcp");
        assert_eq!(config.vector_store.region, "us-central1");
        assert_eq!(config.embedding.model, "BAAI/bge-large-en-v1.5");
        assert_eq!(
            config.ingest.write_failure_policy,
            WriteFailurePolicy::Lenient
        );
    }

    #[test]
    fn test_lookup_overrides() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("PINECONE_INDEX_NAME", "stories-dev"),
            ("PINECONE_CLOUD", "aws"),
            ("PINECONE_REGION", "us-west-2"),
            ("TOGETHER_API_KEY", "tg-key"),
            ("VECTOR_TOP_K", "10"),
            ("WRITE_FAILURE_POLICY", "strict"),
            ("LOG_FORMAT", "json"),
        ]))
        .unwrap();

        assert_eq!(config.vector_store.index_name, "stories-dev");
        assert_eq!(config.vector_store.cloud, "aws");
        assert_eq!(config.vector_store.region, "us-west-2");
        assert_eq!(config.embedding.api_key(), Some("tg-key"));
        assert_eq!(config.vector_store.top_k, 10);
        assert_eq!(config.ingest.write_failure_policy, WriteFailurePolicy::Strict);
        assert!(config.logging.json_format);
    }

    #[test]
    fn test_invalid_numeric_value() {
        let err = AppConfig::from_lookup(lookup_from(&[("VECTOR_TOP_K", "many")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "VECTOR_TOP_K"));
    }

    #[test]
    fn test_provider_parse() {
        assert_eq!(
            "together".parse::<EmbeddingProvider>().unwrap(),
            EmbeddingProvider::Together
        );
        assert_eq!(
            "OLLAMA".parse::<EmbeddingProvider>().unwrap(),
            EmbeddingProvider::Ollama
        );
        assert!("invalid".parse::<EmbeddingProvider>().is_err());

        assert_eq!(
            "qdrant".parse::<VectorBackend>().unwrap(),
            VectorBackend::Qdrant
        );
        assert!("milvus".parse::<VectorBackend>().is_err());
    }

    #[test]
    fn test_resolved_base_url() {
        let mut config = EmbeddingConfig::default();
        assert_eq!(config.resolved_base_url(), "https://api.together.xyz/v1");

        config.provider = EmbeddingProvider::OpenAI;
        assert_eq!(config.resolved_base_url(), "https://api.openai.com/v1");

        config.base_url = Some("http://proxy.local/v1".to_string());
        assert_eq!(config.resolved_base_url(), "http://proxy.local/v1");
    }

    #[test]
    fn test_partial_toml_file() {
        let config: AppConfig = toml::from_str(
            r#"
            [vector_store]
            index_name = "from-file"
            backend = "qdrant"
            "#,
        )
        .unwrap();

        assert_eq!(config.vector_store.index_name, "from-file");
        assert_eq!(config.vector_store.backend, VectorBackend::Qdrant);
        assert_eq!(config.vector_store.dimension, 1024);
        assert_eq!(config.embedding.provider, EmbeddingProvider::Together);
    }
}
