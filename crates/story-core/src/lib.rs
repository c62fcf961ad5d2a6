//! Story Core - Domain models, errors, and configuration
//!
//! This crate defines the shared vocabulary of the story ingestion system:
//! - Ingestion requests and their validated form
//! - The metadata envelope stored next to every vector
//! - Vector index handles and query matches
//! - Common error types
//! - Configuration management
//!
//! Author: hephaex@gmail.com

pub mod config;

pub use config::{
    AppConfig, ConfigError, EmbeddingConfig, EmbeddingProvider, IngestConfig, LoggingConfig,
    VectorBackend, VectorStoreConfig, WriteFailurePolicy,
};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Core error types for story ingestion
#[derive(Error, Debug)]
pub enum StoryError {
    /// Missing or malformed request field. The message is shown to the caller verbatim.
    #[error("{0}")]
    Validation(String),

    #[error("Invalid JSON input.")]
    MalformedInput(#[source] serde_json::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The remote model returned nothing or failed. `reason` is logged, never shown.
    #[error("Failed to generate embedding.")]
    EmbeddingGenerationFailed { reason: String },

    #[error("Vector index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("Vector store write failed: {0}")]
    StoreWriteFailed(String),

    #[error("Vector store query failed: {0}")]
    StoreQueryFailed(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<ConfigError> for StoryError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StoryError>;

// ============================================================================
// Requests
// ============================================================================

/// Story creation timestamp, passed through exactly as the caller sent it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CreatedAt {
    /// ISO-8601 (or any other) string form
    Text(String),
    /// Epoch seconds or milliseconds
    Epoch(serde_json::Number),
}

impl From<&str> for CreatedAt {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// Raw ingestion request as read from the process boundary
///
/// Every field is optional here; `validate` enforces presence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestionRequest {
    pub story_id: Option<String>,
    pub story_text: Option<String>,
    pub user_id: Option<String>,
    pub chunk_index: Option<u64>,
    pub language: Option<String>,
    pub created_at: Option<CreatedAt>,
}

impl IngestionRequest {
    /// Create a request with the three required fields set
    pub fn new(
        story_id: impl Into<String>,
        story_text: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            story_id: Some(story_id.into()),
            story_text: Some(story_text.into()),
            user_id: Some(user_id.into()),
            ..Default::default()
        }
    }

    pub fn with_chunk_index(mut self, chunk_index: u64) -> Self {
        self.chunk_index = Some(chunk_index);
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_created_at(mut self, created_at: impl Into<CreatedAt>) -> Self {
        self.created_at = Some(created_at.into());
        self
    }

    /// Parse a request from a JSON document
    ///
    /// Text that is not JSON at all is `MalformedInput`. Valid JSON of the
    /// wrong shape (not an object, wrongly typed fields) is a validation error.
    pub fn from_json(raw: &str) -> Result<Self> {
        parse_json_object(raw)
    }

    /// Check required fields and produce a validated request
    ///
    /// Empty strings count as missing. The story fields are checked before
    /// the owner, each with its own message.
    pub fn validate(self) -> Result<ValidatedRequest> {
        let story_id = non_empty(self.story_id);
        let story_text = non_empty(self.story_text);

        let (Some(story_id), Some(story_text)) = (story_id, story_text) else {
            return Err(StoryError::Validation(
                "Missing 'story_id' or 'story_text' in input JSON.".to_string(),
            ));
        };

        let Some(user_id) = non_empty(self.user_id) else {
            return Err(StoryError::Validation(
                "Missing 'user_id' for single-story-per-user enforcement.".to_string(),
            ));
        };

        Ok(ValidatedRequest {
            story_id,
            story_text,
            user_id,
            chunk_index: self.chunk_index,
            language: self.language,
            created_at: self.created_at,
        })
    }
}

/// Parse a JSON object into `T`
///
/// Text that is not JSON is `MalformedInput`; any other mismatch is a
/// validation error.
pub fn parse_json_object<T: DeserializeOwned>(raw: &str) -> Result<T> {
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(StoryError::MalformedInput)?;

    if !value.is_object() {
        return Err(StoryError::Validation(
            "Input JSON must be an object.".to_string(),
        ));
    }

    serde_json::from_value(value)
        .map_err(|e| StoryError::Validation(format!("Invalid field in input JSON: {e}")))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Ingestion request with all required fields present
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedRequest {
    pub story_id: String,
    pub story_text: String,
    pub user_id: String,
    pub chunk_index: Option<u64>,
    pub language: Option<String>,
    pub created_at: Option<CreatedAt>,
}

// ============================================================================
// Vector Records
// ============================================================================

/// Metadata stored with each story vector
///
/// Optional slots are omitted from the serialized form when unset, so the
/// store never holds a null value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryMetadata {
    /// Owner of the vector; the delete-by-owner filter key
    pub user_id: String,

    pub story_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<CreatedAt>,
}

impl StoryMetadata {
    pub fn new(user_id: impl Into<String>, story_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            story_id: story_id.into(),
            chunk_index: None,
            language: None,
            created_at: None,
        }
    }

    /// Metadata as a JSON object, absent slots left out
    pub fn to_json_map(&self) -> serde_json::Map<String, serde_json::Value> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        }
    }
}

/// A stored vector with its identity and metadata
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    pub id: String,
    pub values: Vec<f32>,
    pub metadata: StoryMetadata,
}

/// Handle to a ready vector index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexHandle {
    pub name: String,
    pub dimension: usize,
    pub metric: String,

    /// Data-plane host, for backends that route per index
    pub host: Option<String>,

    /// True when this call created the index
    pub created: bool,
}

/// A nearest-neighbour match
#[derive(Debug, Clone, PartialEq)]
pub struct QueryMatch {
    pub id: String,

    /// Similarity score (higher is more similar)
    pub score: f32,

    /// Stored metadata; `None` if the payload did not decode
    pub metadata: Option<StoryMetadata>,
}

// ============================================================================
// Tests
// ============================================================================
