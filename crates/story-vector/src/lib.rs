//! Story Vector - Embedding and vector index abstraction
//!
//! Provides abstraction over embedding providers and vector indexes
//! (Pinecone, Qdrant, in-memory) for storing and searching story embeddings.

use async_trait::async_trait;
use story_core::{
    IndexHandle, QueryMatch, Result, StoryError, StoryMetadata, VectorBackend, VectorStoreConfig,
};

pub mod embedding;
pub mod memory_store;
pub mod pinecone_store;
pub mod qdrant_store;

pub use embedding::{create_embedding_client, EmbeddingClient, OllamaEmbedding, OpenAiCompatibleEmbedding};
pub use memory_store::MemoryStore;
pub use pinecone_store::PineconeStore;
pub use qdrant_store::QdrantStore;

/// Trait for vector index operations
///
/// Every operation targets the single index the store was configured with.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Make sure the index exists, creating it when absent
    async fn ensure_index(&self) -> Result<IndexHandle>;

    /// Insert or replace the vector stored under `id`
    async fn upsert(&self, id: &str, vector: &[f32], metadata: &StoryMetadata) -> Result<()>;

    /// Delete every vector whose metadata `userId` equals `user_id`
    async fn delete_by_owner(&self, user_id: &str) -> Result<()>;

    /// Nearest neighbours, highest similarity first
    ///
    /// `top_k` of `None` uses the store's configured default.
    async fn query(&self, vector: &[f32], top_k: Option<usize>) -> Result<Vec<QueryMatch>>;
}

// ============================================================================
// Argument checks shared by all stores
// ============================================================================

/// Reject an empty vector or one containing NaN/infinite components
pub fn check_vector(vector: &[f32]) -> Result<()> {
    if vector.is_empty() {
        return Err(StoryError::InvalidArgument(
            "vector must not be empty".to_string(),
        ));
    }
    if let Some(pos) = vector.iter().position(|v| !v.is_finite()) {
        return Err(StoryError::InvalidArgument(format!(
            "vector component {pos} is not finite"
        )));
    }
    Ok(())
}

pub fn check_upsert_args(id: &str, vector: &[f32]) -> Result<()> {
    if id.is_empty() {
        return Err(StoryError::InvalidArgument(
            "vector id must not be empty".to_string(),
        ));
    }
    check_vector(vector)
}

pub fn check_owner(user_id: &str) -> Result<()> {
    if user_id.is_empty() {
        return Err(StoryError::InvalidArgument(
            "user_id must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// Validate query arguments and resolve the effective `top_k`
pub fn check_query_args(vector: &[f32], top_k: Option<usize>, default_top_k: usize) -> Result<usize> {
    check_vector(vector)?;
    let top_k = top_k.unwrap_or(default_top_k);
    if top_k == 0 {
        return Err(StoryError::InvalidArgument(
            "top_k must be at least 1".to_string(),
        ));
    }
    Ok(top_k)
}

// ============================================================================
// Factory function
// ============================================================================

/// Create a vector store from config
pub fn create_vector_store(config: &VectorStoreConfig) -> Result<Box<dyn VectorStore>> {
    match config.backend {
        VectorBackend::Pinecone => Ok(Box::new(PineconeStore::from_config(config)?)),
        VectorBackend::Qdrant => Ok(Box::new(QdrantStore::from_config(config)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_vector() {
        assert!(check_vector(&[0.1, 0.2]).is_ok());
        assert!(matches!(
            check_vector(&[]),
            Err(StoryError::InvalidArgument(_))
        ));
        assert!(check_vector(&[0.1, f32::NAN]).is_err());
        assert!(check_vector(&[f32::INFINITY]).is_err());
    }

    #[test]
    fn test_check_query_args() {
        assert_eq!(check_query_args(&[1.0], None, 5).unwrap(), 5);
        assert_eq!(check_query_args(&[1.0], Some(3), 5).unwrap(), 3);
        assert!(check_query_args(&[1.0], Some(0), 5).is_err());
        assert!(check_query_args(&[1.0], None, 0).is_err());
        assert!(check_query_args(&[], Some(3), 5).is_err());
    }

    #[test]
    fn test_check_upsert_and_owner() {
        assert!(check_upsert_args("user:u1", &[0.5]).is_ok());
        assert!(check_upsert_args("", &[0.5]).is_err());
        assert!(check_upsert_args("user:u1", &[]).is_err());
        assert!(check_owner("u1").is_ok());
        assert!(check_owner("").is_err());
    }
}
