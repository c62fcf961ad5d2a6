//! Story Ingest - Single-story-per-user vector ingestion
//!
//! This crate coordinates the vector lifecycle of a user's story:
//! - Request validation and metadata assembly
//! - Embedding generation
//! - Delete-then-upsert replacement of the owner's vector
//! - Similar-story lookup
//!
//! Author: hephaex@gmail.com

use std::sync::Arc;
use story_core::{AppConfig, Result, StoryError};
use story_vector::{create_embedding_client, create_vector_store, EmbeddingClient};

pub mod boundary;
pub mod pipeline;

pub use boundary::{
    handle_ingest, handle_ingest_with, handle_similar, handle_similar_with, IngestionOutcome,
    MatchSummary, SimilarOutcome, SimilarRequest,
};
pub use pipeline::{
    assemble_metadata, derive_vector_id, IngestionPipeline, IngestionReport, Stage, WriteFailure,
};

/// Build a pipeline with the configured embedding provider and vector store
pub fn build_pipeline(config: &AppConfig) -> Result<IngestionPipeline> {
    let embedder = create_embedding_client(&config.embedding)?;
    check_dimension(embedder.as_ref(), config.vector_store.dimension)?;
    let store = create_vector_store(&config.vector_store)?;

    tracing::debug!(
        model = embedder.model(),
        backend = ?config.vector_store.backend,
        index = %config.vector_store.index_name,
        "Pipeline configured"
    );

    Ok(IngestionPipeline::new(Arc::from(embedder), Arc::from(store))
        .with_write_failure_policy(config.ingest.write_failure_policy)
        .with_default_top_k(config.vector_store.top_k))
}

/// Reject a model whose known output dimension differs from the index dimension
///
/// Models missing from the dimension table are not checked.
pub fn check_dimension(embedder: &dyn EmbeddingClient, index_dimension: usize) -> Result<()> {
    match embedder.dimension() {
        Some(dimension) if dimension != index_dimension => Err(StoryError::Config(format!(
            "embedding model {} produces {dimension}-dimensional vectors but VECTOR_DIMENSION is {index_dimension}",
            embedder.model()
        ))),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use story_core::{EmbeddingProvider, VectorBackend};

    fn ollama_config(model: &str) -> AppConfig {
        let mut config = AppConfig::default();
        config.embedding.provider = EmbeddingProvider::Ollama;
        config.embedding.model = model.to_string();
        config.vector_store.backend = VectorBackend::Pinecone;
        config.vector_store.pinecone_api_key = Some("pc-key".to_string());
        config
    }

    #[test]
    fn test_build_pipeline_rejects_dimension_mismatch() {
        let err = build_pipeline(&ollama_config("nomic-embed-text"))
            .err()
            .unwrap();
        assert_eq!(
            err.to_string(),
            "Configuration error: embedding model nomic-embed-text produces \
             768-dimensional vectors but VECTOR_DIMENSION is 1024"
        );
    }

    #[test]
    fn test_build_pipeline_accepts_matching_dimension() {
        assert!(build_pipeline(&ollama_config("mxbai-embed-large")).is_ok());
    }

    #[test]
    fn test_unknown_model_is_not_checked() {
        let mut config = ollama_config("my-org/custom-embedder");
        config.vector_store.dimension = 640;
        assert!(build_pipeline(&config).is_ok());
    }
}
