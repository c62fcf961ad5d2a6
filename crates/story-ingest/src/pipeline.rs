//! Story ingestion pipeline
//!
//! Validates a request, embeds the story, and replaces the owner's vector
//! with a delete-then-upsert sequence. Each request is processed strictly
//! in order; nothing is shared between requests.
//!
//! Author: hephaex@gmail.com

use std::sync::Arc;
use story_core::{
    IndexHandle, IngestionRequest, QueryMatch, Result, StoryError, StoryMetadata,
    ValidatedRequest, WriteFailurePolicy,
};
use story_vector::{EmbeddingClient, VectorStore};

// ============================================================================
// Stages
// ============================================================================

/// Processing stage of a single ingestion request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Validating,
    Embedding,
    IndexReady,
    Replacing,
    Inserting,
    Done,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validating => write!(f, "validating"),
            Self::Embedding => write!(f, "embedding"),
            Self::IndexReady => write!(f, "index_ready"),
            Self::Replacing => write!(f, "replacing"),
            Self::Inserting => write!(f, "inserting"),
            Self::Done => write!(f, "done"),
        }
    }
}

/// A store write that failed without aborting the request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteFailure {
    pub stage: Stage,
    pub message: String,
}

/// Result of a completed ingestion
#[derive(Debug, Clone)]
pub struct IngestionReport {
    pub user_id: String,
    pub story_id: String,
    pub vector_id: String,
    pub index: IndexHandle,

    /// Swallowed delete/upsert failures, in the order they happened
    pub write_failures: Vec<WriteFailure>,
}

impl IngestionReport {
    pub fn is_clean(&self) -> bool {
        self.write_failures.is_empty()
    }
}

// ============================================================================
// Identity and metadata
// ============================================================================

/// Deterministic vector id for an owner and optional chunk
pub fn derive_vector_id(user_id: &str, chunk_index: Option<u64>) -> String {
    match chunk_index {
        Some(chunk) => format!("user:{user_id}:chunk:{chunk}"),
        None => format!("user:{user_id}"),
    }
}

/// Metadata envelope for a validated request; absent fields stay absent
pub fn assemble_metadata(request: &ValidatedRequest) -> StoryMetadata {
    StoryMetadata {
        user_id: request.user_id.clone(),
        story_id: request.story_id.clone(),
        chunk_index: request.chunk_index,
        language: request.language.clone(),
        created_at: request.created_at.clone(),
    }
}

fn embedding_failure(err: StoryError) -> StoryError {
    let reason = match err {
        StoryError::EmbeddingGenerationFailed { reason } => reason,
        other => other.to_string(),
    };
    tracing::error!(%reason, "Embedding generation failed");
    StoryError::EmbeddingGenerationFailed { reason }
}

// ============================================================================
// Pipeline
// ============================================================================

/// Vector-lifecycle coordinator for story ingestion
pub struct IngestionPipeline {
    /// Embedding provider
    embedder: Arc<dyn EmbeddingClient>,

    /// Vector index
    store: Arc<dyn VectorStore>,

    /// What an upsert failure does to the result
    write_failure_policy: WriteFailurePolicy,

    /// Neighbours returned by `find_similar` when the caller gives no count
    default_top_k: usize,
}

impl IngestionPipeline {
    /// Create a new pipeline with the lenient write-failure policy
    pub fn new(embedder: Arc<dyn EmbeddingClient>, store: Arc<dyn VectorStore>) -> Self {
        Self {
            embedder,
            store,
            write_failure_policy: WriteFailurePolicy::default(),
            default_top_k: 5,
        }
    }

    pub fn with_write_failure_policy(mut self, policy: WriteFailurePolicy) -> Self {
        self.write_failure_policy = policy;
        self
    }

    pub fn with_default_top_k(mut self, top_k: usize) -> Self {
        self.default_top_k = top_k;
        self
    }

    /// Ingest one story, replacing whatever the owner stored before
    pub async fn process(&self, request: IngestionRequest) -> Result<IngestionReport> {
        match request.validate() {
            Ok(request) => self.process_validated(request).await,
            Err(e) => {
                tracing::warn!(stage = %Stage::Validating, error = %e, "Story ingestion failed");
                Err(e)
            }
        }
    }

    /// Ingest a request whose required fields were already checked
    pub async fn process_validated(&self, request: ValidatedRequest) -> Result<IngestionReport> {
        let mut stage = Stage::Validating;
        let result = self.run(request, &mut stage).await;
        if let Err(e) = &result {
            tracing::warn!(stage = %stage, error = %e, "Story ingestion failed");
        }
        result
    }

    async fn run(&self, request: ValidatedRequest, stage: &mut Stage) -> Result<IngestionReport> {
        enter(stage, Stage::Embedding);
        let embedding = self
            .embedder
            .embed(&request.story_text)
            .await
            .map_err(embedding_failure)?;
        if embedding.is_empty() {
            return Err(embedding_failure(StoryError::EmbeddingGenerationFailed {
                reason: "provider returned an empty vector".to_string(),
            }));
        }

        enter(stage, Stage::IndexReady);
        let index = self.store.ensure_index().await?;

        let vector_id = derive_vector_id(&request.user_id, request.chunk_index);
        let metadata = assemble_metadata(&request);
        tracing::info!(
            user_id = %request.user_id,
            story_id = %request.story_id,
            vector_id = %vector_id,
            dimension = embedding.len(),
            "Replacing story vector"
        );

        let mut write_failures = Vec::new();

        enter(stage, Stage::Replacing);
        if let Err(e) = self.store.delete_by_owner(&request.user_id).await {
            // Best effort; the insert still runs
            tracing::warn!(user_id = %request.user_id, error = %e, "Failed to delete previous vectors");
            write_failures.push(WriteFailure {
                stage: Stage::Replacing,
                message: e.to_string(),
            });
        }

        enter(stage, Stage::Inserting);
        if let Err(e) = self.store.upsert(&vector_id, &embedding, &metadata).await {
            tracing::warn!(vector_id = %vector_id, error = %e, "Failed to upsert story vector");
            if self.write_failure_policy == WriteFailurePolicy::Strict {
                return Err(e);
            }
            write_failures.push(WriteFailure {
                stage: Stage::Inserting,
                message: e.to_string(),
            });
        }

        enter(stage, Stage::Done);
        Ok(IngestionReport {
            user_id: request.user_id,
            story_id: request.story_id,
            vector_id,
            index,
            write_failures,
        })
    }

    /// Stories most similar to `text`, best first
    ///
    /// Matches owned by `exclude_user` are dropped. A failed remote query
    /// yields `Ok(None)`; invalid arguments are errors.
    pub async fn find_similar(
        &self,
        text: &str,
        top_k: Option<usize>,
        exclude_user: Option<&str>,
    ) -> Result<Option<Vec<QueryMatch>>> {
        if text.is_empty() {
            return Err(StoryError::Validation(
                "Missing 'story_text' in input JSON.".to_string(),
            ));
        }

        let requested = top_k.unwrap_or(self.default_top_k);
        if requested == 0 {
            return Err(StoryError::InvalidArgument(
                "top_k must be at least 1".to_string(),
            ));
        }
        let exclude_user = exclude_user.filter(|u| !u.is_empty());
        // One extra slot for the requester's own vector
        let fetch = if exclude_user.is_some() {
            requested.saturating_add(1)
        } else {
            requested
        };

        let embedding = self.embedder.embed(text).await.map_err(embedding_failure)?;
        self.store.ensure_index().await?;

        let matches = match self.store.query(&embedding, Some(fetch)).await {
            Ok(matches) => matches,
            Err(StoryError::StoreQueryFailed(message)) => {
                tracing::warn!(error = %message, "Similar-story query failed");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let matches = matches
            .into_iter()
            .filter(|m| match (exclude_user, &m.metadata) {
                (Some(user), Some(metadata)) => metadata.user_id != user,
                _ => true,
            })
            .take(requested)
            .collect();

        Ok(Some(matches))
    }
}

fn enter(stage: &mut Stage, next: Stage) {
    tracing::debug!(from = %stage, to = %next, "Ingestion stage");
    *stage = next;
}
