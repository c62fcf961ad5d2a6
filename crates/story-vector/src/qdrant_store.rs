//! Qdrant implementation for vector storage
//!
//! Qdrant point ids must be UUIDs or integers, so each story vector id
//! is mapped to a name-based UUID and kept in the payload as `vectorId`.
//!
//! Author: hephaex@gmail.com

use async_trait::async_trait;
use qdrant_client::qdrant::{
    Condition, CreateCollectionBuilder, DeletePointsBuilder, Distance, Filter, PointStruct,
    SearchPointsBuilder, UpsertPointsBuilder, Value, VectorParamsBuilder,
};
use qdrant_client::Qdrant;
use std::collections::HashMap;
use story_core::{
    CreatedAt, IndexHandle, QueryMatch, Result, StoryError, StoryMetadata, VectorStoreConfig,
};
use uuid::Uuid;

use crate::{check_owner, check_query_args, check_upsert_args};

const VECTOR_ID_KEY: &str = "vectorId";

/// Qdrant vector store implementation
pub struct QdrantStore {
    client: Qdrant,
    collection: String,
    dimension: usize,
    default_top_k: usize,
}

impl QdrantStore {
    /// Create from config
    pub fn from_config(config: &VectorStoreConfig) -> Result<Self> {
        let mut builder = Qdrant::from_url(&config.qdrant_url)
            .timeout(std::time::Duration::from_secs(config.timeout_secs));
        if let Some(key) = config.qdrant_api_key.as_ref().filter(|k| !k.is_empty()) {
            builder = builder.api_key(key.clone());
        }

        let client = builder
            .build()
            .map_err(|e| StoryError::Config(format!("Qdrant connection failed: {e}")))?;

        Ok(Self {
            client,
            collection: config.index_name.clone(),
            dimension: config.dimension,
            default_top_k: config.top_k,
        })
    }
}

/// Point id for a story vector id
fn point_id(vector_id: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, vector_id.as_bytes()).to_string()
}

fn to_payload(vector_id: &str, metadata: &StoryMetadata) -> HashMap<String, Value> {
    let mut payload: HashMap<String, Value> = metadata
        .to_json_map()
        .into_iter()
        .map(|(k, v)| (k, v.into()))
        .collect();
    payload.insert(VECTOR_ID_KEY.to_string(), vector_id.to_string().into());
    payload
}

fn metadata_from_payload(payload: &HashMap<String, Value>) -> Option<StoryMetadata> {
    let text = |key: &str| {
        payload
            .get(key)
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    };

    let created_at = payload.get("createdAt").and_then(|v| {
        if let Some(s) = v.as_str() {
            Some(CreatedAt::Text(s.to_string()))
        } else if let Some(i) = v.as_integer() {
            Some(CreatedAt::Epoch(i.into()))
        } else {
            v.as_double()
                .and_then(serde_json::Number::from_f64)
                .map(CreatedAt::Epoch)
        }
    });

    Some(StoryMetadata {
        user_id: text("userId")?,
        story_id: text("storyId")?,
        chunk_index: payload
            .get("chunkIndex")
            .and_then(|v| v.as_integer())
            .and_then(|i| u64::try_from(i).ok()),
        language: text("language"),
        created_at,
    })
}

#[async_trait]
impl super::VectorStore for QdrantStore {
    async fn ensure_index(&self) -> Result<IndexHandle> {
        // Check if collection exists
        let collections = self.client.list_collections().await.map_err(|e| {
            StoryError::IndexUnavailable(format!("Failed to list collections: {e}"))
        })?;

        let exists = collections
            .collections
            .iter()
            .any(|c| c.name == self.collection);

        if !exists {
            self.client
                .create_collection(
                    CreateCollectionBuilder::new(&self.collection).vectors_config(
                        VectorParamsBuilder::new(self.dimension as u64, Distance::Cosine),
                    ),
                )
                .await
                .map_err(|e| {
                    StoryError::IndexUnavailable(format!("Failed to create collection: {e}"))
                })?;
            tracing::info!(collection = %self.collection, "Created vector collection");
        }

        Ok(IndexHandle {
            name: self.collection.clone(),
            dimension: self.dimension,
            metric: "cosine".to_string(),
            host: None,
            created: !exists,
        })
    }

    async fn upsert(&self, id: &str, vector: &[f32], metadata: &StoryMetadata) -> Result<()> {
        check_upsert_args(id, vector)?;

        let point = PointStruct::new(point_id(id), vector.to_vec(), to_payload(id, metadata));

        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection, vec![point]).wait(true))
            .await
            .map_err(|e| StoryError::StoreWriteFailed(format!("Failed to upsert vector {id}: {e}")))?;

        Ok(())
    }

    async fn delete_by_owner(&self, user_id: &str) -> Result<()> {
        check_owner(user_id)?;

        let filter = Filter::must([Condition::matches("userId", user_id.to_string())]);

        self.client
            .delete_points(
                DeletePointsBuilder::new(&self.collection)
                    .points(filter)
                    .wait(true),
            )
            .await
            .map_err(|e| {
                StoryError::StoreWriteFailed(format!("Failed to delete vectors for {user_id}: {e}"))
            })?;

        Ok(())
    }

    async fn query(&self, vector: &[f32], top_k: Option<usize>) -> Result<Vec<QueryMatch>> {
        let top_k = check_query_args(vector, top_k, self.default_top_k)?;

        let results = self
            .client
            .search_points(
                SearchPointsBuilder::new(&self.collection, vector.to_vec(), top_k as u64)
                    .with_payload(true),
            )
            .await
            .map_err(|e| StoryError::StoreQueryFailed(format!("Vector search failed: {e}")))?;

        let matches = results
            .result
            .into_iter()
            .filter_map(|point| {
                let id = point
                    .payload
                    .get(VECTOR_ID_KEY)
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string())?;

                Some(QueryMatch {
                    id,
                    score: point.score,
                    metadata: metadata_from_payload(&point.payload),
                })
            })
            .collect();

        Ok(matches)
    }
}
