//! Pinecone implementation for vector storage
//!
//! Talks to the Pinecone REST API: the control plane for index
//! management and the per-index data plane for vector operations.
//!
//! Author: hephaex@gmail.com

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use story_core::{
    ConfigError, IndexHandle, QueryMatch, Result, StoryError, StoryMetadata, VectorStoreConfig,
};
use tokio::sync::OnceCell;

use crate::{check_owner, check_query_args, check_upsert_args};

const API_VERSION: &str = "2024-07";
const METRIC: &str = "cosine";

/// Pinecone vector store implementation
pub struct PineconeStore {
    client: Client,
    api_key: String,
    controller_url: String,
    index_name: String,
    dimension: usize,
    cloud: String,
    region: String,
    namespace: Option<String>,
    default_top_k: usize,

    /// Data-plane base URL, resolved on first use
    host: OnceCell<String>,
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
struct IndexList {
    #[serde(default)]
    indexes: Vec<IndexModel>,
}

#[derive(Debug, Clone, Deserialize)]
struct IndexModel {
    name: String,
    dimension: usize,
    #[serde(default)]
    metric: Option<String>,
    #[serde(default)]
    host: Option<String>,
}

#[derive(Debug, Serialize)]
struct CreateIndexRequest<'a> {
    name: &'a str,
    dimension: usize,
    metric: &'a str,
    spec: IndexSpec<'a>,
}

#[derive(Debug, Serialize)]
struct IndexSpec<'a> {
    serverless: ServerlessSpec<'a>,
}

#[derive(Debug, Serialize)]
struct ServerlessSpec<'a> {
    cloud: &'a str,
    region: &'a str,
}

#[derive(Debug, Serialize)]
struct UpsertRequest<'a> {
    vectors: Vec<UpsertVector<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct UpsertVector<'a> {
    id: &'a str,
    values: &'a [f32],
    metadata: &'a StoryMetadata,
}

#[derive(Debug, Serialize)]
struct DeleteRequest<'a> {
    filter: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<&'a str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    vector: &'a [f32],
    top_k: usize,
    include_metadata: bool,
    include_values: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<ScoredVector>,
}

#[derive(Debug, Deserialize)]
struct ScoredVector {
    id: String,
    #[serde(default)]
    score: f32,
    #[serde(default)]
    metadata: Option<serde_json::Value>,
}

/// Metadata filter selecting every vector owned by `user_id`
fn owner_filter(user_id: &str) -> serde_json::Value {
    serde_json::json!({ "userId": { "$eq": user_id } })
}

impl QueryResponse {
    fn into_matches(self) -> Vec<QueryMatch> {
        let mut matches: Vec<QueryMatch> = self
            .matches
            .into_iter()
            .map(|m| QueryMatch {
                id: m.id,
                score: m.score,
                metadata: m
                    .metadata
                    .and_then(|v| serde_json::from_value::<StoryMetadata>(v).ok()),
            })
            .collect();
        matches.sort_by(|a, b| b.score.total_cmp(&a.score));
        matches
    }
}

fn data_plane_url(host: &str) -> String {
    let host = host.trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{host}")
    }
}

// ============================================================================
// Store
// ============================================================================

impl PineconeStore {
    /// Create from config
    pub fn from_config(config: &VectorStoreConfig) -> Result<Self> {
        let api_key = config
            .pinecone_api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ConfigError::MissingRequired("PINECONE_API_KEY".to_string()))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| StoryError::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key: api_key.to_string(),
            controller_url: config.pinecone_controller_url.trim_end_matches('/').to_string(),
            index_name: config.index_name.clone(),
            dimension: config.dimension,
            cloud: config.cloud.clone(),
            region: config.region.clone(),
            namespace: config.namespace.clone(),
            default_top_k: config.top_k,
            host: OnceCell::new(),
        })
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
    }

    fn handle_for(&self, model: IndexModel, created: bool) -> IndexHandle {
        IndexHandle {
            name: model.name,
            dimension: model.dimension,
            metric: model.metric.unwrap_or_else(|| METRIC.to_string()),
            host: model.host,
            created,
        }
    }

    async fn find_index(&self) -> Result<Option<IndexModel>> {
        let response = self
            .authorized(self.client.get(format!("{}/indexes", self.controller_url)))
            .send()
            .await
            .map_err(|e| StoryError::IndexUnavailable(format!("Failed to list indexes: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(StoryError::IndexUnavailable(format!(
                "Failed to list indexes ({status}): {error_text}"
            )));
        }

        let list: IndexList = response
            .json()
            .await
            .map_err(|e| StoryError::IndexUnavailable(format!("Failed to parse index list: {e}")))?;

        Ok(list.indexes.into_iter().find(|i| i.name == self.index_name))
    }

    async fn create_index(&self) -> Result<IndexHandle> {
        let request = CreateIndexRequest {
            name: &self.index_name,
            dimension: self.dimension,
            metric: METRIC,
            spec: IndexSpec {
                serverless: ServerlessSpec {
                    cloud: &self.cloud,
                    region: &self.region,
                },
            },
        };

        let response = self
            .authorized(self.client.post(format!("{}/indexes", self.controller_url)))
            .json(&request)
            .send()
            .await
            .map_err(|e| StoryError::IndexUnavailable(format!("Failed to create index: {e}")))?;

        match response.status() {
            status if status.is_success() => {
                let model: IndexModel = response.json().await.map_err(|e| {
                    StoryError::IndexUnavailable(format!("Failed to parse created index: {e}"))
                })?;
                tracing::info!(
                    index = %self.index_name,
                    cloud = %self.cloud,
                    region = %self.region,
                    "Created vector index"
                );
                Ok(self.handle_for(model, true))
            }
            // Created by a concurrent invocation between list and create
            status if status == StatusCode::CONFLICT => {
                let model = self.find_index().await?.ok_or_else(|| {
                    StoryError::IndexUnavailable(format!(
                        "Index {} reported as existing but not listed",
                        self.index_name
                    ))
                })?;
                Ok(self.handle_for(model, false))
            }
            status => {
                let error_text = response.text().await.unwrap_or_default();
                Err(StoryError::IndexUnavailable(format!(
                    "Failed to create index ({status}): {error_text}"
                )))
            }
        }
    }

    async fn resolve_index(&self) -> Result<IndexHandle> {
        match self.find_index().await? {
            Some(model) => Ok(self.handle_for(model, false)),
            None => self.create_index().await,
        }
    }

    async fn data_url(&self, path: &str) -> Result<String> {
        let host = self
            .host
            .get_or_try_init(|| async {
                let handle = self.resolve_index().await?;
                handle.host.map(|h| data_plane_url(&h)).ok_or_else(|| {
                    StoryError::IndexUnavailable(format!(
                        "Index {} has no data-plane host yet",
                        self.index_name
                    ))
                })
            })
            .await?;
        Ok(format!("{host}{path}"))
    }

    async fn post_data<T: Serialize>(&self, url: String, body: &T) -> std::result::Result<reqwest::Response, String> {
        let response = self
            .authorized(self.client.post(url))
            .json(body)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(format!("{status}: {error_text}"));
        }
        Ok(response)
    }
}

#[async_trait]
impl super::VectorStore for PineconeStore {
    async fn ensure_index(&self) -> Result<IndexHandle> {
        let handle = self.resolve_index().await?;
        if let Some(host) = &handle.host {
            // A concurrent initializer may already have stored the same host
            let _ = self.host.set(data_plane_url(host));
        }
        Ok(handle)
    }

    async fn upsert(&self, id: &str, vector: &[f32], metadata: &StoryMetadata) -> Result<()> {
        check_upsert_args(id, vector)?;

        let request = UpsertRequest {
            vectors: vec![UpsertVector {
                id,
                values: vector,
                metadata,
            }],
            namespace: self.namespace.as_deref(),
        };

        let url = self
            .data_url("/vectors/upsert")
            .await
            .map_err(|e| StoryError::StoreWriteFailed(e.to_string()))?;
        self.post_data(url, &request)
            .await
            .map_err(|e| StoryError::StoreWriteFailed(format!("Failed to upsert vector {id}: {e}")))?;

        tracing::debug!(vector_id = %id, "Upserted vector");
        Ok(())
    }

    async fn delete_by_owner(&self, user_id: &str) -> Result<()> {
        check_owner(user_id)?;

        let request = DeleteRequest {
            filter: owner_filter(user_id),
            namespace: self.namespace.as_deref(),
        };

        let url = self
            .data_url("/vectors/delete")
            .await
            .map_err(|e| StoryError::StoreWriteFailed(e.to_string()))?;
        self.post_data(url, &request).await.map_err(|e| {
            StoryError::StoreWriteFailed(format!("Failed to delete vectors for {user_id}: {e}"))
        })?;

        Ok(())
    }

    async fn query(&self, vector: &[f32], top_k: Option<usize>) -> Result<Vec<QueryMatch>> {
        let top_k = check_query_args(vector, top_k, self.default_top_k)?;

        let request = QueryRequest {
            vector,
            top_k,
            include_metadata: true,
            include_values: false,
            namespace: self.namespace.as_deref(),
        };

        let url = self
            .data_url("/query")
            .await
            .map_err(|e| StoryError::StoreQueryFailed(e.to_string()))?;
        let response = self
            .post_data(url, &request)
            .await
            .map_err(|e| StoryError::StoreQueryFailed(format!("Vector query failed: {e}")))?;

        let result: QueryResponse = response
            .json()
            .await
            .map_err(|e| StoryError::StoreQueryFailed(format!("Failed to parse query response: {e}")))?;

        Ok(result.into_matches())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VectorStore;

    fn test_config() -> VectorStoreConfig {
        VectorStoreConfig {
            pinecone_api_key: Some("pc-key".to_string()),
            // Unroutable: any test that reaches the network fails loudly
            pinecone_controller_url: "http://127.0.0.1:9".to_string(),
            timeout_secs: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_requires_api_key() {
        let config = VectorStoreConfig::default();
        let err = PineconeStore::from_config(&config).err().unwrap();
        assert_eq!(
            err.to_string(),
            "Configuration error: Missing required configuration: PINECONE_API_KEY"
        );
    }

    #[test]
    fn test_create_index_body() {
        let request = CreateIndexRequest {
            name: "friendly-app",
            dimension: 1024,
            metric: METRIC,
            spec: IndexSpec {
                serverless: ServerlessSpec {
                    cloud: "gcp",
                    region: "us-central1",
                },
            },
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            serde_json::json!({
                "name": "friendly-app",
                "dimension": 1024,
                "metric": "cosine",
                "spec": {"serverless": {"cloud": "gcp", "region": "us-central1"}}
            })
        );
    }

    #[test]
    fn test_upsert_body_omits_absent_metadata() {
        let metadata = StoryMetadata::new("u1", "s1");
        let request = UpsertRequest {
            vectors: vec![UpsertVector {
                id: "user:u1",
                values: &[0.5, 0.25],
                metadata: &metadata,
            }],
            namespace: None,
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            serde_json::json!({
                "vectors": [{
                    "id": "user:u1",
                    "values": [0.5, 0.25],
                    "metadata": {"userId": "u1", "storyId": "s1"}
                }]
            })
        );
    }

    #[test]
    fn test_delete_body_filters_by_owner() {
        let request = DeleteRequest {
            filter: owner_filter("u1"),
            namespace: Some("stories"),
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            serde_json::json!({"filter": {"userId": {"$eq": "u1"}}, "namespace": "stories"})
        );
    }

    #[test]
    fn test_query_body_shape() {
        let request = QueryRequest {
            vector: &[1.0],
            top_k: 5,
            include_metadata: true,
            include_values: false,
            namespace: None,
        };
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body["topK"], 5);
        assert_eq!(body["includeMetadata"], true);
        assert!(body.get("namespace").is_none());
    }

    #[test]
    fn test_query_response_sorted_with_metadata() {
        let response: QueryResponse = serde_json::from_value(serde_json::json!({
            "matches": [
                {"id": "user:a", "score": 0.4, "metadata": {"userId": "a", "storyId": "sa"}},
                {"id": "user:b", "score": 0.9, "metadata": {"unexpected": true}}
            ],
            "namespace": ""
        }))
        .unwrap();

        let matches = response.into_matches();
        assert_eq!(matches[0].id, "user:b");
        assert!(matches[0].metadata.is_none());
        assert_eq!(matches[1].metadata, Some(StoryMetadata::new("a", "sa")));
    }

    #[test]
    fn test_data_plane_url() {
        assert_eq!(
            data_plane_url("friendly-app-abc.svc.gcp.pinecone.io"),
            "https://friendly-app-abc.svc.gcp.pinecone.io"
        );
        assert_eq!(data_plane_url("http://localhost:5080/"), "http://localhost:5080");
    }

    #[tokio::test]
    async fn test_invalid_query_never_contacts_remote() {
        let store = PineconeStore::from_config(&test_config()).unwrap();

        let err = store.query(&[0.1, 0.2], Some(0)).await.unwrap_err();
        assert!(matches!(err, StoryError::InvalidArgument(_)));

        let err = store.query(&[], None).await.unwrap_err();
        assert!(matches!(err, StoryError::InvalidArgument(_)));

        assert!(store.host.get().is_none());
    }

    #[tokio::test]
    async fn test_invalid_writes_never_contact_remote() {
        let store = PineconeStore::from_config(&test_config()).unwrap();
        let metadata = StoryMetadata::new("u1", "s1");

        assert!(matches!(
            store.upsert("", &[0.1], &metadata).await,
            Err(StoryError::InvalidArgument(_))
        ));
        assert!(matches!(
            store.delete_by_owner("").await,
            Err(StoryError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_store_maps_errors() {
        let store = PineconeStore::from_config(&test_config()).unwrap();
        let metadata = StoryMetadata::new("u1", "s1");

        assert!(matches!(
            store.ensure_index().await,
            Err(StoryError::IndexUnavailable(_))
        ));
        assert!(matches!(
            store.upsert("user:u1", &[0.1], &metadata).await,
            Err(StoryError::StoreWriteFailed(_))
        ));
        assert!(matches!(
            store.query(&[0.1], None).await,
            Err(StoryError::StoreQueryFailed(_))
        ));
    }
}
