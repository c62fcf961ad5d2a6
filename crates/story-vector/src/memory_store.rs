//! In-memory vector store
//!
//! Brute-force cosine search over a map of records. Used for tests and
//! local development; nothing outlives the process.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use story_core::{IndexHandle, QueryMatch, Result, StoryError, StoryMetadata, VectorRecord};

use crate::{check_owner, check_query_args, check_upsert_args};

/// In-memory vector store for development and testing.
pub struct MemoryStore {
    name: String,
    dimension: usize,
    default_top_k: usize,
    records: RwLock<HashMap<String, VectorRecord>>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    #[must_use]
    pub fn new(name: impl Into<String>, dimension: usize) -> Self {
        Self {
            name: name.into(),
            dimension,
            default_top_k: 5,
            records: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn with_default_top_k(mut self, top_k: usize) -> Self {
        self.default_top_k = top_k;
        self
    }

    /// Stored record for `id`, if any
    pub fn get(&self, id: &str) -> Option<VectorRecord> {
        self.records
            .read()
            .ok()
            .and_then(|records| records.get(id).cloned())
    }

    /// Ids of every record owned by `user_id`, sorted
    pub fn ids_for_owner(&self, user_id: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .records
            .read()
            .map(|records| {
                records
                    .values()
                    .filter(|r| r.metadata.user_id == user_id)
                    .map(|r| r.id.clone())
                    .collect()
            })
            .unwrap_or_default();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new("memory", 1024)
    }
}

fn poisoned() -> StoryError {
    StoryError::StoreWriteFailed("memory store lock poisoned".to_string())
}

#[async_trait]
impl super::VectorStore for MemoryStore {
    async fn ensure_index(&self) -> Result<IndexHandle> {
        Ok(IndexHandle {
            name: self.name.clone(),
            dimension: self.dimension,
            metric: "cosine".to_string(),
            host: None,
            created: false,
        })
    }

    async fn upsert(&self, id: &str, vector: &[f32], metadata: &StoryMetadata) -> Result<()> {
        check_upsert_args(id, vector)?;

        let mut records = self.records.write().map_err(|_| poisoned())?;
        records.insert(
            id.to_string(),
            VectorRecord {
                id: id.to_string(),
                values: vector.to_vec(),
                metadata: metadata.clone(),
            },
        );
        Ok(())
    }

    async fn delete_by_owner(&self, user_id: &str) -> Result<()> {
        check_owner(user_id)?;

        let mut records = self.records.write().map_err(|_| poisoned())?;
        records.retain(|_, r| r.metadata.user_id != user_id);
        Ok(())
    }

    async fn query(&self, vector: &[f32], top_k: Option<usize>) -> Result<Vec<QueryMatch>> {
        let top_k = check_query_args(vector, top_k, self.default_top_k)?;

        let records = self
            .records
            .read()
            .map_err(|_| StoryError::StoreQueryFailed("memory store lock poisoned".to_string()))?;

        let mut matches: Vec<QueryMatch> = records
            .values()
            .filter(|r| r.values.len() == vector.len())
            .map(|r| QueryMatch {
                id: r.id.clone(),
                score: cosine_similarity(vector, &r.values),
                metadata: Some(r.metadata.clone()),
            })
            .collect();

        matches.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        matches.truncate(top_k);
        Ok(matches)
    }
}

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1, 1] where 1 means identical direction.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VectorStore;

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&a, &[0.0, 1.0, 0.0]).abs() < 1e-6);
        assert!((cosine_similarity(&a, &[-1.0, 0.0, 0.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&a, &[0.0, 0.0, 0.0]), 0.0);
    }

    #[tokio::test]
    async fn test_upsert_replaces_same_id() {
        let store = MemoryStore::new("test", 2);
        let metadata = StoryMetadata::new("u1", "s1");

        store.upsert("user:u1", &[1.0, 0.0], &metadata).await.unwrap();
        store.upsert("user:u1", &[0.0, 1.0], &metadata).await.unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.get("user:u1").unwrap().values, vec![0.0, 1.0]);
    }

    #[tokio::test]
    async fn test_delete_by_owner_ignores_ids() {
        let store = MemoryStore::new("test", 2);
        let mine = StoryMetadata::new("u1", "s1");
        let theirs = StoryMetadata::new("u2", "s2");

        store.upsert("user:u1", &[1.0, 0.0], &mine).await.unwrap();
        store.upsert("user:u1:chunk:4", &[1.0, 0.0], &mine).await.unwrap();
        store.upsert("legacy-id", &[1.0, 0.0], &mine).await.unwrap();
        store.upsert("user:u2", &[0.0, 1.0], &theirs).await.unwrap();

        store.delete_by_owner("u1").await.unwrap();

        assert!(store.ids_for_owner("u1").is_empty());
        assert_eq!(store.ids_for_owner("u2"), vec!["user:u2".to_string()]);
    }

    #[tokio::test]
    async fn test_query_sorted_and_truncated() {
        let store = MemoryStore::new("test", 3);

        store
            .upsert("far", &[0.0, 1.0, 0.0], &StoryMetadata::new("a", "sa"))
            .await
            .unwrap();
        store
            .upsert("close", &[1.0, 0.0, 0.0], &StoryMetadata::new("b", "sb"))
            .await
            .unwrap();
        store
            .upsert("medium", &[0.5, 0.5, 0.0], &StoryMetadata::new("c", "sc"))
            .await
            .unwrap();

        let results = store.query(&[1.0, 0.0, 0.0], Some(2)).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "close");
        assert_eq!(results[1].id, "medium");
        assert_eq!(
            results[0].metadata.as_ref().map(|m| m.user_id.as_str()),
            Some("b")
        );
    }

    #[tokio::test]
    async fn test_query_rejects_zero_top_k() {
        let store = MemoryStore::new("test", 2);
        assert!(matches!(
            store.query(&[1.0, 0.0], Some(0)).await,
            Err(StoryError::InvalidArgument(_))
        ));
    }
}
