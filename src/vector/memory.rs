//! Conversation-memory vector index
//!
//! Memory summaries live in their own collection with a single dense
//! vector. The summary id doubles as the point id, so re-indexing the
//! same summary is idempotent.

use super::{classify_qdrant_error, payload_i64, payload_str};
use crate::domain::{MemoryHit, MemorySummary};
use crate::error::{Error, Result};
use crate::ports::MemoryVectorStore;
use crate::resilience::{surface_temporary, Executor};
use qdrant_client::qdrant::{
    Condition, CreateCollectionBuilder, Distance, Filter, PointStruct, Query, QueryPointsBuilder,
    UpsertPointsBuilder, Value as QdrantValue, VectorParamsBuilder,
};
use qdrant_client::Qdrant;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Qdrant-backed memory summary index
pub struct QdrantMemoryStore {
    client: Qdrant,
    collection: String,
    executor: Arc<Executor>,
    ensured_vector_size: Mutex<Option<usize>>,
}

impl QdrantMemoryStore {
    pub fn new(url: &str, collection: &str, executor: Arc<Executor>) -> Result<Self> {
        let client = Qdrant::from_url(url)
            .skip_compatibility_check()
            .build()
            .map_err(|e| Error::Qdrant(e.to_string()))?;

        Ok(Self {
            client,
            collection: collection.to_string(),
            executor,
            ensured_vector_size: Mutex::new(None),
        })
    }

    async fn ensure_collection(&self, vector_size: usize) -> Result<()> {
        {
            let ensured = self.ensured_vector_size.lock().expect("ensure lock poisoned");
            if *ensured == Some(vector_size) {
                return Ok(());
            }
        }

        let exists = self
            .executor
            .execute("qdrant.memory.collection_exists", classify_qdrant_error, || async {
                self.client
                    .collection_exists(&self.collection)
                    .await
                    .map_err(|e| Error::Qdrant(e.to_string()))
            })
            .await
            .map_err(|e| {
                surface_temporary("qdrant memory ensure collection", e, classify_qdrant_error)
            })?;

        if !exists {
            info!(
                "Creating memory collection {} with dense size {}",
                self.collection, vector_size
            );
            self.executor
                .execute("qdrant.memory.create_collection", classify_qdrant_error, || {
                    let request = CreateCollectionBuilder::new(&self.collection).vectors_config(
                        VectorParamsBuilder::new(vector_size as u64, Distance::Cosine),
                    );
                    async move {
                        self.client
                            .create_collection(request)
                            .await
                            .map(|_| ())
                            .map_err(|e| Error::Qdrant(e.to_string()))
                    }
                })
                .await
                .map_err(|e| {
                    surface_temporary("qdrant memory create collection", e, classify_qdrant_error)
                })?;
        } else {
            debug!("Memory collection {} already exists", self.collection);
        }

        let mut ensured = self.ensured_vector_size.lock().expect("ensure lock poisoned");
        *ensured = Some(vector_size);
        Ok(())
    }
}

#[async_trait::async_trait]
impl MemoryVectorStore for QdrantMemoryStore {
    async fn index_summary(&self, summary: &MemorySummary, vector: &[f32]) -> Result<()> {
        if vector.is_empty() {
            return Ok(());
        }

        self.ensure_collection(vector.len()).await?;

        let mut payload: HashMap<String, QdrantValue> = HashMap::new();
        payload.insert("user_id".to_string(), summary.user_id.clone().into());
        payload.insert(
            "conversation_id".to_string(),
            summary.conversation_id.clone().into(),
        );
        payload.insert("summary_id".to_string(), summary.id.clone().into());
        payload.insert("turn_from".to_string(), summary.turn_from.into());
        payload.insert("turn_to".to_string(), summary.turn_to.into());
        payload.insert("text".to_string(), summary.summary.clone().into());
        payload.insert(
            "created_at".to_string(),
            summary.created_at.to_rfc3339().into(),
        );

        let point = PointStruct::new(summary.id.clone(), vector.to_vec(), payload);

        self.executor
            .execute("qdrant.memory.upsert_points", classify_qdrant_error, || {
                let request =
                    UpsertPointsBuilder::new(&self.collection, vec![point.clone()]).wait(true);
                async move {
                    self.client
                        .upsert_points(request)
                        .await
                        .map(|_| ())
                        .map_err(|e| Error::Qdrant(e.to_string()))
                }
            })
            .await
            .map_err(|e| surface_temporary("qdrant memory upsert", e, classify_qdrant_error))
    }

    async fn search_summaries(
        &self,
        user_id: &str,
        conversation_id: &str,
        query_vector: &[f32],
        limit: usize,
    ) -> Result<Vec<MemoryHit>> {
        if query_vector.is_empty() || user_id.trim().is_empty() {
            return Ok(Vec::new());
        }
        let limit = if limit == 0 { 4 } else { limit };

        let query_vector = query_vector.to_vec();
        let response = self
            .executor
            .execute("qdrant.memory.query_points", classify_qdrant_error, || {
                let request = QueryPointsBuilder::new(&self.collection)
                    .query(Query::new_nearest(query_vector.clone()))
                    .limit(limit as u64)
                    .with_payload(true)
                    .filter(memory_filter(user_id, conversation_id));
                async move {
                    self.client
                        .query(request)
                        .await
                        .map_err(|e| Error::Qdrant(e.to_string()))
                }
            })
            .await
            .map_err(|e| surface_temporary("qdrant memory query", e, classify_qdrant_error))?;

        Ok(response
            .result
            .into_iter()
            .map(|point| MemoryHit {
                score: f64::from(point.score),
                summary: MemorySummary {
                    id: payload_str(&point.payload, "summary_id"),
                    user_id: payload_str(&point.payload, "user_id"),
                    conversation_id: payload_str(&point.payload, "conversation_id"),
                    turn_from: payload_i64(&point.payload, "turn_from"),
                    turn_to: payload_i64(&point.payload, "turn_to"),
                    summary: payload_str(&point.payload, "text"),
                    created_at: payload_str(&point.payload, "created_at")
                        .parse()
                        .unwrap_or_else(|_| chrono::Utc::now()),
                },
            })
            .collect())
    }
}

fn memory_filter(user_id: &str, conversation_id: &str) -> Filter {
    let mut conditions = vec![Condition::matches("user_id", user_id.to_string())];
    if !conversation_id.trim().is_empty() {
        conditions.push(Condition::matches(
            "conversation_id",
            conversation_id.to_string(),
        ));
    }
    Filter::must(conditions)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_filter_scopes_by_user() {
        let filter = memory_filter("user-1", "");
        assert_eq!(filter.must.len(), 1);
    }

    #[test]
    fn test_memory_filter_adds_conversation_when_present() {
        let filter = memory_filter("user-1", "conv-1");
        assert_eq!(filter.must.len(), 2);
    }
}
