//! Qdrant vector database integration
//!
//! This module wraps the Qdrant client and provides:
//! - The chunk index with named dense + sparse vectors (hybrid search)
//! - The conversation-memory index
//! - The deterministic sparse encoder for the lexical branch

mod memory;
mod sparse;

pub use memory::QdrantMemoryStore;
pub use sparse::{encode_sparse_document, encode_sparse_query, SparseVector};

use crate::domain::{Document, RetrievedChunk, SearchFilter};
use crate::error::{Error, Result};
use crate::ports::VectorStore;
use crate::resilience::{surface_temporary, ErrorClassification, Executor};
use qdrant_client::qdrant::{
    Condition, CreateCollectionBuilder, Distance, Filter, Modifier, NamedVectors, PointStruct,
    Query, QueryPointsBuilder, ScoredPoint, SparseVectorParamsBuilder, SparseVectorsConfigBuilder,
    UpsertPointsBuilder, Value as QdrantValue, Vector, VectorInput, VectorParamsBuilder,
    VectorsConfigBuilder,
};
use qdrant_client::Qdrant;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};
use uuid::Uuid;

const DENSE_VECTOR_NAME: &str = "dense";
const SPARSE_VECTOR_NAME: &str = "text";

/// Qdrant-backed chunk index
pub struct QdrantStore {
    client: Qdrant,
    collection: String,
    executor: Arc<Executor>,
    ensured_vector_size: Mutex<Option<usize>>,
}

impl QdrantStore {
    pub fn new(url: &str, collection: &str, executor: Arc<Executor>) -> Result<Self> {
        debug!("Connecting to Qdrant at {}", url);
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

    /// Create the collection on first use; later calls only check the
    /// cached flag. The vector size is pinned by the first batch.
    async fn ensure_collection(&self, vector_size: usize) -> Result<()> {
        {
            let ensured = self.ensured_vector_size.lock().expect("ensure lock poisoned");
            if *ensured == Some(vector_size) {
                return Ok(());
            }
        }

        let exists = self
            .executor
            .execute("qdrant.collection_exists", classify_qdrant_error, || async {
                self.client
                    .collection_exists(&self.collection)
                    .await
                    .map_err(|e| Error::Qdrant(e.to_string()))
            })
            .await
            .map_err(|e| surface_temporary("qdrant ensure collection", e, classify_qdrant_error))?;

        if !exists {
            info!(
                "Creating collection {} with dense size {} and sparse index",
                self.collection, vector_size
            );
            self.executor
                .execute("qdrant.create_collection", classify_qdrant_error, || {
                    let mut vectors_config = VectorsConfigBuilder::default();
                    vectors_config.add_named_vector_params(
                        DENSE_VECTOR_NAME,
                        VectorParamsBuilder::new(vector_size as u64, Distance::Cosine),
                    );
                    let mut sparse_config = SparseVectorsConfigBuilder::default();
                    sparse_config.add_named_vector_params(
                        SPARSE_VECTOR_NAME,
                        SparseVectorParamsBuilder::default().modifier(Modifier::Idf),
                    );
                    let request = CreateCollectionBuilder::new(&self.collection)
                        .vectors_config(vectors_config)
                        .sparse_vectors_config(sparse_config);
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
                    surface_temporary("qdrant create collection", e, classify_qdrant_error)
                })?;
        } else {
            debug!("Collection {} already exists", self.collection);
        }

        let mut ensured = self.ensured_vector_size.lock().expect("ensure lock poisoned");
        *ensured = Some(vector_size);
        Ok(())
    }

    async fn query_chunks(&self, build: impl Fn() -> QueryPointsBuilder) -> Result<Vec<RetrievedChunk>> {
        let response = self
            .executor
            .execute("qdrant.query_points", classify_qdrant_error, || {
                let request = build();
                async move {
                    self.client
                        .query(request)
                        .await
                        .map_err(|e| Error::Qdrant(e.to_string()))
                }
            })
            .await
            .map_err(|e| surface_temporary("qdrant query points", e, classify_qdrant_error))?;

        Ok(response
            .result
            .into_iter()
            .map(scored_point_to_chunk)
            .collect())
    }
}

#[async_trait::async_trait]
impl VectorStore for QdrantStore {
    async fn index_chunks(
        &self,
        doc: &Document,
        chunks: &[String],
        vectors: &[Vec<f32>],
    ) -> Result<()> {
        if chunks.is_empty() || vectors.is_empty() {
            return Ok(());
        }
        if chunks.len() != vectors.len() {
            return Err(Error::Other(format!(
                "chunks/vectors mismatch: {}/{}",
                chunks.len(),
                vectors.len()
            )));
        }

        self.ensure_collection(vectors[0].len()).await?;

        let points: Vec<PointStruct> = chunks
            .iter()
            .enumerate()
            .map(|(i, chunk)| {
                let sparse = encode_sparse_document(chunk, &doc.filename);
                let vector = NamedVectors::default()
                    .add_vector(DENSE_VECTOR_NAME, vectors[i].clone())
                    .add_vector(
                        SPARSE_VECTOR_NAME,
                        Vector::new_sparse(sparse.indices, sparse.values),
                    );

                let mut payload: HashMap<String, QdrantValue> = HashMap::new();
                payload.insert("doc_id".to_string(), doc.id.clone().into());
                payload.insert("filename".to_string(), doc.filename.clone().into());
                payload.insert("category".to_string(), doc.category.clone().into());
                payload.insert("subcategory".to_string(), doc.subcategory.clone().into());
                payload.insert("chunk_index".to_string(), (i as i64).into());
                payload.insert("text".to_string(), chunk.clone().into());

                PointStruct::new(Uuid::new_v4().to_string(), vector, payload)
            })
            .collect();

        debug!(
            "Upserting {} points to collection {}",
            points.len(),
            self.collection
        );

        self.executor
            .execute("qdrant.upsert_points", classify_qdrant_error, || {
                let request = UpsertPointsBuilder::new(&self.collection, points.clone()).wait(true);
                async move {
                    self.client
                        .upsert_points(request)
                        .await
                        .map(|_| ())
                        .map_err(|e| Error::Qdrant(e.to_string()))
                }
            })
            .await
            .map_err(|e| surface_temporary("qdrant upsert points", e, classify_qdrant_error))
    }

    async fn search(
        &self,
        query_vector: &[f32],
        limit: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<RetrievedChunk>> {
        let query_vector = query_vector.to_vec();
        let category = filter.category.clone();
        self.query_chunks(|| {
            let mut builder = QueryPointsBuilder::new(&self.collection)
                .query(Query::new_nearest(query_vector.clone()))
                .using(DENSE_VECTOR_NAME)
                .limit(limit as u64)
                .with_payload(true);
            if let Some(filter) = category_filter(category.as_deref()) {
                builder = builder.filter(filter);
            }
            builder
        })
        .await
    }

    async fn search_lexical(
        &self,
        query_text: &str,
        limit: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<RetrievedChunk>> {
        let sparse = encode_sparse_query(query_text);
        if sparse.is_empty() {
            return Ok(Vec::new());
        }

        let category = filter.category.clone();
        self.query_chunks(|| {
            let mut builder = QueryPointsBuilder::new(&self.collection)
                .query(Query::new_nearest(VectorInput::new_sparse(
                    sparse.indices.clone(),
                    sparse.values.clone(),
                )))
                .using(SPARSE_VECTOR_NAME)
                .limit(limit as u64)
                .with_payload(true);
            if let Some(filter) = category_filter(category.as_deref()) {
                builder = builder.filter(filter);
            }
            builder
        })
        .await
    }
}

fn category_filter(category: Option<&str>) -> Option<Filter> {
    match category {
        Some(value) if !value.is_empty() => Some(Filter::must([Condition::matches(
            "category",
            value.to_string(),
        )])),
        _ => None,
    }
}

fn scored_point_to_chunk(point: ScoredPoint) -> RetrievedChunk {
    RetrievedChunk {
        document_id: payload_str(&point.payload, "doc_id"),
        filename: payload_str(&point.payload, "filename"),
        category: payload_str(&point.payload, "category"),
        chunk_index: payload_i64(&point.payload, "chunk_index"),
        text: payload_str(&point.payload, "text"),
        score: f64::from(point.score),
    }
}

pub(crate) fn payload_str(payload: &HashMap<String, QdrantValue>, key: &str) -> String {
    use qdrant_client::qdrant::value::Kind;

    match payload.get(key).and_then(|v| v.kind.as_ref()) {
        Some(Kind::StringValue(s)) => s.clone(),
        Some(Kind::IntegerValue(i)) => i.to_string(),
        Some(Kind::DoubleValue(d)) => d.to_string(),
        Some(Kind::BoolValue(b)) => b.to_string(),
        _ => String::new(),
    }
}

pub(crate) fn payload_i64(payload: &HashMap<String, QdrantValue>, key: &str) -> i64 {
    use qdrant_client::qdrant::value::Kind;

    match payload.get(key).and_then(|v| v.kind.as_ref()) {
        Some(Kind::IntegerValue(i)) => *i,
        Some(Kind::DoubleValue(d)) => *d as i64,
        Some(Kind::StringValue(s)) => s.trim().parse().unwrap_or(-1),
        _ => -1,
    }
}

/// Qdrant speaks gRPC here, so transport failures dominate; anything but
/// an explicit cancellation retries and counts against the breaker.
pub(crate) fn classify_qdrant_error(err: &Error) -> ErrorClassification {
    match err {
        Error::Canceled => ErrorClassification {
            retryable: false,
            record_failure: false,
        },
        Error::CircuitOpen(_) | Error::Qdrant(_) => ErrorClassification {
            retryable: true,
            record_failure: true,
        },
        _ => ErrorClassification {
            retryable: false,
            record_failure: true,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qdrant_client::qdrant::value::Kind;

    fn payload_with(key: &str, value: QdrantValue) -> HashMap<String, QdrantValue> {
        let mut map = HashMap::new();
        map.insert(key.to_string(), value);
        map
    }

    #[test]
    fn test_payload_str_coerces_scalars() {
        let map = payload_with("doc_id", QdrantValue::from("doc-1".to_string()));
        assert_eq!(payload_str(&map, "doc_id"), "doc-1");
        assert_eq!(payload_str(&map, "missing"), "");

        let map = payload_with("n", QdrantValue::from(7_i64));
        assert_eq!(payload_str(&map, "n"), "7");
    }

    #[test]
    fn test_payload_i64_defaults_to_minus_one() {
        let map = payload_with("chunk_index", QdrantValue::from(3_i64));
        assert_eq!(payload_i64(&map, "chunk_index"), 3);
        assert_eq!(payload_i64(&map, "missing"), -1);

        let map = payload_with(
            "chunk_index",
            QdrantValue {
                kind: Some(Kind::StringValue("nope".to_string())),
            },
        );
        assert_eq!(payload_i64(&map, "chunk_index"), -1);
    }

    #[test]
    fn test_category_filter_only_for_non_empty() {
        assert!(category_filter(None).is_none());
        assert!(category_filter(Some("")).is_none());
        assert!(category_filter(Some("finance")).is_some());
    }

    #[test]
    fn test_classify_qdrant_error() {
        let class = classify_qdrant_error(&Error::Qdrant("connect refused".to_string()));
        assert!(class.retryable);
        assert!(class.record_failure);

        let class = classify_qdrant_error(&Error::Canceled);
        assert!(!class.retryable);
        assert!(!class.record_failure);
    }
}
