//! Component wiring
//!
//! Builds the adapter graph from configuration and hands the use cases to
//! the CLI entry points. Every adapter shares one resilience executor so
//! circuit-breaker state is per operation, not per component.

use crate::chunk::Splitter;
use crate::config::Config;
use crate::error::Result;
use crate::extract::PlaintextExtractor;
use crate::llm::{OllamaClassifier, OllamaClient, OllamaEmbedder, OllamaGenerator};
use crate::ports::{
    AnswerGenerator, Chunker, ConversationStore, DocumentClassifier, DocumentRepository, Embedder,
    MemoryStore, MemoryVectorStore, MessageQueue, ObjectStorage, QueryService, TaskStore,
    TextExtractor, VectorStore,
};
use crate::queue::NatsQueue;
use crate::repo::{
    self, PostgresConversationStore, PostgresDocumentRepository, PostgresMemoryStore,
    PostgresTaskStore,
};
use crate::resilience::Executor;
use crate::storage::LocalStorage;
use crate::usecase::{
    AgentChatUseCase, IngestDocumentUseCase, ProcessDocumentUseCase, QueryOptions, QueryUseCase,
};
use crate::vector::{QdrantMemoryStore, QdrantStore};
use crate::domain::RetrievalMode;
use std::sync::Arc;

pub struct App {
    pub config: Config,
    pub queue: Arc<NatsQueue>,
    pub ingest: Arc<IngestDocumentUseCase>,
    pub process: Arc<ProcessDocumentUseCase>,
    pub query: Arc<QueryUseCase>,
    pub agent: Arc<AgentChatUseCase>,
}

pub async fn build(config: Config) -> Result<App> {
    let pool = repo::connect(&config.postgres_dsn).await?;
    repo::ensure_schema(&pool).await?;

    let executor = Arc::new(Executor::new(config.resilience.clone()));

    let documents: Arc<dyn DocumentRepository> =
        Arc::new(PostgresDocumentRepository::new(pool.clone()));
    let conversations: Arc<dyn ConversationStore> =
        Arc::new(PostgresConversationStore::new(pool.clone()));
    let tasks: Arc<dyn TaskStore> = Arc::new(PostgresTaskStore::new(pool.clone()));
    let memories: Arc<dyn MemoryStore> = Arc::new(PostgresMemoryStore::new(pool.clone()));

    let storage: Arc<dyn ObjectStorage> = Arc::new(LocalStorage::new(&config.storage_path).await?);

    let queue = Arc::new(
        NatsQueue::connect(&config.nats_url, &config.nats_subject, executor.clone()).await?,
    );

    let ollama = Arc::new(OllamaClient::new(
        &config.ollama_url,
        &config.ollama_gen_model,
        &config.ollama_embed_model,
        executor.clone(),
    )?);
    let embedder: Arc<dyn Embedder> = Arc::new(OllamaEmbedder::new(ollama.clone()));
    let classifier: Arc<dyn DocumentClassifier> = Arc::new(OllamaClassifier::new(ollama.clone()));
    let generator: Arc<dyn AnswerGenerator> = Arc::new(OllamaGenerator::new(ollama.clone()));

    let vector_db: Arc<dyn VectorStore> = Arc::new(QdrantStore::new(
        &config.qdrant_url,
        &config.qdrant_collection,
        executor.clone(),
    )?);
    let memory_vector: Arc<dyn MemoryVectorStore> = Arc::new(QdrantMemoryStore::new(
        &config.qdrant_url,
        &config.qdrant_memory_collection,
        executor.clone(),
    )?);

    let extractor: Arc<dyn TextExtractor> = Arc::new(PlaintextExtractor::new(storage.clone()));
    let chunker: Arc<dyn Chunker> = Arc::new(Splitter::new(
        config.rag.chunk_size,
        config.rag.chunk_overlap,
    ));

    let ingest = Arc::new(IngestDocumentUseCase::new(
        documents.clone(),
        storage.clone(),
        queue.clone() as Arc<dyn MessageQueue>,
    ));

    let process = Arc::new(ProcessDocumentUseCase::new(
        documents.clone(),
        extractor,
        classifier,
        chunker,
        embedder.clone(),
        vector_db.clone(),
    ));

    let query = Arc::new(QueryUseCase::new(
        embedder.clone(),
        vector_db,
        generator,
        QueryOptions {
            retrieval_mode: RetrievalMode::parse_or_semantic(&config.rag.retrieval_mode),
            hybrid_candidates: config.rag.hybrid_candidates,
            fusion_rrf_k: config.rag.fusion_rrf_k,
            rerank_top_n: config.rag.rerank_top_n,
        },
    ));

    let agent = Arc::new(AgentChatUseCase::new(
        query.clone() as Arc<dyn QueryService>,
        embedder,
        conversations,
        tasks,
        memories,
        memory_vector,
        config.agent.limits(),
    ));

    Ok(App {
        config,
        queue,
        ingest,
        process,
        query,
        agent,
    })
}
