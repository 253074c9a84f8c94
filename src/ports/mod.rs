//! Ports consumed by the core use cases
//!
//! Every external collaborator (stores, embedder, generator, queue) is a
//! trait here; adapters implement them around real backends and tests
//! substitute mocks.

use crate::domain::{
    Answer, Classification, Conversation, ConversationMessage, Document, DocumentStatus,
    MemoryHit, MemorySummary, RetrievedChunk, SearchFilter, Task,
};
use crate::error::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio::sync::Notify;

/// Readable byte stream returned from object storage
pub type ByteStream = Box<dyn AsyncRead + Send + Unpin>;

/// Handler invoked for each ingestion-queue delivery
pub type IngestHandler = Arc<dyn Fn(String) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Persists and reads document state.
#[async_trait]
pub trait DocumentRepository: Send + Sync {
    async fn create(&self, doc: &Document) -> Result<()>;
    async fn get_by_id(&self, id: &str) -> Result<Document>;
    async fn update_status(
        &self,
        id: &str,
        status: DocumentStatus,
        error_message: &str,
    ) -> Result<()>;
    async fn save_classification(&self, id: &str, classification: &Classification) -> Result<()>;
}

/// Stores source documents.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn save(&self, key: &str, data: &mut (dyn AsyncRead + Send + Unpin)) -> Result<()>;
    async fn open(&self, key: &str) -> Result<ByteStream>;
}

/// Publishes and consumes ingestion events.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    async fn publish_document_ingested(&self, document_id: &str) -> Result<()>;

    /// Deliver document ids to the handler until `shutdown` is notified or
    /// the subscription closes. A delivery in flight when the signal
    /// arrives runs to completion; the subscription is then drained before
    /// returning. Delivery is at-least-once; handlers must tolerate
    /// duplicates.
    async fn subscribe_document_ingested(
        &self,
        handler: IngestHandler,
        shutdown: Arc<Notify>,
    ) -> Result<()>;
}

/// Extracts plain text from a stored document.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, doc: &Document) -> Result<String>;
}

/// Classifies extracted text.
#[async_trait]
pub trait DocumentClassifier: Send + Sync {
    async fn classify(&self, text: &str) -> Result<Classification>;
}

/// Builds vectors for chunks and query text.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;
}

/// Splits text into retrieval chunks.
pub trait Chunker: Send + Sync {
    fn split(&self, text: &str) -> Vec<String>;
}

/// Indexes chunks and performs semantic and lexical search.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn index_chunks(
        &self,
        doc: &Document,
        chunks: &[String],
        vectors: &[Vec<f32>],
    ) -> Result<()>;
    async fn search(
        &self,
        query_vector: &[f32],
        limit: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<RetrievedChunk>>;
    async fn search_lexical(
        &self,
        query_text: &str,
        limit: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<RetrievedChunk>>;
}

/// Creates the final user-facing answer.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    async fn generate_answer(&self, question: &str, chunks: &[RetrievedChunk]) -> Result<String>;
    async fn generate_from_prompt(&self, prompt: &str) -> Result<String>;
    async fn generate_json_from_prompt(&self, prompt: &str) -> Result<String>;
}

/// Inbound retrieval service the agent builds on.
#[async_trait]
pub trait QueryService: Send + Sync {
    async fn answer(&self, question: &str, limit: i64, filter: &SearchFilter) -> Result<Answer>;
    async fn generate_from_prompt(&self, prompt: &str) -> Result<String>;
    async fn generate_json_from_prompt(&self, prompt: &str) -> Result<String>;
}

/// Persists conversation state and messages.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn ensure_conversation(
        &self,
        user_id: &str,
        conversation_id: &str,
    ) -> Result<Conversation>;

    /// Atomically advance the turn counter, returning the new value.
    async fn next_user_turn(&self, user_id: &str, conversation_id: &str) -> Result<i64>;

    async fn append_message(&self, message: &ConversationMessage) -> Result<()>;

    /// Most recent messages, newest first; callers reverse for chronology.
    async fn list_recent_messages(
        &self,
        user_id: &str,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationMessage>>;

    /// Messages in an inclusive turn range, ordered by (user_turn, created_at).
    async fn list_messages_by_turn_range(
        &self,
        user_id: &str,
        conversation_id: &str,
        turn_from: i64,
        turn_to: i64,
    ) -> Result<Vec<ConversationMessage>>;

    /// Monotonic max update of the last summarised turn.
    async fn update_last_summary_end_turn(
        &self,
        user_id: &str,
        conversation_id: &str,
        turn: i64,
    ) -> Result<()>;
}

/// Persists and retrieves user tasks.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create_task(&self, task: &Task) -> Result<()>;
    async fn list_tasks(&self, user_id: &str, include_deleted: bool) -> Result<Vec<Task>>;
    async fn get_task_by_id(&self, user_id: &str, task_id: &str) -> Result<Task>;
    async fn update_task(&self, task: &Task) -> Result<()>;
    async fn soft_delete_task(&self, user_id: &str, task_id: &str) -> Result<()>;
}

/// Persists memory summaries.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn create_summary(&self, summary: &MemorySummary) -> Result<()>;

    /// 0 when the conversation has never been summarised.
    async fn get_last_summary_end_turn(
        &self,
        user_id: &str,
        conversation_id: &str,
    ) -> Result<i64>;
}

/// Indexes and searches memory summaries semantically.
#[async_trait]
pub trait MemoryVectorStore: Send + Sync {
    async fn index_summary(&self, summary: &MemorySummary, vector: &[f32]) -> Result<()>;
    async fn search_summaries(
        &self,
        user_id: &str,
        conversation_id: &str,
        query_vector: &[f32],
        limit: usize,
    ) -> Result<Vec<MemoryHit>>;
}
