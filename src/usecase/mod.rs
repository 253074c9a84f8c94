//! Core use cases
//!
//! - Ingest: accept an upload and hand it to the async pipeline
//! - Process: extract, classify, chunk, embed, and index one document
//! - Query: retrieve chunks (semantic or hybrid) and generate an answer
//! - Agent: bounded planner/executor loop with memory and tools

mod agent;
mod fusion;
mod ingest;
mod process;
mod query;
mod rerank;

pub use agent::AgentChatUseCase;
pub use ingest::IngestDocumentUseCase;
pub use process::ProcessDocumentUseCase;
pub use query::{QueryOptions, QueryUseCase};
