//! Core domain types
//!
//! This module holds the entities shared by the use cases and ports:
//! - Documents and their processing lifecycle
//! - Retrieval types (chunks, answers, retrieval metadata)
//! - Conversations, tasks, and memory summaries for the agent

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Lifecycle status of an uploaded document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Uploaded,
    Processing,
    Ready,
    Failed,
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentStatus::Uploaded => write!(f, "uploaded"),
            DocumentStatus::Processing => write!(f, "processing"),
            DocumentStatus::Ready => write!(f, "ready"),
            DocumentStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for DocumentStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "uploaded" => Ok(DocumentStatus::Uploaded),
            "processing" => Ok(DocumentStatus::Processing),
            "ready" => Ok(DocumentStatus::Ready),
            "failed" => Ok(DocumentStatus::Failed),
            _ => Err(Error::Config(format!("unknown document status: {s}"))),
        }
    }
}

/// An uploaded document and its metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub filename: String,
    pub mime_type: String,
    pub storage_path: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub subcategory: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub summary: String,
    pub status: DocumentStatus,
    #[serde(default)]
    pub error_message: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Result of classifying extracted document text
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Classification {
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub subcategory: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub summary: String,
}

/// How the query use case generates retrieval candidates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetrievalMode {
    #[default]
    #[serde(rename = "semantic")]
    Semantic,
    #[serde(rename = "hybrid")]
    Hybrid,
    #[serde(rename = "hybrid+rerank")]
    HybridRerank,
}

impl RetrievalMode {
    /// Parse a configured mode string, falling back to semantic for
    /// anything unrecognised.
    pub fn parse_or_semantic(s: &str) -> RetrievalMode {
        match s.trim().to_lowercase().as_str() {
            "hybrid" => RetrievalMode::Hybrid,
            "hybrid+rerank" => RetrievalMode::HybridRerank,
            _ => RetrievalMode::Semantic,
        }
    }
}

impl fmt::Display for RetrievalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetrievalMode::Semantic => write!(f, "semantic"),
            RetrievalMode::Hybrid => write!(f, "hybrid"),
            RetrievalMode::HybridRerank => write!(f, "hybrid+rerank"),
        }
    }
}

/// Filter applied to vector-store searches
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub category: Option<String>,
}

/// A retrieved chunk of document text with its search score.
/// `chunk_index` is -1 when the backend payload did not carry one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub document_id: String,
    pub filename: String,
    pub category: String,
    pub chunk_index: i64,
    pub text: String,
    pub score: f64,
}

/// How an answer's sources were retrieved
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrievalMeta {
    pub mode: RetrievalMode,
    pub semantic_candidates: usize,
    pub lexical_candidates: usize,
    pub rerank_applied: bool,
}

/// A generated answer with its contributing chunks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<RetrievedChunk>,
    pub retrieval: RetrievalMeta,
}

/// Per-user conversation state with turn counters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub user_id: String,
    pub conversation_id: String,
    pub current_user_turn: i64,
    pub last_summary_end_turn: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A single persisted message within a conversation turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub id: String,
    pub user_id: String,
    pub conversation_id: String,
    pub role: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tool_name: String,
    pub user_turn: i64,
    pub created_at: DateTime<Utc>,
}

/// Task status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Open,
    Completed,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Open => write!(f, "open"),
            TaskStatus::Completed => write!(f, "completed"),
        }
    }
}

impl FromStr for TaskStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "open" => Ok(TaskStatus::Open),
            "completed" => Ok(TaskStatus::Completed),
            _ => Err(Error::invalid_input("task status", format!("unsupported task status: {s}"))),
        }
    }
}

/// A user-owned todo item with soft deletion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub user_id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub details: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// An append-only summary of a contiguous range of conversation turns
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemorySummary {
    pub id: String,
    pub user_id: String,
    pub conversation_id: String,
    pub turn_from: i64,
    pub turn_to: i64,
    pub summary: String,
    pub created_at: DateTime<Utc>,
}

/// A memory summary returned from the memory vector index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryHit {
    pub summary: MemorySummary,
    pub score: f64,
}

/// Bounds applied to a single agent run
#[derive(Debug, Clone)]
pub struct AgentLimits {
    pub max_iterations: usize,
    pub total_timeout: Duration,
    pub planner_timeout: Duration,
    pub tool_timeout: Duration,
    pub short_memory_messages: usize,
    pub summary_every_turns: i64,
    pub memory_top_k: usize,
    pub knowledge_top_k: usize,
}

impl Default for AgentLimits {
    fn default() -> Self {
        Self {
            max_iterations: 6,
            total_timeout: Duration::from_secs(90),
            planner_timeout: Duration::from_secs(20),
            tool_timeout: Duration::from_secs(30),
            short_memory_messages: 12,
            summary_every_turns: 6,
            memory_top_k: 4,
            knowledge_top_k: 5,
        }
    }
}

impl AgentLimits {
    /// Replace zero or out-of-range values with the defaults.
    pub fn normalize(mut self) -> Self {
        let def = AgentLimits::default();
        if self.max_iterations == 0 {
            self.max_iterations = def.max_iterations;
        }
        if self.total_timeout.is_zero() {
            self.total_timeout = def.total_timeout;
        }
        if self.planner_timeout.is_zero() {
            self.planner_timeout = def.planner_timeout;
        }
        if self.tool_timeout.is_zero() {
            self.tool_timeout = def.tool_timeout;
        }
        if self.short_memory_messages == 0 {
            self.short_memory_messages = def.short_memory_messages;
        }
        if self.summary_every_turns <= 0 {
            self.summary_every_turns = def.summary_every_turns;
        }
        if self.memory_top_k == 0 {
            self.memory_top_k = def.memory_top_k;
        }
        if self.knowledge_top_k == 0 {
            self.knowledge_top_k = def.knowledge_top_k;
        }
        self
    }
}

/// One message in an agent chat request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInputMessage {
    pub role: String,
    pub content: String,
}

/// Request for a single agent turn
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentChatRequest {
    pub user_id: String,
    #[serde(default)]
    pub conversation_id: String,
    #[serde(default)]
    pub session_end: bool,
    #[serde(default)]
    pub messages: Vec<AgentInputMessage>,
}

/// Record of one tool invocation during an agent run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentToolEvent {
    pub tool: String,
    pub status: String,
    pub output: String,
}

/// Outcome of a full agent turn
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentRunResult {
    pub conversation_id: String,
    pub answer: String,
    pub iterations: usize,
    pub memory_hits: usize,
    pub summary_created: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools_invoked: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub fallback_reason: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_events: Vec<AgentToolEvent>,
}

/// One step emitted by the planner in JSON mode
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentPlanStep {
    #[serde(rename = "type", default)]
    pub step_type: String,
    #[serde(default)]
    pub tool: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub answer: String,
    #[serde(default)]
    pub input: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_status_round_trip() {
        for status in [
            DocumentStatus::Uploaded,
            DocumentStatus::Processing,
            DocumentStatus::Ready,
            DocumentStatus::Failed,
        ] {
            let parsed: DocumentStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("bogus".parse::<DocumentStatus>().is_err());
    }

    #[test]
    fn test_retrieval_mode_parse_falls_back_to_semantic() {
        assert_eq!(RetrievalMode::parse_or_semantic("hybrid"), RetrievalMode::Hybrid);
        assert_eq!(
            RetrievalMode::parse_or_semantic("HYBRID+RERANK"),
            RetrievalMode::HybridRerank
        );
        assert_eq!(RetrievalMode::parse_or_semantic("bm42"), RetrievalMode::Semantic);
        assert_eq!(RetrievalMode::parse_or_semantic(""), RetrievalMode::Semantic);
    }

    #[test]
    fn test_agent_limits_normalize() {
        let limits = AgentLimits {
            max_iterations: 0,
            total_timeout: Duration::ZERO,
            planner_timeout: Duration::from_secs(5),
            tool_timeout: Duration::ZERO,
            short_memory_messages: 0,
            summary_every_turns: -3,
            memory_top_k: 0,
            knowledge_top_k: 2,
        }
        .normalize();

        assert_eq!(limits.max_iterations, 6);
        assert_eq!(limits.total_timeout, Duration::from_secs(90));
        assert_eq!(limits.planner_timeout, Duration::from_secs(5));
        assert_eq!(limits.tool_timeout, Duration::from_secs(30));
        assert_eq!(limits.summary_every_turns, 6);
        assert_eq!(limits.knowledge_top_k, 2);
    }

    #[test]
    fn test_plan_step_parses_with_missing_fields() {
        let step: AgentPlanStep = serde_json::from_str(r#"{"type":"final","answer":"done"}"#).unwrap();
        assert_eq!(step.step_type, "final");
        assert_eq!(step.answer, "done");
        assert!(step.tool.is_empty());
        assert!(step.input.is_empty());
    }
}
