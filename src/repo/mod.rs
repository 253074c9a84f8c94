//! Postgres persistence
//!
//! One shared pool backs four repositories:
//! - Documents (ingestion metadata and processing status)
//! - Conversations and messages
//! - Tasks
//! - Memory summaries

mod conversations;
mod documents;
mod memories;
mod tasks;

pub use conversations::PostgresConversationStore;
pub use documents::PostgresDocumentRepository;
pub use memories::PostgresMemoryStore;
pub use tasks::PostgresTaskStore;

use crate::error::Result;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

/// Advisory lock key serialising schema bootstrap across api/worker
/// startups.
const SCHEMA_LOCK_KEY: i64 = 2026021001;

const SCHEMA_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    id TEXT PRIMARY KEY,
    filename TEXT NOT NULL,
    mime_type TEXT NOT NULL,
    storage_path TEXT NOT NULL,
    category TEXT NOT NULL DEFAULT '',
    subcategory TEXT NOT NULL DEFAULT '',
    tags JSONB NOT NULL DEFAULT '[]'::jsonb,
    confidence DOUBLE PRECISION NOT NULL DEFAULT 0,
    summary TEXT NOT NULL DEFAULT '',
    status TEXT NOT NULL,
    error_message TEXT NOT NULL DEFAULT '',
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_documents_status ON documents(status);
CREATE INDEX IF NOT EXISTS idx_documents_created_at ON documents(created_at DESC);

CREATE TABLE IF NOT EXISTS conversations (
    user_id TEXT NOT NULL,
    conversation_id TEXT NOT NULL,
    current_user_turn BIGINT NOT NULL DEFAULT 0,
    last_summary_end_turn BIGINT NOT NULL DEFAULT 0,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL,
    PRIMARY KEY (user_id, conversation_id)
);

CREATE TABLE IF NOT EXISTS conversation_messages (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    conversation_id TEXT NOT NULL,
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    tool_name TEXT,
    user_turn BIGINT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_conversation_messages_turn
    ON conversation_messages(user_id, conversation_id, user_turn, created_at);

CREATE TABLE IF NOT EXISTS tasks (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    title TEXT NOT NULL,
    details TEXT NOT NULL DEFAULT '',
    status TEXT NOT NULL,
    due_at TIMESTAMPTZ,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL,
    deleted_at TIMESTAMPTZ
);

CREATE INDEX IF NOT EXISTS idx_tasks_user ON tasks(user_id, updated_at DESC);

CREATE TABLE IF NOT EXISTS memory_summaries (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    conversation_id TEXT NOT NULL,
    turn_from BIGINT NOT NULL,
    turn_to BIGINT NOT NULL,
    summary TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_memory_summaries_conversation
    ON memory_summaries(user_id, conversation_id, turn_to DESC);
"#;

/// Open the shared connection pool.
pub async fn connect(dsn: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new().max_connections(10).connect(dsn).await?;
    Ok(pool)
}

/// Create all tables and indexes, serialised under an advisory lock so
/// concurrent api/worker startups do not race the DDL.
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(SCHEMA_LOCK_KEY)
        .execute(&mut *tx)
        .await?;
    sqlx::raw_sql(SCHEMA_DDL).execute(&mut *tx).await?;
    tx.commit().await?;
    info!("database schema ensured");
    Ok(())
}
