//! Memory summary store

use crate::domain::MemorySummary;
use crate::error::Result;
use crate::ports::MemoryStore;
use sqlx::postgres::PgPool;
use sqlx::Row;

pub struct PostgresMemoryStore {
    pool: PgPool,
}

impl PostgresMemoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl MemoryStore for PostgresMemoryStore {
    async fn create_summary(&self, summary: &MemorySummary) -> Result<()> {
        sqlx::query(
            r#"
INSERT INTO memory_summaries (id, user_id, conversation_id, turn_from, turn_to, summary, created_at)
VALUES ($1,$2,$3,$4,$5,$6,$7)
"#,
        )
        .bind(&summary.id)
        .bind(&summary.user_id)
        .bind(&summary.conversation_id)
        .bind(summary.turn_from)
        .bind(summary.turn_to)
        .bind(&summary.summary)
        .bind(summary.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_last_summary_end_turn(
        &self,
        user_id: &str,
        conversation_id: &str,
    ) -> Result<i64> {
        let row = sqlx::query(
            r#"
SELECT COALESCE(MAX(turn_to), 0) AS last_turn
FROM memory_summaries
WHERE user_id = $1 AND conversation_id = $2
"#,
        )
        .bind(user_id)
        .bind(conversation_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("last_turn")?)
    }
}
