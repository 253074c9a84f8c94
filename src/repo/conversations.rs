//! Conversation store
//!
//! Turn advancement is a single `UPDATE ... RETURNING`, so concurrent
//! turns on the same conversation always observe strictly increasing
//! numbers.

use crate::domain::{Conversation, ConversationMessage};
use crate::error::{Error, Result};
use crate::ports::ConversationStore;
use chrono::Utc;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;

pub struct PostgresConversationStore {
    pool: PgPool,
}

impl PostgresConversationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn advance_turn(&self, user_id: &str, conversation_id: &str) -> Result<Option<i64>> {
        let row = sqlx::query(
            r#"
UPDATE conversations
SET current_user_turn = current_user_turn + 1, updated_at = $3
WHERE user_id = $1 AND conversation_id = $2
RETURNING current_user_turn
"#,
        )
        .bind(user_id)
        .bind(conversation_id)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(row.try_get("current_user_turn")?)),
            None => Ok(None),
        }
    }
}

fn row_to_message(row: &PgRow) -> Result<ConversationMessage> {
    Ok(ConversationMessage {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        conversation_id: row.try_get("conversation_id")?,
        role: row.try_get("role")?,
        content: row.try_get("content")?,
        tool_name: row
            .try_get::<Option<String>, _>("tool_name")?
            .unwrap_or_default(),
        user_turn: row.try_get("user_turn")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait::async_trait]
impl ConversationStore for PostgresConversationStore {
    async fn ensure_conversation(
        &self,
        user_id: &str,
        conversation_id: &str,
    ) -> Result<Conversation> {
        let now = Utc::now();
        sqlx::query(
            r#"
INSERT INTO conversations (user_id, conversation_id, current_user_turn, last_summary_end_turn, created_at, updated_at)
VALUES ($1, $2, 0, 0, $3, $3)
ON CONFLICT (user_id, conversation_id) DO NOTHING
"#,
        )
        .bind(user_id)
        .bind(conversation_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query(
            r#"
SELECT user_id, conversation_id, current_user_turn, last_summary_end_turn, created_at, updated_at
FROM conversations
WHERE user_id = $1 AND conversation_id = $2
"#,
        )
        .bind(user_id)
        .bind(conversation_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(Conversation {
            user_id: row.try_get("user_id")?,
            conversation_id: row.try_get("conversation_id")?,
            current_user_turn: row.try_get("current_user_turn")?,
            last_summary_end_turn: row.try_get("last_summary_end_turn")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    async fn next_user_turn(&self, user_id: &str, conversation_id: &str) -> Result<i64> {
        if let Some(turn) = self.advance_turn(user_id, conversation_id).await? {
            return Ok(turn);
        }
        // Conversation row missing: create it and advance once more.
        self.ensure_conversation(user_id, conversation_id).await?;
        self.advance_turn(user_id, conversation_id)
            .await?
            .ok_or_else(|| {
                Error::Other(format!(
                    "next user turn: conversation missing after ensure: {user_id}/{conversation_id}"
                ))
            })
    }

    async fn append_message(&self, message: &ConversationMessage) -> Result<()> {
        let tool_name = if message.tool_name.is_empty() {
            None
        } else {
            Some(message.tool_name.as_str())
        };
        sqlx::query(
            r#"
INSERT INTO conversation_messages (id, user_id, conversation_id, role, content, tool_name, user_turn, created_at)
VALUES ($1,$2,$3,$4,$5,$6,$7,$8)
"#,
        )
        .bind(&message.id)
        .bind(&message.user_id)
        .bind(&message.conversation_id)
        .bind(&message.role)
        .bind(&message.content)
        .bind(tool_name)
        .bind(message.user_turn)
        .bind(message.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_recent_messages(
        &self,
        user_id: &str,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationMessage>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            r#"
SELECT id, user_id, conversation_id, role, content, tool_name, user_turn, created_at
FROM conversation_messages
WHERE user_id = $1 AND conversation_id = $2
ORDER BY created_at DESC
LIMIT $3
"#,
        )
        .bind(user_id)
        .bind(conversation_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_message).collect()
    }

    async fn list_messages_by_turn_range(
        &self,
        user_id: &str,
        conversation_id: &str,
        turn_from: i64,
        turn_to: i64,
    ) -> Result<Vec<ConversationMessage>> {
        let rows = sqlx::query(
            r#"
SELECT id, user_id, conversation_id, role, content, tool_name, user_turn, created_at
FROM conversation_messages
WHERE user_id = $1 AND conversation_id = $2 AND user_turn >= $3 AND user_turn <= $4
ORDER BY user_turn ASC, created_at ASC
"#,
        )
        .bind(user_id)
        .bind(conversation_id)
        .bind(turn_from)
        .bind(turn_to)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_message).collect()
    }

    async fn update_last_summary_end_turn(
        &self,
        user_id: &str,
        conversation_id: &str,
        turn: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
UPDATE conversations
SET last_summary_end_turn = GREATEST(last_summary_end_turn, $3), updated_at = $4
WHERE user_id = $1 AND conversation_id = $2
"#,
        )
        .bind(user_id)
        .bind(conversation_id)
        .bind(turn)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
