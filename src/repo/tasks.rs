//! Task store with soft deletion
//!
//! Every read and write is scoped to the owning user; soft-deleted rows
//! stay invisible unless a listing explicitly asks for them.

use crate::domain::{Task, TaskStatus};
use crate::error::{Error, Result};
use crate::ports::TaskStore;
use chrono::Utc;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;

pub struct PostgresTaskStore {
    pool: PgPool,
}

impl PostgresTaskStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_task(row: &PgRow) -> Result<Task> {
    let status: String = row.try_get("status")?;
    Ok(Task {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        title: row.try_get("title")?,
        details: row.try_get("details")?,
        status: status.parse::<TaskStatus>()?,
        due_at: row.try_get("due_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        deleted_at: row.try_get("deleted_at")?,
    })
}

#[async_trait::async_trait]
impl TaskStore for PostgresTaskStore {
    async fn create_task(&self, task: &Task) -> Result<()> {
        sqlx::query(
            r#"
INSERT INTO tasks (id, user_id, title, details, status, due_at, created_at, updated_at, deleted_at)
VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)
"#,
        )
        .bind(&task.id)
        .bind(&task.user_id)
        .bind(&task.title)
        .bind(&task.details)
        .bind(task.status.to_string())
        .bind(task.due_at)
        .bind(task.created_at)
        .bind(task.updated_at)
        .bind(task.deleted_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_tasks(&self, user_id: &str, include_deleted: bool) -> Result<Vec<Task>> {
        let query = if include_deleted {
            r#"
SELECT id, user_id, title, details, status, due_at, created_at, updated_at, deleted_at
FROM tasks
WHERE user_id = $1
ORDER BY updated_at DESC
"#
        } else {
            r#"
SELECT id, user_id, title, details, status, due_at, created_at, updated_at, deleted_at
FROM tasks
WHERE user_id = $1 AND deleted_at IS NULL
ORDER BY updated_at DESC
"#
        };

        let rows = sqlx::query(query).bind(user_id).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_task).collect()
    }

    async fn get_task_by_id(&self, user_id: &str, task_id: &str) -> Result<Task> {
        let row = sqlx::query(
            r#"
SELECT id, user_id, title, details, status, due_at, created_at, updated_at, deleted_at
FROM tasks
WHERE user_id = $1 AND id = $2 AND deleted_at IS NULL
"#,
        )
        .bind(user_id)
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row_to_task(&row),
            None => Err(Error::Other(format!("task not found: id={task_id}"))),
        }
    }

    async fn update_task(&self, task: &Task) -> Result<()> {
        let result = sqlx::query(
            r#"
UPDATE tasks
SET title = $3, details = $4, status = $5, due_at = $6, updated_at = $7
WHERE user_id = $1 AND id = $2 AND deleted_at IS NULL
"#,
        )
        .bind(&task.user_id)
        .bind(&task.id)
        .bind(&task.title)
        .bind(&task.details)
        .bind(task.status.to_string())
        .bind(task.due_at)
        .bind(task.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::Other(format!("task not found: id={}", task.id)));
        }
        Ok(())
    }

    async fn soft_delete_task(&self, user_id: &str, task_id: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
UPDATE tasks
SET deleted_at = $3, updated_at = $3
WHERE user_id = $1 AND id = $2 AND deleted_at IS NULL
"#,
        )
        .bind(user_id)
        .bind(task_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::Other(format!("task not found: id={task_id}")));
        }
        Ok(())
    }
}
