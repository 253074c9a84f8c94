//! Document repository

use crate::domain::{Classification, Document, DocumentStatus};
use crate::error::{Error, Result};
use crate::ports::DocumentRepository;
use chrono::Utc;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::types::Json;
use sqlx::Row;

pub struct PostgresDocumentRepository {
    pool: PgPool,
}

impl PostgresDocumentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_document(row: &PgRow) -> Result<Document> {
    let status: String = row.try_get("status")?;
    let tags: Json<Vec<String>> = row.try_get("tags")?;
    Ok(Document {
        id: row.try_get("id")?,
        filename: row.try_get("filename")?,
        mime_type: row.try_get("mime_type")?,
        storage_path: row.try_get("storage_path")?,
        category: row.try_get("category")?,
        subcategory: row.try_get("subcategory")?,
        tags: tags.0,
        confidence: row.try_get("confidence")?,
        summary: row.try_get("summary")?,
        status: status.parse()?,
        error_message: row.try_get("error_message")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait::async_trait]
impl DocumentRepository for PostgresDocumentRepository {
    async fn create(&self, doc: &Document) -> Result<()> {
        sqlx::query(
            r#"
INSERT INTO documents (
    id, filename, mime_type, storage_path, category, subcategory, tags,
    confidence, summary, status, error_message, created_at, updated_at
) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13)
"#,
        )
        .bind(&doc.id)
        .bind(&doc.filename)
        .bind(&doc.mime_type)
        .bind(&doc.storage_path)
        .bind(&doc.category)
        .bind(&doc.subcategory)
        .bind(Json(&doc.tags))
        .bind(doc.confidence)
        .bind(&doc.summary)
        .bind(doc.status.to_string())
        .bind(&doc.error_message)
        .bind(doc.created_at)
        .bind(doc.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> Result<Document> {
        let row = sqlx::query(
            r#"
SELECT id, filename, mime_type, storage_path, category, subcategory, tags,
       confidence, summary, status, error_message, created_at, updated_at
FROM documents
WHERE id = $1
"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row_to_document(&row),
            None => Err(Error::DocumentNotFound(id.to_string())),
        }
    }

    async fn update_status(
        &self,
        id: &str,
        status: DocumentStatus,
        error_message: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
UPDATE documents
SET status = $2, error_message = $3, updated_at = $4
WHERE id = $1
"#,
        )
        .bind(id)
        .bind(status.to_string())
        .bind(error_message)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save_classification(&self, id: &str, classification: &Classification) -> Result<()> {
        sqlx::query(
            r#"
UPDATE documents
SET category = $2, subcategory = $3, tags = $4, confidence = $5, summary = $6, updated_at = $7
WHERE id = $1
"#,
        )
        .bind(id)
        .bind(&classification.category)
        .bind(&classification.subcategory)
        .bind(Json(&classification.tags))
        .bind(classification.confidence)
        .bind(&classification.summary)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
