//! Document upload
//!
//! Stores the raw bytes first, then the metadata row, then publishes the
//! ingestion event. The order matters: metadata must never reference a
//! blob that was not written. No compensating rollback on failure; an
//! orphaned object is cleaned up by an operational sweep.

use crate::domain::{Document, DocumentStatus};
use crate::error::Result;
use crate::ports::{DocumentRepository, MessageQueue, ObjectStorage};
use chrono::Utc;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tracing::info;
use uuid::Uuid;

pub struct IngestDocumentUseCase {
    repo: Arc<dyn DocumentRepository>,
    storage: Arc<dyn ObjectStorage>,
    queue: Arc<dyn MessageQueue>,
}

impl IngestDocumentUseCase {
    pub fn new(
        repo: Arc<dyn DocumentRepository>,
        storage: Arc<dyn ObjectStorage>,
        queue: Arc<dyn MessageQueue>,
    ) -> Self {
        Self { repo, storage, queue }
    }

    pub async fn upload(
        &self,
        filename: &str,
        mime_type: &str,
        body: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<Document> {
        let id = Uuid::new_v4().to_string();
        let storage_key = format!("{}_{}", id, sanitize_filename(filename));
        let now = Utc::now();

        self.storage.save(&storage_key, body).await?;

        let doc = Document {
            id: id.clone(),
            filename: filename.to_string(),
            mime_type: mime_type.to_string(),
            storage_path: storage_key,
            category: String::new(),
            subcategory: String::new(),
            tags: Vec::new(),
            confidence: 0.0,
            summary: String::new(),
            status: DocumentStatus::Uploaded,
            error_message: String::new(),
            created_at: now,
            updated_at: now,
        };

        self.repo.create(&doc).await?;
        self.queue.publish_document_ingested(&doc.id).await?;

        info!(document_id = %doc.id, filename = %doc.filename, "document_uploaded");
        Ok(doc)
    }
}

/// Reduce a user-supplied filename to a safe storage key component: keep
/// `[A-Za-z0-9._-]`, replace everything else (whitespace included) with
/// underscores.
fn sanitize_filename(name: &str) -> String {
    let base = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();
    let sanitized: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if sanitized.is_empty() {
        return "document.bin".to_string();
    }
    sanitized
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Classification;
    use crate::error::Error;
    use crate::ports::{ByteStream, IngestHandler};
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemRepo {
        created: Mutex<Vec<Document>>,
    }

    #[async_trait::async_trait]
    impl DocumentRepository for MemRepo {
        async fn create(&self, doc: &Document) -> Result<()> {
            self.created.lock().unwrap().push(doc.clone());
            Ok(())
        }

        async fn get_by_id(&self, id: &str) -> Result<Document> {
            Err(Error::DocumentNotFound(id.to_string()))
        }

        async fn update_status(
            &self,
            _id: &str,
            _status: DocumentStatus,
            _error_message: &str,
        ) -> Result<()> {
            Ok(())
        }

        async fn save_classification(
            &self,
            _id: &str,
            _classification: &Classification,
        ) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct MemStorage {
        keys: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl ObjectStorage for MemStorage {
        async fn save(
            &self,
            key: &str,
            _data: &mut (dyn AsyncRead + Send + Unpin),
        ) -> Result<()> {
            self.keys.lock().unwrap().push(key.to_string());
            Ok(())
        }

        async fn open(&self, _key: &str) -> Result<ByteStream> {
            Ok(Box::new(std::io::Cursor::new(Vec::new())))
        }
    }

    #[derive(Default)]
    struct MemQueue {
        published: Mutex<Vec<String>>,
        fail_publish: bool,
    }

    #[async_trait::async_trait]
    impl MessageQueue for MemQueue {
        async fn publish_document_ingested(&self, document_id: &str) -> Result<()> {
            if self.fail_publish {
                return Err(Error::temporary(
                    "nats publish",
                    Error::Queue("no servers".to_string()),
                ));
            }
            self.published.lock().unwrap().push(document_id.to_string());
            Ok(())
        }

        async fn subscribe_document_ingested(
            &self,
            _handler: IngestHandler,
            _shutdown: Arc<tokio::sync::Notify>,
        ) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_upload_happy_path() {
        let repo = Arc::new(MemRepo::default());
        let storage = Arc::new(MemStorage::default());
        let queue = Arc::new(MemQueue::default());
        let uc = IngestDocumentUseCase::new(repo.clone(), storage.clone(), queue.clone());

        let mut body = std::io::Cursor::new(b"hello".to_vec());
        let doc = uc.upload("report 1.txt", "text/plain", &mut body).await.unwrap();

        assert_eq!(doc.status, DocumentStatus::Uploaded);
        assert!(doc.tags.is_empty());

        let keys = storage.keys.lock().unwrap();
        assert_eq!(keys.len(), 1);
        let (uuid_part, name_part) = keys[0].split_once('_').unwrap();
        assert_eq!(uuid_part.len(), 36);
        assert!(Uuid::parse_str(uuid_part).is_ok());
        assert_eq!(name_part, "report_1.txt");

        assert_eq!(repo.created.lock().unwrap().len(), 1);
        assert_eq!(queue.published.lock().unwrap().as_slice(), &[doc.id.clone()]);
    }

    #[tokio::test]
    async fn test_storage_save_runs_before_metadata_create() {
        // A queue failure after save+create surfaces as Temporary and
        // leaves the stored object and metadata in place.
        let repo = Arc::new(MemRepo::default());
        let storage = Arc::new(MemStorage::default());
        let queue = Arc::new(MemQueue {
            fail_publish: true,
            ..Default::default()
        });
        let uc = IngestDocumentUseCase::new(repo.clone(), storage.clone(), queue);

        let mut body = std::io::Cursor::new(b"data".to_vec());
        let err = uc.upload("a.txt", "text/plain", &mut body).await.unwrap_err();

        assert_eq!(err.http_status(), 503);
        assert_eq!(storage.keys.lock().unwrap().len(), 1);
        assert_eq!(repo.created.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("report 1.txt"), "report_1.txt");
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("résumé.pdf"), "r_sum_.pdf");
        assert_eq!(sanitize_filename(""), "document.bin");
        assert_eq!(sanitize_filename("///"), "document.bin");
        assert_eq!(sanitize_filename("ok-name_v2.tar.gz"), "ok-name_v2.tar.gz");
    }
}
