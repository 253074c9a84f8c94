//! Asynchronous document processing
//!
//! Runs the extract -> classify -> chunk -> embed -> index pipeline for
//! one queue delivery. Fail-fast: the first failing step marks the
//! document `failed` with the error text. Deliveries are at-least-once,
//! so the whole pipeline is safe to re-run for the same document id.

use crate::domain::DocumentStatus;
use crate::error::{Error, Result};
use crate::ports::{
    Chunker, DocumentClassifier, DocumentRepository, Embedder, TextExtractor, VectorStore,
};
use std::sync::Arc;
use tracing::error;

pub struct ProcessDocumentUseCase {
    repo: Arc<dyn DocumentRepository>,
    extractor: Arc<dyn TextExtractor>,
    classifier: Arc<dyn DocumentClassifier>,
    chunker: Arc<dyn Chunker>,
    embedder: Arc<dyn Embedder>,
    vector_db: Arc<dyn VectorStore>,
}

impl ProcessDocumentUseCase {
    pub fn new(
        repo: Arc<dyn DocumentRepository>,
        extractor: Arc<dyn TextExtractor>,
        classifier: Arc<dyn DocumentClassifier>,
        chunker: Arc<dyn Chunker>,
        embedder: Arc<dyn Embedder>,
        vector_db: Arc<dyn VectorStore>,
    ) -> Self {
        Self {
            repo,
            extractor,
            classifier,
            chunker,
            embedder,
            vector_db,
        }
    }

    pub async fn process_by_id(&self, document_id: &str) -> Result<()> {
        self.repo
            .update_status(document_id, DocumentStatus::Processing, "")
            .await?;

        let mut doc = match self.repo.get_by_id(document_id).await {
            Ok(doc) => doc,
            Err(err) => return Err(self.fail(document_id, err).await),
        };

        let text = match self.extractor.extract(&doc).await {
            Ok(text) => text,
            Err(err) => return Err(self.fail(document_id, err).await),
        };
        if text.is_empty() {
            let err = Error::invalid_input("process document", "empty extracted text");
            return Err(self.fail(document_id, err).await);
        }

        let classification = match self.classifier.classify(&text).await {
            Ok(classification) => classification,
            Err(err) => return Err(self.fail(document_id, err).await),
        };

        let chunks = self.chunker.split(&text);
        if chunks.is_empty() {
            let err = Error::invalid_input("process document", "chunking produced zero chunks");
            return Err(self.fail(document_id, err).await);
        }

        let vectors = match self.embedder.embed(&chunks).await {
            Ok(vectors) => vectors,
            Err(err) => return Err(self.fail(document_id, err).await),
        };
        if vectors.len() != chunks.len() {
            let err = Error::invalid_input(
                "process document",
                format!("vectors/chunks mismatch: {}/{}", vectors.len(), chunks.len()),
            );
            return Err(self.fail(document_id, err).await);
        }

        doc.category = classification.category.clone();
        doc.subcategory = classification.subcategory.clone();
        doc.tags = classification.tags.clone();
        doc.confidence = classification.confidence;
        doc.summary = classification.summary.clone();

        if let Err(err) = self.vector_db.index_chunks(&doc, &chunks, &vectors).await {
            return Err(self.fail(document_id, err).await);
        }

        if let Err(err) = self.repo.save_classification(document_id, &classification).await {
            return Err(self.fail(document_id, err).await);
        }

        self.repo
            .update_status(document_id, DocumentStatus::Ready, "")
            .await?;

        Ok(())
    }

    /// Mark the document failed. When the status update itself fails, the
    /// document stays in `processing` for a later redelivery and both
    /// errors are joined into the returned one.
    async fn fail(&self, document_id: &str, process_err: Error) -> Error {
        match self
            .repo
            .update_status(document_id, DocumentStatus::Failed, &process_err.to_string())
            .await
        {
            Ok(()) => process_err,
            Err(update_err) => {
                error!(
                    document_id,
                    error = %process_err,
                    update_error = %update_err,
                    "failed to mark document as failed"
                );
                Error::Other(format!("{process_err}; mark failed status: {update_err}"))
            }
        }
    }
}
