//! Plain-text extraction
//!
//! Reads the stored bytes back and accepts them only when they are valid
//! UTF-8. Binary formats (PDF, images, office documents) are rejected
//! until a real extractor backend lands.

use crate::domain::Document;
use crate::error::{Error, Result};
use crate::ports::{ObjectStorage, TextExtractor};
use std::sync::Arc;
use tokio::io::AsyncReadExt;

pub struct PlaintextExtractor {
    storage: Arc<dyn ObjectStorage>,
}

impl PlaintextExtractor {
    pub fn new(storage: Arc<dyn ObjectStorage>) -> Self {
        Self { storage }
    }
}

#[async_trait::async_trait]
impl TextExtractor for PlaintextExtractor {
    async fn extract(&self, doc: &Document) -> Result<String> {
        let mut reader = self.storage.open(&doc.storage_path).await?;
        let mut raw = Vec::new();
        reader.read_to_end(&mut raw).await?;

        let text = String::from_utf8(raw).map_err(|_| {
            Error::invalid_input(
                "extract text",
                format!("unsupported binary format: {}", doc.filename),
            )
        })?;

        Ok(text.trim().to_string())
    }
}
