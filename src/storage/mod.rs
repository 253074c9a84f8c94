//! Local filesystem object storage

use crate::error::Result;
use crate::ports::{ByteStream, ObjectStorage};
use std::path::PathBuf;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tracing::debug;

pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    /// Create the store, making the base directory if needed. An empty
    /// path falls back to `./data/storage`.
    pub async fn new(base_path: &str) -> Result<Self> {
        let base_path = if base_path.is_empty() {
            PathBuf::from("./data/storage")
        } else {
            PathBuf::from(base_path)
        };
        fs::create_dir_all(&base_path).await?;
        Ok(Self { base_path })
    }
}

#[async_trait::async_trait]
impl ObjectStorage for LocalStorage {
    async fn save(&self, key: &str, data: &mut (dyn AsyncRead + Send + Unpin)) -> Result<()> {
        let path = self.base_path.join(key);
        let mut file = fs::File::create(&path).await?;
        tokio::io::copy(data, &mut file).await?;
        file.flush().await?;
        debug!(key, "object_stored");
        Ok(())
    }

    async fn open(&self, key: &str) -> Result<ByteStream> {
        let path = self.base_path.join(key);
        let file = fs::File::open(&path).await?;
        Ok(Box::new(file))
    }
}
