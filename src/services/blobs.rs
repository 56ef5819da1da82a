use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid storage locator: {0}")]
    InvalidLocator(String),
}

/// Blob storage collaborator: maps opaque locators to bytes.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores `bytes` and returns the locator to persist on the file record.
    async fn put(&self, bytes: &[u8]) -> Result<String, BlobError>;
    async fn get(&self, locator: &str) -> Result<Vec<u8>, BlobError>;
    async fn remove(&self, locator: &str) -> Result<(), BlobError>;
}

/// Keeps every blob as one flat file under `root`.
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, locator: &str) -> Result<PathBuf, BlobError> {
        let valid = !locator.is_empty()
            && locator
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(BlobError::InvalidLocator(locator.to_owned()));
        }
        Ok(self.root.join(locator))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(&self, bytes: &[u8]) -> Result<String, BlobError> {
        tokio::fs::create_dir_all(&self.root).await?;
        let locator = Uuid::new_v4().simple().to_string();
        tokio::fs::write(self.resolve(&locator)?, bytes).await?;
        Ok(locator)
    }

    async fn get(&self, locator: &str) -> Result<Vec<u8>, BlobError> {
        Ok(tokio::fs::read(self.resolve(locator)?).await?)
    }

    async fn remove(&self, locator: &str) -> Result<(), BlobError> {
        match tokio::fs::remove_file(self.resolve(locator)?).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
