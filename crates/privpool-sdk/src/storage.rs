/// Where encrypted blobs live. Only ciphertext ever reaches a `BlobStorage`.
use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{Result, SdkError};

#[async_trait]
pub trait BlobStorage: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn put(&self, key: &str, value: &[u8]) -> Result<()>;
}

fn check_key(key: &str) -> Result<()> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        && !key.starts_with('.');
    if !valid {
        return Err(SdkError::InvalidInput(format!("Invalid storage key: {}", key)));
    }
    Ok(())
}

/// One JSON file per key under a directory. Writes go to a temp file that is
/// then renamed over the target, so a crash never leaves a torn blob.
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| {
            SdkError::Storage(format!("Failed to create {}: {}", dir.display(), e))
        })?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        check_key(key)?;
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

#[async_trait]
impl BlobStorage for FileStorage {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SdkError::Storage(format!("Read {} failed: {}", path.display(), e))),
        }
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let path = self.path_for(key)?;
        let temp_path = path.with_extension("tmp");

        tokio::fs::write(&temp_path, value)
            .await
            .map_err(|e| SdkError::Storage(format!("Write failed: {}", e)))?;
        tokio::fs::rename(&temp_path, &path)
            .await
            .map_err(|e| SdkError::Storage(format!("Rename failed: {}", e)))?;

        debug!("Wrote {} bytes to {}", value.len(), path.display());
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStorage {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStorage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.blobs.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        check_key(key)?;
        self.blobs
            .write()
            .await
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }
}
