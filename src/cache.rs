use crate::error::{Result, VastError};
use async_trait::async_trait;
use log::debug;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Key to path store for downloaded media
#[async_trait]
pub trait DiskCache: Send + Sync {
    async fn contains_key(&self, key: &str) -> bool;

    /// Store `data` under `key` and return where it was written
    async fn put(&self, key: &str, data: &[u8]) -> Result<PathBuf>;

    /// Where `key` is (or would be) stored
    fn path_for(&self, key: &str) -> PathBuf;
}

/// Stores each entry as a file named after the SHA-256 of its key
#[derive(Debug, Clone)]
pub struct FileDiskCache {
    base_dir: PathBuf,
}

impl FileDiskCache {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        FileDiskCache {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}

fn cache_file_name(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

#[async_trait]
impl DiskCache for FileDiskCache {
    async fn contains_key(&self, key: &str) -> bool {
        tokio::fs::try_exists(self.path_for(key))
            .await
            .unwrap_or(false)
    }

    async fn put(&self, key: &str, data: &[u8]) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.base_dir).await.map_err(|e| {
            VastError::CacheError(format!(
                "Failed to create cache directory {}: {}",
                self.base_dir.display(),
                e
            ))
        })?;

        let path = self.path_for(key);
        // Write then rename so readers never see a partial file
        let partial = path.with_extension("part");
        tokio::fs::write(&partial, data).await.map_err(|e| {
            VastError::CacheError(format!("Failed to write {}: {}", partial.display(), e))
        })?;
        tokio::fs::rename(&partial, &path).await.map_err(|e| {
            VastError::CacheError(format!("Failed to move {} into place: {}", path.display(), e))
        })?;

        debug!("Cached {} bytes for {} at {}", data.len(), key, path.display());
        Ok(path)
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.base_dir.join(cache_file_name(key))
    }
}
