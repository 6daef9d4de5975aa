//! Durable key -> blob stores backing the result cache.
//!
//! The filesystem store keeps one file per key and writes through a
//! temporary file plus rename, so a reader sees either the old record or the
//! new one, never a partial write.

use std::collections::HashMap;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use uuid::Uuid;

const BLOB_EXTENSION: &str = "json";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error during {operation} on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid store key: '{0}'")]
    InvalidKey(String),
}

/// Durable key -> blob store
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Read a blob, `None` if absent
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Write a blob, replacing any previous one. All-or-nothing per key.
    async fn write(&self, key: &str, blob: &[u8]) -> Result<(), StoreError>;

    /// List all stored keys
    async fn list(&self) -> Result<Vec<String>, StoreError>;

    /// Delete a blob; returns whether it existed
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;
}

fn validate_key(key: &str) -> Result<(), StoreError> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');

    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}

/// One JSON file per key under a root directory
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.{}", key, BLOB_EXTENSION))
    }

    async fn write_temp(&self, temp_path: &Path, blob: &[u8]) -> Result<(), StoreError> {
        let io_err = |operation, source| StoreError::Io {
            path: temp_path.to_path_buf(),
            operation,
            source,
        };

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(temp_path)
            .await
            .map_err(|e| io_err("create temporary file", e))?;

        file.write_all(blob)
            .await
            .map_err(|e| io_err("write temporary file", e))?;
        file.sync_all()
            .await
            .map_err(|e| io_err("sync temporary file", e))?;

        Ok(())
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        validate_key(key)?;
        let path = self.blob_path(key);

        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Io {
                path,
                operation: "read blob",
                source,
            }),
        }
    }

    async fn write(&self, key: &str, blob: &[u8]) -> Result<(), StoreError> {
        validate_key(key)?;

        fs::create_dir_all(&self.root)
            .await
            .map_err(|source| StoreError::Io {
                path: self.root.clone(),
                operation: "create store directory",
                source,
            })?;

        // Temp file lives in the same directory so the rename stays atomic
        let temp_path = self.root.join(format!(".{}.tmp", Uuid::new_v4()));

        if let Err(e) = self.write_temp(&temp_path, blob).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e);
        }

        let path = self.blob_path(key);
        if let Err(source) = fs::rename(&temp_path, &path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(StoreError::Io {
                path,
                operation: "rename blob into place",
                source,
            });
        }

        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>, StoreError> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.root.clone(),
                    operation: "list store directory",
                    source,
                })
            }
        };

        let mut keys = Vec::new();
        let suffix = format!(".{}", BLOB_EXTENSION);

        loop {
            let entry = entries.next_entry().await.map_err(|source| StoreError::Io {
                path: self.root.clone(),
                operation: "list store directory",
                source,
            })?;

            let Some(entry) = entry else { break };

            if let Some(name) = entry.file_name().to_str() {
                if name.starts_with('.') {
                    continue;
                }
                if let Some(key) = name.strip_suffix(&suffix) {
                    keys.push(key.to_string());
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        validate_key(key)?;
        let path = self.blob_path(key);

        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(false),
            Err(source) => Err(StoreError::Io {
                path,
                operation: "delete blob",
                source,
            }),
        }
    }
}

/// Process-local store, used when persistence is disabled
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        validate_key(key)?;
        Ok(self.blobs.lock().await.get(key).cloned())
    }

    async fn write(&self, key: &str, blob: &[u8]) -> Result<(), StoreError> {
        validate_key(key)?;
        self.blobs.lock().await.insert(key.to_string(), blob.to_vec());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>, StoreError> {
        let mut keys: Vec<String> = self.blobs.lock().await.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        validate_key(key)?;
        Ok(self.blobs.lock().await.remove(key).is_some())
    }
}
