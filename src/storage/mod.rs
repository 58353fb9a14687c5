//! # Blob Store
//!
//! Opaque byte storage for uploaded XML files and CDR receipts. The pipeline
//! only ever sees references; the local-directory implementation is the
//! default deployment, the in-memory one backs tests and embedded use.

use async_trait::async_trait;
use dashmap::DashMap;
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised by blob store implementations
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Storage I/O error: {0}")]
    Io(String),
}

/// Content-addressed-ish blob storage: `put` returns an opaque reference,
/// `get` resolves it
#[async_trait]
pub trait FileStore: Send + Sync {
    async fn get(&self, file_ref: &str) -> Result<Vec<u8>, StorageError>;

    async fn put(&self, bytes: &[u8], extension: &str) -> Result<String, StorageError>;
}

/// Directory-backed blob store
#[derive(Debug, Clone)]
pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, file_ref: &str) -> Result<PathBuf, StorageError> {
        // References are opaque names, never paths
        if file_ref.contains('/') || file_ref.contains("..") {
            return Err(StorageError::NotFound(file_ref.to_string()));
        }
        Ok(self.root.join(file_ref))
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn get(&self, file_ref: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.path_for(file_ref)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(file_ref.to_string()))
            }
            Err(e) => Err(StorageError::Io(e.to_string())),
        }
    }

    async fn put(&self, bytes: &[u8], extension: &str) -> Result<String, StorageError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| StorageError::Io(e.to_string()))?;

        let file_ref = format!("{}.{extension}", Uuid::new_v4());
        let path = self.root.join(&file_ref);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| StorageError::Io(e.to_string()))?;
        Ok(file_ref)
    }
}

/// In-memory blob store for tests and embedded use
#[derive(Debug, Default)]
pub struct InMemoryFileStore {
    files: DashMap<String, Vec<u8>>,
}

impl InMemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a blob under a known reference
    pub fn put_with_ref(&self, file_ref: impl Into<String>, bytes: Vec<u8>) {
        self.files.insert(file_ref.into(), bytes);
    }
}

#[async_trait]
impl FileStore for InMemoryFileStore {
    async fn get(&self, file_ref: &str) -> Result<Vec<u8>, StorageError> {
        self.files
            .get(file_ref)
            .map(|entry| entry.clone())
            .ok_or_else(|| StorageError::NotFound(file_ref.to_string()))
    }

    async fn put(&self, bytes: &[u8], extension: &str) -> Result<String, StorageError> {
        let file_ref = format!("{}.{extension}", Uuid::new_v4());
        self.files.insert(file_ref.clone(), bytes.to_vec());
        Ok(file_ref)
    }
}
