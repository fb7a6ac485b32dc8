//! StorageBackend — the trait every storage implementation (local
//! filesystem, S3) satisfies, plus the shared error taxonomy and stat type.

use async_trait::async_trait;
use thiserror::Error;

use crate::cancel::CancelToken;
use crate::error::{self, ErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    Local,
    S3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Ok,
    Degraded,
    Unavailable,
}

#[derive(Debug, Clone)]
pub struct Stat {
    pub size: u64,
    pub modified: chrono::DateTime<chrono::Utc>,
    pub etag: Option<String>,
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("fatal storage error: {0}")]
    Fatal(String),
}

impl StorageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::NotFound(_) => ErrorKind::NotFound,
            StorageError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            StorageError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            StorageError::Transient(_) => ErrorKind::Transient,
            StorageError::Fatal(_) => ErrorKind::Fatal,
        }
    }
}

impl From<StorageError> for error::Error {
    fn from(e: StorageError) -> Self {
        let kind = e.kind();
        error::Error::with_source(kind, e.to_string(), e)
    }
}

/// A storage-abstracted byte store. Every operation accepts a
/// [`CancelToken`] since all of them are suspension points (file I/O or
/// network I/O).
#[async_trait::async_trait]
pub trait StorageBackend: Send + Sync {
    fn kind(&self) -> StorageKind;

    async fn read(&self, path: &str, cancel: &CancelToken) -> Result<Vec<u8>, error::Error>;

    /// Alias kept for call sites that think in terms of the component
    /// table's `get`/`read` naming; identical semantics to [`Self::read`].
    async fn get(&self, path: &str, cancel: &CancelToken) -> Result<Vec<u8>, error::Error> {
        self.read(path, cancel).await
    }

    /// Writes `bytes` to `path`. When `if_match` is `Some(etag)`, the write
    /// only succeeds if the current object's etag matches (conditional
    /// update); backends that can't support this (local) ignore it or
    /// reject with a validation error if their caller actually needs it.
    async fn write(
        &self,
        path: &str,
        bytes: &[u8],
        if_match: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<Stat, error::Error>;

    /// Deletion is idempotent: deleting a missing path is not an error.
    async fn delete(&self, path: &str, cancel: &CancelToken) -> Result<(), error::Error>;

    async fn exists(&self, path: &str, cancel: &CancelToken) -> Result<bool, error::Error>;

    /// Non-recursive: returns paths directly under `prefix`. Callers that
    /// want a recursive walk do so explicitly by calling `list` per
    /// directory discovered.
    async fn list(&self, prefix: &str, cancel: &CancelToken) -> Result<Vec<String>, error::Error>;

    async fn stat(&self, path: &str, cancel: &CancelToken) -> Result<Stat, error::Error>;

    async fn copy(&self, src: &str, dst: &str, cancel: &CancelToken) -> Result<(), error::Error> {
        let bytes = self.read(src, cancel).await?;
        self.write(dst, &bytes, None, cancel).await?;
        Ok(())
    }

    /// Move is copy+delete; not atomic across the two steps.
    async fn rename(&self, src: &str, dst: &str, cancel: &CancelToken) -> Result<(), error::Error> {
        self.copy(src, dst, cancel).await?;
        self.delete(src, cancel).await
    }

    async fn health(&self, cancel: &CancelToken) -> HealthStatus;

    async fn close(&self) -> Result<(), error::Error> {
        Ok(())
    }
}
