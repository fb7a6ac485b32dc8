//! LocalBackend — filesystem-backed storage, sandboxed to a configured
//! root. Atomic writes and advisory locking follow the same primitives the
//! rest of this codebase's lineage uses for its own notes file: temp-file
//! rename, and `std::fs::File::lock`/`lock_shared`.

use std::collections::HashMap;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::cancel::CancelToken;
use crate::error::{self, ErrorKind};
use crate::storage::backend::{HealthStatus, Stat, StorageBackend, StorageError, StorageKind};

const LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-path advisory locks, so multi-path operations (rename) can acquire
/// in sorted order and avoid deadlocking against a concurrent caller
/// locking the same two paths in the opposite order.
#[derive(Default)]
struct LockTable {
    locks: Mutex<HashMap<PathBuf, ()>>,
}

impl LockTable {
    fn acquire(&self, path: &Path) -> Result<LockGuard<'_>, error::Error> {
        let deadline = Instant::now() + LOCK_TIMEOUT;
        loop {
            {
                let mut locks = self.locks.lock().expect("lock table mutex poisoned");
                if !locks.contains_key(path) {
                    locks.insert(path.to_path_buf(), ());
                    return Ok(LockGuard {
                        table: self,
                        path: path.to_path_buf(),
                    });
                }
            }
            if Instant::now() >= deadline {
                return Err(StorageError::Transient(format!(
                    "timed out acquiring lock for {}",
                    path.display()
                ))
                .into());
            }
            std::thread::sleep(Duration::from_millis(20));
        }
    }
}

struct LockGuard<'a> {
    table: &'a LockTable,
    path: PathBuf,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.table.locks.lock().expect("lock table mutex poisoned").remove(&self.path);
    }
}

pub struct LocalBackend {
    root: PathBuf,
    locks: LockTable,
}

impl LocalBackend {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, error::Error> {
        let root = dunce::canonicalize(root.into())?;
        Ok(LocalBackend {
            root,
            locks: LockTable::default(),
        })
    }

    /// Resolves `path` against the root, rejecting any result that escapes
    /// it (directory traversal).
    fn resolve(&self, path: &str) -> Result<PathBuf, error::Error> {
        let joined = self.root.join(path.trim_start_matches('/'));
        let normalized = normalize_lexically(&joined);
        if !normalized.starts_with(&self.root) {
            return Err(StorageError::PermissionDenied(format!(
                "path '{path}' escapes storage root"
            ))
            .into());
        }
        Ok(normalized)
    }

    /// Sorts multiple resolved paths ascending, for deadlock-free
    /// multi-path lock acquisition.
    fn acquire_sorted<'a>(&'a self, paths: &[&Path]) -> Result<Vec<LockGuard<'a>>, error::Error> {
        let mut sorted: Vec<&Path> = paths.to_vec();
        sorted.sort();
        sorted.iter().map(|p| self.locks.acquire(p)).collect()
    }
}

fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::ParentDir => {
                out.pop();
            }
            std::path::Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn kind(&self) -> StorageKind {
        StorageKind::Local
    }

    async fn read(&self, path: &str, cancel: &CancelToken) -> Result<Vec<u8>, error::Error> {
        cancel.check()?;
        let resolved = self.resolve(path)?;
        let _guard = self.locks.acquire(&resolved)?;
        let mut file = std::fs::File::open(&resolved).map_err(|e| map_io(e, path))?;
        file.lock_shared().map_err(|e| {
            error::Error::from(StorageError::Transient(format!(
                "could not lock {path} for reading: {e}"
            )))
        })?;
        use std::io::Read;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes).map_err(|e| map_io(e, path))?;
        Ok(bytes)
    }

    async fn write(
        &self,
        path: &str,
        bytes: &[u8],
        _if_match: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<Stat, error::Error> {
        cancel.check()?;
        let resolved = self.resolve(path)?;
        let _guard = self.locks.acquire(&resolved)?;
        if let Some(parent) = resolved.parent() {
            std::fs::create_dir_all(parent).map_err(|e| map_io(e, path))?;
        }
        let lock_file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&resolved)
            .map_err(|e| map_io(e, path))?;
        lock_file.lock().map_err(|e| {
            error::Error::from(StorageError::Transient(format!(
                "could not lock {path} for writing: {e}"
            )))
        })?;
        let tmp_path = resolved.with_extension(format!(
            "tmp.{}.{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.subsec_nanos())
                .unwrap_or(0)
        ));
        {
            let mut tmp = std::fs::File::create(&tmp_path).map_err(|e| map_io(e, path))?;
            tmp.write_all(bytes).map_err(|e| map_io(e, path))?;
            tmp.sync_all().map_err(|e| map_io(e, path))?;
        }
        if let Err(rename_err) = std::fs::rename(&tmp_path, &resolved) {
            if let Err(copy_err) = std::fs::copy(&tmp_path, &resolved) {
                let _ = std::fs::remove_file(&tmp_path);
                return Err(StorageError::Fatal(format!(
                    "rename {} -> {} failed ({rename_err}), copy fallback also failed: {copy_err}",
                    tmp_path.display(),
                    resolved.display()
                ))
                .into());
            }
            let _ = std::fs::remove_file(&tmp_path);
        }
        self.stat(path, cancel).await
    }

    async fn delete(&self, path: &str, cancel: &CancelToken) -> Result<(), error::Error> {
        cancel.check()?;
        let resolved = self.resolve(path)?;
        let _guard = self.locks.acquire(&resolved)?;
        match std::fs::remove_file(&resolved) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(map_io(e, path)),
        }
    }

    async fn exists(&self, path: &str, cancel: &CancelToken) -> Result<bool, error::Error> {
        cancel.check()?;
        let resolved = self.resolve(path)?;
        Ok(resolved.exists())
    }

    async fn list(&self, prefix: &str, cancel: &CancelToken) -> Result<Vec<String>, error::Error> {
        cancel.check()?;
        let resolved = self.resolve(prefix)?;
        if !resolved.exists() {
            return Err(StorageError::NotFound(prefix.to_string()).into());
        }
        let mut out = Vec::new();
        for entry in std::fs::read_dir(&resolved).map_err(|e| map_io(e, prefix))? {
            let entry = entry.map_err(|e| map_io(e, prefix))?;
            if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                let relative = entry.path().strip_prefix(&self.root).unwrap_or(&entry.path()).to_path_buf();
                out.push(relative.to_string_lossy().replace('\\', "/"));
            }
        }
        out.sort();
        Ok(out)
    }

    async fn stat(&self, path: &str, cancel: &CancelToken) -> Result<Stat, error::Error> {
        cancel.check()?;
        let resolved = self.resolve(path)?;
        let meta = std::fs::metadata(&resolved).map_err(|e| map_io(e, path))?;
        let modified: DateTime<Utc> = meta.modified().map_err(|e| map_io(e, path))?.into();
        Ok(Stat {
            size: meta.len(),
            modified,
            etag: None,
        })
    }

    async fn rename(&self, src: &str, dst: &str, cancel: &CancelToken) -> Result<(), error::Error> {
        cancel.check()?;
        let src_resolved = self.resolve(src)?;
        let dst_resolved = self.resolve(dst)?;
        let _guards = self.acquire_sorted(&[&src_resolved, &dst_resolved])?;
        if let Some(parent) = dst_resolved.parent() {
            std::fs::create_dir_all(parent).map_err(|e| map_io(e, dst))?;
        }
        std::fs::rename(&src_resolved, &dst_resolved).map_err(|e| map_io(e, dst))
    }

    async fn health(&self, _cancel: &CancelToken) -> HealthStatus {
        if self.root.exists() {
            HealthStatus::Ok
        } else {
            HealthStatus::Unavailable
        }
    }
}

fn map_io(e: std::io::Error, path: &str) -> error::Error {
    let kind = match e.kind() {
        std::io::ErrorKind::NotFound => ErrorKind::NotFound,
        std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
        std::io::ErrorKind::AlreadyExists => ErrorKind::AlreadyExists,
        _ => ErrorKind::Fatal,
    };
    error::Error::with_source(kind, format!("{path}: {e}"), e)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> (LocalBackend, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(dir.path()).unwrap();
        (backend, dir)
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let (backend, _dir) = backend();
        let cancel = CancelToken::never();
        backend.write("notes/a.md", b"hello", None, &cancel).await.unwrap();
        let bytes = backend.read("notes/a.md", &cancel).await.unwrap();
        assert_eq!(bytes, b"hello");
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let (backend, _dir) = backend();
        let cancel = CancelToken::never();
        backend.delete("missing.md", &cancel).await.unwrap();
    }

    #[tokio::test]
    async fn rejects_directory_traversal() {
        let (backend, _dir) = backend();
        let cancel = CancelToken::never();
        let err = backend.read("../../etc/passwd", &cancel).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    }

    #[tokio::test]
    async fn list_enumerates_non_recursively() {
        let (backend, _dir) = backend();
        let cancel = CancelToken::never();
        backend.write("notes/a.md", b"a", None, &cancel).await.unwrap();
        backend.write("notes/sub/b.md", b"b", None, &cancel).await.unwrap();
        let entries = backend.list("notes", &cancel).await.unwrap();
        assert_eq!(entries, vec!["notes/a.md".to_string()]);
    }

    #[tokio::test]
    async fn exists_does_not_read_body() {
        let (backend, _dir) = backend();
        let cancel = CancelToken::never();
        assert!(!backend.exists("notes/a.md", &cancel).await.unwrap());
        backend.write("notes/a.md", b"x", None, &cancel).await.unwrap();
        assert!(backend.exists("notes/a.md", &cancel).await.unwrap());
    }
}
