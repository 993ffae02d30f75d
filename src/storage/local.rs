//! Local filesystem backend
//!
//! The configured path is either the artifact file itself or a directory the
//! artifact name is appended to. Writes go through a temp file and `rename`
//! so readers never see a half-written artifact.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{StorageBackend, StorageError};

pub struct LocalStorage {
    path: PathBuf,
}

impl LocalStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Resolve the file an artifact named `name` is stored in
    pub fn resolve(&self, name: &str) -> PathBuf {
        let as_dir = self.path.is_dir()
            || self
                .path
                .to_str()
                .map(|s| s.ends_with('/') || s.ends_with(std::path::MAIN_SEPARATOR))
                .unwrap_or(false);

        if as_dir {
            self.path.join(name)
        } else {
            self.path.clone()
        }
    }

    async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::io(parent, e))?;
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp_path = path.with_file_name(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

        tokio::fs::write(&temp_path, bytes)
            .await
            .map_err(|e| StorageError::io(&temp_path, e))?;

        if let Err(e) = tokio::fs::rename(&temp_path, path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(StorageError::io(path, e));
        }

        Ok(())
    }
}

#[async_trait]
impl StorageBackend for LocalStorage {
    fn kind(&self) -> &'static str {
        "local"
    }

    fn locate(&self, name: &str) -> String {
        self.resolve(name).display().to_string()
    }

    async fn exists(&self, name: &str) -> Result<bool, StorageError> {
        let path = self.resolve(name);
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| StorageError::io(path, e))
    }

    async fn fetch(&self, name: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let path = self.resolve(name);
        match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => Ok(None),
            Ok(bytes) => {
                debug!("Read {} bytes from {}", bytes.len(), path.display());
                Ok(Some(bytes))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::io(path, e)),
        }
    }

    async fn persist(&self, name: &str, bytes: &[u8]) -> Result<String, StorageError> {
        let path = self.resolve(name);
        Self::write_atomic(&path, bytes).await?;
        debug!("Wrote {} bytes to {}", bytes.len(), path.display());
        Ok(path.display().to_string())
    }

    async fn delete(&self, name: &str) -> Result<(), StorageError> {
        let path = self.resolve(name);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::io(path, e)),
        }
    }
}
