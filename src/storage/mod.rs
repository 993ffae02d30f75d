//! Storage Backends
//!
//! Uniform fetch/persist/exists over the places an artifact can live:
//! - Local filesystem (`LocalStorage`)
//! - Remote object store (`RemoteStorage` over an `ObjectStore`)
//! - In-process memory (`MemoryStorage`)
//!
//! Backends move raw bytes only. Which backends are active is decided once,
//! at startup, by [`Backends::from_config`].

pub mod local;
pub mod memory;
pub mod remote;

pub use local::LocalStorage;
pub use memory::MemoryStorage;
pub use remote::{HttpObjectStore, ObjectStore, RemoteStorage};

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::error::ApiError;
use crate::recovery::{Classify, ErrorClass};

/// Error types for storage operations
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Remote store error: {0}")]
    Remote(#[from] ApiError),
}

impl StorageError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl Classify for StorageError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::Remote(e) => e.class(),
            Self::Io { .. } => ErrorClass::Unrecognized,
        }
    }

    fn reset_in(&self) -> Option<Duration> {
        match self {
            Self::Remote(e) => e.reset_in(),
            Self::Io { .. } => None,
        }
    }
}

/// Byte transport for named artifacts
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Short label for logs ("local", "remote", ...)
    fn kind(&self) -> &'static str;

    /// Where `name` lives in this backend (file path, object key)
    fn locate(&self, name: &str) -> String;

    async fn exists(&self, name: &str) -> Result<bool, StorageError>;

    /// Fetch the payload; `None` when missing or empty
    async fn fetch(&self, name: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Store the payload, returning the location it was written to
    async fn persist(&self, name: &str, bytes: &[u8]) -> Result<String, StorageError>;

    /// Best-effort removal
    async fn delete(&self, name: &str) -> Result<(), StorageError>;
}

/// The set of backends an artifact persists to
#[derive(Clone)]
pub struct Backends {
    pub local: Arc<dyn StorageBackend>,
    pub remote: Option<Arc<dyn StorageBackend>>,
}

impl Backends {
    /// Local-only backends
    pub fn local(local: Arc<dyn StorageBackend>) -> Self {
        Self {
            local,
            remote: None,
        }
    }

    pub fn with_remote(mut self, remote: Arc<dyn StorageBackend>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn remote_enabled(&self) -> bool {
        self.remote.is_some()
    }

    /// Resolve the backends for one artifact path
    ///
    /// Without a configured remote endpoint everything is local-only.
    pub fn from_config(config: &Config, local_path: PathBuf) -> Result<Self, ApiError> {
        let backends = Self::local(Arc::new(LocalStorage::new(local_path)));

        match &config.remote_store_url {
            Some(url) => {
                let store = HttpObjectStore::new(url, config.remote_store_token.as_deref())?;
                Ok(backends.with_remote(Arc::new(RemoteStorage::new(Arc::new(store)))))
            }
            None => Ok(backends),
        }
    }
}
