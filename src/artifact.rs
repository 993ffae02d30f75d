//! Artifacts
//!
//! A named payload persisted to the local backend and, when configured, a
//! remote mirror. Tracks when it was last fetched and persisted. Remote
//! calls go through the [`CallWrapper`]; once retries are exhausted the
//! artifact falls back to local-only operation for that call and logs it.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::recovery::{CallError, CallWrapper};
use crate::storage::{Backends, StorageBackend, StorageError};

/// Error types for artifact operations
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("Local storage failed: {0}")]
    Local(#[from] StorageError),

    #[error("Remote storage failed: {0}")]
    Remote(#[from] CallError<StorageError>),

    #[error("Upstream fetch failed: {0}")]
    Upstream(#[from] CallError<ApiError>),

    #[error("Failed to encode {name}: {source}")]
    Encode {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to build {name}: {reason}")]
    Build { name: String, reason: String },
}

/// Where an artifact lives and when it last moved
#[derive(Debug, Clone, Default)]
pub struct ArtifactMeta {
    /// Local location
    pub path: String,
    /// Remote identifier (URL once uploaded)
    pub remote_id: Option<String>,
    pub last_fetched_at: Option<DateTime<Utc>>,
    pub last_persisted_at: Option<DateTime<Utc>>,
}

/// Result of a persist across backends
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistReport {
    pub local: String,
    pub remote: Option<String>,
    /// Remote was configured but gave up after retries
    pub degraded: bool,
}

/// Outcome of a remote mirror write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MirrorWrite {
    /// No remote store configured
    Disabled,
    /// Written; carries the remote URL unless the store reported it already held
    Stored(Option<String>),
    /// Gave up after retries, local copy only
    Degraded,
}

pub struct Artifact {
    name: String,
    backends: Backends,
    calls: CallWrapper,
    meta: ArtifactMeta,
}

impl Artifact {
    pub fn new(name: impl Into<String>, backends: Backends, calls: CallWrapper) -> Self {
        let name = name.into();
        let meta = ArtifactMeta {
            path: backends.local.locate(&name),
            remote_id: backends.remote.as_ref().map(|r| r.locate(&name)),
            ..Default::default()
        };

        Self {
            name,
            backends,
            calls,
            meta,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn meta(&self) -> &ArtifactMeta {
        &self.meta
    }

    pub fn remote_enabled(&self) -> bool {
        self.backends.remote_enabled()
    }

    pub fn calls(&self) -> &CallWrapper {
        &self.calls
    }

    /// Time since the last successful fetch; `None` means never
    pub fn since_fetched(&self) -> Option<Duration> {
        elapsed(self.meta.last_fetched_at)
    }

    /// Time since the last successful persist; `None` means never
    pub fn since_persisted(&self) -> Option<Duration> {
        elapsed(self.meta.last_persisted_at)
    }

    /// Read the local copy
    pub async fn fetch_local(&mut self) -> Result<Option<Vec<u8>>, ArtifactError> {
        let bytes = self.backends.local.fetch(&self.name).await?;
        if bytes.is_some() {
            self.meta.last_fetched_at = Some(Utc::now());
        }
        Ok(bytes)
    }

    /// Read the remote copy
    ///
    /// `Ok(None)` when remote is disabled, the object is missing, or the
    /// store gave up after retries (logged as a degradation).
    pub async fn fetch_remote(&mut self) -> Result<Option<Vec<u8>>, ArtifactError> {
        let Some(remote) = self.backends.remote.clone() else {
            return Ok(None);
        };

        let name = self.name.clone();
        let operation = format!("{}.fetch_remote", self.name);
        match self.calls.fetch(&operation, || remote.fetch(&name)).await {
            Ok(bytes) => {
                if bytes.is_some() {
                    self.meta.last_fetched_at = Some(Utc::now());
                }
                Ok(bytes)
            }
            Err(e) if e.exhausted => {
                warn!("Remote fetch of {} degraded to local-only: {}", self.name, e);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Write the same payload to every enabled backend
    pub async fn persist(&mut self, bytes: &[u8]) -> Result<PersistReport, ArtifactError> {
        self.persist_split(bytes, bytes).await
    }

    /// Write `local_bytes` locally and `remote_bytes` to the remote mirror
    ///
    /// The local write must succeed. A remote write that exhausts its retries
    /// is reported as degraded instead of failing.
    pub async fn persist_split(
        &mut self,
        local_bytes: &[u8],
        remote_bytes: &[u8],
    ) -> Result<PersistReport, ArtifactError> {
        let local = self.persist_local(local_bytes).await?;

        let mut report = PersistReport {
            local,
            remote: None,
            degraded: false,
        };
        match self.persist_remote(remote_bytes).await? {
            MirrorWrite::Stored(url) => report.remote = url,
            MirrorWrite::Degraded => report.degraded = true,
            MirrorWrite::Disabled => {}
        }

        Ok(report)
    }

    /// Write the local copy only
    pub async fn persist_local(&mut self, bytes: &[u8]) -> Result<String, ArtifactError> {
        let local = self.backends.local.persist(&self.name, bytes).await?;
        self.meta.path = local.clone();
        self.meta.last_persisted_at = Some(Utc::now());
        Ok(local)
    }

    /// Write the remote mirror only
    pub async fn persist_remote(&mut self, bytes: &[u8]) -> Result<MirrorWrite, ArtifactError> {
        let Some(remote) = self.backends.remote.clone() else {
            return Ok(MirrorWrite::Disabled);
        };

        let name = self.name.clone();
        let operation = format!("{}.persist_remote", self.name);
        match self
            .calls
            .call(&operation, || remote.persist(&name, bytes))
            .await
        {
            Ok(outcome) => {
                let url = outcome.into_value();
                if let Some(url) = &url {
                    debug!("Persisted {} remotely at {}", self.name, url);
                    self.meta.remote_id = Some(url.clone());
                }
                self.meta.last_persisted_at = Some(Utc::now());
                Ok(MirrorWrite::Stored(url))
            }
            Err(e) if e.exhausted => {
                warn!("Remote persist of {} degraded to local-only: {}", self.name, e);
                Ok(MirrorWrite::Degraded)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Best-effort removal from every backend
    pub async fn delete(&mut self) {
        let mut targets: Vec<Arc<dyn StorageBackend>> = vec![self.backends.local.clone()];
        targets.extend(self.backends.remote.clone());

        for backend in targets {
            if let Err(e) = backend.delete(&self.name).await {
                warn!("Failed to delete {} from {}: {}", self.name, backend.kind(), e);
            }
        }
    }
}

fn elapsed(at: Option<DateTime<Utc>>) -> Option<Duration> {
    at.map(|t| (Utc::now() - t).to_std().unwrap_or_default())
}
