//! Model Manager
//!
//! Owns the trained model for one account and keeps it in step with the
//! archive. The model is persisted together with the fingerprint of the
//! archive it was built from, so a restart only rebuilds when the archive
//! actually changed.
//!
//! State machine:
//! ```text
//! Absent ──load/build──▶ Loading ──▶ Ready ──archive changed──▶ Rebuilding ──▶ Ready
//! ```
//! A failed build returns to the previous state and keeps the previous model.
//!
//! Readers take the model from a [`ModelSlot`] instead of the manager, so a
//! rebuild stuck in a remote write never blocks generation.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::{Model, TextModeler};
use crate::archive::{Archive, ArchiveFingerprint};
use crate::artifact::{Artifact, ArtifactError, MirrorWrite, PersistReport};

/// Lifecycle of the held model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelState {
    Absent,
    Loading,
    Ready,
    Rebuilding,
}

impl ModelState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Absent => "absent",
            Self::Loading => "loading",
            Self::Ready => "ready",
            Self::Rebuilding => "rebuilding",
        }
    }
}

/// Persisted form of a model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelEnvelope {
    pub built_from: ArchiveFingerprint,
    pub model: Model,
}

/// Latest usable model, readable without the manager
pub type ModelSlot = Arc<RwLock<Option<Arc<Model>>>>;

pub struct ModelManager {
    artifact: Artifact,
    modeler: Arc<dyn TextModeler>,
    state: ModelState,
    model: Option<Arc<Model>>,
    built_from: Option<ArchiveFingerprint>,
    slot: ModelSlot,
}

impl ModelManager {
    pub fn new(artifact: Artifact, modeler: Arc<dyn TextModeler>) -> Self {
        Self {
            artifact,
            modeler,
            state: ModelState::Absent,
            model: None,
            built_from: None,
            slot: ModelSlot::default(),
        }
    }

    /// Artifact name for an account's model
    pub fn file_name(account: &str) -> String {
        format!("{}.model", account)
    }

    pub fn state(&self) -> ModelState {
        self.state
    }

    pub fn current(&self) -> Option<Arc<Model>> {
        self.model.clone()
    }

    pub fn built_from(&self) -> Option<&ArchiveFingerprint> {
        self.built_from.as_ref()
    }

    pub fn modeler(&self) -> Arc<dyn TextModeler> {
        self.modeler.clone()
    }

    /// Shared handle to the published model
    pub fn slot(&self) -> ModelSlot {
        self.slot.clone()
    }

    async fn publish(&self) {
        *self.slot.write().await = self.model.clone();
    }

    pub fn since_fetched(&self) -> Option<Duration> {
        self.artifact.since_fetched()
    }

    pub fn since_persisted(&self) -> Option<Duration> {
        self.artifact.since_persisted()
    }

    /// Whether the held model was built from `archive`
    pub fn is_fresh(&self, archive: &Archive) -> bool {
        self.model.is_some() && self.built_from.as_ref() == Some(&archive.fingerprint())
    }

    /// Load a persisted model: local first, then remote
    pub async fn load(&mut self) -> Result<Option<Arc<Model>>, ArtifactError> {
        let previous = self.state;
        self.state = ModelState::Loading;

        let envelope = match self.read_envelope().await {
            Ok(envelope) => envelope,
            Err(e) => {
                self.state = previous;
                return Err(e);
            }
        };

        match envelope {
            Some(envelope) => {
                info!(
                    "Loaded model {} (built from {} records)",
                    self.artifact.name(),
                    envelope.built_from.records
                );
                self.built_from = Some(envelope.built_from);
                self.model = Some(Arc::new(envelope.model));
                self.state = ModelState::Ready;
                self.publish().await;
            }
            None => {
                debug!("No persisted model {}", self.artifact.name());
                self.state = if self.model.is_some() {
                    previous
                } else {
                    ModelState::Absent
                };
            }
        }

        Ok(self.model.clone())
    }

    async fn read_envelope(&mut self) -> Result<Option<ModelEnvelope>, ArtifactError> {
        let local = self.artifact.fetch_local().await?;
        if let Some(envelope) = self.decode_or_warn(local, "local") {
            return Ok(Some(envelope));
        }
        let remote = self.artifact.fetch_remote().await?;
        Ok(self.decode_or_warn(remote, "remote"))
    }

    fn decode_or_warn(&self, bytes: Option<Vec<u8>>, source: &str) -> Option<ModelEnvelope> {
        let bytes = bytes?;
        match serde_json::from_slice(&bytes) {
            Ok(envelope) => Some(envelope),
            Err(e) => {
                warn!(
                    "Unparsable {} model {} ({}), treating as absent",
                    source,
                    self.artifact.name(),
                    e
                );
                None
            }
        }
    }

    /// Return a model built from `archive`, rebuilding only if it changed
    pub async fn ensure_fresh(&mut self, archive: &Archive) -> Result<Arc<Model>, ArtifactError> {
        let fingerprint = archive.fingerprint();
        if let (Some(model), Some(built_from)) = (&self.model, &self.built_from) {
            if *built_from == fingerprint {
                debug!("Model {} is fresh", self.artifact.name());
                return Ok(model.clone());
            }
        }

        let previous = self.state;
        self.state = if self.model.is_some() {
            ModelState::Rebuilding
        } else {
            ModelState::Loading
        };

        let (model, bytes) = match self.rebuild(archive, fingerprint).await {
            Ok(built) => built,
            Err(e) => {
                warn!("Model rebuild for {} failed: {}", self.artifact.name(), e);
                self.state = previous;
                return Err(e);
            }
        };
        self.state = ModelState::Ready;

        // The new model is already in use; the mirror write may sleep on retries
        if self.artifact.persist_remote(&bytes).await? == MirrorWrite::Degraded {
            warn!("Model {} persisted locally only", self.artifact.name());
        }
        Ok(model)
    }

    async fn rebuild(
        &mut self,
        archive: &Archive,
        fingerprint: ArchiveFingerprint,
    ) -> Result<(Arc<Model>, Vec<u8>), ArtifactError> {
        let corpus = archive.training_corpus();
        info!(
            "Building model {} from {} lines ({} records)",
            self.artifact.name(),
            corpus.len(),
            archive.len()
        );

        let modeler = self.modeler.clone();
        let model = tokio::task::spawn_blocking(move || modeler.train(&corpus))
            .await
            .map_err(|e| ArtifactError::Build {
                name: self.artifact.name().to_string(),
                reason: e.to_string(),
            })?;

        let envelope = ModelEnvelope {
            built_from: fingerprint,
            model,
        };
        let bytes = self.encode(&envelope)?;
        self.artifact.persist_local(&bytes).await?;

        let model = Arc::new(envelope.model);
        self.model = Some(model.clone());
        self.built_from = Some(envelope.built_from);
        self.publish().await;
        Ok((model, bytes))
    }

    /// Persist the held model to every enabled backend
    pub async fn persist(&mut self) -> Result<Option<PersistReport>, ArtifactError> {
        let (Some(model), Some(built_from)) = (self.model.clone(), self.built_from.clone()) else {
            return Ok(None);
        };

        let envelope = ModelEnvelope {
            built_from,
            model: (*model).clone(),
        };
        self.write_envelope(&envelope).await.map(Some)
    }

    fn encode(&self, envelope: &ModelEnvelope) -> Result<Vec<u8>, ArtifactError> {
        serde_json::to_vec(envelope).map_err(|source| ArtifactError::Encode {
            name: self.artifact.name().to_string(),
            source,
        })
    }

    async fn write_envelope(&mut self, envelope: &ModelEnvelope) -> Result<PersistReport, ArtifactError> {
        let bytes = self.encode(envelope)?;
        let report = self.artifact.persist(&bytes).await?;
        if report.degraded {
            warn!("Model {} persisted locally only", self.artifact.name());
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{CorpusRecord, RecordId};
    use crate::recovery::CallWrapper;
    use crate::storage::{Backends, MemoryStorage, StorageBackend};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts training runs, panics when asked to fail
    #[derive(Default)]
    struct CountingModeler {
        trained: AtomicUsize,
        fail: std::sync::atomic::AtomicBool,
    }

    impl TextModeler for CountingModeler {
        fn train(&self, corpus: &[String]) -> Model {
            if self.fail.load(Ordering::SeqCst) {
                panic!("training failed");
            }
            self.trained.fetch_add(1, Ordering::SeqCst);
            Model {
                tokens: corpus.to_vec(),
                ..Default::default()
            }
        }

        fn generate(&self, _model: &Model, _max_len: usize) -> String {
            String::new()
        }

        fn respond(&self, _model: &Model, _prompt: &str, _max_len: usize) -> String {
            String::new()
        }
    }

    fn archive(texts: &[&str]) -> Archive {
        let records = texts
            .iter()
            .enumerate()
            .map(|(i, t)| CorpusRecord::new(RecordId::Int(i as i64 + 1), *t))
            .collect();
        Archive::new("source", records)
    }

    fn manager(storage: Arc<MemoryStorage>, modeler: Arc<CountingModeler>) -> ModelManager {
        let artifact = Artifact::new(
            ModelManager::file_name("source"),
            Backends::local(storage),
            CallWrapper::default(),
        );
        ModelManager::new(artifact, modeler)
    }

    #[tokio::test]
    async fn test_rebuild_only_when_archive_changes() {
        let modeler = Arc::new(CountingModeler::default());
        let mut models = manager(Arc::new(MemoryStorage::new()), modeler.clone());
        assert_eq!(models.state(), ModelState::Absent);

        let first = archive(&["one line here", "another line"]);
        models.ensure_fresh(&first).await.unwrap();
        models.ensure_fresh(&first).await.unwrap();
        assert_eq!(modeler.trained.load(Ordering::SeqCst), 1);
        assert_eq!(models.state(), ModelState::Ready);
        assert!(models.is_fresh(&first));

        let second = archive(&["one line here", "another line", "a third line"]);
        assert!(!models.is_fresh(&second));
        let model = models.ensure_fresh(&second).await.unwrap();
        assert_eq!(modeler.trained.load(Ordering::SeqCst), 2);
        assert_eq!(model.tokens.len(), 3);
    }

    #[tokio::test]
    async fn test_fresh_start_with_empty_archive_is_ready() {
        let mut models = manager(Arc::new(MemoryStorage::new()), Arc::new(CountingModeler::default()));

        assert!(models.load().await.unwrap().is_none());
        assert_eq!(models.state(), ModelState::Absent);

        let model = models.ensure_fresh(&Archive::empty("source")).await.unwrap();
        assert!(model.is_empty());
        assert_eq!(models.state(), ModelState::Ready);
        assert!(models.since_persisted().is_some());
    }

    #[tokio::test]
    async fn test_persisted_fingerprint_survives_restart() {
        let storage = Arc::new(MemoryStorage::new());
        let modeler = Arc::new(CountingModeler::default());
        let current = archive(&["hello world again"]);

        manager(storage.clone(), modeler.clone())
            .ensure_fresh(&current)
            .await
            .unwrap();

        let mut restarted = manager(storage, modeler.clone());
        assert!(restarted.load().await.unwrap().is_some());
        assert_eq!(restarted.state(), ModelState::Ready);
        restarted.ensure_fresh(&current).await.unwrap();
        assert_eq!(modeler.trained.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_rebuild_keeps_previous_model() {
        let modeler = Arc::new(CountingModeler::default());
        let mut models = manager(Arc::new(MemoryStorage::new()), modeler.clone());

        let first = archive(&["first corpus line"]);
        let before = models.ensure_fresh(&first).await.unwrap();

        modeler.fail.store(true, Ordering::SeqCst);
        let result = models.ensure_fresh(&archive(&["changed corpus line"])).await;
        assert!(matches!(result, Err(ArtifactError::Build { .. })));
        assert_eq!(models.state(), ModelState::Ready);
        assert!(Arc::ptr_eq(&models.current().unwrap(), &before));
        assert!(models.is_fresh(&first));
    }

    #[tokio::test]
    async fn test_corrupt_model_is_absent() {
        let storage = Arc::new(MemoryStorage::new());
        storage.persist("source.model", b"{not json").await.unwrap();

        let mut models = manager(storage, Arc::new(CountingModeler::default()));
        assert!(models.load().await.unwrap().is_none());
        assert_eq!(models.state(), ModelState::Absent);
    }
}
