//! Mimicbot
//!
//! Corpus-driven social bot. Posts text generated from a model trained on a
//! source account's archive, answers mentions and DMs, and keeps its
//! following set in step with its followers.
//!
//! # Features
//!
//! - **Dual-backend artifacts**: archive and model mirrored to local disk and an optional remote object store
//! - **Conflict-free sync**: archive copies unioned by stable record id, idempotent
//! - **Fingerprinted models**: rebuilt only when the archive actually changed
//! - **Fault-tolerant calls**: rate limits, duplicates and timeouts classified and recovered
//! - **Follow parity**: follow back followers, drop non-followers
//!
//! # Architecture
//!
//! ```text
//! Scheduler ──► Bot ──┬── ArchiveManager ──┐
//!  (4 jobs)           ├── ModelManager ────┼── Artifact ──► Backends (local + remote)
//!                     ├── FollowParity     │
//!                     └── SocialApi ◄──────┘
//!                            ▲
//!                        CallWrapper (every remote call)
//! ```

pub mod archive;
pub mod artifact;
pub mod bot;
pub mod censor;
pub mod commands;
pub mod config;
pub mod error;
pub mod model;
pub mod recovery;
pub mod scheduler;
pub mod social;
pub mod storage;

pub use archive::{Archive, ArchiveFingerprint, ArchiveManager, CorpusRecord, RecordId};
pub use artifact::{Artifact, ArtifactError, ArtifactMeta, MirrorWrite, PersistReport};
pub use bot::Bot;
pub use censor::Censor;
pub use commands::Command;
pub use config::{Config, ConfigError, DelayRange};
pub use error::ApiError;
pub use model::{MarkovModeler, Model, ModelEnvelope, ModelManager, ModelSlot, ModelState, TextModeler};
pub use recovery::{CallError, CallOutcome, CallPolicy, CallStats, CallWrapper, ErrorClass};
pub use scheduler::{Job, Scheduler};
pub use social::{FollowParity, InboundEvent, InboundKind, MastodonApi, SocialApi};
pub use storage::{Backends, LocalStorage, MemoryStorage, StorageBackend, StorageError};
