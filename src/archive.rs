//! Archive Manager
//!
//! The archive is the ordered corpus of source posts a model is trained on.
//! It is mirrored locally and (optionally) in the remote object store, and
//! can pull new posts from the source account's timeline.
//!
//! `sync` unions every copy by stable record id:
//! - Sources are visited local → remote → upstream
//! - On an id collision the later source's text wins, keeping the earlier
//!   record's position
//! - Records without a stable id are never merged within one source; a later
//!   source only adds the copies of a text beyond those already present, so
//!   the remote mirror of a local archive doesn't double it
//!
//! The merged archive is written in full locally and minified remotely.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::artifact::{Artifact, ArtifactError};
use crate::social::SocialApi;

static RETWEET: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)[RM]T ?[@:]").unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Lines outside this length range never reach training
const MIN_TRAINING_LEN: usize = 3;
const MAX_TRAINING_LEN: usize = 280;

/// Source id of a record: integer or string
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    Int(i64),
    Text(String),
}

impl RecordId {
    /// Dedup key, `None` for the "no stable id" values `0` and `""`
    pub fn stable_key(&self) -> Option<String> {
        match self {
            Self::Int(0) => None,
            Self::Int(n) => Some(n.to_string()),
            Self::Text(s) if s.is_empty() || s == "0" => None,
            Self::Text(s) => Some(s.clone()),
        }
    }

    /// Numeric value, for picking the newest record
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            Self::Text(s) => s.parse().ok(),
        }
    }
}

/// One corpus entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorpusRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,

    #[serde(default)]
    pub text: String,

    /// Any other fields from the source archive, kept for round trips
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl CorpusRecord {
    pub fn new(id: RecordId, text: impl Into<String>) -> Self {
        Self {
            id: Some(id),
            text: text.into(),
            extra: serde_json::Map::new(),
        }
    }

    /// Record with no source id
    pub fn idless(text: impl Into<String>) -> Self {
        Self {
            id: None,
            text: text.into(),
            extra: serde_json::Map::new(),
        }
    }

    pub fn stable_key(&self) -> Option<String> {
        self.id.as_ref().and_then(RecordId::stable_key)
    }

    /// The `{id, text}` projection
    pub fn minified(&self) -> Self {
        Self {
            id: self.id.clone(),
            text: self.text.clone(),
            extra: serde_json::Map::new(),
        }
    }
}

/// Identifies one archive snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveFingerprint {
    pub records: usize,
    pub digest: String,
}

/// Ordered corpus owned by one account
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Archive {
    account: String,
    records: Vec<CorpusRecord>,
}

impl Archive {
    pub fn new(account: impl Into<String>, records: Vec<CorpusRecord>) -> Self {
        Self {
            account: account.into(),
            records,
        }
    }

    pub fn empty(account: impl Into<String>) -> Self {
        Self::new(account, Vec::new())
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn records(&self) -> &[CorpusRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Project to `{id, text}` in archive order
    pub fn minify(&self) -> Vec<CorpusRecord> {
        self.records.iter().map(CorpusRecord::minified).collect()
    }

    /// Newest record id, used as the upstream `since_id`
    pub fn newest_id(&self) -> Option<i64> {
        self.records
            .iter()
            .filter(|r| r.stable_key().is_some())
            .filter_map(|r| r.id.as_ref().and_then(RecordId::as_i64))
            .max()
    }

    pub fn fingerprint(&self) -> ArchiveFingerprint {
        let bytes = serde_json::to_vec(&self.minify()).unwrap_or_default();
        ArchiveFingerprint {
            records: self.records.len(),
            digest: hex::encode(Sha256::digest(&bytes)),
        }
    }

    /// Normalized lines fed to the modeler
    pub fn training_corpus(&self) -> Vec<String> {
        self.records
            .iter()
            .filter(|r| !RETWEET.is_match(&r.text))
            .map(|r| normalize(&r.text))
            .filter(|line| {
                let len = line.chars().count();
                (MIN_TRAINING_LEN..=MAX_TRAINING_LEN).contains(&len)
            })
            .collect()
    }
}

fn normalize(text: &str) -> String {
    let decoded = text
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&");
    WHITESPACE.replace_all(decoded.trim(), " ").into_owned()
}

/// Parse persisted archive bytes
pub fn decode(bytes: &[u8]) -> Result<Vec<CorpusRecord>, serde_json::Error> {
    serde_json::from_slice(bytes)
}

/// Serialize records in the persisted format
pub fn encode(records: &[CorpusRecord]) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec_pretty(records)
}

/// Union record sources by stable id, in source order
pub fn merge_records<I>(sources: I) -> Vec<CorpusRecord>
where
    I: IntoIterator<Item = Vec<CorpusRecord>>,
{
    let mut merged: Vec<CorpusRecord> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();
    // Idless copies per text in `merged`
    let mut idless: HashMap<String, usize> = HashMap::new();

    for source in sources {
        let mut seen_in_source: HashMap<String, usize> = HashMap::new();

        for record in source {
            let Some(key) = record.stable_key() else {
                let nth = seen_in_source.entry(record.text.clone()).or_default();
                *nth += 1;
                let present = idless.entry(record.text.clone()).or_default();
                if *nth > *present {
                    *present += 1;
                    merged.push(record);
                }
                continue;
            };

            match positions.get(&key) {
                Some(&pos) => {
                    let existing = &mut merged[pos];
                    existing.text = record.text;
                    if !record.extra.is_empty() {
                        existing.extra = record.extra;
                    }
                }
                None => {
                    positions.insert(key, merged.len());
                    merged.push(record);
                }
            }
        }
    }

    merged
}

/// Owns one account's archive and its persistence
pub struct ArchiveManager {
    archive: Archive,
    artifact: Artifact,
    upstream: Option<Arc<dyn SocialApi>>,
}

impl ArchiveManager {
    pub fn new(account: &str, artifact: Artifact) -> Self {
        Self {
            archive: Archive::empty(account),
            artifact,
            upstream: None,
        }
    }

    /// Pull new posts from the account's timeline on every sync
    pub fn with_upstream(mut self, api: Arc<dyn SocialApi>) -> Self {
        self.upstream = Some(api);
        self
    }

    /// Artifact name for an account's archive
    pub fn file_name(account: &str) -> String {
        format!("{}.json", account)
    }

    pub fn archive(&self) -> &Archive {
        &self.archive
    }

    pub fn artifact(&self) -> &Artifact {
        &self.artifact
    }

    pub fn since_fetched(&self) -> Option<Duration> {
        self.artifact.since_fetched()
    }

    pub fn since_persisted(&self) -> Option<Duration> {
        self.artifact.since_persisted()
    }

    pub fn minify(&self) -> Vec<CorpusRecord> {
        self.archive.minify()
    }

    /// Load the archive: remote first when `use_remote`, then local, else empty
    pub async fn load(&mut self, use_remote: bool) -> Result<&Archive, ArtifactError> {
        let account = self.archive.account().to_string();

        let mut records = None;
        if use_remote && self.artifact.remote_enabled() {
            let bytes = self.artifact.fetch_remote().await?;
            records = self.decode_or_warn(bytes, "remote");
        }
        if records.is_none() {
            let bytes = self.artifact.fetch_local().await?;
            records = self.decode_or_warn(bytes, "local");
        }

        self.archive = match records {
            Some(records) => {
                info!("Loaded archive for {} ({} records)", account, records.len());
                Archive::new(account, records)
            }
            None => {
                info!("No archive for {} yet, starting empty", account);
                Archive::empty(account)
            }
        };

        Ok(&self.archive)
    }

    /// Reconcile local, remote and upstream copies and persist the union
    pub async fn sync(&mut self) -> Result<&Archive, ArtifactError> {
        let account = self.archive.account().to_string();

        let local_bytes = self.artifact.fetch_local().await?;
        let local = self.decode_or_warn(local_bytes, "local").unwrap_or_default();
        let remote_bytes = self.artifact.fetch_remote().await?;
        let remote = self.decode_or_warn(remote_bytes, "remote").unwrap_or_default();

        let known = merge_records([local, remote]);
        let since = Archive::new(account.clone(), known.clone()).newest_id();
        let upstream = self.fetch_upstream(&account, since).await?;
        let new_upstream = upstream.len();

        let merged = merge_records([known, upstream]);
        let before = self.archive.len();
        self.archive = Archive::new(account.clone(), merged);

        let full = encode(self.archive.records()).map_err(|source| ArtifactError::Encode {
            name: self.artifact.name().to_string(),
            source,
        })?;
        let mini = encode(&self.archive.minify()).map_err(|source| ArtifactError::Encode {
            name: self.artifact.name().to_string(),
            source,
        })?;

        let report = self.artifact.persist_split(&full, &mini).await?;
        if report.degraded {
            warn!("Archive for {} persisted locally only", account);
        }

        info!(
            "Synced archive for {}: {} records ({} before, {} from upstream)",
            account,
            self.archive.len(),
            before,
            new_upstream
        );

        Ok(&self.archive)
    }

    async fn fetch_upstream(
        &self,
        account: &str,
        since: Option<i64>,
    ) -> Result<Vec<CorpusRecord>, ArtifactError> {
        let Some(api) = self.upstream.clone() else {
            return Ok(Vec::new());
        };

        let since = since.map(|id| id.to_string());
        let operation = format!("{}.fetch_timeline", account);
        let result = self
            .artifact
            .calls()
            .fetch(&operation, || api.fetch_timeline(account, since.as_deref()))
            .await;

        match result {
            Ok(records) => {
                debug!("Fetched {} new posts for {}", records.len(), account);
                Ok(records)
            }
            Err(e) if e.exhausted => {
                warn!("Timeline fetch for {} skipped: {}", account, e);
                Ok(Vec::new())
            }
            Err(e) => Err(ArtifactError::Upstream(e)),
        }
    }

    /// Corrupt content counts as absent
    fn decode_or_warn(&self, bytes: Option<Vec<u8>>, source: &str) -> Option<Vec<CorpusRecord>> {
        let bytes = bytes?;
        match decode(&bytes) {
            Ok(records) => Some(records),
            Err(e) => {
                warn!(
                    "Unparsable {} archive {} ({}), treating as absent",
                    source,
                    self.artifact.name(),
                    e
                );
                None
            }
        }
    }
}
