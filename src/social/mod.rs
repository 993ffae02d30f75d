//! Social API
//!
//! The remote API the bot talks to, as a trait so the scheduler, archive and
//! follow-parity logic can run against a scripted fake in tests.
//!
//! Every method may fail with an [`ApiError`]; callers go through the
//! [`crate::recovery::CallWrapper`] rather than calling these directly.

pub mod mastodon;
pub mod parity;

pub use mastodon::MastodonApi;
pub use parity::{FollowParity, FollowSet, ParityReport};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::archive::CorpusRecord;
use crate::error::ApiError;

/// Opaque account identifier as used by the server
pub type AccountId = String;

/// How an inbound event reached us
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InboundKind {
    /// Public mention of the bot
    Mention,
    /// Direct message
    Direct,
}

/// A mention or direct message addressed to the bot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundEvent {
    /// Event cursor (pass back as `since_id`)
    pub id: String,
    /// Status to reply to
    pub status_id: String,
    pub kind: InboundKind,
    /// Sender handle without the leading `@`
    pub sender: String,
    /// Plain text with mentions left in place
    pub text: String,
}

impl InboundEvent {
    /// Text with every leading `@mention` removed
    pub fn mentionless(&self) -> String {
        self.text
            .split_whitespace()
            .skip_while(|word| word.starts_with('@'))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Remote social API collaborator
#[async_trait]
pub trait SocialApi: Send + Sync {
    /// Publish a status, returning its id
    async fn post(&self, text: &str) -> Result<String, ApiError>;

    /// Reply to a status; `direct` keeps the reply private
    async fn reply(&self, target_id: &str, text: &str, direct: bool) -> Result<String, ApiError>;

    async fn follow(&self, ids: &[AccountId]) -> Result<(), ApiError>;

    async fn unfollow(&self, ids: &[AccountId]) -> Result<(), ApiError>;

    async fn block(&self, ids: &[AccountId]) -> Result<(), ApiError>;

    async fn favorite(&self, status_id: &str) -> Result<(), ApiError>;

    async fn fetch_followers(&self) -> Result<Vec<AccountId>, ApiError>;

    async fn fetch_following(&self) -> Result<Vec<AccountId>, ApiError>;

    /// Posts by `account` newer than `since_id`, oldest first
    async fn fetch_timeline(
        &self,
        account: &str,
        since_id: Option<&str>,
    ) -> Result<Vec<CorpusRecord>, ApiError>;

    /// Mentions and direct messages newer than `since_id`, oldest first
    async fn fetch_inbound(&self, since_id: Option<&str>) -> Result<Vec<InboundEvent>, ApiError>;

    /// Resolve a handle to an account id
    async fn lookup_account(&self, handle: &str) -> Result<Option<AccountId>, ApiError>;
}
