//! Shared fixtures: a scripted social API and config helpers

#![allow(dead_code)]

use async_trait::async_trait;
use mimicbot::archive::{CorpusRecord, RecordId};
use mimicbot::social::{AccountId, InboundEvent, InboundKind, SocialApi};
use mimicbot::{ApiError, Config};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// In-memory social API that records every write
#[derive(Default)]
pub struct ScriptedApi {
    pub timeline: Mutex<Vec<CorpusRecord>>,
    pub inbound: Mutex<Vec<InboundEvent>>,
    pub followers: Mutex<Vec<AccountId>>,
    pub following: Mutex<Vec<AccountId>>,

    pub posts: Mutex<Vec<String>>,
    /// (target status, text, direct)
    pub replies: Mutex<Vec<(String, String, bool)>>,
    /// (action, ids)
    pub relations: Mutex<Vec<(String, Vec<AccountId>)>>,
    /// `since_id` of every timeline fetch
    pub timeline_since: Mutex<Vec<Option<String>>>,
    /// Errors returned by `post` before it starts succeeding
    pub post_failures: Mutex<Vec<ApiError>>,
    /// Returned by `fetch_inbound` while set
    pub inbound_error: Mutex<Option<ApiError>>,
    /// How long each `post` takes
    pub post_delay: Mutex<Duration>,
    /// Posts in flight right now, and the most ever seen at once
    pub posting: AtomicUsize,
    pub max_posting: AtomicUsize,
    pub inbound_polls: AtomicUsize,
}

impl ScriptedApi {
    pub fn with_timeline(texts: &[(i64, &str)]) -> Self {
        let api = Self::default();
        *api.timeline.lock().unwrap() = texts
            .iter()
            .map(|(id, text)| CorpusRecord::new(RecordId::Text(id.to_string()), *text))
            .collect();
        api
    }

    pub fn push_inbound(&self, id: u32, kind: InboundKind, sender: &str, text: &str) {
        self.inbound.lock().unwrap().push(InboundEvent {
            id: id.to_string(),
            status_id: format!("status-{}", id),
            kind,
            sender: sender.to_string(),
            text: text.to_string(),
        });
    }

    pub fn posts(&self) -> Vec<String> {
        self.posts.lock().unwrap().clone()
    }

    pub fn replies(&self) -> Vec<(String, String, bool)> {
        self.replies.lock().unwrap().clone()
    }

    pub fn relations(&self) -> Vec<(String, Vec<AccountId>)> {
        self.relations.lock().unwrap().clone()
    }

    fn relate(&self, action: &str, ids: &[AccountId]) -> Result<(), ApiError> {
        self.relations
            .lock()
            .unwrap()
            .push((action.to_string(), ids.to_vec()));
        Ok(())
    }
}

fn newer_than(id: &str, since: Option<&str>) -> bool {
    let since: u64 = since.and_then(|s| s.parse().ok()).unwrap_or(0);
    id.parse::<u64>().map(|id| id > since).unwrap_or(true)
}

#[async_trait]
impl SocialApi for ScriptedApi {
    async fn post(&self, text: &str) -> Result<String, ApiError> {
        if let Some(err) = self.post_failures.lock().unwrap().pop() {
            return Err(err);
        }

        let delay = *self.post_delay.lock().unwrap();
        if !delay.is_zero() {
            let now = self.posting.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_posting.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(delay).await;
            self.posting.fetch_sub(1, Ordering::SeqCst);
        }

        let mut posts = self.posts.lock().unwrap();
        posts.push(text.to_string());
        Ok(format!("post-{}", posts.len()))
    }

    async fn reply(&self, target_id: &str, text: &str, direct: bool) -> Result<String, ApiError> {
        let mut replies = self.replies.lock().unwrap();
        replies.push((target_id.to_string(), text.to_string(), direct));
        Ok(format!("reply-{}", replies.len()))
    }

    async fn follow(&self, ids: &[AccountId]) -> Result<(), ApiError> {
        self.relate("follow", ids)
    }

    async fn unfollow(&self, ids: &[AccountId]) -> Result<(), ApiError> {
        self.relate("unfollow", ids)
    }

    async fn block(&self, ids: &[AccountId]) -> Result<(), ApiError> {
        self.relate("block", ids)
    }

    async fn favorite(&self, _status_id: &str) -> Result<(), ApiError> {
        Ok(())
    }

    async fn fetch_followers(&self) -> Result<Vec<AccountId>, ApiError> {
        Ok(self.followers.lock().unwrap().clone())
    }

    async fn fetch_following(&self) -> Result<Vec<AccountId>, ApiError> {
        Ok(self.following.lock().unwrap().clone())
    }

    async fn fetch_timeline(
        &self,
        _account: &str,
        since_id: Option<&str>,
    ) -> Result<Vec<CorpusRecord>, ApiError> {
        self.timeline_since
            .lock()
            .unwrap()
            .push(since_id.map(str::to_string));
        Ok(self
            .timeline
            .lock()
            .unwrap()
            .iter()
            .filter(|r| {
                r.stable_key()
                    .map(|key| newer_than(&key, since_id))
                    .unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    async fn fetch_inbound(&self, since_id: Option<&str>) -> Result<Vec<InboundEvent>, ApiError> {
        self.inbound_polls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.inbound_error.lock().unwrap().clone() {
            return Err(err);
        }
        Ok(self
            .inbound
            .lock()
            .unwrap()
            .iter()
            .filter(|e| newer_than(&e.id, since_id))
            .cloned()
            .collect())
    }

    async fn lookup_account(&self, handle: &str) -> Result<Option<AccountId>, ApiError> {
        if handle == "nobody" {
            return Ok(None);
        }
        Ok(Some(format!("id-{}", handle)))
    }
}

/// Config with the required fields plus `extra` overrides
pub fn config(extra: &[(&str, &str)]) -> Config {
    let mut values: HashMap<String, String> = [
        ("BOT_NAME", "alice_ebooks"),
        ("SOURCE_USERNAME", "alice"),
        ("API_BASE_URL", "https://botsin.space"),
        ("ACCESS_TOKEN", "secret"),
        ("TIMEOUT_SLEEP", "0"),
    ]
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    for (k, v) in extra {
        values.insert(k.to_string(), v.to_string());
    }

    Config::from_lookup(|key| values.get(key).cloned()).expect("valid test config")
}

pub const CORPUS: &[(i64, &str)] = &[
    (101, "zebras run across the savanna at dawn"),
    (102, "zebras sleep standing up in the tall grass"),
    (103, "the savanna is warm tonight and full of stars"),
    (104, "every zebra has its own pattern of stripes"),
];
