//! Bot Integration Tests
//!
//! Full job bodies against the scripted API with in-memory storage.

mod common;

use common::{config, ScriptedApi, CORPUS};
use async_trait::async_trait;
use mimicbot::recovery::CallWrapper;
use mimicbot::social::InboundKind;
use mimicbot::storage::{Backends, MemoryStorage, StorageBackend, StorageError};
use mimicbot::{
    ApiError, ArchiveManager, Artifact, Bot, MarkovModeler, ModelManager, ModelState,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

fn build_bot(api: Arc<ScriptedApi>, extra: &[(&str, &str)]) -> Bot {
    let config = config(extra);
    let calls = CallWrapper::new(config.call_policy());

    let archive = ArchiveManager::new(
        "alice",
        Artifact::new(
            "alice.json",
            Backends::local(Arc::new(MemoryStorage::new())),
            calls.clone(),
        ),
    )
    .with_upstream(api.clone());
    let models = ModelManager::new(
        Artifact::new(
            "alice.model",
            Backends::local(Arc::new(MemoryStorage::new())),
            calls.clone(),
        ),
        Arc::new(MarkovModeler::new()),
    );

    Bot::new(config, api, calls, archive, models)
}

async fn started_bot(extra: &[(&str, &str)]) -> (Bot, Arc<ScriptedApi>) {
    let api = Arc::new(ScriptedApi::with_timeline(CORPUS));
    let bot = build_bot(api.clone(), extra);
    assert_ok!(bot.startup().await);
    (bot, api)
}

#[tokio::test]
async fn test_startup_pulls_archive_and_builds_model() {
    let (bot, _api) = started_bot(&[]).await;

    assert_eq!(bot.archive_len().await, CORPUS.len());
    assert_eq!(bot.model_state().await, ModelState::Ready);
}

#[tokio::test]
async fn test_jobs_fail_without_model() {
    let api = Arc::new(ScriptedApi::default());
    let bot = build_bot(api.clone(), &[]);

    assert_err!(bot.post_statement().await);
    assert!(api.posts().is_empty());
}

#[tokio::test]
async fn test_post_statement_obscures_banned_terms() {
    let (bot, api) = started_bot(&[("BANNED_TERMS", "zebras, savanna")]).await;

    for _ in 0..5 {
        assert_ok!(bot.post_statement().await);
    }

    let posts = api.posts();
    assert_eq!(posts.len(), 5);
    for post in posts {
        let lower = post.to_lowercase();
        assert!(!lower.contains("zebras"), "leaked: {}", post);
        assert!(!lower.contains("savanna"), "leaked: {}", post);
        assert!(post.chars().count() <= 280);
    }
}

#[tokio::test]
async fn test_tweet_chance_zero_never_posts() {
    let (bot, api) = started_bot(&[("TWEET_CHANCE", "0")]).await;

    for _ in 0..5 {
        assert_ok!(bot.post_statement().await);
    }
    assert!(api.posts().is_empty());
}

#[tokio::test]
async fn test_post_retries_transient_errors() {
    let (bot, api) = started_bot(&[("MAX_ERROR_RETRIES", "2")]).await;
    api.post_failures
        .lock()
        .unwrap()
        .push(ApiError::Transport("execution expired".into()));

    assert_ok!(bot.post_statement().await);
    assert_eq!(api.posts().len(), 1);
    assert_eq!(bot.call_stats().retried, 1);
}

#[tokio::test]
async fn test_first_poll_skips_backlog() {
    let (bot, api) = started_bot(&[]).await;
    api.push_inbound(1, InboundKind::Mention, "bob", "@alice_ebooks old news");

    assert_ok!(bot.poll_inbound().await);
    assert!(api.replies().is_empty());

    api.push_inbound(2, InboundKind::Mention, "bob", "@alice_ebooks tell me about zebras");
    assert_ok!(bot.poll_inbound().await);

    let replies = api.replies();
    assert_eq!(replies.len(), 1);
    let (target, text, direct) = &replies[0];
    assert_eq!(target, "status-2");
    assert!(text.starts_with("@bob "));
    assert!(!direct);

    // Already handled events are not answered again
    assert_ok!(bot.poll_inbound().await);
    assert_eq!(api.replies().len(), 1);
}

#[tokio::test]
async fn test_blacklisted_and_own_messages_ignored() {
    let (bot, api) = started_bot(&[("BLACKLIST", "Spammer; other")]).await;
    api.push_inbound(1, InboundKind::Mention, "carol", "@alice_ebooks hi");
    assert_ok!(bot.poll_inbound().await);

    api.push_inbound(2, InboundKind::Mention, "spammer", "@alice_ebooks buy now");
    api.push_inbound(3, InboundKind::Mention, "alice_ebooks", "@alice_ebooks talking to myself");
    api.push_inbound(4, InboundKind::Direct, "dave", "@alice_ebooks zebras?");
    assert_ok!(bot.poll_inbound().await);

    let replies = api.replies();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].0, "status-4");
    assert!(replies[0].2, "DM replies stay direct");
}

#[tokio::test]
async fn test_owner_commands() {
    let (bot, api) = started_bot(&[]).await;
    api.push_inbound(1, InboundKind::Mention, "carol", "@alice_ebooks hi");
    assert_ok!(bot.poll_inbound().await);

    api.push_inbound(2, InboundKind::Direct, "Alice", "@alice_ebooks follow @carol, dave nobody");
    api.push_inbound(3, InboundKind::Direct, "alice", "@alice_ebooks cheating exactly this");
    api.push_inbound(4, InboundKind::Direct, "alice", "@alice_ebooks mention @erin look:");
    api.push_inbound(5, InboundKind::Direct, "alice", "@alice_ebooks block @mallory");
    assert_ok!(bot.poll_inbound().await);

    assert_eq!(
        api.relations(),
        vec![
            ("follow".to_string(), vec!["id-carol".to_string(), "id-dave".to_string()]),
            ("block".to_string(), vec!["id-mallory".to_string()]),
        ]
    );

    let posts = api.posts();
    assert_eq!(posts.len(), 2);
    assert_eq!(posts[0], "exactly this");
    assert!(posts[1].starts_with("@erin look: "));
    assert!(posts[1].chars().count() <= 280);
    assert!(api.replies().is_empty());
}

#[tokio::test]
async fn test_follow_parity_job() {
    let (bot, api) = started_bot(&[]).await;
    *api.followers.lock().unwrap() = vec!["a".into(), "b".into(), "c".into()];
    *api.following.lock().unwrap() = vec!["b".into(), "c".into(), "d".into()];

    assert_ok!(bot.refresh_follow_parity().await);
    assert_eq!(
        api.relations(),
        vec![
            ("follow".to_string(), vec!["a".to_string()]),
            ("unfollow".to_string(), vec!["d".to_string()]),
        ]
    );
}

#[tokio::test]
async fn test_refresh_picks_up_new_posts() {
    let (bot, api) = started_bot(&[]).await;
    api.timeline
        .lock()
        .unwrap()
        .push(mimicbot::CorpusRecord::new(
            mimicbot::RecordId::Text("105".into()),
            "brand new thoughts about stripes",
        ));

    assert_ok!(bot.refresh_archive_and_model().await);
    assert_eq!(bot.archive_len().await, CORPUS.len() + 1);
    assert_eq!(bot.model_state().await, ModelState::Ready);

    // Quiet upstream: no change
    assert_ok!(bot.refresh_archive_and_model().await);
    assert_eq!(bot.archive_len().await, CORPUS.len() + 1);
}

/// Remote mirror that starts rate-limiting writes once `limited` is set
#[derive(Default)]
struct ThrottledRemote {
    inner: MemoryStorage,
    limited: AtomicBool,
}

#[async_trait]
impl StorageBackend for ThrottledRemote {
    fn kind(&self) -> &'static str {
        "throttled"
    }

    fn locate(&self, name: &str) -> String {
        self.inner.locate(name)
    }

    async fn exists(&self, name: &str) -> Result<bool, StorageError> {
        self.inner.exists(name).await
    }

    async fn fetch(&self, name: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.inner.fetch(name).await
    }

    async fn persist(&self, name: &str, bytes: &[u8]) -> Result<String, StorageError> {
        if self.limited.load(Ordering::SeqCst) {
            return Err(ApiError::RateLimited { reset_in: Duration::from_secs(60) }.into());
        }
        self.inner.persist(name, bytes).await
    }

    async fn delete(&self, name: &str) -> Result<(), StorageError> {
        self.inner.delete(name).await
    }
}

#[tokio::test]
async fn test_posting_continues_while_model_mirror_sleeps() {
    let api = Arc::new(ScriptedApi::with_timeline(CORPUS));
    let config = config(&[("TWEET_CHANCE", "1")]);
    let calls = CallWrapper::new(config.call_policy());
    let remote = Arc::new(ThrottledRemote::default());

    let archive = ArchiveManager::new(
        "alice",
        Artifact::new("alice.json", Backends::local(Arc::new(MemoryStorage::new())), calls.clone()),
    )
    .with_upstream(api.clone());
    let models = ModelManager::new(
        Artifact::new(
            "alice.model",
            Backends::local(Arc::new(MemoryStorage::new())).with_remote(remote.clone()),
            calls.clone(),
        ),
        Arc::new(MarkovModeler::new()),
    );
    let bot = Arc::new(Bot::new(config, api.clone(), calls, archive, models));
    assert_ok!(bot.startup().await);

    remote.limited.store(true, Ordering::SeqCst);
    api.timeline.lock().unwrap().push(mimicbot::CorpusRecord::new(
        mimicbot::RecordId::Text("105".into()),
        "zebras gather by the river at noon",
    ));

    let refresh = tokio::spawn({
        let bot = bot.clone();
        async move { bot.refresh_archive_and_model().await }
    });
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!refresh.is_finished(), "mirror write should be sleeping");

    let posted = tokio::time::timeout(Duration::from_secs(3), bot.post_statement()).await;
    assert!(posted.is_ok(), "post blocked behind the model rebuild");
    assert_ok!(posted.unwrap());
    assert_eq!(api.posts().len(), 1);

    refresh.abort();
}

#[tokio::test]
async fn test_rejected_inbound_fetch_fails_the_poll() {
    let (bot, api) = started_bot(&[]).await;
    api.push_inbound(1, InboundKind::Mention, "carol", "@alice_ebooks hi");
    assert_ok!(bot.poll_inbound().await);

    *api.inbound_error.lock().unwrap() = Some(ApiError::Forbidden("Request already in progress".into()));
    api.push_inbound(2, InboundKind::Mention, "carol", "@alice_ebooks still there?");
    assert_err!(bot.poll_inbound().await);

    // The cursor did not move, so the event is answered once reads recover
    *api.inbound_error.lock().unwrap() = None;
    assert_ok!(bot.poll_inbound().await);
    assert_eq!(api.replies().len(), 1);
    assert_eq!(api.replies()[0].0, "status-2");
}
