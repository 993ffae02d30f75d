//! Follow-Parity Reconciler
//!
//! Keeps the bot's following set equal to its follower set: follow back
//! everyone who follows us, drop everyone who doesn't. No history is kept;
//! both sets are refetched on every pass.

use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

use super::{AccountId, SocialApi};
use crate::error::ApiError;
use crate::recovery::{CallError, CallWrapper};

/// Snapshot of both relationship sets
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FollowSet {
    pub followers: BTreeSet<AccountId>,
    pub following: BTreeSet<AccountId>,
}

impl FollowSet {
    /// Followers we don't follow yet
    pub fn to_follow(&self) -> BTreeSet<AccountId> {
        self.followers.difference(&self.following).cloned().collect()
    }

    /// Accounts we follow that don't follow us
    pub fn to_unfollow(&self) -> BTreeSet<AccountId> {
        self.following.difference(&self.followers).cloned().collect()
    }
}

/// What one reconcile pass changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParityReport {
    pub followed: BTreeSet<AccountId>,
    pub unfollowed: BTreeSet<AccountId>,
}

impl ParityReport {
    pub fn is_empty(&self) -> bool {
        self.followed.is_empty() && self.unfollowed.is_empty()
    }
}

pub struct FollowParity {
    api: Arc<dyn SocialApi>,
    calls: CallWrapper,
    cached: FollowSet,
}

impl FollowParity {
    pub fn new(api: Arc<dyn SocialApi>, calls: CallWrapper) -> Self {
        Self {
            api,
            calls,
            cached: FollowSet::default(),
        }
    }

    /// Relationship sets as of the last pass
    pub fn cached(&self) -> &FollowSet {
        &self.cached
    }

    /// Run one reconcile pass
    pub async fn reconcile(&mut self) -> Result<ParityReport, CallError<ApiError>> {
        let api = self.api.clone();

        let followers = self
            .calls
            .fetch("fetch_followers", || api.fetch_followers())
            .await?;
        let following = self
            .calls
            .fetch("fetch_following", || api.fetch_following())
            .await?;

        let mut set = FollowSet {
            followers: followers.into_iter().collect(),
            following: following.into_iter().collect(),
        };
        let to_follow = set.to_follow();
        let to_unfollow = set.to_unfollow();
        debug!(
            "Parity: {} followers, {} following, {} to follow, {} to unfollow",
            set.followers.len(),
            set.following.len(),
            to_follow.len(),
            to_unfollow.len()
        );

        if !to_follow.is_empty() {
            let ids: Vec<AccountId> = to_follow.iter().cloned().collect();
            self.calls.call("follow", || api.follow(&ids)).await?;
            info!("Followed back {} account(s)", ids.len());
        }

        if !to_unfollow.is_empty() {
            let ids: Vec<AccountId> = to_unfollow.iter().cloned().collect();
            self.calls.call("unfollow", || api.unfollow(&ids)).await?;
            info!("Unfollowed {} account(s)", ids.len());
        }

        set.following.extend(to_follow.iter().cloned());
        set.following.retain(|id| !to_unfollow.contains(id));
        self.cached = set;

        Ok(ParityReport {
            followed: to_follow,
            unfollowed: to_unfollow,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::CorpusRecord;
    use crate::recovery::CallPolicy;
    use crate::social::InboundEvent;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::Mutex;

    /// Records bulk relationship calls against fixed follower/following lists
    struct FakeApi {
        followers: Vec<AccountId>,
        following: Vec<AccountId>,
        /// Error returned by `fetch_followers` instead of the list
        followers_error: Option<ApiError>,
        calls: Mutex<Vec<(String, Vec<AccountId>)>>,
    }

    impl FakeApi {
        fn new(followers: &[&str], following: &[&str]) -> Self {
            Self {
                followers: followers.iter().map(|s| s.to_string()).collect(),
                following: following.iter().map(|s| s.to_string()).collect(),
                followers_error: None,
                calls: Mutex::new(Vec::new()),
            }
        }

        async fn record(&self, action: &str, ids: &[AccountId]) -> Result<(), ApiError> {
            self.calls.lock().await.push((action.to_string(), ids.to_vec()));
            Ok(())
        }
    }

    #[async_trait]
    impl SocialApi for FakeApi {
        async fn post(&self, _text: &str) -> Result<String, ApiError> {
            Ok("1".into())
        }

        async fn reply(&self, _target: &str, _text: &str, _direct: bool) -> Result<String, ApiError> {
            Ok("1".into())
        }

        async fn follow(&self, ids: &[AccountId]) -> Result<(), ApiError> {
            self.record("follow", ids).await
        }

        async fn unfollow(&self, ids: &[AccountId]) -> Result<(), ApiError> {
            self.record("unfollow", ids).await
        }

        async fn block(&self, ids: &[AccountId]) -> Result<(), ApiError> {
            self.record("block", ids).await
        }

        async fn favorite(&self, _status_id: &str) -> Result<(), ApiError> {
            Ok(())
        }

        async fn fetch_followers(&self) -> Result<Vec<AccountId>, ApiError> {
            if let Some(err) = &self.followers_error {
                return Err(err.clone());
            }
            Ok(self.followers.clone())
        }

        async fn fetch_following(&self) -> Result<Vec<AccountId>, ApiError> {
            Ok(self.following.clone())
        }

        async fn fetch_timeline(
            &self,
            _account: &str,
            _since_id: Option<&str>,
        ) -> Result<Vec<CorpusRecord>, ApiError> {
            Ok(Vec::new())
        }

        async fn fetch_inbound(&self, _since_id: Option<&str>) -> Result<Vec<InboundEvent>, ApiError> {
            Ok(Vec::new())
        }

        async fn lookup_account(&self, handle: &str) -> Result<Option<AccountId>, ApiError> {
            Ok(Some(handle.to_string()))
        }
    }

    fn set(ids: &[&str]) -> BTreeSet<AccountId> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    fn quick_calls() -> CallWrapper {
        CallWrapper::new(CallPolicy {
            max_retries: 1,
            timeout_cooldown: Duration::ZERO,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_reconcile_converges() {
        let api = Arc::new(FakeApi::new(&["a", "b", "c"], &["b", "c", "d"]));
        let mut parity = FollowParity::new(api.clone(), quick_calls());

        let report = parity.reconcile().await.unwrap();
        assert_eq!(report.followed, set(&["a"]));
        assert_eq!(report.unfollowed, set(&["d"]));
        assert_eq!(parity.cached().following, set(&["a", "b", "c"]));
        assert_eq!(parity.cached().followers, parity.cached().following);

        let calls = api.calls.lock().await;
        assert_eq!(
            *calls,
            vec![
                ("follow".to_string(), vec!["a".to_string()]),
                ("unfollow".to_string(), vec!["d".to_string()]),
            ]
        );
    }

    #[tokio::test]
    async fn test_reconcile_skips_empty_sets() {
        let api = Arc::new(FakeApi::new(&["a", "b"], &["a", "b"]));
        let mut parity = FollowParity::new(api.clone(), quick_calls());

        let report = parity.reconcile().await.unwrap();
        assert!(report.is_empty());
        assert!(api.calls.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_reconcile_only_unfollows() {
        let api = Arc::new(FakeApi::new(&[], &["x"]));
        let mut parity = FollowParity::new(api.clone(), quick_calls());

        let report = parity.reconcile().await.unwrap();
        assert!(report.followed.is_empty());
        assert_eq!(report.unfollowed, set(&["x"]));
        assert!(parity.cached().following.is_empty());

        let calls = api.calls.lock().await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "unfollow");
    }

    #[tokio::test]
    async fn test_rejected_followers_fetch_changes_nothing() {
        let mut api = FakeApi::new(&[], &["a", "b", "c"]);
        api.followers_error = Some(ApiError::Forbidden("Request already in progress".into()));
        let api = Arc::new(api);
        let mut parity = FollowParity::new(api.clone(), quick_calls());

        let err = parity.reconcile().await.unwrap_err();
        assert_eq!(err.operation, "fetch_followers");
        assert!(api.calls.lock().await.is_empty());
        assert_eq!(parity.cached(), &FollowSet::default());
    }
}
