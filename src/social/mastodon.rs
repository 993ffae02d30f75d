//! Mastodon-compatible API client
//!
//! Implements [`SocialApi`] over the Mastodon REST API (also served by
//! Pleroma, Akkoma, GoToSocial).
//!
//! # Configuration
//!
//! Environment variables:
//! - `API_BASE_URL`: server root, e.g. `https://botsin.space`
//! - `ACCESS_TOKEN`: application access token with read/write/follow scopes

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::debug;

use super::{AccountId, InboundEvent, InboundKind, SocialApi};
use crate::archive::{CorpusRecord, RecordId};
use crate::config::Config;
use crate::error::ApiError;

static LINE_BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<br\s*/?>|</p>\s*<p>").unwrap());
static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").unwrap());

/// Page size for list endpoints
const PAGE_LIMIT: &str = "80";

#[derive(Debug, Deserialize)]
struct Account {
    id: String,
}

#[derive(Debug, Deserialize)]
struct NotifyAccount {
    acct: String,
}

#[derive(Debug, Deserialize)]
struct Status {
    id: String,
    content: String,
    #[serde(default)]
    visibility: String,
}

#[derive(Debug, Deserialize)]
struct Notification {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    account: NotifyAccount,
    status: Option<Status>,
}

/// Mastodon API client
pub struct MastodonApi {
    client: Client,
    base_url: String,
    access_token: String,
    /// Our own account id, resolved on first use
    me: OnceCell<AccountId>,
}

impl MastodonApi {
    pub fn new(base_url: &str, access_token: &str) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .user_agent(concat!("mimicbot/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token: access_token.to_string(),
            me: OnceCell::new(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, ApiError> {
        Self::new(&config.api_base_url, &config.access_token)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1/{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ApiError> {
        let response = self
            .client
            .get(self.url(path))
            .bearer_auth(&self.access_token)
            .query(query)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ApiError::from_response(response).await);
        }
        Ok(response.json().await?)
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, ApiError> {
        let response = self
            .client
            .post(self.url(path))
            .bearer_auth(&self.access_token)
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ApiError::from_response(response).await);
        }
        Ok(response.json().await?)
    }

    async fn account_id(&self) -> Result<&AccountId, ApiError> {
        self.me
            .get_or_try_init(|| async {
                let me: Account = self.get_json("accounts/verify_credentials", &[]).await?;
                debug!("Authenticated as account {}", me.id);
                Ok::<_, ApiError>(me.id)
            })
            .await
    }

    /// Apply a per-account relationship action (follow, unfollow, block)
    async fn relationship(&self, ids: &[AccountId], action: &str) -> Result<(), ApiError> {
        for id in ids {
            let _: serde_json::Value = self
                .post_json(&format!("accounts/{}/{}", id, action), &serde_json::json!({}))
                .await?;
        }
        Ok(())
    }

    async fn list_accounts(&self, relation: &str) -> Result<Vec<AccountId>, ApiError> {
        let me = self.account_id().await?.clone();
        let accounts: Vec<Account> = self
            .get_json(&format!("accounts/{}/{}", me, relation), &[("limit", PAGE_LIMIT)])
            .await?;
        Ok(accounts.into_iter().map(|a| a.id).collect())
    }
}

/// Convert status HTML to plain text
pub fn html_to_text(html: &str) -> String {
    let with_breaks = LINE_BREAK.replace_all(html, "\n");
    let stripped = TAG.replace_all(&with_breaks, "");
    stripped
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
        .trim()
        .to_string()
}

#[async_trait]
impl SocialApi for MastodonApi {
    async fn post(&self, text: &str) -> Result<String, ApiError> {
        let status: Status = self
            .post_json("statuses", &serde_json::json!({ "status": text }))
            .await?;
        Ok(status.id)
    }

    async fn reply(&self, target_id: &str, text: &str, direct: bool) -> Result<String, ApiError> {
        let visibility = if direct { "direct" } else { "public" };
        let status: Status = self
            .post_json(
                "statuses",
                &serde_json::json!({
                    "status": text,
                    "in_reply_to_id": target_id,
                    "visibility": visibility,
                }),
            )
            .await?;
        Ok(status.id)
    }

    async fn follow(&self, ids: &[AccountId]) -> Result<(), ApiError> {
        self.relationship(ids, "follow").await
    }

    async fn unfollow(&self, ids: &[AccountId]) -> Result<(), ApiError> {
        self.relationship(ids, "unfollow").await
    }

    async fn block(&self, ids: &[AccountId]) -> Result<(), ApiError> {
        self.relationship(ids, "block").await
    }

    async fn favorite(&self, status_id: &str) -> Result<(), ApiError> {
        let _: serde_json::Value = self
            .post_json(&format!("statuses/{}/favourite", status_id), &serde_json::json!({}))
            .await?;
        Ok(())
    }

    async fn fetch_followers(&self) -> Result<Vec<AccountId>, ApiError> {
        self.list_accounts("followers").await
    }

    async fn fetch_following(&self) -> Result<Vec<AccountId>, ApiError> {
        self.list_accounts("following").await
    }

    async fn fetch_timeline(
        &self,
        account: &str,
        since_id: Option<&str>,
    ) -> Result<Vec<CorpusRecord>, ApiError> {
        let Some(account_id) = self.lookup_account(account).await? else {
            return Err(ApiError::Http {
                status: 404,
                message: format!("unknown account {}", account),
            });
        };

        let mut query = vec![("limit", "40"), ("exclude_reblogs", "true")];
        if let Some(since) = since_id {
            query.push(("since_id", since));
        }

        let statuses: Vec<Status> = self
            .get_json(&format!("accounts/{}/statuses", account_id), &query)
            .await?;

        // API returns newest first
        Ok(statuses
            .into_iter()
            .rev()
            .filter(|s| s.visibility != "direct")
            .map(|s| CorpusRecord::new(RecordId::Text(s.id), html_to_text(&s.content)))
            .collect())
    }

    async fn fetch_inbound(&self, since_id: Option<&str>) -> Result<Vec<InboundEvent>, ApiError> {
        let mut query = vec![("types[]", "mention"), ("limit", "40")];
        if let Some(since) = since_id {
            query.push(("since_id", since));
        }

        let notifications: Vec<Notification> = self.get_json("notifications", &query).await?;

        Ok(notifications
            .into_iter()
            .rev()
            .filter(|n| n.kind == "mention")
            .filter_map(|n| {
                let status = n.status?;
                let kind = if status.visibility == "direct" {
                    InboundKind::Direct
                } else {
                    InboundKind::Mention
                };
                Some(InboundEvent {
                    id: n.id,
                    status_id: status.id,
                    kind,
                    sender: n.account.acct,
                    text: html_to_text(&status.content),
                })
            })
            .collect())
    }

    async fn lookup_account(&self, handle: &str) -> Result<Option<AccountId>, ApiError> {
        let handle = handle.trim_start_matches('@');
        match self
            .get_json::<Account>("accounts/lookup", &[("acct", handle)])
            .await
        {
            Ok(account) => Ok(Some(account.id)),
            Err(ApiError::Http { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
