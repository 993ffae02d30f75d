//! Remote object-store backend
//!
//! Objects are keyed by a public identifier derived from the artifact name.
//! Upload URLs handed back by the store are remembered so later fetches hit
//! the exact object that was written.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

use super::{StorageBackend, StorageError};
use crate::error::ApiError;

/// Remote object store collaborator
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload `bytes` under `key`, returning the object's URL
    async fn upload(&self, key: &str, bytes: &[u8]) -> Result<String, ApiError>;

    /// Download by URL; `None` when missing or empty
    async fn download(&self, url: &str) -> Result<Option<Vec<u8>>, ApiError>;

    async fn exists(&self, key: &str) -> Result<bool, ApiError>;

    /// URL an object with `key` would have
    fn url_for(&self, key: &str) -> String;

    /// Best-effort removal
    async fn remove(&self, key: &str) -> Result<(), ApiError>;
}

/// Derive the store's public identifier for an artifact name
pub fn public_id(name: &str) -> String {
    name.trim_matches('/')
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect()
}

/// `StorageBackend` adapter over an `ObjectStore`
pub struct RemoteStorage {
    store: Arc<dyn ObjectStore>,
    urls: RwLock<HashMap<String, String>>,
}

impl RemoteStorage {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            urls: RwLock::new(HashMap::new()),
        }
    }

    async fn url(&self, key: &str) -> String {
        match self.urls.read().await.get(key) {
            Some(url) => url.clone(),
            None => self.store.url_for(key),
        }
    }
}

#[async_trait]
impl StorageBackend for RemoteStorage {
    fn kind(&self) -> &'static str {
        "remote"
    }

    fn locate(&self, name: &str) -> String {
        public_id(name)
    }

    async fn exists(&self, name: &str) -> Result<bool, StorageError> {
        Ok(self.store.exists(&public_id(name)).await?)
    }

    async fn fetch(&self, name: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let key = public_id(name);
        let url = self.url(&key).await;
        let bytes = self.store.download(&url).await?;
        Ok(bytes.filter(|b| !b.is_empty()))
    }

    async fn persist(&self, name: &str, bytes: &[u8]) -> Result<String, StorageError> {
        let key = public_id(name);
        let url = self.store.upload(&key, bytes).await?;
        debug!("Uploaded {} bytes as {}", bytes.len(), url);
        self.urls.write().await.insert(key, url.clone());
        Ok(url)
    }

    async fn delete(&self, name: &str) -> Result<(), StorageError> {
        let key = public_id(name);
        self.store.remove(&key).await?;
        self.urls.write().await.remove(&key);
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    url: Option<String>,
}

/// HTTP object store: PUT/GET/HEAD/DELETE on `<base>/<key>` with a bearer token
pub struct HttpObjectStore {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpObjectStore {
    pub fn new(base_url: &str, token: Option<&str>) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(String::from),
        })
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn upload(&self, key: &str, bytes: &[u8]) -> Result<String, ApiError> {
        let url = self.url_for(key);
        let response = self
            .authorize(self.client.put(&url))
            .body(bytes.to_vec())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ApiError::from_response(response).await);
        }

        // Stores that answer with a canonical URL win over the derived one
        let body = response.text().await.unwrap_or_default();
        let returned = serde_json::from_str::<UploadResponse>(&body)
            .ok()
            .and_then(|r| r.url);
        Ok(returned.unwrap_or(url))
    }

    async fn download(&self, url: &str) -> Result<Option<Vec<u8>>, ApiError> {
        let response = self.authorize(self.client.get(url)).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(ApiError::from_response(response).await);
        }

        let bytes = response.bytes().await?;
        Ok(if bytes.is_empty() { None } else { Some(bytes.to_vec()) })
    }

    async fn exists(&self, key: &str) -> Result<bool, ApiError> {
        let response = self
            .authorize(self.client.head(self.url_for(key)))
            .send()
            .await?;

        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(ApiError::from_response(response).await),
        }
    }

    fn url_for(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, key)
    }

    async fn remove(&self, key: &str) -> Result<(), ApiError> {
        let response = self
            .authorize(self.client.delete(self.url_for(key)))
            .send()
            .await?;

        match response.status() {
            s if s.is_success() || s == StatusCode::NOT_FOUND => Ok(()),
            _ => Err(ApiError::from_response(response).await),
        }
    }
}
