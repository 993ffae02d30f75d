//! In-process backend, used for dry runs and tests

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{StorageBackend, StorageError};

#[derive(Default)]
pub struct MemoryStorage {
    objects: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    fn kind(&self) -> &'static str {
        "memory"
    }

    fn locate(&self, name: &str) -> String {
        format!("memory://{}", name)
    }

    async fn exists(&self, name: &str) -> Result<bool, StorageError> {
        Ok(self.objects.read().await.contains_key(name))
    }

    async fn fetch(&self, name: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self
            .objects
            .read()
            .await
            .get(name)
            .filter(|bytes| !bytes.is_empty())
            .cloned())
    }

    async fn persist(&self, name: &str, bytes: &[u8]) -> Result<String, StorageError> {
        self.objects
            .write()
            .await
            .insert(name.to_string(), bytes.to_vec());
        Ok(self.locate(name))
    }

    async fn delete(&self, name: &str) -> Result<(), StorageError> {
        self.objects.write().await.remove(name);
        Ok(())
    }
}
