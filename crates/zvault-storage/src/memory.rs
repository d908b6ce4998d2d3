//! In-memory storage backend.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::{StorageBackend, StorageError};

/// A `BTreeMap` behind a `RwLock`. Clones share the same map.
///
/// ```
/// # use zvault_storage::{MemoryBackend, StorageBackend};
/// # #[tokio::main]
/// # async fn main() {
/// let store = MemoryBackend::new();
/// store.put("auth/last-method", b"oidc").await.unwrap();
/// assert_eq!(store.get("auth/last-method").await.unwrap(), Some(b"oidc".to_vec()));
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    entries: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryBackend {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the store holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl StorageBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.entries
            .write()
            .await
            .insert(key.to_owned(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let entries = self.entries.read().await;
        Ok(entries
            .range(prefix.to_owned()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_key_reads_as_none() {
        let store = MemoryBackend::new();
        assert_eq!(store.get("sessions/current").await.unwrap(), None);
    }

    #[tokio::test]
    async fn put_replaces_previous_value() {
        let store = MemoryBackend::new();
        store.put("auth/last-method", b"oidc").await.unwrap();
        store.put("auth/last-method", b"saml").await.unwrap();
        assert_eq!(
            store.get("auth/last-method").await.unwrap(),
            Some(b"saml".to_vec())
        );
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = MemoryBackend::new();
        store.put("sessions/current", b"x").await.unwrap();
        store.delete("sessions/current").await.unwrap();
        store.delete("sessions/current").await.unwrap();
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn list_stops_at_prefix_boundary() {
        let store = MemoryBackend::new();
        store.put("sessions/a", b"1").await.unwrap();
        store.put("sessions/b", b"2").await.unwrap();
        store.put("sessionsx", b"3").await.unwrap();
        store.put("auth/last-method", b"4").await.unwrap();

        let keys = store.list("sessions/").await.unwrap();
        assert_eq!(keys, vec!["sessions/a", "sessions/b"]);
    }

    #[tokio::test]
    async fn clones_share_entries() {
        let store = MemoryBackend::new();
        let other = store.clone();
        store.put("k", b"v").await.unwrap();
        assert_eq!(other.get("k").await.unwrap(), Some(b"v".to_vec()));
    }
}
