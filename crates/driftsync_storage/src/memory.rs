//! In-memory key-value store for testing.

use crate::error::StorageResult;
use crate::store::KvStore;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// An in-memory key-value store.
///
/// Besides the data, the store counts successful writes per key so tests can
/// assert that an operation did not touch a given key.
///
/// # Example
///
/// ```rust
/// use driftsync_storage::{InMemoryStore, KvStore};
///
/// # tokio_test_block(async {
/// let store = InMemoryStore::new();
/// store.put("archiveYoung", b"data".to_vec()).await.unwrap();
/// assert_eq!(store.get("archiveYoung").await.unwrap(), Some(b"data".to_vec()));
/// assert_eq!(store.write_count("archiveYoung"), 1);
/// # });
/// # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Runtime::new().unwrap().block_on(f)
/// # }
/// ```
#[derive(Debug, Default)]
pub struct InMemoryStore {
    data: RwLock<BTreeMap<String, Vec<u8>>>,
    writes: RwLock<BTreeMap<String, usize>>,
}

impl InMemoryStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns how many `put` calls succeeded for `key`.
    #[must_use]
    pub fn write_count(&self, key: &str) -> usize {
        self.writes.read().get(key).copied().unwrap_or(0)
    }

    /// Returns the number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Returns a copy of every stored entry.
    #[must_use]
    pub fn entries(&self) -> BTreeMap<String, Vec<u8>> {
        self.data.read().clone()
    }
}

#[async_trait]
impl KvStore for InMemoryStore {
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.data.read().get(key).cloned())
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> StorageResult<()> {
        self.data.write().insert(key.to_string(), value);
        *self.writes.write().entry(key.to_string()).or_insert(0) += 1;
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.data.write().remove(key);
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> StorageResult<Vec<String>> {
        Ok(self
            .data
            .read()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}
