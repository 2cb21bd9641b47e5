//! Fault injection for storage.

use async_trait::async_trait;
use driftsync_storage::{KvStore, StorageError, StorageResult};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Wraps a store and fails chosen writes.
///
/// Failures are armed per key and counted in puts to that key, so
/// `fail_nth_put("archiveOld", 1)` fails the next write to `archiveOld`
/// and lets every later one through.
#[derive(Debug)]
pub struct FlakyStore {
    inner: Arc<dyn KvStore>,
    armed: Mutex<BTreeMap<String, Vec<u32>>>,
    puts: Mutex<BTreeMap<String, u32>>,
}

impl FlakyStore {
    /// Wraps `inner` with no failures armed.
    pub fn new(inner: Arc<dyn KvStore>) -> Self {
        Self {
            inner,
            armed: Mutex::new(BTreeMap::new()),
            puts: Mutex::new(BTreeMap::new()),
        }
    }

    /// Fails the `n`-th put to `key` from now on (1-based).
    pub fn fail_nth_put(&self, key: &str, n: u32) {
        let seen = self.puts.lock().get(key).copied().unwrap_or(0);
        self.armed
            .lock()
            .entry(key.to_string())
            .or_default()
            .push(seen + n);
    }

    /// Fails every put to `key` from now on.
    pub fn fail_all_puts(&self, key: &str) {
        self.armed.lock().insert(key.to_string(), vec![0]);
    }

    /// Removes every armed failure.
    pub fn heal(&self) {
        self.armed.lock().clear();
    }

    /// Number of puts attempted on `key`, failed ones included.
    pub fn put_attempts(&self, key: &str) -> u32 {
        self.puts.lock().get(key).copied().unwrap_or(0)
    }

    fn should_fail(&self, key: &str) -> bool {
        let attempt = {
            let mut puts = self.puts.lock();
            let count = puts.entry(key.to_string()).or_default();
            *count += 1;
            *count
        };
        let armed = self.armed.lock();
        armed
            .get(key)
            .is_some_and(|at| at.contains(&0) || at.contains(&attempt))
    }
}

#[async_trait]
impl KvStore for FlakyStore {
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> StorageResult<()> {
        if self.should_fail(key) {
            return Err(StorageError::backend(format!("injected write failure for {key}")));
        }
        self.inner.put(key, value).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.inner.delete(key).await
    }

    async fn keys_with_prefix(&self, prefix: &str) -> StorageResult<Vec<String>> {
        self.inner.keys_with_prefix(prefix).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftsync_storage::InMemoryStore;

    #[tokio::test]
    async fn fails_only_the_armed_put() {
        let store = FlakyStore::new(Arc::new(InMemoryStore::new()));
        store.put("k", vec![1]).await.unwrap();
        store.fail_nth_put("k", 2);

        store.put("k", vec![2]).await.unwrap();
        assert!(store.put("k", vec![3]).await.is_err());
        store.put("k", vec![4]).await.unwrap();
        store.put("other", vec![5]).await.unwrap();

        assert_eq!(store.get("k").await.unwrap(), Some(vec![4]));
        assert_eq!(store.put_attempts("k"), 4);
    }

    #[tokio::test]
    async fn fail_all_until_healed() {
        let store = FlakyStore::new(Arc::new(InMemoryStore::new()));
        store.fail_all_puts("k");
        assert!(store.put("k", vec![1]).await.is_err());
        assert!(store.put("k", vec![2]).await.is_err());
        store.heal();
        store.put("k", vec![3]).await.unwrap();
    }
}
