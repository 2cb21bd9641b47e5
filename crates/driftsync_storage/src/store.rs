//! Key-value store trait definition.

use crate::error::StorageResult;
use async_trait::async_trait;
use std::fmt::Debug;

/// An async key-value store over opaque string keys.
///
/// Stores are **opaque byte stores**. Archive stores, the operation log, the
/// state snapshot and the safety-backup list each occupy their own keys;
/// the store never interprets the values.
///
/// # Invariants
///
/// - `get` after a successful `put` returns exactly the written bytes
/// - `put` replaces the whole value (no partial updates)
/// - `delete` of a missing key succeeds
/// - Stores must be `Send + Sync` so one instance can back every service
/// - Stores are `Debug` so services holding one can derive it
///
/// # Implementors
///
/// - [`super::InMemoryStore`] - For testing
/// - [`super::FileStore`] - One file per key in a directory
#[async_trait]
pub trait KvStore: Send + Sync + Debug {
    /// Reads the value stored under `key`, or `None` if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Writes `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or the write fails.
    async fn put(&self, key: &str, value: Vec<u8>) -> StorageResult<()>;

    /// Removes `key`. Removing a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be written.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Lists every key starting with `prefix`, sorted ascending.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be enumerated.
    async fn keys_with_prefix(&self, prefix: &str) -> StorageResult<Vec<String>>;
}
