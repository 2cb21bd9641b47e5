//! Directory-backed key-value store for persistent storage.

use crate::error::{StorageError, StorageResult};
use crate::store::KvStore;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

const VALUE_EXTENSION: &str = "bin";
const TEMP_EXTENSION: &str = "tmp";

/// A key-value store keeping one file per key inside a directory.
///
/// # Durability
///
/// Each `put` writes the full value to a temporary file, syncs it, and
/// renames it over the previous file, so a crash leaves either the old or
/// the new value, never a torn one.
///
/// # Keys
///
/// Keys are restricted to ASCII letters, digits, `_`, `-` and `.` so they
/// map directly onto file names on every platform.
///
/// # Example
///
/// ```no_run
/// use driftsync_storage::{FileStore, KvStore};
///
/// # async fn demo() -> driftsync_storage::StorageResult<()> {
/// let store = FileStore::open("./sync-data").await?;
/// store.put("archiveOld", b"bytes".to_vec()).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Opens a store rooted at `dir`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub async fn open(dir: impl AsRef<Path>) -> StorageResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    /// Returns the directory backing this store.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.dir
    }

    fn value_path(&self, key: &str) -> StorageResult<PathBuf> {
        validate_key(key)?;
        Ok(self.dir.join(format!("{key}.{VALUE_EXTENSION}")))
    }
}

fn validate_key(key: &str) -> StorageResult<()> {
    let valid = !key.is_empty()
        && !key.starts_with('.')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidKey {
            key: key.to_string(),
        })
    }
}

#[async_trait]
impl KvStore for FileStore {
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let path = self.value_path(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> StorageResult<()> {
        let path = self.value_path(key)?;
        let tmp = path.with_extension(format!("{VALUE_EXTENSION}.{TEMP_EXTENSION}"));

        let mut file = tokio::fs::File::create(&tmp).await?;
        tokio::io::AsyncWriteExt::write_all(&mut file, &value).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp, &path).await?;
        debug!(key, bytes = value.len(), "stored value");
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.value_path(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn keys_with_prefix(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let Some(key) = name.strip_suffix(&format!(".{VALUE_EXTENSION}")) else {
                continue;
            };
            if key.starts_with(prefix) {
                keys.push(key.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn file_roundtrip_and_reopen() {
        let dir = tempdir().unwrap();

        {
            let store = FileStore::open(dir.path()).await.unwrap();
            store.put("archiveYoung", b"young".to_vec()).await.unwrap();
        }

        let store = FileStore::open(dir.path()).await.unwrap();
        assert_eq!(
            store.get("archiveYoung").await.unwrap(),
            Some(b"young".to_vec())
        );
        assert_eq!(store.get("archiveOld").await.unwrap(), None);
    }

    #[tokio::test]
    async fn file_rejects_path_like_keys() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();

        for key in ["", "../escape", "a/b", ".hidden", "sp ace"] {
            let result = store.put(key, vec![1]).await;
            assert!(
                matches!(result, Err(StorageError::InvalidKey { .. })),
                "key {key:?} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn file_prefix_scan_skips_temp_files() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        store.put("ops.00000000000000000002", vec![2]).await.unwrap();
        store.put("ops.00000000000000000001", vec![1]).await.unwrap();
        store.put("stateCache", vec![3]).await.unwrap();
        std::fs::write(dir.path().join("ops.00000000000000000003.bin.tmp"), [9]).unwrap();

        let keys = store.keys_with_prefix("ops.").await.unwrap();
        assert_eq!(
            keys,
            vec!["ops.00000000000000000001", "ops.00000000000000000002"]
        );
    }

    #[tokio::test]
    async fn file_delete_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        store.put("k", vec![1]).await.unwrap();
        store.delete("k").await.unwrap();
        store.delete("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }
}
