//! Single-writer lock over archive persistence.

use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// How an archive write interacts with the [`ArchiveWriteLock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Acquire the lock for the duration of the write.
    Locked,
    /// Write without acquiring the lock.
    ///
    /// Only valid while the caller's surrounding session already holds it,
    /// as during remote replay. Re-acquiring there would deadlock.
    BypassLock,
}

impl WriteMode {
    /// The mode a command handler must use.
    #[must_use]
    pub fn for_remote(is_remote: bool) -> Self {
        if is_remote {
            WriteMode::BypassLock
        } else {
            WriteMode::Locked
        }
    }
}

/// Exclusive write lock for the archive stores.
///
/// Cloning shares the same lock.
#[derive(Debug, Clone, Default)]
pub struct ArchiveWriteLock {
    inner: Arc<Mutex<()>>,
}

impl ArchiveWriteLock {
    /// Creates an unlocked lock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for and takes the lock.
    pub async fn acquire(&self) -> OwnedMutexGuard<()> {
        Arc::clone(&self.inner).lock_owned().await
    }

    /// Takes the lock when `mode` asks for it.
    pub async fn acquire_for(&self, mode: WriteMode) -> Option<OwnedMutexGuard<()>> {
        match mode {
            WriteMode::Locked => Some(self.acquire().await),
            WriteMode::BypassLock => None,
        }
    }

    /// Returns true if someone currently holds the lock.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.inner.try_lock().is_err()
    }
}
