//! Persistence of the two archive tiers.

use crate::error::CoreResult;
use crate::lock::{ArchiveWriteLock, WriteMode};
use driftsync_codec::{from_bytes, to_canonical_bytes};
use driftsync_protocol::ArchiveStore;
use driftsync_storage::KvStore;
use std::fmt;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, warn};

/// Storage key of the young archive.
pub const ARCHIVE_YOUNG_KEY: &str = "archiveYoung";
/// Storage key of the old archive.
pub const ARCHIVE_OLD_KEY: &str = "archiveOld";

/// One of the two archive tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchiveTier {
    /// Recently archived.
    Young,
    /// Rarely accessed.
    Old,
}

impl ArchiveTier {
    /// Both tiers, young first.
    pub const ALL: [ArchiveTier; 2] = [ArchiveTier::Young, ArchiveTier::Old];

    /// Storage key of the tier.
    #[must_use]
    pub fn key(&self) -> &'static str {
        match self {
            ArchiveTier::Young => ARCHIVE_YOUNG_KEY,
            ArchiveTier::Old => ARCHIVE_OLD_KEY,
        }
    }
}

impl fmt::Display for ArchiveTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ArchiveTier::Young => "young",
            ArchiveTier::Old => "old",
        })
    }
}

/// Loads and saves whole archive stores.
///
/// Loads repair `ids`/`entities` disagreement. Read-modify-write sequences go
/// through an [`ArchiveWrite`], which holds the [`ArchiveWriteLock`] from the
/// first load to the last save unless asked to bypass it.
#[derive(Debug, Clone)]
pub struct ArchiveDb {
    store: Arc<dyn KvStore>,
    lock: ArchiveWriteLock,
}

impl ArchiveDb {
    /// Creates an archive db over `store`, guarded by `lock`.
    pub fn new(store: Arc<dyn KvStore>, lock: ArchiveWriteLock) -> Self {
        Self { store, lock }
    }

    /// The write lock guarding this db.
    #[must_use]
    pub fn lock(&self) -> &ArchiveWriteLock {
        &self.lock
    }

    /// Loads a tier; a missing key yields an empty store.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored bytes cannot be read or decoded.
    pub async fn load(&self, tier: ArchiveTier) -> CoreResult<ArchiveStore> {
        let mut archive: ArchiveStore = match self.store.get(tier.key()).await? {
            Some(bytes) => from_bytes(&bytes)?,
            None => ArchiveStore::default(),
        };
        if archive.task.repair() {
            warn!(
                %tier,
                ids = archive.task.ids.len(),
                entities = archive.task.entities.len(),
                "archive task ids disagreed with entities; regenerated ids"
            );
        }
        Ok(archive)
    }

    /// Loads the young tier.
    ///
    /// # Errors
    ///
    /// See [`ArchiveDb::load`].
    pub async fn load_young(&self) -> CoreResult<ArchiveStore> {
        self.load(ArchiveTier::Young).await
    }

    /// Loads the old tier.
    ///
    /// # Errors
    ///
    /// See [`ArchiveDb::load`].
    pub async fn load_old(&self) -> CoreResult<ArchiveStore> {
        self.load(ArchiveTier::Old).await
    }

    /// Starts a read-modify-write sequence.
    ///
    /// With [`WriteMode::Locked`] this waits for the lock and keeps it until
    /// the returned [`ArchiveWrite`] is dropped.
    pub async fn begin_write(&self, mode: WriteMode) -> ArchiveWrite<'_> {
        ArchiveWrite {
            db: self,
            mode,
            guard: self.lock.acquire_for(mode).await,
        }
    }

    /// Saves a whole tier without reading it first.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the write fails.
    pub async fn save(&self, tier: ArchiveTier, archive: &ArchiveStore, mode: WriteMode) -> CoreResult<()> {
        self.begin_write(mode).await.save(tier, archive).await
    }

    /// Saves the young tier without reading it first.
    ///
    /// # Errors
    ///
    /// See [`ArchiveDb::save`].
    pub async fn save_young(&self, archive: &ArchiveStore, mode: WriteMode) -> CoreResult<()> {
        self.save(ArchiveTier::Young, archive, mode).await
    }

    /// Saves the old tier without reading it first.
    ///
    /// # Errors
    ///
    /// See [`ArchiveDb::save`].
    pub async fn save_old(&self, archive: &ArchiveStore, mode: WriteMode) -> CoreResult<()> {
        self.save(ArchiveTier::Old, archive, mode).await
    }

    async fn put(&self, tier: ArchiveTier, archive: &ArchiveStore, mode: WriteMode) -> CoreResult<()> {
        let bytes = to_canonical_bytes(archive)?;
        self.store.put(tier.key(), bytes).await?;
        debug!(%tier, tasks = archive.task.len(), ?mode, "saved archive");
        Ok(())
    }
}

/// An archive read-modify-write in progress.
///
/// Loads and saves made through it all happen under the same lock
/// acquisition, so no locked writer can interleave between them.
pub struct ArchiveWrite<'a> {
    db: &'a ArchiveDb,
    mode: WriteMode,
    guard: Option<OwnedMutexGuard<()>>,
}

impl ArchiveWrite<'_> {
    /// The mode this write was started with.
    #[must_use]
    pub fn mode(&self) -> WriteMode {
        self.mode
    }

    /// Loads a tier. See [`ArchiveDb::load`].
    ///
    /// # Errors
    ///
    /// Returns an error if the stored bytes cannot be read or decoded.
    pub async fn load(&self, tier: ArchiveTier) -> CoreResult<ArchiveStore> {
        self.db.load(tier).await
    }

    /// Loads the young tier.
    ///
    /// # Errors
    ///
    /// See [`ArchiveDb::load`].
    pub async fn load_young(&self) -> CoreResult<ArchiveStore> {
        self.load(ArchiveTier::Young).await
    }

    /// Loads the old tier.
    ///
    /// # Errors
    ///
    /// See [`ArchiveDb::load`].
    pub async fn load_old(&self) -> CoreResult<ArchiveStore> {
        self.load(ArchiveTier::Old).await
    }

    /// Saves a whole tier.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the write fails.
    pub async fn save(&self, tier: ArchiveTier, archive: &ArchiveStore) -> CoreResult<()> {
        self.db.put(tier, archive, self.mode).await
    }

    /// Saves the young tier.
    ///
    /// # Errors
    ///
    /// See [`ArchiveWrite::save`].
    pub async fn save_young(&self, archive: &ArchiveStore) -> CoreResult<()> {
        self.save(ArchiveTier::Young, archive).await
    }

    /// Saves the old tier.
    ///
    /// # Errors
    ///
    /// See [`ArchiveWrite::save`].
    pub async fn save_old(&self, archive: &ArchiveStore) -> CoreResult<()> {
        self.save(ArchiveTier::Old, archive).await
    }
}

impl fmt::Debug for ArchiveWrite<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchiveWrite")
            .field("mode", &self.mode)
            .field("locked", &self.guard.is_some())
            .finish()
    }
}
