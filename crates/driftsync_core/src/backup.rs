//! Safety backups taken before destructive remote updates.
//!
//! At most four backups are kept, in slots:
//!
//! ```text
//! | recent (newest today) | recent (2nd newest today) | oldest today | newest before today |
//! ```
//!
//! The "oldest today" slot survives until the day rolls over. The
//! "before today" slot is only replaced by a strictly newer backup.

use crate::change_feed::{BackupEvent, ChangeFeed};
use crate::config::BackupConfig;
use crate::error::{CoreError, CoreResult};
use crate::time::TimeSource;
use async_trait::async_trait;
use driftsync_codec::{from_bytes, to_canonical_bytes};
use driftsync_protocol::{CompleteSnapshot, Timestamp};
use driftsync_storage::KvStore;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{error, info, warn};

/// Storage key of the backup list.
pub const SAFETY_BACKUPS_KEY: &str = "syncSafetyBackups";

/// Id value that marks a broken record.
const EMPTY_ID: &str = "EMPTY";

/// Why a backup was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackupReason {
    /// Taken automatically before a remote full-state import.
    BeforeUpdate,
    /// Requested by the user.
    Manual,
}

/// A full-state snapshot kept for recovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SafetyBackup {
    /// Backup id.
    pub id: String,
    /// When the backup was taken.
    pub timestamp: Timestamp,
    /// The captured state.
    pub data: CompleteSnapshot,
    /// Why it was taken.
    pub reason: BackupReason,
    /// Last locally applied action, for diagnostics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_changed_model_id: Option<String>,
    /// Models the pending update would overwrite.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub models_to_update: Option<Vec<String>>,
}

impl SafetyBackup {
    fn is_valid(&self) -> bool {
        !self.id.trim().is_empty() && self.id != EMPTY_ID && self.timestamp > 0
    }
}

/// Outcome of a restore request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// The backup was imported.
    Restored,
    /// The user declined; nothing changed.
    Cancelled,
}

/// Asks the user to confirm a restore.
#[async_trait]
pub trait ConfirmPrompt: Send + Sync {
    /// Returns true if the user agreed to overwrite current data.
    async fn confirm(&self, backup: &SafetyBackup) -> bool;
}

/// Imports a complete snapshot over the current state.
#[async_trait]
pub trait FullStateImport: Send + Sync {
    /// Replaces all state with `data`. With `force_conflict` the snapshot
    /// wins over any concurrent remote changes.
    async fn import_complete(&self, data: CompleteSnapshot, force_conflict: bool) -> CoreResult<()>;
}

/// Inserts `backup` into `existing` according to the slot policy.
///
/// `existing` may be in any order; the result is newest first. Pure.
#[must_use]
pub fn place_backup(
    existing: Vec<SafetyBackup>,
    backup: SafetyBackup,
    today_start: Timestamp,
    config: &BackupConfig,
) -> Vec<SafetyBackup> {
    let (mut today, before): (Vec<_>, Vec<_>) = existing
        .into_iter()
        .chain(std::iter::once(backup))
        .partition(|b| b.timestamp >= today_start);

    // Stable sort keeps existing entries ahead of the new one on ties.
    today.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    let mut result: Vec<SafetyBackup> = Vec::with_capacity(config.total_slots());
    let keep_oldest = today.len() > config.max_recent_backups;
    let oldest_today = if keep_oldest { today.pop() } else { None };
    result.extend(today.into_iter().take(config.max_recent_backups));
    result.extend(oldest_today);

    let newest_before = before
        .into_iter()
        .reduce(|kept, candidate| if candidate.timestamp > kept.timestamp { candidate } else { kept });
    result.extend(newest_before);
    result
}

/// Creates, lists, deletes and restores safety backups.
#[derive(Debug)]
pub struct SafetyBackupManager {
    store: Arc<dyn KvStore>,
    config: BackupConfig,
    time: Arc<dyn TimeSource>,
    feed: ChangeFeed<BackupEvent>,
}

impl SafetyBackupManager {
    /// Creates a manager over `store`.
    pub fn new(store: Arc<dyn KvStore>, config: BackupConfig, time: Arc<dyn TimeSource>) -> Self {
        Self {
            store,
            config,
            time,
            feed: ChangeFeed::new(),
        }
    }

    /// Subscribes to list changes. Every mutation emits exactly one event.
    pub fn subscribe(&self) -> UnboundedReceiver<BackupEvent> {
        self.feed.subscribe()
    }

    /// Captures `data` and inserts it into the slot set.
    ///
    /// # Errors
    ///
    /// Returns an error if the list cannot be loaded or saved.
    pub async fn create_backup(
        &self,
        data: CompleteSnapshot,
        reason: BackupReason,
        last_changed_model_id: Option<String>,
        models_to_update: Option<Vec<String>>,
    ) -> CoreResult<SafetyBackup> {
        let now = self.time.now();
        let backup = SafetyBackup {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: now,
            data,
            reason,
            last_changed_model_id,
            models_to_update,
        };

        let existing = self.get_backups().await?;
        let placed = place_backup(existing, backup.clone(), self.time.start_of_day(now), &self.config);
        self.save(&placed).await?;
        info!(
            backup_id = %backup.id,
            ?reason,
            slots_used = placed.len(),
            total_slots = self.config.total_slots(),
            "safety backup saved"
        );
        Ok(backup)
    }

    /// Lists valid backups, newest first.
    ///
    /// Records with a blank or placeholder id or a non-positive timestamp
    /// are dropped. Duplicate ids get a fresh id.
    ///
    /// # Errors
    ///
    /// Returns an error if the list cannot be loaded or decoded.
    pub async fn get_backups(&self) -> CoreResult<Vec<SafetyBackup>> {
        let Some(bytes) = self.store.get(SAFETY_BACKUPS_KEY).await? else {
            return Ok(Vec::new());
        };
        let stored: Vec<SafetyBackup> = from_bytes(&bytes)?;

        let mut seen = HashSet::new();
        let mut backups = Vec::with_capacity(stored.len());
        for mut backup in stored {
            if !backup.is_valid() {
                warn!(backup_id = %backup.id, timestamp = backup.timestamp, "dropping invalid safety backup");
                continue;
            }
            if !seen.insert(backup.id.clone()) {
                let fresh = uuid::Uuid::new_v4().to_string();
                warn!(old_id = %backup.id, new_id = %fresh, "regenerating duplicate safety backup id");
                backup.id = fresh.clone();
                seen.insert(fresh);
            }
            backups.push(backup);
        }
        backups.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(backups)
    }

    /// Looks up one backup.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::BackupNotFound`] if no backup has this id.
    pub async fn get_backup(&self, id: &str) -> CoreResult<SafetyBackup> {
        self.get_backups()
            .await?
            .into_iter()
            .find(|b| b.id == id)
            .ok_or_else(|| CoreError::BackupNotFound { id: id.to_string() })
    }

    /// Deletes one backup.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::BackupNotFound`] if no backup has this id.
    pub async fn delete_backup(&self, id: &str) -> CoreResult<()> {
        let mut backups = self.get_backups().await?;
        let before = backups.len();
        backups.retain(|b| b.id != id);
        if backups.len() == before {
            return Err(CoreError::BackupNotFound { id: id.to_string() });
        }
        self.save(&backups).await?;
        info!(backup_id = id, "safety backup deleted");
        Ok(())
    }

    /// Deletes every backup.
    ///
    /// # Errors
    ///
    /// Returns an error if the empty list cannot be saved.
    pub async fn clear_all_backups(&self) -> CoreResult<()> {
        self.save(&[]).await?;
        info!("all safety backups cleared");
        Ok(())
    }

    /// Restores a backup after the user confirms.
    ///
    /// The snapshot is imported with conflicts forced in its favor.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::BackupNotFound`] for an unknown id and
    /// [`CoreError::RestoreFailed`] with the cause if the import fails.
    pub async fn restore_backup(
        &self,
        id: &str,
        prompt: &dyn ConfirmPrompt,
        importer: &dyn FullStateImport,
    ) -> CoreResult<RestoreOutcome> {
        let backup = self.get_backup(id).await?;
        if !prompt.confirm(&backup).await {
            info!(backup_id = id, "safety backup restore cancelled");
            return Ok(RestoreOutcome::Cancelled);
        }

        match importer.import_complete(backup.data, true).await {
            Ok(()) => {
                info!(backup_id = id, "safety backup restored");
                Ok(RestoreOutcome::Restored)
            }
            Err(e) => {
                error!(backup_id = id, error = %e, "safety backup restore failed");
                Err(CoreError::RestoreFailed {
                    backup_id: id.to_string(),
                    cause: e.to_string(),
                })
            }
        }
    }

    async fn save(&self, backups: &[SafetyBackup]) -> CoreResult<()> {
        self.store
            .put(SAFETY_BACKUPS_KEY, to_canonical_bytes(backups)?)
            .await?;
        self.feed.emit(BackupEvent::BackupsChanged { count: backups.len() });
        Ok(())
    }
}
