//! Archive operations that read, transform and save both tiers.

use super::compress::{compress_archive, CompressionStats};
use super::db::{ArchiveDb, ArchiveTier, ArchiveWrite};
use super::flush::{
    flatten_tasks, flush_young_to_old, prepare_for_archive, sort_time_tracking_to_young, FlushResult,
};
use crate::config::ArchiveConfig;
use crate::error::CoreResult;
use crate::lock::WriteMode;
use crate::time::TimeSource;
use driftsync_protocol::{
    ArchiveStore, CompressArchive, FlushYoungToOld, TaskWithSubTasks, TimeTrackingState, Timestamp,
};
use std::sync::Arc;
use tracing::{error, info};

/// Result of archiving tasks on the originating client.
#[derive(Debug, Clone, PartialEq)]
pub struct MoveToArchiveOutcome {
    /// The tasks as stored, to be carried by the logged command.
    pub archived: Vec<TaskWithSubTasks>,
    /// Live time tracking after today's-only entries remain.
    pub live_time_tracking: TimeTrackingState,
    /// Set when a flush ran; must be logged so other clients replay it.
    pub flush: Option<FlushYoungToOld>,
}

/// Archive move, flush and compression.
#[derive(Debug, Clone)]
pub struct ArchiveService {
    db: ArchiveDb,
    config: ArchiveConfig,
    time: Arc<dyn TimeSource>,
}

impl ArchiveService {
    /// Creates the service.
    pub fn new(db: ArchiveDb, config: ArchiveConfig, time: Arc<dyn TimeSource>) -> Self {
        Self { db, config, time }
    }

    /// The underlying db.
    #[must_use]
    pub fn db(&self) -> &ArchiveDb {
        &self.db
    }

    /// The archive configuration.
    #[must_use]
    pub fn config(&self) -> &ArchiveConfig {
        &self.config
    }

    /// Archives tasks on the client where the user completed them.
    ///
    /// Writes the tasks and all non-today live time tracking into young, then
    /// runs a flush if one is due. The write lock is held for the whole
    /// sequence. An empty task list writes nothing.
    ///
    /// # Errors
    ///
    /// Returns the first storage error. A failed flush has already been
    /// rolled back when its error is returned.
    pub async fn move_to_archive(
        &self,
        tasks: &[TaskWithSubTasks],
        live_time_tracking: &TimeTrackingState,
    ) -> CoreResult<MoveToArchiveOutcome> {
        if tasks.is_empty() {
            return Ok(MoveToArchiveOutcome {
                archived: Vec::new(),
                live_time_tracking: live_time_tracking.clone(),
                flush: None,
            });
        }

        let now = self.time.now();
        let archived = prepare_for_archive(tasks, now);

        let write = self.db.begin_write(WriteMode::Locked).await;
        let mut young = write.load_young().await?;
        young.task.upsert_many(flatten_tasks(&archived));
        let (live_time_tracking, young_time_tracking) =
            sort_time_tracking_to_young(live_time_tracking, &young.time_tracking, &self.time.today());
        young.time_tracking = young_time_tracking;
        write.save_young(&young).await?;
        info!(count = archived.len(), "moved tasks to archive");

        let old = write.load_old().await?;
        let flush = if self.config.is_flush_due(now, old.last_time_tracking_flush) {
            self.flush_within(&write, now).await?;
            Some(FlushYoungToOld { timestamp: now })
        } else {
            None
        };

        Ok(MoveToArchiveOutcome {
            archived,
            live_time_tracking,
            flush,
        })
    }

    /// Writes tasks archived on another client into young.
    ///
    /// Tasks arrive already stamped; time tracking and flushing are handled
    /// by their own replayed operations.
    ///
    /// # Errors
    ///
    /// Returns an error if the young tier cannot be loaded or saved.
    pub async fn write_tasks_to_archive_for_remote_sync(
        &self,
        tasks: &[TaskWithSubTasks],
        mode: WriteMode,
    ) -> CoreResult<()> {
        if tasks.is_empty() {
            return Ok(());
        }
        let write = self.db.begin_write(mode).await;
        let mut young = write.load_young().await?;
        let before = young.clone();
        young.task.upsert_many(flatten_tasks(tasks));
        if young != before {
            write.save_young(&young).await?;
        }
        Ok(())
    }

    /// Returns true if a flush is due now.
    ///
    /// # Errors
    ///
    /// Returns an error if the old tier cannot be loaded.
    pub async fn is_flush_due(&self) -> CoreResult<bool> {
        let old = self.db.load_old().await?;
        Ok(self
            .config
            .is_flush_due(self.time.now(), old.last_time_tracking_flush))
    }

    /// Flushes young into old as of `timestamp`.
    ///
    /// On a failed write both tiers are restored to their prior contents and
    /// the original error is returned.
    ///
    /// # Errors
    ///
    /// Returns the load, transform or save error that stopped the flush.
    pub async fn flush_young_to_old(&self, timestamp: Timestamp, mode: WriteMode) -> CoreResult<FlushResult> {
        let write = self.db.begin_write(mode).await;
        self.flush_within(&write, timestamp).await
    }

    async fn flush_within(&self, write: &ArchiveWrite<'_>, timestamp: Timestamp) -> CoreResult<FlushResult> {
        let young = write.load_young().await?;
        let old = write.load_old().await?;
        let result = flush_young_to_old(
            &young,
            &old,
            timestamp,
            self.config.task_young_to_old_threshold,
        )?;

        Self::save_both_or_roll_back(write, "flush", (&young, &old), (&result.young, &result.old))
            .await?;
        info!(
            timestamp,
            moved = result.moved_task_ids.len(),
            "flushed young archive into old"
        );
        Ok(result)
    }

    /// Compresses both tiers with the cutoff of `command`.
    ///
    /// # Errors
    ///
    /// Returns the load or save error; failed saves are rolled back.
    pub async fn compress_archive(
        &self,
        command: CompressArchive,
        mode: WriteMode,
    ) -> CoreResult<CompressionStats> {
        let write = self.db.begin_write(mode).await;
        let young = write.load_young().await?;
        let old = write.load_old().await?;
        let (new_young, young_stats) = compress_archive(&young, command.one_year_ago_timestamp);
        let (new_old, old_stats) = compress_archive(&old, command.one_year_ago_timestamp);

        let stats = CompressionStats {
            merged_subtasks: young_stats.merged_subtasks + old_stats.merged_subtasks,
            stripped_tasks: young_stats.stripped_tasks + old_stats.stripped_tasks,
        };
        if stats == CompressionStats::default() {
            return Ok(stats);
        }

        Self::save_both_or_roll_back(&write, "compress", (&young, &old), (&new_young, &new_old))
            .await?;
        info!(
            cutoff = command.one_year_ago_timestamp,
            merged = stats.merged_subtasks,
            stripped = stats.stripped_tasks,
            "compressed archive"
        );
        Ok(stats)
    }

    /// The compression cutoff for `now`.
    #[must_use]
    pub fn compression_cutoff(&self, now: Timestamp) -> Timestamp {
        now.saturating_sub(self.config.compression_age)
    }

    async fn save_both_or_roll_back(
        write: &ArchiveWrite<'_>,
        operation: &'static str,
        original: (&ArchiveStore, &ArchiveStore),
        updated: (&ArchiveStore, &ArchiveStore),
    ) -> CoreResult<()> {
        let result = async {
            write.save_young(updated.0).await?;
            write.save_old(updated.1).await
        }
        .await;

        let Err(original_error) = result else {
            return Ok(());
        };

        error!(operation, error = %original_error, "archive write failed; rolling back");
        let mut rollback_failed = false;
        for (tier, archive) in [(ArchiveTier::Young, original.0), (ArchiveTier::Old, original.1)] {
            if let Err(rollback_error) = write.save(tier, archive).await {
                rollback_failed = true;
                error!(
                    critical = true,
                    operation,
                    %tier,
                    error = %rollback_error,
                    "archive rollback failed; archive may be inconsistent, restore a safety backup"
                );
            }
        }
        if !rollback_failed {
            info!(operation, "archive rolled back");
        }
        Err(original_error)
    }
}
