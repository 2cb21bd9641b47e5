//! Archive actions issued by the local user.
//!
//! Each action writes the archive first, under the write lock, and then
//! dispatches the matching command so it is logged and replayed on other
//! clients. The router's local path for these commands is a no-op.

use crate::command_bus::CommandBusHandle;
use crate::error::EngineResult;
use driftsync_core::{
    ArchiveService, CompressionStats, MoveToArchiveOutcome, TaskArchiveService, TimeSource,
    WriteMode,
};
use driftsync_protocol::{
    ArchiveTask, Command, CompressArchive, MoveToArchive, RestoreTask, TaskUpdate,
    TaskWithSubTasks, TimeTrackingState, UpdateTasks,
};
use std::sync::Arc;

/// Local archive actions.
pub struct ArchiveActions {
    archive: ArchiveService,
    tasks: TaskArchiveService,
    bus: CommandBusHandle,
    time: Arc<dyn TimeSource>,
}

impl ArchiveActions {
    /// Creates the actions.
    pub fn new(
        archive: ArchiveService,
        tasks: TaskArchiveService,
        bus: CommandBusHandle,
        time: Arc<dyn TimeSource>,
    ) -> Self {
        Self {
            archive,
            tasks,
            bus,
            time,
        }
    }

    /// Archives completed tasks and the live time tracking of past days.
    ///
    /// Dispatches the move with the stamped tasks and, if one ran, the flush.
    ///
    /// # Errors
    ///
    /// Returns the archive error; nothing is dispatched in that case.
    pub async fn archive_tasks(
        &self,
        tasks: &[TaskWithSubTasks],
        live_time_tracking: &TimeTrackingState,
    ) -> EngineResult<MoveToArchiveOutcome> {
        let outcome = self.archive.move_to_archive(tasks, live_time_tracking).await?;
        if !outcome.archived.is_empty() {
            self.bus
                .dispatch(Command::MoveToArchive(MoveToArchive {
                    tasks: outcome.archived.clone(),
                }))
                .await?;
        }
        if let Some(flush) = outcome.flush {
            self.bus.dispatch(Command::FlushYoungToOld(flush)).await?;
        }
        Ok(outcome)
    }

    /// Takes a task and its subtasks out of the archive and returns it.
    ///
    /// # Errors
    ///
    /// Returns a not-found error if the task is not archived.
    pub async fn restore_task(&self, id: &str) -> EngineResult<ArchiveTask> {
        let task = self.tasks.get_by_id(id).await?;
        self.tasks.restore_task(&task, WriteMode::Locked).await?;
        self.bus
            .dispatch(Command::RestoreTask(RestoreTask { task: task.clone() }))
            .await?;
        Ok(task)
    }

    /// Updates one archived task.
    ///
    /// # Errors
    ///
    /// Returns a not-found error if the task is not archived.
    pub async fn update_archived_task(&self, update: TaskUpdate) -> EngineResult<()> {
        self.tasks.update_task(&update, WriteMode::Locked).await?;
        self.bus.dispatch(Command::UpdateTask(update)).await
    }

    /// Updates several archived tasks at once.
    ///
    /// # Errors
    ///
    /// Returns a not-found error if any task is not archived; nothing is
    /// written in that case.
    pub async fn update_archived_tasks(&self, updates: Vec<TaskUpdate>) -> EngineResult<()> {
        self.tasks.update_tasks(&updates, WriteMode::Locked).await?;
        self.bus
            .dispatch(Command::UpdateTasks(UpdateTasks { updates }))
            .await
    }

    /// Compresses archived tasks older than the configured age.
    ///
    /// # Errors
    ///
    /// Returns the archive error; a failed write has been rolled back.
    pub async fn compress_archive(&self) -> EngineResult<CompressionStats> {
        let command = CompressArchive {
            one_year_ago_timestamp: self.archive.compression_cutoff(self.time.now()),
        };
        let stats = self
            .archive
            .compress_archive(command, WriteMode::Locked)
            .await?;
        self.bus.dispatch(Command::CompressArchive(command)).await?;
        Ok(stats)
    }
}
