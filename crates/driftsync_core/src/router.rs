//! Archive side-effect router.
//!
//! Every archive-affecting command passes through [`ArchiveOperationHandler`]
//! twice in its life: once on the client that issued it (local) and once on
//! every client that replays it (remote). Local paths of commands whose
//! feature already wrote the archive are no-ops. Remote paths write with
//! [`WriteMode::BypassLock`] because the replay session holds the lock.
//!
//! All handlers are idempotent.

use crate::archive::{ArchiveService, ArchiveTier, TaskArchiveService};
use crate::error::CoreResult;
use crate::lock::WriteMode;
use async_trait::async_trait;
use driftsync_protocol::{Command, PersistentCommand, TaskUpdate};
use tracing::{debug, trace};

/// Applies the archive side effects of a command.
#[async_trait]
pub trait ArchiveSideEffects: Send + Sync {
    /// Handles one command. Commands that do not touch the archive succeed
    /// without doing anything.
    async fn handle(&self, command: &PersistentCommand) -> CoreResult<()>;
}

/// The production router over the archive services.
#[derive(Debug, Clone)]
pub struct ArchiveOperationHandler {
    archive: ArchiveService,
    tasks: TaskArchiveService,
}

impl ArchiveOperationHandler {
    /// Creates a router over both services.
    pub fn new(archive: ArchiveService, tasks: TaskArchiveService) -> Self {
        Self { archive, tasks }
    }

    /// Updates only the tasks the archive holds; the rest live in app state.
    async fn update_archived(&self, updates: &[TaskUpdate], mode: WriteMode) -> CoreResult<()> {
        let mut archived = Vec::with_capacity(updates.len());
        for update in updates {
            if self.tasks.has_task(&update.id).await? {
                archived.push(update.clone());
            }
        }
        if archived.is_empty() {
            return Ok(());
        }
        self.tasks.update_tasks(&archived, mode).await
    }
}

#[async_trait]
impl ArchiveSideEffects for ArchiveOperationHandler {
    async fn handle(&self, command: &PersistentCommand) -> CoreResult<()> {
        let is_remote = command.is_remote();
        let mode = WriteMode::for_remote(is_remote);
        trace!(action = command.command.action_type(), is_remote, "routing archive side effect");

        match &command.command {
            // Already written by the issuing feature.
            Command::MoveToArchive(_)
            | Command::RestoreTask(_)
            | Command::UpdateTask(_)
            | Command::UpdateTasks(_)
            | Command::FlushYoungToOld(_)
            | Command::CompressArchive(_)
                if !is_remote =>
            {
                Ok(())
            }

            Command::MoveToArchive(payload) => {
                self.archive
                    .write_tasks_to_archive_for_remote_sync(&payload.tasks, mode)
                    .await
            }
            Command::RestoreTask(payload) => self.tasks.restore_task(&payload.task, mode).await,
            Command::UpdateTask(update) => {
                self.update_archived(std::slice::from_ref(update), mode).await
            }
            Command::UpdateTasks(payload) => self.update_archived(&payload.updates, mode).await,
            Command::FlushYoungToOld(payload) => {
                self.archive.flush_young_to_old(payload.timestamp, mode).await?;
                Ok(())
            }
            Command::CompressArchive(payload) => {
                self.archive.compress_archive(*payload, mode).await?;
                Ok(())
            }

            Command::DeleteProject(payload) => {
                self.tasks
                    .remove_all_archive_tasks_for_project(&payload.project_id, mode)
                    .await
            }
            Command::DeleteTag(payload) => {
                self.tasks
                    .remove_tags_from_all_tasks(std::slice::from_ref(&payload.id), mode)
                    .await
            }
            Command::DeleteTags(payload) => self.tasks.remove_tags_from_all_tasks(&payload.ids, mode).await,
            Command::DeleteTaskRepeatCfg(payload) => {
                self.tasks
                    .remove_repeat_cfg_from_archive_tasks(&payload.task_repeat_cfg_id, mode)
                    .await
            }
            Command::DeleteIssueProvider(payload) => {
                self.tasks
                    .unlink_issue_providers_from_archive_tasks(
                        std::slice::from_ref(&payload.issue_provider_id),
                        mode,
                    )
                    .await
            }
            Command::DeleteIssueProviders(payload) => {
                self.tasks
                    .unlink_issue_providers_from_archive_tasks(&payload.ids, mode)
                    .await
            }
            Command::LoadAllData(payload) => {
                let snapshot = &payload.app_data_complete;
                let write = self.archive.db().begin_write(mode).await;
                for (tier, archive) in [
                    (ArchiveTier::Young, &snapshot.archive_young),
                    (ArchiveTier::Old, &snapshot.archive_old),
                ] {
                    if let Some(archive) = archive {
                        write.save(tier, archive).await?;
                    }
                }
                debug!("archive replaced from full-state import");
                Ok(())
            }

            Command::Other { .. } => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ArchiveDb;
    use crate::config::{ArchiveConfig, DAY_MS};
    use crate::lock::ArchiveWriteLock;
    use crate::time::FixedTimeSource;
    use driftsync_protocol::{
        ArchiveStore, ArchiveTask, CommandMeta, CompleteSnapshot, CompressArchive, DeleteProject,
        FlushYoungToOld, LoadAllData, MoveToArchive, RestoreTask, TaskArchive, TaskWithSubTasks,
    };
    use driftsync_storage::InMemoryStore;
    use serde_json::json;
    use std::sync::Arc;

    const NOW: i64 = 1_700_000_000_000;

    fn router() -> (Arc<InMemoryStore>, ArchiveWriteLock, ArchiveOperationHandler) {
        let store = Arc::new(InMemoryStore::new());
        let lock = ArchiveWriteLock::new();
        let db = ArchiveDb::new(store.clone(), lock.clone());
        let archive = ArchiveService::new(db.clone(), ArchiveConfig::default(), Arc::new(FixedTimeSource::new(NOW)));
        (store, lock, ArchiveOperationHandler::new(archive, TaskArchiveService::new(db)))
    }

    fn remote(command: Command) -> PersistentCommand {
        let meta = CommandMeta {
            is_remote: true,
            ..PersistentCommand::local(command.clone()).meta
        };
        PersistentCommand { command, meta }
    }

    fn done(id: &str, done_on: i64) -> ArchiveTask {
        ArchiveTask {
            id: id.into(),
            is_done: true,
            done_on: Some(done_on),
            ..ArchiveTask::default()
        }
    }

    fn move_cmd() -> Command {
        let mut parent = done("p", NOW - DAY_MS);
        parent.sub_task_ids = vec!["s".into()];
        let mut sub = done("s", NOW - DAY_MS);
        sub.parent_id = Some("p".into());
        Command::MoveToArchive(MoveToArchive {
            tasks: vec![TaskWithSubTasks {
                task: parent,
                sub_tasks: vec![sub],
            }],
        })
    }

    #[tokio::test]
    async fn local_already_done_commands_write_nothing() {
        let (store, _, router) = router();
        router.handle(&PersistentCommand::local(move_cmd())).await.unwrap();
        router
            .handle(&PersistentCommand::local(Command::FlushYoungToOld(FlushYoungToOld { timestamp: NOW })))
            .await
            .unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn remote_move_is_idempotent() {
        let (store, _, router) = router();
        router.handle(&remote(move_cmd())).await.unwrap();
        let first = store.entries();
        router.handle(&remote(move_cmd())).await.unwrap();

        assert_eq!(store.entries(), first);
        assert_eq!(store.write_count("archiveYoung"), 1);
    }

    #[tokio::test]
    async fn remote_restore_and_compress_are_idempotent() {
        let (store, _, router) = router();
        router.handle(&remote(move_cmd())).await.unwrap();

        let compress = remote(Command::CompressArchive(CompressArchive {
            one_year_ago_timestamp: NOW,
        }));
        router.handle(&compress).await.unwrap();
        let after_first = store.entries();
        router.handle(&compress).await.unwrap();
        assert_eq!(store.entries(), after_first);

        let restore = remote(Command::RestoreTask(RestoreTask { task: done("p", NOW) }));
        router.handle(&restore).await.unwrap();
        let after_restore = store.entries();
        router.handle(&restore).await.unwrap();
        assert_eq!(store.entries(), after_restore);
    }

    #[tokio::test]
    async fn remote_handlers_do_not_wait_for_held_lock() {
        let (_, lock, router) = router();
        let _guard = lock.acquire().await;
        let handled = tokio::time::timeout(std::time::Duration::from_secs(1), router.handle(&remote(move_cmd()))).await;
        assert!(handled.is_ok());
    }

    #[tokio::test]
    async fn remote_update_skips_tasks_outside_archive() {
        let (store, _, router) = router();
        router.handle(&remote(move_cmd())).await.unwrap();
        let cmd = Command::from_parts(
            driftsync_protocol::action::UPDATE_TASK,
            &json!({"id": "live-task", "changes": {"title": "x"}}),
        )
        .unwrap();
        router.handle(&remote(cmd)).await.unwrap();
        assert_eq!(store.write_count("archiveYoung"), 1);
    }

    #[tokio::test]
    async fn delete_project_runs_locally_too() {
        let (_, _, router) = router();
        let mut task = done("a", NOW);
        task.project_id = Some("proj".into());
        let snapshot = CompleteSnapshot {
            app_state: json!({}),
            archive_young: Some(ArchiveStore {
                task: TaskArchive::from_tasks([task]),
                ..ArchiveStore::default()
            }),
            archive_old: None,
        };
        router
            .handle(&PersistentCommand::local(Command::LoadAllData(LoadAllData {
                app_data_complete: snapshot,
            })))
            .await
            .unwrap();
        assert!(router.tasks.has_task("a").await.unwrap());

        let delete = Command::DeleteProject(DeleteProject {
            project_id: "proj".into(),
        });
        router.handle(&PersistentCommand::local(delete.clone())).await.unwrap();
        router.handle(&PersistentCommand::local(delete)).await.unwrap();
        assert!(!router.tasks.has_task("a").await.unwrap());
    }

    #[tokio::test]
    async fn unknown_actions_are_ignored() {
        let (store, _, router) = router();
        let cmd = Command::Other {
            action_type: "note/add".into(),
            payload: json!({}),
        };
        router.handle(&remote(cmd)).await.unwrap();
        assert!(store.is_empty());
    }
}
