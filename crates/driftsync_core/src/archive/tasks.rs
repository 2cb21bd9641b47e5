//! Task-level reads and edits across both archive tiers.

use super::db::{ArchiveDb, ArchiveTier};
use crate::error::{CoreError, CoreResult};
use crate::lock::WriteMode;
use driftsync_protocol::{ArchiveStore, ArchiveTask, TaskArchive, TaskUpdate};
use std::collections::BTreeSet;
use tracing::debug;

/// Context category for time-tracking cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextKind {
    /// A project.
    Project,
    /// A tag.
    Tag,
}

/// Reads and edits archived tasks wherever they live.
#[derive(Debug, Clone)]
pub struct TaskArchiveService {
    db: ArchiveDb,
}

impl TaskArchiveService {
    /// Creates the service.
    pub fn new(db: ArchiveDb) -> Self {
        Self { db }
    }

    /// All archived tasks from both tiers; young wins on id collisions.
    ///
    /// # Errors
    ///
    /// Returns an error if a tier cannot be loaded.
    pub async fn load(&self) -> CoreResult<TaskArchive> {
        let young = self.db.load_young().await?;
        let old = self.db.load_old().await?;
        let mut merged = old.task;
        merged.upsert_many(young.task.entities.into_values());
        Ok(merged)
    }

    /// Finds a task in young, then old.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TaskNotFound`] if neither tier holds it.
    pub async fn get_by_id(&self, id: &str) -> CoreResult<ArchiveTask> {
        for tier in ArchiveTier::ALL {
            if let Some(task) = self.db.load(tier).await?.task.get(id) {
                return Ok(task.clone());
            }
        }
        Err(CoreError::task_not_found(id))
    }

    /// Returns true if either tier holds the task.
    ///
    /// # Errors
    ///
    /// Returns an error if a tier cannot be loaded.
    pub async fn has_task(&self, id: &str) -> CoreResult<bool> {
        for tier in ArchiveTier::ALL {
            if self.db.load(tier).await?.task.contains(id) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Applies `f` to each tier and saves the tiers it changed.
    async fn modify_each(
        &self,
        mode: WriteMode,
        mut f: impl FnMut(&mut ArchiveStore) -> CoreResult<()>,
    ) -> CoreResult<()> {
        let write = self.db.begin_write(mode).await;
        for tier in ArchiveTier::ALL {
            let original = write.load(tier).await?;
            let mut archive = original.clone();
            f(&mut archive)?;
            if archive != original {
                write.save(tier, &archive).await?;
            }
        }
        Ok(())
    }

    /// Deletes tasks from both tiers; unknown ids are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if a tier cannot be loaded or saved.
    pub async fn delete_tasks(&self, ids: &[String], mode: WriteMode) -> CoreResult<()> {
        self.modify_each(mode, |archive| {
            archive.task.remove_many(ids.iter().map(String::as_str));
            Ok(())
        })
        .await
    }

    /// Removes a restored task and its subtasks from the archive.
    ///
    /// # Errors
    ///
    /// Returns an error if a tier cannot be loaded or saved.
    pub async fn restore_task(&self, task: &ArchiveTask, mode: WriteMode) -> CoreResult<()> {
        let ids: Vec<String> = std::iter::once(task.id.clone())
            .chain(task.sub_task_ids.iter().cloned())
            .collect();
        self.delete_tasks(&ids, mode).await
    }

    /// Updates one task in whichever tier holds it.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TaskNotFound`] if no tier holds it, or
    /// [`CoreError::InvalidTaskUpdate`] if the changes do not fit.
    pub async fn update_task(&self, update: &TaskUpdate, mode: WriteMode) -> CoreResult<()> {
        self.update_tasks(std::slice::from_ref(update), mode).await
    }

    /// Updates several tasks, saving each tier at most once.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TaskNotFound`] for the first id no tier holds;
    /// nothing is written in that case.
    pub async fn update_tasks(&self, updates: &[TaskUpdate], mode: WriteMode) -> CoreResult<()> {
        let write = self.db.begin_write(mode).await;
        let mut tiers = Vec::with_capacity(2);
        for tier in ArchiveTier::ALL {
            let archive = write.load(tier).await?;
            tiers.push((tier, archive.clone(), archive));
        }

        for update in updates {
            let target = tiers
                .iter_mut()
                .find(|(_, _, archive)| archive.task.contains(&update.id))
                .ok_or_else(|| CoreError::task_not_found(&update.id))?;
            let archive = &mut target.2;
            let current = archive
                .task
                .get(&update.id)
                .ok_or_else(|| CoreError::task_not_found(&update.id))?;
            let changed = current
                .with_changes(&update.changes)
                .map_err(|e| CoreError::InvalidTaskUpdate {
                    id: update.id.clone(),
                    message: e.to_string(),
                })?;
            archive.task.upsert_many([changed]);
        }

        for (tier, original, archive) in &tiers {
            if archive != original {
                write.save(*tier, archive).await?;
            }
        }
        debug!(count = updates.len(), "updated archived tasks");
        Ok(())
    }

    /// Deletes every task of a project (with subtasks) and the project's
    /// archived time tracking.
    ///
    /// # Errors
    ///
    /// Returns an error if a tier cannot be loaded or saved.
    pub async fn remove_all_archive_tasks_for_project(&self, project_id: &str, mode: WriteMode) -> CoreResult<()> {
        self.modify_each(mode, |archive| {
            let doomed: Vec<&ArchiveTask> = archive
                .task
                .tasks()
                .filter(|t| t.project_id.as_deref() == Some(project_id))
                .collect();
            let ids = with_subtasks(&archive.task, doomed);
            archive.task.remove_many(ids.iter().map(String::as_str));
            remove_time_tracking_context(archive, ContextKind::Project, project_id);
            Ok(())
        })
        .await
    }

    /// Strips tags from every task; parents left without project, tags and
    /// parent are deleted with their subtasks. The tags' archived time
    /// tracking is removed.
    ///
    /// # Errors
    ///
    /// Returns an error if a tier cannot be loaded or saved.
    pub async fn remove_tags_from_all_tasks(&self, tag_ids: &[String], mode: WriteMode) -> CoreResult<()> {
        self.modify_each(mode, |archive| {
            let mut touched = BTreeSet::new();
            archive.task.update_all(|task| {
                let before = task.tag_ids.len();
                task.tag_ids.retain(|t| !tag_ids.contains(t));
                if task.tag_ids.len() != before {
                    touched.insert(task.id.clone());
                }
            });

            let orphans: Vec<&ArchiveTask> = archive
                .task
                .tasks()
                .filter(|t| touched.contains(&t.id) && t.is_orphaned())
                .collect();
            let ids = with_subtasks(&archive.task, orphans);
            archive.task.remove_many(ids.iter().map(String::as_str));

            for tag_id in tag_ids {
                remove_time_tracking_context(archive, ContextKind::Tag, tag_id);
            }
            Ok(())
        })
        .await
    }

    /// Clears a deleted repeat configuration from every task.
    ///
    /// # Errors
    ///
    /// Returns an error if a tier cannot be loaded or saved.
    pub async fn remove_repeat_cfg_from_archive_tasks(&self, repeat_cfg_id: &str, mode: WriteMode) -> CoreResult<()> {
        self.modify_each(mode, |archive| {
            archive.task.update_all(|task| {
                if task.repeat_cfg_id.as_deref() == Some(repeat_cfg_id) {
                    task.repeat_cfg_id = None;
                }
            });
            Ok(())
        })
        .await
    }

    /// Removes issue links belonging to deleted issue providers.
    ///
    /// # Errors
    ///
    /// Returns an error if a tier cannot be loaded or saved.
    pub async fn unlink_issue_providers_from_archive_tasks(
        &self,
        provider_ids: &[String],
        mode: WriteMode,
    ) -> CoreResult<()> {
        self.modify_each(mode, |archive| {
            archive.task.update_all(|task| {
                if task
                    .issue_provider_id
                    .as_ref()
                    .is_some_and(|p| provider_ids.contains(p))
                {
                    task.unlink_issue();
                }
            });
            Ok(())
        })
        .await
    }
}

fn with_subtasks(archive: &TaskArchive, parents: Vec<&ArchiveTask>) -> BTreeSet<String> {
    let mut ids = BTreeSet::new();
    for parent in parents {
        ids.insert(parent.id.clone());
        ids.extend(parent.sub_task_ids.iter().cloned());
    }
    let children: Vec<String> = archive
        .tasks()
        .filter(|t| t.parent_id.as_ref().is_some_and(|p| ids.contains(p)))
        .map(|t| t.id.clone())
        .collect();
    ids.extend(children);
    ids
}

/// Drops one context's time tracking from an archive.
pub fn remove_time_tracking_context(archive: &mut ArchiveStore, kind: ContextKind, context_id: &str) {
    let category = match kind {
        ContextKind::Project => &mut archive.time_tracking.project,
        ContextKind::Tag => &mut archive.time_tracking.tag,
    };
    category.remove(context_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::ArchiveWriteLock;
    use driftsync_protocol::TimeTrackingEntry;
    use driftsync_storage::InMemoryStore;
    use serde_json::json;
    use std::sync::Arc;

    fn task(id: &str) -> ArchiveTask {
        ArchiveTask {
            id: id.into(),
            is_done: true,
            ..ArchiveTask::default()
        }
    }

    async fn seeded(young: Vec<ArchiveTask>, old: Vec<ArchiveTask>) -> (Arc<InMemoryStore>, TaskArchiveService) {
        let store = Arc::new(InMemoryStore::new());
        let db = ArchiveDb::new(store.clone(), ArchiveWriteLock::new());
        for (tier, tasks) in [(ArchiveTier::Young, young), (ArchiveTier::Old, old)] {
            let archive = ArchiveStore {
                task: TaskArchive::from_tasks(tasks),
                ..ArchiveStore::default()
            };
            db.save(tier, &archive, WriteMode::Locked).await.unwrap();
        }
        (store, TaskArchiveService::new(db))
    }

    #[tokio::test]
    async fn get_by_id_checks_young_then_old() {
        let mut young_copy = task("both");
        young_copy.title = "young".into();
        let mut old_copy = task("both");
        old_copy.title = "old".into();
        let (_, service) = seeded(vec![young_copy], vec![old_copy, task("only-old")]).await;

        assert_eq!(service.get_by_id("both").await.unwrap().title, "young");
        assert!(service.get_by_id("only-old").await.is_ok());
        let err = service.get_by_id("nope").await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(service.load().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn update_missing_task_is_not_found_and_writes_nothing() {
        let (store, service) = seeded(vec![task("a")], vec![]).await;
        let updates = vec![
            TaskUpdate {
                id: "a".into(),
                changes: json!({"title": "x"}).as_object().unwrap().clone(),
            },
            TaskUpdate {
                id: "missing".into(),
                changes: serde_json::Map::new(),
            },
        ];

        assert!(service.update_tasks(&updates, WriteMode::Locked).await.unwrap_err().is_not_found());
        assert_eq!(store.write_count("archiveYoung"), 1);
    }

    #[tokio::test]
    async fn update_lands_in_the_owning_tier() {
        let (_, service) = seeded(vec![task("y")], vec![task("o")]).await;
        let update = TaskUpdate {
            id: "o".into(),
            changes: json!({"notes": "edited"}).as_object().unwrap().clone(),
        };
        service.update_task(&update, WriteMode::Locked).await.unwrap();

        let old = service.db.load_old().await.unwrap();
        assert_eq!(old.task.get("o").unwrap().notes.as_deref(), Some("edited"));
    }

    #[tokio::test]
    async fn restore_removes_parent_and_subtasks() {
        let mut parent = task("p");
        parent.sub_task_ids = vec!["s".into()];
        let mut sub = task("s");
        sub.parent_id = Some("p".into());
        let (_, service) = seeded(vec![parent.clone(), sub, task("other")], vec![]).await;

        service.restore_task(&parent, WriteMode::Locked).await.unwrap();
        service.restore_task(&parent, WriteMode::Locked).await.unwrap();

        let young = service.db.load_young().await.unwrap();
        assert_eq!(young.task.ids, vec!["other"]);
    }

    #[tokio::test]
    async fn project_delete_removes_tasks_and_time_tracking() {
        let mut a = task("a");
        a.project_id = Some("proj".into());
        a.sub_task_ids = vec!["a-sub".into()];
        let mut a_sub = task("a-sub");
        a_sub.parent_id = Some("a".into());
        let mut b = task("b");
        b.project_id = Some("keep".into());
        let (_, service) = seeded(vec![a, a_sub], vec![b]).await;

        let mut young = service.db.load_young().await.unwrap();
        young
            .time_tracking
            .project
            .entry("proj".into())
            .or_default()
            .insert("2024-01-01".into(), TimeTrackingEntry::default());
        service.db.save_young(&young, WriteMode::Locked).await.unwrap();

        service
            .remove_all_archive_tasks_for_project("proj", WriteMode::Locked)
            .await
            .unwrap();

        let young = service.db.load_young().await.unwrap();
        assert!(young.task.is_empty());
        assert!(young.time_tracking.project.is_empty());
        assert!(service.has_task("b").await.unwrap());
    }

    #[tokio::test]
    async fn tag_delete_removes_only_newly_orphaned_parents() {
        let mut tagged_only = task("tagged-only");
        tagged_only.tag_ids = vec!["t1".into()];
        tagged_only.sub_task_ids = vec!["child".into()];
        let mut child = task("child");
        child.parent_id = Some("tagged-only".into());
        let mut multi = task("multi");
        multi.tag_ids = vec!["t1".into(), "t2".into()];
        let untagged = task("untagged");
        let (_, service) = seeded(vec![tagged_only, child, multi, untagged], vec![]).await;

        let ids = vec!["t1".to_string()];
        service.remove_tags_from_all_tasks(&ids, WriteMode::Locked).await.unwrap();
        service.remove_tags_from_all_tasks(&ids, WriteMode::Locked).await.unwrap();

        let young = service.db.load_young().await.unwrap();
        assert_eq!(young.task.ids, vec!["multi", "untagged"]);
        assert_eq!(young.task.get("multi").unwrap().tag_ids, vec!["t2"]);
    }

    #[tokio::test]
    async fn repeat_cfg_and_issue_provider_unlinking() {
        let mut a = task("a");
        a.repeat_cfg_id = Some("rc".into());
        a.issue_id = Some("I-1".into());
        a.issue_type = Some("JIRA".into());
        a.issue_provider_id = Some("prov".into());
        let (store, service) = seeded(vec![], vec![a]).await;

        service
            .remove_repeat_cfg_from_archive_tasks("rc", WriteMode::Locked)
            .await
            .unwrap();
        service
            .unlink_issue_providers_from_archive_tasks(&["prov".to_string()], WriteMode::Locked)
            .await
            .unwrap();

        let task = service.get_by_id("a").await.unwrap();
        assert_eq!(task.repeat_cfg_id, None);
        assert_eq!(task.issue_id, None);
        assert_eq!(task.issue_provider_id, None);
        // Young was never touched beyond seeding.
        assert_eq!(store.write_count("archiveYoung"), 1);
    }
}
