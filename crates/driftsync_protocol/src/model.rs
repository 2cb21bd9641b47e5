//! Archive, time-tracking and full-state records.
//!
//! Every keyed collection is a `BTreeMap` so that two clients holding equal
//! records also hold byte-identical encodings.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Milliseconds since the Unix epoch.
pub type Timestamp = i64;

/// A frozen, completed task record kept in an archive store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveTask {
    /// Task id.
    pub id: String,
    /// Title.
    #[serde(default)]
    pub title: String,
    /// Owning project, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    /// Tags attached to the task.
    #[serde(default)]
    pub tag_ids: Vec<String>,
    /// Parent task id for subtasks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Ids of this task's subtasks.
    #[serde(default)]
    pub sub_task_ids: Vec<String>,
    /// Completion flag.
    #[serde(default)]
    pub is_done: bool,
    /// Completion time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done_on: Option<Timestamp>,
    /// Creation time.
    #[serde(default)]
    pub created: Timestamp,
    /// Scheduled day (`YYYY-MM-DD`); cleared on archive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_day: Option<String>,
    /// Scheduled time; cleared on archive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_with_time: Option<Timestamp>,
    /// Reminder id; cleared on archive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reminder_id: Option<String>,
    /// Repeat configuration that spawned this task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat_cfg_id: Option<String>,
    /// Free-text notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Total time spent in milliseconds.
    #[serde(default)]
    pub time_spent: u64,
    /// Time spent per day (`YYYY-MM-DD` -> ms).
    #[serde(default)]
    pub time_spent_on_day: BTreeMap<String, u64>,
    /// Estimated time in milliseconds.
    #[serde(default)]
    pub time_estimate: u64,
    /// Linked issue id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_id: Option<String>,
    /// Linked issue tracker type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_type: Option<String>,
    /// Issue provider the link belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_provider_id: Option<String>,
    /// Last time the linked issue was refreshed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_last_updated: Option<Timestamp>,
    /// Whether the linked issue changed since last viewed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_was_updated: Option<bool>,
    /// Number of attachments on the linked issue.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_attachment_nr: Option<u32>,
    /// Time already booked on the linked issue, per day.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_time_tracked: Option<BTreeMap<String, u64>>,
}

impl ArchiveTask {
    /// Returns true if the task is a top-level task.
    #[must_use]
    pub fn is_parent(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Returns true if the task lost every organizing reference.
    #[must_use]
    pub fn is_orphaned(&self) -> bool {
        self.project_id.is_none() && self.tag_ids.is_empty() && self.parent_id.is_none()
    }

    /// Drops the issue-tracker details that are only useful while the task is live.
    pub fn clear_issue_metadata(&mut self) {
        self.issue_last_updated = None;
        self.issue_was_updated = None;
        self.issue_attachment_nr = None;
        self.issue_time_tracked = None;
    }

    /// Removes every trace of the issue link.
    pub fn unlink_issue(&mut self) {
        self.issue_id = None;
        self.issue_type = None;
        self.issue_provider_id = None;
        self.clear_issue_metadata();
    }

    /// Returns a copy with `changes` laid over the task's fields.
    ///
    /// `changes` uses the same camelCase field names as the persisted record.
    /// The id cannot be changed.
    ///
    /// # Errors
    ///
    /// Returns an error if a changed field does not fit the record's type.
    pub fn with_changes(&self, changes: &Map<String, Value>) -> Result<Self, serde_json::Error> {
        let mut value = serde_json::to_value(self)?;
        if let Value::Object(fields) = &mut value {
            for (key, change) in changes {
                if key != "id" {
                    fields.insert(key.clone(), change.clone());
                }
            }
        }
        serde_json::from_value(value)
    }
}

/// A top-level task together with its subtasks, as handed to move-to-archive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskWithSubTasks {
    /// The parent task.
    pub task: ArchiveTask,
    /// Its subtasks.
    #[serde(default)]
    pub sub_tasks: Vec<ArchiveTask>,
}

/// A partial update of one archived task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskUpdate {
    /// Task id.
    pub id: String,
    /// Changed fields in persisted (camelCase) form.
    pub changes: Map<String, Value>,
}

/// Tracked work period of one context on one day.
///
/// Every field is optional; the 3-way merge picks each one independently.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeTrackingEntry {
    /// Start of work.
    #[serde(rename = "s", default, skip_serializing_if = "Option::is_none")]
    pub start: Option<Timestamp>,
    /// End of work.
    #[serde(rename = "e", default, skip_serializing_if = "Option::is_none")]
    pub end: Option<Timestamp>,
    /// Number of breaks.
    #[serde(rename = "b", default, skip_serializing_if = "Option::is_none")]
    pub break_count: Option<u32>,
    /// Total break time.
    #[serde(rename = "bt", default, skip_serializing_if = "Option::is_none")]
    pub break_time: Option<u64>,
}

impl TimeTrackingEntry {
    /// Returns true if no field is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.start.is_none()
            && self.end.is_none()
            && self.break_count.is_none()
            && self.break_time.is_none()
    }
}

/// Time tracking of one category: context id -> date -> entry.
pub type ContextTimeTracking = BTreeMap<String, BTreeMap<String, TimeTrackingEntry>>;

/// Time tracking for both context categories.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeTrackingState {
    /// Per-project tracking.
    #[serde(default)]
    pub project: ContextTimeTracking,
    /// Per-tag tracking.
    #[serde(default)]
    pub tag: ContextTimeTracking,
}

impl TimeTrackingState {
    /// Returns true if neither category holds any context.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.project.is_empty() && self.tag.is_empty()
    }

    /// Counts date entries across both categories.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.project
            .values()
            .chain(self.tag.values())
            .map(BTreeMap::len)
            .sum()
    }
}

/// Task collection in `ids` + `entities` form.
///
/// Invariant: `ids` lists exactly the keys of `entities`. Every mutating
/// method below keeps `ids` sorted and in sync; data loaded from disk is
/// checked with [`TaskArchive::is_consistent`] and fixed with
/// [`TaskArchive::repair`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskArchive {
    /// Task ids.
    #[serde(default)]
    pub ids: Vec<String>,
    /// Tasks by id.
    #[serde(default)]
    pub entities: BTreeMap<String, ArchiveTask>,
}

impl TaskArchive {
    /// Builds a collection from tasks; later duplicates win.
    pub fn from_tasks(tasks: impl IntoIterator<Item = ArchiveTask>) -> Self {
        let mut archive = Self::default();
        archive.upsert_many(tasks);
        archive
    }

    /// Number of tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Returns true if there are no tasks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Looks up a task.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ArchiveTask> {
        self.entities.get(id)
    }

    /// Returns true if the task exists.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.entities.contains_key(id)
    }

    /// Iterates tasks in id order.
    pub fn tasks(&self) -> impl Iterator<Item = &ArchiveTask> {
        self.entities.values()
    }

    /// Inserts or replaces tasks.
    pub fn upsert_many(&mut self, tasks: impl IntoIterator<Item = ArchiveTask>) {
        for task in tasks {
            self.entities.insert(task.id.clone(), task);
        }
        self.sync_ids();
    }

    /// Removes tasks; missing ids are ignored. Returns the removed tasks.
    pub fn remove_many<'a>(&mut self, ids: impl IntoIterator<Item = &'a str>) -> Vec<ArchiveTask> {
        let removed = ids
            .into_iter()
            .filter_map(|id| self.entities.remove(id))
            .collect();
        self.sync_ids();
        removed
    }

    /// Applies `f` to every task in id order. `f` must not change task ids.
    pub fn update_all(&mut self, mut f: impl FnMut(&mut ArchiveTask)) {
        for task in self.entities.values_mut() {
            f(task);
        }
    }

    /// Returns true if `ids` and `entities` agree.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.ids.len() == self.entities.len()
            && self.ids.iter().all(|id| self.entities.contains_key(id))
    }

    /// Regenerates `ids` from `entities`. Returns true if anything changed.
    pub fn repair(&mut self) -> bool {
        let before = std::mem::take(&mut self.ids);
        self.sync_ids();
        before != self.ids
    }

    fn sync_ids(&mut self) {
        self.ids = self.entities.keys().cloned().collect();
    }
}

/// One archive tier ("young" or "old").
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveStore {
    /// Archived tasks.
    #[serde(default)]
    pub task: TaskArchive,
    /// Archived time tracking.
    #[serde(default)]
    pub time_tracking: TimeTrackingState,
    /// Time of the last young-to-old flush.
    #[serde(default)]
    pub last_time_tracking_flush: Timestamp,
}

/// Complete application data: live state plus both archives.
///
/// Used for full-state imports and as the payload of safety backups.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteSnapshot {
    /// The primary application state, opaque to the sync layer.
    #[serde(default)]
    pub app_state: Value,
    /// Young archive, if part of the data set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_young: Option<ArchiveStore>,
    /// Old archive, if part of the data set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_old: Option<ArchiveStore>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task(id: &str) -> ArchiveTask {
        ArchiveTask {
            id: id.to_string(),
            ..ArchiveTask::default()
        }
    }

    #[test]
    fn upsert_and_remove_keep_ids_in_sync() {
        let mut archive = TaskArchive::from_tasks([task("b"), task("a")]);
        assert_eq!(archive.ids, vec!["a", "b"]);
        assert!(archive.is_consistent());

        archive.upsert_many([task("c"), task("a")]);
        assert_eq!(archive.ids, vec!["a", "b", "c"]);

        let removed = archive.remove_many(["b", "missing"]);
        assert_eq!(removed.len(), 1);
        assert_eq!(archive.ids, vec!["a", "c"]);
        assert!(archive.is_consistent());
    }

    #[test]
    fn repair_regenerates_ids_from_entities() {
        let mut archive = TaskArchive::from_tasks([task("a"), task("b")]);
        archive.ids = vec!["a".into(), "ghost".into()];
        assert!(!archive.is_consistent());

        assert!(archive.repair());
        assert_eq!(archive.ids, vec!["a", "b"]);
        assert!(!archive.repair());
    }

    #[test]
    fn with_changes_overlays_fields_but_not_id() {
        let original = ArchiveTask {
            id: "t1".into(),
            title: "old".into(),
            time_spent: 10,
            ..ArchiveTask::default()
        };
        let changes = json!({"id": "t2", "title": "new", "notes": "n"});
        let updated = original
            .with_changes(changes.as_object().unwrap())
            .unwrap();

        assert_eq!(updated.id, "t1");
        assert_eq!(updated.title, "new");
        assert_eq!(updated.notes.as_deref(), Some("n"));
        assert_eq!(updated.time_spent, 10);
    }

    #[test]
    fn with_changes_rejects_wrong_types() {
        let changes = json!({"timeSpent": "lots"});
        assert!(task("t").with_changes(changes.as_object().unwrap()).is_err());
    }

    #[test]
    fn time_tracking_entry_uses_short_field_names() {
        let entry = TimeTrackingEntry {
            start: Some(1),
            break_count: Some(2),
            ..TimeTrackingEntry::default()
        };
        assert_eq!(serde_json::to_value(entry).unwrap(), json!({"s": 1, "b": 2}));
    }

    #[test]
    fn equal_stores_encode_identically() {
        use driftsync_codec::Encode;

        let mut a = ArchiveStore::default();
        a.task.upsert_many([task("x"), task("y")]);
        a.time_tracking
            .project
            .entry("p1".into())
            .or_default()
            .insert("2024-01-02".into(), TimeTrackingEntry::default());

        let mut b = ArchiveStore::default();
        b.time_tracking
            .project
            .entry("p1".into())
            .or_default()
            .insert("2024-01-02".into(), TimeTrackingEntry::default());
        b.task.upsert_many([task("y"), task("x")]);

        assert_eq!(a.encode().unwrap(), b.encode().unwrap());
    }

    #[test]
    fn orphan_detection() {
        let mut t = task("t");
        assert!(t.is_orphaned());
        t.tag_ids.push("tag".into());
        assert!(!t.is_orphaned());
    }
}
