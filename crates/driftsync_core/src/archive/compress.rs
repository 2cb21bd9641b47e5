//! Archive compression.

use driftsync_protocol::{ArchiveStore, ArchiveTask, Timestamp};

/// Summary of one compression pass over a store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompressionStats {
    /// Subtasks folded into their parents and deleted.
    pub merged_subtasks: usize,
    /// Parents whose notes and issue metadata were stripped.
    pub stripped_tasks: usize,
}

fn is_before(done_on: Option<Timestamp>, cutoff: Timestamp) -> bool {
    done_on.map_or(true, |d| d < cutoff)
}

/// Compresses tasks completed before `cutoff`.
///
/// - A subtask whose completion (its own `doneOn`, else its parent's)
///   precedes the cutoff has its time totals added to the parent and is
///   deleted, along with its id in the parent's `subTaskIds`.
/// - A completed parent older than the cutoff loses its notes and issue
///   metadata; issue id and type are kept.
///
/// Subtasks whose parent lives elsewhere are left untouched. Running the
/// function again with the same cutoff changes nothing.
#[must_use]
pub fn compress_archive(store: &ArchiveStore, cutoff: Timestamp) -> (ArchiveStore, CompressionStats) {
    let mut out = store.clone();
    let mut stats = CompressionStats::default();

    let mergeable: Vec<(String, String)> = store
        .task
        .tasks()
        .filter_map(|sub| {
            let parent_id = sub.parent_id.as_ref()?;
            let parent = store.task.get(parent_id)?;
            is_before(sub.done_on.or(parent.done_on), cutoff)
                .then(|| (sub.id.clone(), parent_id.clone()))
        })
        .collect();

    for (sub_id, parent_id) in &mergeable {
        let Some(sub) = out.task.entities.remove(sub_id) else {
            continue;
        };
        if let Some(parent) = out.task.entities.get_mut(parent_id) {
            absorb_subtask(parent, &sub);
        }
        stats.merged_subtasks += 1;
    }
    if !mergeable.is_empty() {
        out.task.repair();
    }

    out.task.update_all(|task| {
        if task.is_parent() && task.is_done && is_before(task.done_on, cutoff) {
            let before = (task.notes.is_some(), has_issue_metadata(task));
            task.notes = None;
            task.clear_issue_metadata();
            if before != (false, false) {
                stats.stripped_tasks += 1;
            }
        }
    });

    (out, stats)
}

fn absorb_subtask(parent: &mut ArchiveTask, sub: &ArchiveTask) {
    parent.time_spent = parent.time_spent.saturating_add(sub.time_spent);
    for (day, ms) in &sub.time_spent_on_day {
        let total = parent.time_spent_on_day.entry(day.clone()).or_insert(0);
        *total = total.saturating_add(*ms);
    }
    parent.sub_task_ids.retain(|id| id != &sub.id);
}

fn has_issue_metadata(task: &ArchiveTask) -> bool {
    task.issue_last_updated.is_some()
        || task.issue_was_updated.is_some()
        || task.issue_attachment_nr.is_some()
        || task.issue_time_tracked.is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftsync_codec::Encode;
    use driftsync_protocol::TaskArchive;
    use std::collections::BTreeMap;

    const CUTOFF: Timestamp = 1_000_000;

    fn parent_with_old_subtask() -> ArchiveStore {
        let parent = ArchiveTask {
            id: "p".into(),
            is_done: true,
            done_on: Some(CUTOFF - 10),
            sub_task_ids: vec!["s".into()],
            time_spent: 100,
            time_spent_on_day: BTreeMap::from([("2023-01-01".to_string(), 100)]),
            notes: Some("long notes".into()),
            issue_id: Some("ISSUE-1".into()),
            issue_type: Some("GITHUB".into()),
            issue_attachment_nr: Some(3),
            ..ArchiveTask::default()
        };
        let sub = ArchiveTask {
            id: "s".into(),
            parent_id: Some("p".into()),
            is_done: true,
            done_on: Some(CUTOFF - 20),
            time_spent: 40,
            time_spent_on_day: BTreeMap::from([
                ("2023-01-01".to_string(), 15),
                ("2023-01-02".to_string(), 25),
            ]),
            ..ArchiveTask::default()
        };
        ArchiveStore {
            task: TaskArchive::from_tasks([parent, sub]),
            ..ArchiveStore::default()
        }
    }

    #[test]
    fn old_subtask_is_folded_into_parent() {
        let (out, stats) = compress_archive(&parent_with_old_subtask(), CUTOFF);

        assert_eq!(stats.merged_subtasks, 1);
        assert!(out.task.tasks().all(|t| t.parent_id.is_none()));
        let parent = out.task.get("p").unwrap();
        assert_eq!(parent.time_spent, 140);
        assert_eq!(parent.time_spent_on_day["2023-01-01"], 115);
        assert_eq!(parent.time_spent_on_day["2023-01-02"], 25);
        assert!(parent.sub_task_ids.is_empty());
        assert!(out.task.is_consistent());
    }

    #[test]
    fn old_parent_loses_notes_but_keeps_issue_reference() {
        let (out, stats) = compress_archive(&parent_with_old_subtask(), CUTOFF);
        let parent = out.task.get("p").unwrap();

        assert_eq!(stats.stripped_tasks, 1);
        assert_eq!(parent.notes, None);
        assert_eq!(parent.issue_attachment_nr, None);
        assert_eq!(parent.issue_id.as_deref(), Some("ISSUE-1"));
        assert_eq!(parent.issue_type.as_deref(), Some("GITHUB"));
    }

    #[test]
    fn recent_tasks_are_untouched() {
        let store = parent_with_old_subtask();
        let (out, stats) = compress_archive(&store, CUTOFF - 1_000);
        assert_eq!(out, store);
        assert_eq!(stats, CompressionStats::default());
    }

    #[test]
    fn compression_is_idempotent_and_deterministic() {
        let store = parent_with_old_subtask();
        let (once, _) = compress_archive(&store, CUTOFF);
        let (twice, stats) = compress_archive(&once, CUTOFF);
        assert_eq!(once, twice);
        assert_eq!(stats, CompressionStats::default());

        let (again, _) = compress_archive(&store, CUTOFF);
        assert_eq!(once.encode().unwrap(), again.encode().unwrap());
    }
}
