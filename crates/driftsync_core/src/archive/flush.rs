//! Pure transforms behind archiving and young-to-old flushes.
//!
//! Everything here is a function of its inputs only, so every client that
//! replays a flush with the same timestamp computes identical stores.

use crate::error::{CoreError, CoreResult};
use driftsync_protocol::{
    ArchiveStore, ArchiveTask, ContextTimeTracking, TaskWithSubTasks, TimeTrackingState, Timestamp,
};
use std::collections::BTreeSet;

/// Stamps tasks for the archive.
///
/// Parents without `doneOn` get `now`; subtasks without one inherit the
/// parent's. Scheduling fields are cleared, every record is marked done and
/// parent/subtask links are made mutual.
#[must_use]
pub fn prepare_for_archive(tasks: &[TaskWithSubTasks], now: Timestamp) -> Vec<TaskWithSubTasks> {
    tasks
        .iter()
        .map(|entry| {
            let mut parent = freeze(entry.task.clone());
            let done_on = *parent.done_on.get_or_insert(now);

            let sub_tasks: Vec<ArchiveTask> = entry
                .sub_tasks
                .iter()
                .map(|sub| {
                    let mut sub = freeze(sub.clone());
                    sub.done_on.get_or_insert(done_on);
                    sub.parent_id = Some(parent.id.clone());
                    sub
                })
                .collect();

            for sub in &sub_tasks {
                if !parent.sub_task_ids.contains(&sub.id) {
                    parent.sub_task_ids.push(sub.id.clone());
                }
            }

            TaskWithSubTasks {
                task: parent,
                sub_tasks,
            }
        })
        .collect()
}

fn freeze(mut task: ArchiveTask) -> ArchiveTask {
    task.is_done = true;
    task.due_day = None;
    task.due_with_time = None;
    task.reminder_id = None;
    task
}

/// Flattens parents and subtasks into individual records.
#[must_use]
pub fn flatten_tasks(tasks: &[TaskWithSubTasks]) -> Vec<ArchiveTask> {
    tasks
        .iter()
        .flat_map(|t| std::iter::once(t.task.clone()).chain(t.sub_tasks.iter().cloned()))
        .collect()
}

/// Overlays `source` onto `target`; `source` wins per `(context, date)`.
pub fn merge_time_tracking_into(target: &mut TimeTrackingState, source: &TimeTrackingState) {
    merge_category_into(&mut target.project, &source.project);
    merge_category_into(&mut target.tag, &source.tag);
}

fn merge_category_into(target: &mut ContextTimeTracking, source: &ContextTimeTracking) {
    for (context, dates) in source {
        let target_dates = target.entry(context.clone()).or_default();
        for (date, entry) in dates {
            target_dates.insert(date.clone(), *entry);
        }
    }
}

/// Moves every time-tracking date except `today` from the live state into
/// the young archive's time tracking.
///
/// Returns `(remaining_live, young)`. Today's entries stay live; existing
/// young entries are kept unless a moved entry has the same date.
#[must_use]
pub fn sort_time_tracking_to_young(
    live: &TimeTrackingState,
    young: &TimeTrackingState,
    today: &str,
) -> (TimeTrackingState, TimeTrackingState) {
    let (live_project, moved_project) = split_category_by_day(&live.project, today);
    let (live_tag, moved_tag) = split_category_by_day(&live.tag, today);

    let mut new_young = young.clone();
    merge_time_tracking_into(
        &mut new_young,
        &TimeTrackingState {
            project: moved_project,
            tag: moved_tag,
        },
    );

    (
        TimeTrackingState {
            project: live_project,
            tag: live_tag,
        },
        new_young,
    )
}

fn split_category_by_day(
    category: &ContextTimeTracking,
    today: &str,
) -> (ContextTimeTracking, ContextTimeTracking) {
    let mut keep = ContextTimeTracking::new();
    let mut moved = ContextTimeTracking::new();
    for (context, dates) in category {
        for (date, entry) in dates {
            let target = if date == today { &mut keep } else { &mut moved };
            target
                .entry(context.clone())
                .or_default()
                .insert(date.clone(), *entry);
        }
    }
    (keep, moved)
}

/// Selects the young tasks that move to the old archive.
///
/// Only parents are evaluated: a parent moves when it has no `doneOn`
/// (legacy data) or when `timestamp - doneOn` exceeds `threshold`. Subtasks
/// always move with their parent. Returned ids are sorted.
///
/// # Errors
///
/// Returns [`CoreError::Inconsistent`] if an id has no entity.
pub fn select_tasks_to_flush(
    young: &ArchiveStore,
    timestamp: Timestamp,
    threshold: Timestamp,
) -> CoreResult<Vec<String>> {
    let mut moving = BTreeSet::new();
    for id in &young.task.ids {
        let task = young
            .task
            .get(id)
            .ok_or_else(|| CoreError::inconsistent(format!("young archive lists {id} without entity")))?;
        if !task.is_parent() {
            continue;
        }
        let is_old = match task.done_on {
            Some(done_on) => timestamp.saturating_sub(done_on) > threshold,
            None => true,
        };
        if is_old {
            moving.insert(task.id.clone());
            moving.extend(
                task.sub_task_ids
                    .iter()
                    .filter(|sub| young.task.contains(sub))
                    .cloned(),
            );
        }
    }

    // Subtasks pointing at a moving parent without being listed by it.
    let stragglers: Vec<String> = young
        .task
        .tasks()
        .filter(|t| t.parent_id.as_ref().is_some_and(|p| moving.contains(p)))
        .map(|t| t.id.clone())
        .collect();
    moving.extend(stragglers);

    Ok(moving.into_iter().collect())
}

/// Result of a young-to-old flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushResult {
    /// The new young store.
    pub young: ArchiveStore,
    /// The new old store.
    pub old: ArchiveStore,
    /// Ids of tasks that moved, sorted.
    pub moved_task_ids: Vec<String>,
}

/// Computes a young-to-old flush at `timestamp`.
///
/// Old-enough tasks move with their subtasks, all young time tracking is
/// merged into old (young wins per context and date) and cleared from young,
/// and both stores record `timestamp` as their last flush.
///
/// # Errors
///
/// Returns [`CoreError::Inconsistent`] if the young store lists a task
/// without an entity.
pub fn flush_young_to_old(
    young: &ArchiveStore,
    old: &ArchiveStore,
    timestamp: Timestamp,
    threshold: Timestamp,
) -> CoreResult<FlushResult> {
    let moved_task_ids = select_tasks_to_flush(young, timestamp, threshold)?;

    let mut new_young = young.clone();
    let mut new_old = old.clone();

    let moved = new_young
        .task
        .remove_many(moved_task_ids.iter().map(String::as_str));
    new_old.task.upsert_many(moved);

    merge_time_tracking_into(&mut new_old.time_tracking, &young.time_tracking);
    new_young.time_tracking = TimeTrackingState::default();

    new_young.last_time_tracking_flush = timestamp;
    new_old.last_time_tracking_flush = timestamp;

    Ok(FlushResult {
        young: new_young,
        old: new_old,
        moved_task_ids,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DAY_MS;
    use driftsync_protocol::{TaskArchive, TimeTrackingEntry};

    const NOW: Timestamp = 1_700_000_000_000;
    const THRESHOLD: Timestamp = 21 * DAY_MS;

    fn task(id: &str, done_on: Option<Timestamp>, parent: Option<&str>, subs: &[&str]) -> ArchiveTask {
        ArchiveTask {
            id: id.into(),
            done_on,
            parent_id: parent.map(Into::into),
            sub_task_ids: subs.iter().map(|s| s.to_string()).collect(),
            is_done: true,
            ..ArchiveTask::default()
        }
    }

    fn entry(start: i64) -> TimeTrackingEntry {
        TimeTrackingEntry {
            start: Some(start),
            ..TimeTrackingEntry::default()
        }
    }

    fn store_with(tasks: Vec<ArchiveTask>) -> ArchiveStore {
        ArchiveStore {
            task: TaskArchive::from_tasks(tasks),
            ..ArchiveStore::default()
        }
    }

    #[test]
    fn prepare_stamps_and_clears_scheduling() {
        let parent = ArchiveTask {
            id: "p".into(),
            due_day: Some("2024-01-01".into()),
            due_with_time: Some(5),
            reminder_id: Some("r".into()),
            ..ArchiveTask::default()
        };
        let own = ArchiveTask {
            id: "s1".into(),
            done_on: Some(77),
            ..ArchiveTask::default()
        };
        let inherit = ArchiveTask {
            id: "s2".into(),
            ..ArchiveTask::default()
        };

        let prepared = prepare_for_archive(
            &[TaskWithSubTasks {
                task: parent,
                sub_tasks: vec![own, inherit],
            }],
            NOW,
        );
        let p = &prepared[0].task;
        assert!(p.is_done);
        assert_eq!(p.done_on, Some(NOW));
        assert_eq!(p.due_day, None);
        assert_eq!(p.due_with_time, None);
        assert_eq!(p.reminder_id, None);
        assert_eq!(p.sub_task_ids, vec!["s1", "s2"]);

        assert_eq!(prepared[0].sub_tasks[0].done_on, Some(77));
        assert_eq!(prepared[0].sub_tasks[1].done_on, Some(NOW));
        assert_eq!(prepared[0].sub_tasks[1].parent_id.as_deref(), Some("p"));
    }

    #[test]
    fn only_old_parents_move_and_take_subtasks() {
        let young = store_with(vec![
            task("old", Some(NOW - 22 * DAY_MS), None, &["old-sub"]),
            // A young subtask of an old parent moves regardless of its own age.
            task("old-sub", Some(NOW), Some("old"), &[]),
            task("fresh", Some(NOW - DAY_MS), None, &[]),
            task("legacy", None, None, &[]),
        ]);

        let ids = select_tasks_to_flush(&young, NOW, THRESHOLD).unwrap();
        assert_eq!(ids, vec!["legacy", "old", "old-sub"]);
    }

    #[test]
    fn exactly_threshold_old_stays() {
        let young = store_with(vec![task("edge", Some(NOW - THRESHOLD), None, &[])]);
        assert!(select_tasks_to_flush(&young, NOW, THRESHOLD).unwrap().is_empty());
    }

    #[test]
    fn missing_entity_is_an_error() {
        let mut young = store_with(vec![task("a", None, None, &[])]);
        young.task.ids.push("ghost".into());
        assert!(matches!(
            select_tasks_to_flush(&young, NOW, THRESHOLD),
            Err(CoreError::Inconsistent { .. })
        ));
    }

    #[test]
    fn flush_moves_tasks_and_all_time_tracking() {
        let mut young = store_with(vec![
            task("old", Some(NOW - 30 * DAY_MS), None, &[]),
            task("fresh", Some(NOW), None, &[]),
        ]);
        young
            .time_tracking
            .project
            .entry("p1".into())
            .or_default()
            .insert("2024-01-02".into(), entry(2));

        let mut old = store_with(vec![task("ancient", Some(1), None, &[])]);
        let dates = old.time_tracking.project.entry("p1".into()).or_default();
        dates.insert("2024-01-01".into(), entry(1));
        dates.insert("2024-01-02".into(), entry(99));

        let result = flush_young_to_old(&young, &old, NOW, THRESHOLD).unwrap();

        assert_eq!(result.moved_task_ids, vec!["old"]);
        assert_eq!(result.young.task.ids, vec!["fresh"]);
        assert_eq!(result.old.task.ids, vec!["ancient", "old"]);
        assert!(result.young.time_tracking.is_empty());
        let p1 = &result.old.time_tracking.project["p1"];
        assert_eq!(p1["2024-01-01"], entry(1));
        assert_eq!(p1["2024-01-02"], entry(2));
        assert_eq!(result.young.last_time_tracking_flush, NOW);
        assert_eq!(result.old.last_time_tracking_flush, NOW);
        assert!(result.young.task.is_consistent() && result.old.task.is_consistent());
    }

    #[test]
    fn time_tracking_split_keeps_today_live() {
        let mut live = TimeTrackingState::default();
        let dates = live.tag.entry("t1".into()).or_default();
        dates.insert("2024-05-01".into(), entry(1));
        dates.insert("2024-05-02".into(), entry(2));
        dates.insert("2024-05-03".into(), entry(3));

        let mut young = TimeTrackingState::default();
        let young_dates = young.tag.entry("t1".into()).or_default();
        young_dates.insert("2024-04-01".into(), entry(40));
        young_dates.insert("2024-05-01".into(), entry(50));

        let (remaining, new_young) = sort_time_tracking_to_young(&live, &young, "2024-05-02");

        assert_eq!(remaining.tag["t1"].keys().collect::<Vec<_>>(), vec!["2024-05-02"]);
        let moved = &new_young.tag["t1"];
        assert_eq!(moved["2024-04-01"], entry(40));
        assert_eq!(moved["2024-05-01"], entry(1));
        assert_eq!(moved["2024-05-03"], entry(3));
        assert!(!moved.contains_key("2024-05-02"));
    }
}
