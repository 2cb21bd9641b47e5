//! Property-based test generators using proptest.
//!
//! Generated archives keep the parent/subtask links consistent, so they can
//! be fed straight into flush and compression.

use crate::fixtures::NOW;
use driftsync_core::DAY_MS;
use driftsync_protocol::{
    ArchiveStore, ArchiveTask, ContextTimeTracking, TaskArchive, TimeTrackingEntry, TimeTrackingState, Timestamp,
    VectorClock,
};
use proptest::prelude::*;
use std::collections::BTreeMap;

/// Strategy for client ids.
pub fn client_id_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("client-[a-e]").expect("Invalid regex")
}

/// Strategy for vector clocks over a handful of clients.
pub fn vector_clock_strategy() -> impl Strategy<Value = VectorClock> {
    prop::collection::btree_map(client_id_strategy(), 1u64..50, 0..4)
        .prop_map(|m| m.into_iter().collect())
}

/// Strategy for an optional completion time within the last two years.
pub fn done_on_strategy() -> impl Strategy<Value = Option<Timestamp>> {
    prop::option::weighted(0.9, (0i64..730).prop_map(|days| NOW - days * DAY_MS))
}

/// Strategy for time-tracking entries with any subset of fields set.
pub fn time_tracking_entry_strategy() -> impl Strategy<Value = TimeTrackingEntry> {
    (
        prop::option::of(0i64..1_000_000),
        prop::option::of(0i64..1_000_000),
        prop::option::of(0u32..10),
        prop::option::of(0u64..100_000),
    )
        .prop_map(|(start, end, break_count, break_time)| TimeTrackingEntry {
            start,
            end,
            break_count,
            break_time,
        })
}

/// Strategy for one category of time tracking: context id to date to entry.
pub fn time_tracking_category_strategy() -> impl Strategy<Value = ContextTimeTracking> {
    prop::collection::btree_map(
        "ctx-[a-c]",
        prop::collection::btree_map("2023-0[1-9]-1[0-9]", time_tracking_entry_strategy(), 0..5),
        0..3,
    )
}

/// Strategy for time-tracking state over a few contexts and dates.
pub fn time_tracking_strategy() -> impl Strategy<Value = TimeTrackingState> {
    (time_tracking_category_strategy(), time_tracking_category_strategy())
        .prop_map(|(project, tag)| TimeTrackingState { project, tag })
}

/// Strategy for one parent task with up to three subtasks.
pub fn task_family_strategy(index: usize) -> impl Strategy<Value = Vec<ArchiveTask>> {
    (
        done_on_strategy(),
        prop::collection::vec((done_on_strategy(), 0u64..10_000), 0..4),
        prop::option::of("[a-z ]{0,12}"),
    )
        .prop_map(move |(done_on, subs, notes)| {
            let parent_id = format!("task-{index:03}");
            let mut parent = ArchiveTask {
                id: parent_id.clone(),
                title: parent_id.clone(),
                is_done: true,
                done_on,
                notes,
                issue_id: Some(format!("ISSUE-{index}")),
                issue_type: Some("GITHUB".to_string()),
                issue_was_updated: Some(false),
                ..ArchiveTask::default()
            };
            let mut family = Vec::with_capacity(subs.len() + 1);
            for (i, (sub_done_on, spent)) in subs.into_iter().enumerate() {
                let sub_id = format!("{parent_id}-sub{i}");
                parent.sub_task_ids.push(sub_id.clone());
                family.push(ArchiveTask {
                    id: sub_id.clone(),
                    title: sub_id,
                    parent_id: Some(parent_id.clone()),
                    is_done: true,
                    done_on: sub_done_on,
                    time_spent: spent,
                    time_spent_on_day: BTreeMap::from([("2023-01-10".to_string(), spent)]),
                    ..ArchiveTask::default()
                });
            }
            family.push(parent);
            family
        })
}

/// Strategy for a consistent archive store.
pub fn archive_store_strategy() -> impl Strategy<Value = ArchiveStore> {
    (0usize..6)
        .prop_flat_map(|n| {
            let families: Vec<_> = (0..n).map(task_family_strategy).collect();
            (families, time_tracking_strategy(), 0i64..400)
        })
        .prop_map(|(families, time_tracking, flushed_days_ago)| ArchiveStore {
            task: TaskArchive::from_tasks(families.into_iter().flatten()),
            time_tracking,
            last_time_tracking_flush: NOW - flushed_days_ago * DAY_MS,
        })
}
