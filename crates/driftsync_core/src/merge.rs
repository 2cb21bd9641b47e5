//! Field-level 3-way merge of time-tracking maps.
//!
//! Live state, the young archive and the old archive each hold partial
//! records for the same `(context, date)` pairs. The merge picks every field
//! independently with priority `current > young > old`.

use driftsync_protocol::{ContextTimeTracking, TimeTrackingEntry, TimeTrackingState};
use std::collections::BTreeMap;

/// Merges three time-tracking states field by field.
///
/// Entries left without fields are dropped, as are contexts left without
/// dates. Pure and deterministic.
#[must_use]
pub fn merge_time_tracking_states(
    current: &TimeTrackingState,
    young: &TimeTrackingState,
    old: &TimeTrackingState,
) -> TimeTrackingState {
    TimeTrackingState {
        project: merge_category(&current.project, &young.project, &old.project),
        tag: merge_category(&current.tag, &young.tag, &old.tag),
    }
}

/// Merges two entries; fields of `primary` win.
#[must_use]
pub fn merge_entry(primary: &TimeTrackingEntry, fallback: &TimeTrackingEntry) -> TimeTrackingEntry {
    TimeTrackingEntry {
        start: primary.start.or(fallback.start),
        end: primary.end.or(fallback.end),
        break_count: primary.break_count.or(fallback.break_count),
        break_time: primary.break_time.or(fallback.break_time),
    }
}

fn merge_category(
    current: &ContextTimeTracking,
    young: &ContextTimeTracking,
    old: &ContextTimeTracking,
) -> ContextTimeTracking {
    let mut out = ContextTimeTracking::new();

    // Lowest priority first so each later layer overrides field by field.
    for layer in [old, young, current] {
        for (context_id, dates) in layer {
            let merged_dates = out.entry(context_id.clone()).or_default();
            for (date, entry) in dates {
                let merged = merged_dates.entry(date.clone()).or_default();
                *merged = merge_entry(entry, merged);
            }
        }
    }

    out.retain(|_, dates: &mut BTreeMap<String, TimeTrackingEntry>| {
        dates.retain(|_, entry| !entry.is_empty());
        !dates.is_empty()
    });
    out
}
