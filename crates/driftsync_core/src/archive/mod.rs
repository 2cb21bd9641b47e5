//! The tiered task archive.
//!
//! Tasks enter the young tier when archived and move to the old tier once
//! they age past the flush threshold. Both tiers are loaded, transformed and
//! saved whole.

mod compress;
mod db;
mod flush;
mod service;
mod tasks;

pub use compress::{compress_archive, CompressionStats};
pub use db::{ArchiveDb, ArchiveTier, ArchiveWrite, ARCHIVE_OLD_KEY, ARCHIVE_YOUNG_KEY};
pub use flush::{
    flatten_tasks, flush_young_to_old, merge_time_tracking_into, prepare_for_archive,
    select_tasks_to_flush, sort_time_tracking_to_young, FlushResult,
};
pub use service::{ArchiveService, MoveToArchiveOutcome};
pub use tasks::{remove_time_tracking_context, ContextKind, TaskArchiveService};
