//! # driftsync Core
//!
//! Storage-facing half of the driftsync engine.
//!
//! This crate provides:
//! - The append-only operation log with its causal clock and state snapshot
//! - The young/old task archive with flush, compression and task edits
//! - The archive side-effect router
//! - The 3-way time-tracking merge
//! - Safety backups with rolling slot retention

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(not(test), warn(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

mod archive;
mod backup;
mod change_feed;
mod config;
mod error;
mod lock;
mod merge;
mod oplog;
mod router;
mod time;

pub use archive::{
    compress_archive, flatten_tasks, flush_young_to_old, merge_time_tracking_into,
    prepare_for_archive, remove_time_tracking_context, select_tasks_to_flush,
    sort_time_tracking_to_young, ArchiveDb, ArchiveService, ArchiveTier, ArchiveWrite, CompressionStats,
    ContextKind, FlushResult, MoveToArchiveOutcome, TaskArchiveService, ARCHIVE_OLD_KEY,
    ARCHIVE_YOUNG_KEY,
};
pub use backup::{
    place_backup, BackupReason, ConfirmPrompt, FullStateImport, RestoreOutcome, SafetyBackup,
    SafetyBackupManager, SAFETY_BACKUPS_KEY,
};
pub use change_feed::{ArchiveEvent, BackupEvent, ChangeFeed};
pub use config::{ArchiveConfig, BackupConfig, DAY_MS};
pub use error::{CoreError, CoreResult};
pub use lock::{ArchiveWriteLock, WriteMode};
pub use merge::{merge_entry, merge_time_tracking_states};
pub use oplog::{
    ApplicationStatus, OpSource, OperationLogEntry, OperationLogStore, StateSnapshot,
    OPLOG_ENTRY_PREFIX,
};
pub use router::{ArchiveOperationHandler, ArchiveSideEffects};
pub use time::{FixedTimeSource, SystemTimeSource, TimeSource};
