//! # driftsync Protocol
//!
//! Pure data types shared by every driftsync layer.
//!
//! This crate provides:
//! - [`VectorClock`] for causal ordering between clients
//! - [`Operation`] for immutable log records
//! - [`Command`], the closed set of commands an operation carries
//! - Archive and time-tracking records ([`ArchiveStore`], [`ArchiveTask`], ...)
//!
//! This is a pure crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(not(test), warn(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

mod clock;
mod command;
mod error;
mod model;
mod operation;

pub use clock::{ClockOrdering, VectorClock};
pub use command::{
    action, entity, Command, CommandMeta, CompressArchive, DeleteIssueProvider,
    DeleteIssueProviders, DeleteProject, DeleteTag, DeleteTags, DeleteTaskRepeatCfg,
    FlushYoungToOld, LoadAllData, MoveToArchive, PersistentCommand, RestoreTask, UpdateTasks,
};
pub use error::{ProtocolError, ProtocolResult};
pub use model::{
    ArchiveStore, ArchiveTask, CompleteSnapshot, ContextTimeTracking, TaskArchive, TaskUpdate,
    TaskWithSubTasks, TimeTrackingEntry, TimeTrackingState, Timestamp,
};
pub use operation::{sort_operations, OpType, Operation};
