//! # driftsync Engine
//!
//! Replay, command processing and sync for driftsync.
//!
//! This crate provides:
//! - The operation applier (bulk state transition, ordered archive side
//!   effects, partial-failure reporting)
//! - The local command bus with deferral while remote batches apply
//! - Remote batch processing with bounded retries
//! - Full-state import and startup hydration
//! - The sync session state machine (idle → pulling → pushing → synced)
//! - A transport trait with an in-memory loopback hub
//!
//! ## Key Invariants
//!
//! - A batch is dispatched to application state as one transition
//! - Side effects run one at a time, in log order, and stop at the first failure
//! - Replayed archive writes never take the write lock the session holds
//! - Local commands issued mid-batch are replayed after the batch settles
//! - Pull always happens before push

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(not(test), warn(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

mod actions;
mod app_state;
mod applier;
mod command_bus;
mod config;
mod engine;
mod error;
mod hydration;
mod hydrator;
mod import;
mod remote;
mod state;
mod transport;

pub use actions::ArchiveActions;
pub use app_state::{AppStateStore, MemoryAppStore};
pub use applier::{ApplyOptions, ApplyResult, FailedOp, OperationApplier};
pub use command_bus::{CommandBus, CommandBusHandle};
pub use config::{EngineConfig, RetryConfig};
pub use engine::SyncEngine;
pub use error::{EngineError, EngineResult};
pub use hydration::HydrationState;
pub use hydrator::{HydrationOutcome, OperationLogHydrator};
pub use import::FullStateImporter;
pub use remote::{RemoteBatchOutcome, RemoteOpsProcessor, RetryOutcome};
pub use state::{SyncCycleResult, SyncSession, SyncState, SyncStats, SYNC_CURSOR_KEY};
pub use transport::{LoopbackHub, LoopbackTransport, OpTransport, PullResponse};
