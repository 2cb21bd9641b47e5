//! Operation applier.
//!
//! Applies a batch of operations in four steps:
//!
//! 1. One bulk state transition for the whole batch
//! 2. A yield to the runtime
//! 3. Archive side effects per operation, in order, stopping at the first
//!    failure (skipped for local hydration)
//! 4. Bookkeeping: deferred command replay, the post-sync cooldown and one
//!    archive-changed notification
//!
//! A failed side effect never rolls back step 1.

use crate::app_state::AppStateStore;
use crate::command_bus::CommandBusHandle;
use crate::error::{EngineError, EngineResult};
use crate::hydration::HydrationState;
use driftsync_core::{ArchiveEvent, ArchiveSideEffects, ChangeFeed, TimeSource};
use driftsync_protocol::{Command, Operation, PersistentCommand};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Options for [`OperationApplier::apply_operations`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyOptions {
    /// Startup replay of this client's own log. Side effects already ran
    /// when the operations were created, so the router is skipped.
    pub is_local_hydration: bool,
}

impl ApplyOptions {
    /// Options for a remote batch.
    pub fn remote() -> Self {
        Self {
            is_local_hydration: false,
        }
    }

    /// Options for startup replay.
    pub fn hydration() -> Self {
        Self {
            is_local_hydration: true,
        }
    }
}

/// The operation whose side effect failed.
#[derive(Debug)]
pub struct FailedOp {
    /// The operation.
    pub op: Operation,
    /// What the side effect returned.
    pub error: EngineError,
}

/// Outcome of applying a batch.
#[derive(Debug, Default)]
pub struct ApplyResult {
    /// Operations whose side effects completed, in order.
    pub applied_ops: Vec<Operation>,
    /// The first operation whose side effect failed.
    pub failed_op: Option<FailedOp>,
}

impl ApplyResult {
    /// Ids of the applied operations.
    pub fn applied_ids(&self) -> Vec<String> {
        self.applied_ops.iter().map(|op| op.id.clone()).collect()
    }
}

/// Runs one operation's archive side effect on the remote path.
pub(crate) async fn route_remote(router: &dyn ArchiveSideEffects, op: &Operation) -> EngineResult<()> {
    let command = PersistentCommand::remote(op)?;
    router.handle(&command).await?;
    Ok(())
}

fn is_archive_affecting(op: &Operation) -> bool {
    Command::from_operation(op).is_ok_and(|c| c.is_archive_affecting())
}

/// Applies operation batches to application state and the archive.
pub struct OperationApplier {
    app_state: Arc<dyn AppStateStore>,
    router: Arc<dyn ArchiveSideEffects>,
    hydration: Arc<HydrationState>,
    archive_events: Arc<ChangeFeed<ArchiveEvent>>,
    command_bus: Option<CommandBusHandle>,
    time: Arc<dyn TimeSource>,
    post_sync_cooldown: Duration,
}

impl OperationApplier {
    /// Creates an applier. Deferred local commands are handed back to
    /// `command_bus` after each batch; without a bus they are dropped with a
    /// warning.
    pub fn new(
        app_state: Arc<dyn AppStateStore>,
        router: Arc<dyn ArchiveSideEffects>,
        hydration: Arc<HydrationState>,
        archive_events: Arc<ChangeFeed<ArchiveEvent>>,
        command_bus: Option<CommandBusHandle>,
        time: Arc<dyn TimeSource>,
        post_sync_cooldown: Duration,
    ) -> Self {
        Self {
            app_state,
            router,
            hydration,
            archive_events,
            command_bus,
            time,
            post_sync_cooldown,
        }
    }

    /// Subscribes to archive-changed notifications.
    pub fn subscribe_archive_events(&self) -> tokio::sync::mpsc::UnboundedReceiver<ArchiveEvent> {
        self.archive_events.subscribe()
    }

    /// Applies a batch. See the module docs for the exact sequence.
    pub async fn apply_operations(&self, ops: &[Operation], options: ApplyOptions) -> ApplyResult {
        if ops.is_empty() {
            return ApplyResult::default();
        }

        self.hydration.start_applying_remote_ops();
        self.app_state.apply_bulk(ops);
        tokio::task::yield_now().await;

        let result = if options.is_local_hydration {
            ApplyResult {
                applied_ops: ops.to_vec(),
                failed_op: None,
            }
        } else {
            self.route_in_order(ops).await
        };

        self.hydration.end_applying_remote_ops();
        self.flush_deferred();

        if !options.is_local_hydration {
            self.hydration
                .start_post_sync_cooldown(self.time.now(), self.post_sync_cooldown);
            if ops.iter().any(is_archive_affecting) {
                self.archive_events.emit(ArchiveEvent::RemoteArchiveDataApplied);
            }
        }

        debug!(
            count = ops.len(),
            applied = result.applied_ops.len(),
            failed = result.failed_op.is_some(),
            hydration = options.is_local_hydration,
            "applied operations"
        );
        result
    }

    /// Re-runs side effects only, for operations whose state is already
    /// applied.
    pub async fn replay_side_effects(&self, ops: &[Operation]) -> ApplyResult {
        if ops.is_empty() {
            return ApplyResult::default();
        }
        let result = self.route_in_order(ops).await;
        if result.applied_ops.iter().any(is_archive_affecting) {
            self.archive_events.emit(ArchiveEvent::RemoteArchiveDataApplied);
        }
        result
    }

    async fn route_in_order(&self, ops: &[Operation]) -> ApplyResult {
        let mut result = ApplyResult::default();
        for op in ops {
            match route_remote(self.router.as_ref(), op).await {
                Ok(()) => result.applied_ops.push(op.clone()),
                Err(e) => {
                    error!(op_id = %op.id, action = %op.action_type, error = %e, "archive side effect failed");
                    result.failed_op = Some(FailedOp { op: op.clone(), error: e });
                    break;
                }
            }
        }
        result
    }

    fn flush_deferred(&self) {
        let deferred = self.hydration.take_deferred();
        if deferred.is_empty() {
            return;
        }
        let Some(bus) = &self.command_bus else {
            warn!(count = deferred.len(), "no command bus; dropping deferred commands");
            return;
        };
        debug!(count = deferred.len(), "replaying deferred local commands");
        if let Err(e) = bus.requeue(deferred) {
            error!(error = %e, "failed to replay deferred commands");
        }
    }
}
