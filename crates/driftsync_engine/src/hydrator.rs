//! Startup hydration and snapshot compaction.

use crate::app_state::AppStateStore;
use crate::applier::{ApplyOptions, OperationApplier};
use crate::error::EngineResult;
use driftsync_core::{OperationLogStore, StateSnapshot, TimeSource};
use driftsync_protocol::Operation;
use std::sync::Arc;
use tracing::info;

/// What a hydration run restored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HydrationOutcome {
    /// Sequence the snapshot covered, if one was loaded.
    pub snapshot_seq: Option<u64>,
    /// Operations replayed on top of it.
    pub replayed: usize,
}

/// Rebuilds application state from the snapshot and the log tail.
pub struct OperationLogHydrator {
    oplog: Arc<OperationLogStore>,
    applier: Arc<OperationApplier>,
    app_state: Arc<dyn AppStateStore>,
    time: Arc<dyn TimeSource>,
    schema_version: u32,
}

impl OperationLogHydrator {
    /// Creates a hydrator.
    pub fn new(
        oplog: Arc<OperationLogStore>,
        applier: Arc<OperationApplier>,
        app_state: Arc<dyn AppStateStore>,
        time: Arc<dyn TimeSource>,
        schema_version: u32,
    ) -> Self {
        Self {
            oplog,
            applier,
            app_state,
            time,
            schema_version,
        }
    }

    /// Restores the snapshot and replays every later operation.
    ///
    /// Archive side effects are not re-run; they happened when the
    /// operations were first applied.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot or log cannot be read.
    pub async fn hydrate(&self) -> EngineResult<HydrationOutcome> {
        let snapshot = self.oplog.load_state_cache().await?;
        let after = snapshot.as_ref().map_or(0, |s| s.last_applied_op_seq);
        let snapshot_seq = snapshot.as_ref().map(|s| s.last_applied_op_seq);
        if let Some(snapshot) = snapshot {
            self.app_state.replace_state(snapshot.state);
        }

        let ops: Vec<Operation> = self
            .oplog
            .get_ops_after_seq(after)
            .await?
            .into_iter()
            .map(|entry| entry.op)
            .collect();
        self.applier.apply_operations(&ops, ApplyOptions::hydration()).await;

        info!(?snapshot_seq, replayed = ops.len(), "hydrated application state");
        Ok(HydrationOutcome {
            snapshot_seq,
            replayed: ops.len(),
        })
    }

    /// Writes a snapshot of the current state.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be read or the snapshot written.
    pub async fn compact(&self) -> EngineResult<StateSnapshot> {
        let snapshot = StateSnapshot {
            state: self.app_state.snapshot(),
            last_applied_op_seq: self.oplog.last_seq().await?,
            vector_clock: self.oplog.get_vector_clock().await?,
            compacted_at: self.time.now(),
            schema_version: self.schema_version,
        };
        self.oplog.save_state_cache(&snapshot).await?;
        info!(seq = snapshot.last_applied_op_seq, "compacted application state");
        Ok(snapshot)
    }
}
