//! Remote batch processing.
//!
//! Every pulled batch goes through the same pipeline: drop operations that
//! are already logged, validate, sort into causal order, take a safety
//! backup if the batch would replace all data, merge clocks, log the
//! operations as pending, apply them, and record per-operation status.

use crate::app_state::AppStateStore;
use crate::applier::{ApplyOptions, FailedOp, OperationApplier};
use crate::error::EngineResult;
use driftsync_core::{ArchiveDb, BackupReason, OpSource, OperationLogStore, SafetyBackupManager};
use driftsync_protocol::{sort_operations, CompleteSnapshot, OpType, Operation};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What happened to one pulled batch.
#[derive(Debug, Default)]
pub struct RemoteBatchOutcome {
    /// Operations received.
    pub received: usize,
    /// Operations not seen before.
    pub new_ops: usize,
    /// Operations whose side effects completed.
    pub applied: usize,
    /// The operation whose side effect failed, if any.
    pub failed_op: Option<FailedOp>,
    /// Operations that ran out of retries.
    pub rejected: Vec<String>,
    /// Safety backup taken before a full-state import.
    pub backup_id: Option<String>,
}

/// What happened when failed side effects were retried.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RetryOutcome {
    /// Operations retried.
    pub retried: usize,
    /// Operations whose side effects now completed.
    pub applied: usize,
    /// Operations that ran out of retries.
    pub rejected: Vec<String>,
}

/// Runs pulled batches through the log and the applier.
pub struct RemoteOpsProcessor {
    oplog: Arc<OperationLogStore>,
    applier: Arc<OperationApplier>,
    backups: Arc<SafetyBackupManager>,
    app_state: Arc<dyn AppStateStore>,
    db: ArchiveDb,
    max_op_retries: u32,
}

impl RemoteOpsProcessor {
    /// Creates a processor.
    pub fn new(
        oplog: Arc<OperationLogStore>,
        applier: Arc<OperationApplier>,
        backups: Arc<SafetyBackupManager>,
        app_state: Arc<dyn AppStateStore>,
        db: ArchiveDb,
        max_op_retries: u32,
    ) -> Self {
        Self {
            oplog,
            applier,
            backups,
            app_state,
            db,
            max_op_retries,
        }
    }

    /// Processes one pulled batch.
    ///
    /// A failed side effect is reported in the outcome, not as an error. The
    /// failing operation and everything after it are marked failed and
    /// retried on the next sync.
    ///
    /// # Errors
    ///
    /// Returns a protocol error if any new operation is malformed; nothing
    /// is logged or applied in that case. Storage errors are returned as-is.
    pub async fn process_batch(&self, ops: Vec<Operation>) -> EngineResult<RemoteBatchOutcome> {
        let received = ops.len();
        let mut ops = self.oplog.filter_new_ops(ops).await?;
        let mut outcome = RemoteBatchOutcome {
            received,
            new_ops: ops.len(),
            ..RemoteBatchOutcome::default()
        };
        if ops.is_empty() {
            debug!(received, "remote batch contained no new operations");
            return Ok(outcome);
        }

        for op in &ops {
            op.validate()?;
        }
        sort_operations(&mut ops);

        if ops.iter().any(|op| op.op_type == OpType::SyncImport) {
            outcome.backup_id = Some(self.backup_before_import(&ops).await?);
        }

        self.oplog.merge_remote_clocks(&ops).await?;
        self.oplog.append_batch(ops.clone(), OpSource::Remote).await?;

        let result = self.applier.apply_operations(&ops, ApplyOptions::remote()).await;
        self.oplog.mark_applied(&result.applied_ids()).await?;
        outcome.applied = result.applied_ops.len();

        if let Some(failed) = result.failed_op {
            let unapplied: Vec<String> = ops[result.applied_ops.len()..]
                .iter()
                .map(|op| op.id.clone())
                .collect();
            outcome.rejected = self.oplog.mark_failed(&unapplied, self.max_op_retries).await?;
            warn!(
                op_id = %failed.op.id,
                pending = unapplied.len(),
                error = %failed.error,
                "remote batch applied partially"
            );
            outcome.failed_op = Some(failed);
        }

        info!(
            received,
            new_ops = outcome.new_ops,
            applied = outcome.applied,
            "processed remote batch"
        );
        Ok(outcome)
    }

    /// Retries side effects of remote operations that failed earlier.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be read or updated.
    pub async fn retry_failed_ops(&self) -> EngineResult<RetryOutcome> {
        let ops: Vec<Operation> = self
            .oplog
            .get_failed_remote_ops()
            .await?
            .into_iter()
            .map(|entry| entry.op)
            .collect();
        if ops.is_empty() {
            return Ok(RetryOutcome::default());
        }

        let result = self.applier.replay_side_effects(&ops).await;
        self.oplog.mark_applied(&result.applied_ids()).await?;
        let mut outcome = RetryOutcome {
            retried: ops.len(),
            applied: result.applied_ops.len(),
            rejected: Vec::new(),
        };
        if result.failed_op.is_some() {
            let unapplied: Vec<String> = ops[result.applied_ops.len()..]
                .iter()
                .map(|op| op.id.clone())
                .collect();
            outcome.rejected = self.oplog.mark_failed(&unapplied, self.max_op_retries).await?;
        }
        info!(retried = outcome.retried, applied = outcome.applied, "retried failed remote operations");
        Ok(outcome)
    }

    async fn backup_before_import(&self, ops: &[Operation]) -> EngineResult<String> {
        let data = CompleteSnapshot {
            app_state: self.app_state.snapshot(),
            archive_young: Some(self.db.load_young().await?),
            archive_old: Some(self.db.load_old().await?),
        };
        let last_seq = self.oplog.last_seq().await?;
        let last_changed = self
            .oplog
            .get_ops_after_seq(last_seq.saturating_sub(1))
            .await?
            .pop()
            .map(|entry| entry.op.action_type);
        let models: BTreeSet<String> = ops.iter().map(|op| op.entity_type.clone()).collect();

        let backup = self
            .backups
            .create_backup(
                data,
                BackupReason::BeforeUpdate,
                last_changed,
                Some(models.into_iter().collect()),
            )
            .await?;
        Ok(backup.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_state::MemoryAppStore;
    use crate::error::EngineError;
    use crate::hydration::HydrationState;
    use async_trait::async_trait;
    use driftsync_core::{
        ArchiveSideEffects, ArchiveWriteLock, BackupConfig, ChangeFeed, CoreError, CoreResult,
        FixedTimeSource,
    };
    use driftsync_protocol::{action, PersistentCommand, VectorClock};
    use driftsync_storage::InMemoryStore;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::time::Duration;

    struct FailOnce {
        calls: Mutex<Vec<String>>,
        fail_id: Mutex<Option<String>>,
    }

    #[async_trait]
    impl ArchiveSideEffects for FailOnce {
        async fn handle(&self, command: &PersistentCommand) -> CoreResult<()> {
            let id = command.command.entity_ids().join(",");
            self.calls.lock().push(id.clone());
            let mut fail_id = self.fail_id.lock();
            if fail_id.as_deref() == Some(id.as_str()) {
                *fail_id = None;
                return Err(CoreError::inconsistent("write failed"));
            }
            Ok(())
        }
    }

    struct Fixture {
        oplog: Arc<OperationLogStore>,
        backups: Arc<SafetyBackupManager>,
        router: Arc<FailOnce>,
        processor: RemoteOpsProcessor,
    }

    fn fixture(fail_id: Option<&str>) -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let time = Arc::new(FixedTimeSource::new(1_700_000_000_000));
        let oplog = Arc::new(OperationLogStore::new(store.clone(), time.clone()));
        let backups = Arc::new(SafetyBackupManager::new(
            store.clone(),
            BackupConfig::default(),
            time.clone(),
        ));
        let router = Arc::new(FailOnce {
            calls: Mutex::new(Vec::new()),
            fail_id: Mutex::new(fail_id.map(String::from)),
        });
        let app_state = Arc::new(MemoryAppStore::new());
        let applier = Arc::new(OperationApplier::new(
            app_state.clone(),
            router.clone(),
            Arc::new(HydrationState::new()),
            Arc::new(ChangeFeed::new()),
            None,
            time,
            Duration::ZERO,
        ));
        let processor = RemoteOpsProcessor::new(
            oplog.clone(),
            applier,
            backups.clone(),
            app_state,
            ArchiveDb::new(store, ArchiveWriteLock::new()),
            3,
        );
        Fixture {
            oplog,
            backups,
            router,
            processor,
        }
    }

    fn delete_tag(n: u64) -> Operation {
        Operation {
            id: format!("op-{n}"),
            action_type: action::DELETE_TAG.into(),
            op_type: OpType::Delete,
            entity_type: "TAG".into(),
            entity_id: Some(format!("tag-{n}")),
            entity_ids: None,
            payload: json!({"id": format!("tag-{n}")}),
            client_id: "remote".into(),
            vector_clock: [("remote", n)].into_iter().collect::<VectorClock>(),
            timestamp: 1_000 + n as i64,
            schema_version: 1,
        }
    }

    #[tokio::test]
    async fn batch_is_sorted_logged_and_marked_applied() {
        let fx = fixture(None);
        let ops = vec![delete_tag(3), delete_tag(1), delete_tag(2)];

        let outcome = fx.processor.process_batch(ops).await.unwrap();

        assert_eq!((outcome.received, outcome.new_ops, outcome.applied), (3, 3, 3));
        assert_eq!(*fx.router.calls.lock(), vec!["tag-1", "tag-2", "tag-3"]);
        assert_eq!(fx.oplog.get_vector_clock().await.unwrap().get("remote"), 3);
        assert!(fx.oplog.get_failed_remote_ops().await.unwrap().is_empty());
        assert!(outcome.backup_id.is_none());
    }

    #[tokio::test]
    async fn redelivered_ops_are_dropped() {
        let fx = fixture(None);
        fx.processor.process_batch(vec![delete_tag(1)]).await.unwrap();

        let outcome = fx
            .processor
            .process_batch(vec![delete_tag(1), delete_tag(2)])
            .await
            .unwrap();

        assert_eq!((outcome.received, outcome.new_ops), (2, 1));
        assert_eq!(fx.router.calls.lock().len(), 2);
        assert_eq!(fx.oplog.last_seq().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn failed_side_effect_is_retried_later() {
        let fx = fixture(Some("tag-2"));
        let ops: Vec<_> = (1..=3).map(delete_tag).collect();

        let outcome = fx.processor.process_batch(ops).await.unwrap();
        assert_eq!(outcome.applied, 1);
        assert_eq!(outcome.failed_op.as_ref().map(|f| f.op.id.as_str()), Some("op-2"));
        assert_eq!(fx.oplog.get_failed_remote_ops().await.unwrap().len(), 2);

        let retry = fx.processor.retry_failed_ops().await.unwrap();
        assert_eq!((retry.retried, retry.applied), (2, 2));
        assert!(fx.oplog.get_failed_remote_ops().await.unwrap().is_empty());
        assert_eq!(*fx.router.calls.lock(), vec!["tag-1", "tag-2", "tag-2", "tag-3"]);
    }

    #[tokio::test]
    async fn invalid_op_rejects_the_whole_batch() {
        let fx = fixture(None);
        let mut bad = delete_tag(2);
        bad.client_id.clear();

        let err = fx
            .processor
            .process_batch(vec![delete_tag(1), bad])
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::Protocol(_)));
        assert_eq!(fx.oplog.last_seq().await.unwrap(), 0);
        assert!(fx.router.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn full_import_takes_a_backup_first() {
        let fx = fixture(None);
        fx.processor.process_batch(vec![delete_tag(1)]).await.unwrap();

        let import = Operation {
            id: "import".into(),
            action_type: action::LOAD_ALL_DATA.into(),
            op_type: OpType::SyncImport,
            entity_type: "ALL".into(),
            entity_id: None,
            entity_ids: None,
            payload: json!({"appDataComplete": {"appState": {}}}),
            client_id: "remote".into(),
            vector_clock: [("remote", 9)].into_iter().collect::<VectorClock>(),
            timestamp: 9_000,
            schema_version: 1,
        };
        let outcome = fx.processor.process_batch(vec![import]).await.unwrap();

        let backups = fx.backups.get_backups().await.unwrap();
        assert_eq!(backups.len(), 1);
        assert_eq!(outcome.backup_id.as_deref(), Some(backups[0].id.as_str()));
        assert_eq!(backups[0].reason, BackupReason::BeforeUpdate);
        assert_eq!(backups[0].last_changed_model_id.as_deref(), Some(action::DELETE_TAG));
        assert_eq!(backups[0].models_to_update, Some(vec!["ALL".to_string()]));
    }
}
