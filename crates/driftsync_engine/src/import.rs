//! Full-state import.
//!
//! An import replaces application state and both archives with a complete
//! snapshot. The operation log is reset to a single genesis operation that
//! carries the snapshot, so other clients replay the same import.

use crate::app_state::AppStateStore;
use async_trait::async_trait;
use driftsync_core::{
    ArchiveDb, ArchiveSideEffects, BackupReason, CoreError, CoreResult, FullStateImport,
    OperationLogStore, SafetyBackupManager,
};
use driftsync_protocol::{Command, CompleteSnapshot, LoadAllData, PersistentCommand};
use std::sync::Arc;
use tracing::{error, info};

/// Imports complete snapshots over the current state.
pub struct FullStateImporter {
    oplog: Arc<OperationLogStore>,
    app_state: Arc<dyn AppStateStore>,
    router: Arc<dyn ArchiveSideEffects>,
    backups: Arc<SafetyBackupManager>,
    db: ArchiveDb,
    client_id: String,
    schema_version: u32,
}

impl FullStateImporter {
    /// Creates an importer for `client_id`.
    pub fn new(
        oplog: Arc<OperationLogStore>,
        app_state: Arc<dyn AppStateStore>,
        router: Arc<dyn ArchiveSideEffects>,
        backups: Arc<SafetyBackupManager>,
        db: ArchiveDb,
        client_id: impl Into<String>,
        schema_version: u32,
    ) -> Self {
        Self {
            oplog,
            app_state,
            router,
            backups,
            db,
            client_id: client_id.into(),
            schema_version,
        }
    }

    /// Replaces all local data with `data`.
    ///
    /// The current data is backed up first. With `force_conflict` the
    /// genesis operation is left unsynced so the next sync pushes it to
    /// every other client; otherwise the import stays local.
    ///
    /// # Errors
    ///
    /// Returns an error if the backup, log reset or archive write fails.
    pub async fn import(&self, data: CompleteSnapshot, force_conflict: bool) -> CoreResult<()> {
        let current = CompleteSnapshot {
            app_state: self.app_state.snapshot(),
            archive_young: Some(self.db.load_young().await?),
            archive_old: Some(self.db.load_old().await?),
        };
        let backup = self
            .backups
            .create_backup(current, BackupReason::BeforeUpdate, None, None)
            .await?;

        let app_state = data.app_state.clone();
        let command = Command::LoadAllData(LoadAllData {
            app_data_complete: data,
        });
        self.app_state.replace_state(app_state);
        let genesis = self
            .oplog
            .reset_for_local_import(&command, &self.client_id, self.schema_version)
            .await?;
        let (seq, genesis_id) = (genesis.seq, genesis.op.id);
        if !force_conflict {
            self.oplog.mark_synced(&[seq]).await?;
        }

        if let Err(e) = self.router.handle(&PersistentCommand::local(command)).await {
            error!(backup_id = %backup.id, error = %e, "failed to write imported archives");
            return Err(CoreError::import_failed(e.to_string()));
        }
        info!(op_id = %genesis_id, seq, force_conflict, backup_id = %backup.id, "imported complete state");
        Ok(())
    }
}

#[async_trait]
impl FullStateImport for FullStateImporter {
    async fn import_complete(&self, data: CompleteSnapshot, force_conflict: bool) -> CoreResult<()> {
        self.import(data, force_conflict).await
    }
}
