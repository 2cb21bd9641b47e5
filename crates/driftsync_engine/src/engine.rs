//! Engine assembly.
//!
//! Services are constructed once, leaves first, and handed to the services
//! that need them. Nothing is looked up lazily.

use crate::actions::ArchiveActions;
use crate::app_state::AppStateStore;
use crate::applier::OperationApplier;
use crate::command_bus::{CommandBus, CommandBusHandle};
use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::hydration::HydrationState;
use crate::hydrator::{HydrationOutcome, OperationLogHydrator};
use crate::import::FullStateImporter;
use crate::remote::RemoteOpsProcessor;
use crate::state::{SyncCycleResult, SyncSession};
use crate::transport::OpTransport;
use driftsync_core::{
    merge_time_tracking_states, ArchiveDb, ArchiveEvent, ArchiveOperationHandler, ArchiveService,
    ArchiveWriteLock, ChangeFeed, ConfirmPrompt, OperationLogStore, RestoreOutcome,
    SafetyBackupManager, StateSnapshot, TaskArchiveService, TimeSource,
};
use driftsync_protocol::{Command, TimeTrackingState};
use driftsync_storage::KvStore;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::info;

/// One client's complete sync engine.
pub struct SyncEngine {
    config: EngineConfig,
    db: ArchiveDb,
    archive: ArchiveService,
    tasks: TaskArchiveService,
    oplog: Arc<OperationLogStore>,
    backups: Arc<SafetyBackupManager>,
    hydration: Arc<HydrationState>,
    bus: CommandBusHandle,
    applier: Arc<OperationApplier>,
    processor: Arc<RemoteOpsProcessor>,
    importer: Arc<FullStateImporter>,
    hydrator: OperationLogHydrator,
    session: SyncSession,
    actions: ArchiveActions,
}

impl SyncEngine {
    /// Wires an engine over `store`.
    ///
    /// Must be called inside a tokio runtime; the command bus worker is
    /// spawned here and stops when the engine is dropped.
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn KvStore>,
        app_state: Arc<dyn AppStateStore>,
        transport: Arc<dyn OpTransport>,
        time: Arc<dyn TimeSource>,
    ) -> Self {
        let lock = ArchiveWriteLock::new();
        let db = ArchiveDb::new(Arc::clone(&store), lock.clone());
        let archive = ArchiveService::new(db.clone(), config.archive.clone(), Arc::clone(&time));
        let tasks = TaskArchiveService::new(db.clone());
        let router = Arc::new(ArchiveOperationHandler::new(archive.clone(), tasks.clone()));
        let oplog = Arc::new(OperationLogStore::new(Arc::clone(&store), Arc::clone(&time)));
        let backups = Arc::new(SafetyBackupManager::new(
            Arc::clone(&store),
            config.backup.clone(),
            Arc::clone(&time),
        ));
        let hydration = Arc::new(HydrationState::new());

        let (bus, _worker) = CommandBus::new(
            Arc::clone(&oplog),
            router.clone(),
            Arc::clone(&hydration),
            config.client_id.clone(),
            config.schema_version,
        )
        .spawn(config.command_queue_capacity);

        let applier = Arc::new(OperationApplier::new(
            Arc::clone(&app_state),
            router.clone(),
            Arc::clone(&hydration),
            Arc::new(ChangeFeed::new()),
            Some(bus.clone()),
            Arc::clone(&time),
            config.post_sync_cooldown,
        ));
        let processor = Arc::new(RemoteOpsProcessor::new(
            Arc::clone(&oplog),
            Arc::clone(&applier),
            Arc::clone(&backups),
            Arc::clone(&app_state),
            db.clone(),
            config.max_op_retries,
        ));
        let importer = Arc::new(FullStateImporter::new(
            Arc::clone(&oplog),
            Arc::clone(&app_state),
            router,
            Arc::clone(&backups),
            db.clone(),
            config.client_id.clone(),
            config.schema_version,
        ));
        let hydrator = OperationLogHydrator::new(
            Arc::clone(&oplog),
            Arc::clone(&applier),
            app_state,
            Arc::clone(&time),
            config.schema_version,
        );
        let session = SyncSession::new(
            config.clone(),
            transport,
            Arc::clone(&processor),
            Arc::clone(&oplog),
            store,
            lock,
            Arc::clone(&hydration),
            Arc::clone(&time),
        );
        let actions = ArchiveActions::new(archive.clone(), tasks.clone(), bus.clone(), time);

        info!(client_id = %config.client_id, "sync engine ready");
        Self {
            config,
            db,
            archive,
            tasks,
            oplog,
            backups,
            hydration,
            bus,
            applier,
            processor,
            importer,
            hydrator,
            session,
            actions,
        }
    }

    /// Gets the configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The operation log.
    pub fn oplog(&self) -> &Arc<OperationLogStore> {
        &self.oplog
    }

    /// Safety backups.
    pub fn backups(&self) -> &Arc<SafetyBackupManager> {
        &self.backups
    }

    /// Archive move, flush and compression.
    pub fn archive(&self) -> &ArchiveService {
        &self.archive
    }

    /// Task-level archive reads and edits.
    pub fn tasks(&self) -> &TaskArchiveService {
        &self.tasks
    }

    /// Local archive actions.
    pub fn actions(&self) -> &ArchiveActions {
        &self.actions
    }

    /// The sync session.
    pub fn session(&self) -> &SyncSession {
        &self.session
    }

    /// The remote batch processor.
    pub fn processor(&self) -> &Arc<RemoteOpsProcessor> {
        &self.processor
    }

    /// The operation applier.
    pub fn applier(&self) -> &Arc<OperationApplier> {
        &self.applier
    }

    /// The full-state importer.
    pub fn importer(&self) -> &Arc<FullStateImporter> {
        &self.importer
    }

    /// Remote-apply and cooldown state.
    pub fn hydration(&self) -> &Arc<HydrationState> {
        &self.hydration
    }

    /// Queues a local command.
    ///
    /// # Errors
    ///
    /// Returns an error if the command bus has stopped.
    pub async fn dispatch(&self, command: Command) -> EngineResult<()> {
        self.bus.dispatch(command).await
    }

    /// Waits until every command dispatched so far has been handled.
    ///
    /// # Errors
    ///
    /// Returns an error if the command bus has stopped.
    pub async fn flush_commands(&self) -> EngineResult<()> {
        self.bus.barrier().await
    }

    /// Runs one sync cycle.
    ///
    /// # Errors
    ///
    /// See [`SyncSession::sync`].
    pub async fn sync(&self) -> EngineResult<SyncCycleResult> {
        self.session.sync().await
    }

    /// Rebuilds application state from the log. Call once at startup.
    ///
    /// # Errors
    ///
    /// See [`OperationLogHydrator::hydrate`].
    pub async fn hydrate(&self) -> EngineResult<HydrationOutcome> {
        self.hydrator.hydrate().await
    }

    /// Writes a snapshot of the current state.
    ///
    /// # Errors
    ///
    /// See [`OperationLogHydrator::compact`].
    pub async fn compact(&self) -> EngineResult<StateSnapshot> {
        self.hydrator.compact().await
    }

    /// Restores a safety backup after `prompt` confirms.
    ///
    /// # Errors
    ///
    /// See [`SafetyBackupManager::restore_backup`].
    pub async fn restore_backup(
        &self,
        id: &str,
        prompt: &dyn ConfirmPrompt,
    ) -> EngineResult<RestoreOutcome> {
        Ok(self
            .backups
            .restore_backup(id, prompt, self.importer.as_ref())
            .await?)
    }

    /// Live time tracking merged with both archives.
    ///
    /// # Errors
    ///
    /// Returns an error if an archive tier cannot be loaded.
    pub async fn merged_time_tracking(
        &self,
        current: &TimeTrackingState,
    ) -> EngineResult<TimeTrackingState> {
        let young = self.db.load_young().await?;
        let old = self.db.load_old().await?;
        Ok(merge_time_tracking_states(
            current,
            &young.time_tracking,
            &old.time_tracking,
        ))
    }

    /// Subscribes to archive-changed notifications.
    pub fn subscribe_archive_events(&self) -> UnboundedReceiver<ArchiveEvent> {
        self.applier.subscribe_archive_events()
    }
}
