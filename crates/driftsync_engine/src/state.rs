//! Sync session state machine.

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::hydration::HydrationState;
use crate::remote::RemoteOpsProcessor;
use crate::transport::OpTransport;
use driftsync_codec::{from_bytes, to_canonical_bytes};
use driftsync_core::{ArchiveWriteLock, CoreError, OperationLogStore, TimeSource};
use driftsync_protocol::Timestamp;
use driftsync_storage::KvStore;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Storage key of the transport cursor.
pub const SYNC_CURSOR_KEY: &str = "sync.cursor";

/// The current state of a sync session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Not syncing.
    Idle,
    /// Pulling operations from peers.
    Pulling,
    /// Pushing local operations.
    Pushing,
    /// The last cycle completed.
    Synced,
    /// The last cycle failed.
    Error,
}

impl SyncState {
    /// Returns true if a cycle is running.
    pub fn is_active(&self) -> bool {
        matches!(self, SyncState::Pulling | SyncState::Pushing)
    }

    /// Returns true if a new cycle may start from this state.
    pub fn can_start_sync(&self) -> bool {
        matches!(self, SyncState::Idle | SyncState::Synced | SyncState::Error)
    }
}

/// Statistics about sync cycles.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Completed cycles.
    pub cycles_completed: u64,
    /// New operations pulled.
    pub operations_pulled: u64,
    /// Operations pushed.
    pub operations_pushed: u64,
    /// Remote operations whose side effects failed.
    pub side_effect_failures: u64,
    /// Retried cycles.
    pub retries: u64,
    /// End of the last successful cycle.
    pub last_sync_time: Option<Timestamp>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Result of one sync cycle.
#[derive(Debug, Clone, Default)]
pub struct SyncCycleResult {
    /// New operations pulled.
    pub pulled: u64,
    /// Operations pushed.
    pub pushed: u64,
    /// Earlier failed operations retried.
    pub retried: u64,
    /// Pulled batches whose side effects failed part-way.
    pub failed_batches: u64,
    /// Duration of the cycle.
    pub duration: Duration,
}

/// Runs pull/push cycles against an [`OpTransport`].
pub struct SyncSession {
    config: EngineConfig,
    transport: Arc<dyn OpTransport>,
    processor: Arc<RemoteOpsProcessor>,
    oplog: Arc<OperationLogStore>,
    store: Arc<dyn KvStore>,
    lock: ArchiveWriteLock,
    hydration: Arc<HydrationState>,
    time: Arc<dyn TimeSource>,
    state: RwLock<SyncState>,
    stats: RwLock<SyncStats>,
}

impl SyncSession {
    /// Creates an idle session.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: EngineConfig,
        transport: Arc<dyn OpTransport>,
        processor: Arc<RemoteOpsProcessor>,
        oplog: Arc<OperationLogStore>,
        store: Arc<dyn KvStore>,
        lock: ArchiveWriteLock,
        hydration: Arc<HydrationState>,
        time: Arc<dyn TimeSource>,
    ) -> Self {
        Self {
            config,
            transport,
            processor,
            oplog,
            store,
            lock,
            hydration,
            time,
            state: RwLock::new(SyncState::Idle),
            stats: RwLock::new(SyncStats::default()),
        }
    }

    /// Gets the current state.
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    fn set_state(&self, state: SyncState) {
        *self.state.write() = state;
    }

    /// Claims the session, refusing while another cycle runs, remote
    /// operations are being applied, or the post-sync cooldown is active.
    fn try_start(&self) -> EngineResult<()> {
        let mut state = self.state.write();
        if !state.can_start_sync() {
            return Err(EngineError::sync_busy(format!("sync already {:?}", *state)));
        }
        if self.hydration.is_applying_remote_ops() {
            return Err(EngineError::sync_busy("applying remote operations"));
        }
        if self.hydration.is_in_sync_window(self.time.now()) {
            return Err(EngineError::sync_busy("post-sync cooldown"));
        }
        *state = SyncState::Pulling;
        Ok(())
    }

    /// Performs one full cycle: retry failed side effects, pull, push.
    ///
    /// The archive write lock is held for the whole cycle; replayed writes
    /// bypass it.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::SyncBusy`] if the cycle could not start, or
    /// the transport or storage error that stopped it.
    pub async fn sync(&self) -> EngineResult<SyncCycleResult> {
        self.try_start()?;
        let start = Instant::now();

        match self.run_cycle().await {
            Ok(mut result) => {
                result.duration = start.elapsed();
                self.set_state(SyncState::Synced);
                let mut stats = self.stats.write();
                stats.cycles_completed += 1;
                stats.operations_pulled += result.pulled;
                stats.operations_pushed += result.pushed;
                stats.side_effect_failures += result.failed_batches;
                stats.last_sync_time = Some(self.time.now());
                stats.last_error = None;
                info!(
                    pulled = result.pulled,
                    pushed = result.pushed,
                    retried = result.retried,
                    "sync cycle completed"
                );
                Ok(result)
            }
            Err(e) => {
                self.set_state(SyncState::Error);
                self.stats.write().last_error = Some(e.to_string());
                warn!(error = %e, "sync cycle failed");
                Err(e)
            }
        }
    }

    /// Performs a sync, retrying transient errors with backoff.
    ///
    /// # Errors
    ///
    /// Returns the last error once retries are exhausted, or the first
    /// non-retryable error.
    pub async fn sync_with_retry(&self) -> EngineResult<SyncCycleResult> {
        let retry = &self.config.retry;
        let mut attempt = 0;
        loop {
            if attempt > 0 {
                tokio::time::sleep(retry.delay_for_attempt(attempt)).await;
                self.stats.write().retries += 1;
            }
            match self.sync().await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && attempt + 1 < retry.max_attempts => {
                    debug!(attempt, error = %e, "retrying sync");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn run_cycle(&self) -> EngineResult<SyncCycleResult> {
        if !self.transport.is_connected() {
            return Err(EngineError::NotConnected);
        }
        let _guard = self.lock.acquire().await;
        let mut result = SyncCycleResult::default();

        result.retried = self.processor.retry_failed_ops().await?.retried as u64;

        let mut cursor = self.load_cursor().await?;
        loop {
            let page = self
                .transport
                .pull(&self.config.client_id, cursor, self.config.pull_batch_size)
                .await?;
            if !page.ops.is_empty() {
                let outcome = self.processor.process_batch(page.ops).await?;
                result.pulled += outcome.new_ops as u64;
                if outcome.failed_op.is_some() {
                    result.failed_batches += 1;
                }
            }
            cursor = page.cursor;
            self.save_cursor(cursor).await?;
            if !page.has_more {
                break;
            }
        }

        self.set_state(SyncState::Pushing);
        let unsynced = self.oplog.get_unsynced().await?;
        if !unsynced.is_empty() {
            let seqs: Vec<u64> = unsynced.iter().map(|e| e.seq).collect();
            let ops = unsynced.into_iter().map(|e| e.op).collect();
            self.transport.push(&self.config.client_id, ops).await?;
            self.oplog.mark_synced(&seqs).await?;
            result.pushed = seqs.len() as u64;
        }
        Ok(result)
    }

    async fn load_cursor(&self) -> EngineResult<u64> {
        let bytes = self
            .store
            .get(SYNC_CURSOR_KEY)
            .await
            .map_err(CoreError::from)?;
        match bytes {
            Some(bytes) => Ok(from_bytes(&bytes).map_err(CoreError::from)?),
            None => Ok(0),
        }
    }

    async fn save_cursor(&self, cursor: u64) -> EngineResult<()> {
        let bytes = to_canonical_bytes(&cursor).map_err(CoreError::from)?;
        self.store
            .put(SYNC_CURSOR_KEY, bytes)
            .await
            .map_err(CoreError::from)?;
        Ok(())
    }
}
