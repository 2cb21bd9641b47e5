//! Append-only operation log with a state-snapshot cache.
//!
//! ## Layout
//!
//! ```text
//! oplog.meta              -> LogMeta { first_seq, next_seq }
//! oplog.entry.<seq:020>   -> OperationLogEntry
//! oplog.vectorClock       -> VectorClock
//! oplog.stateCache        -> StateSnapshot
//! ```
//!
//! Sequence numbers are assigned from `next_seq` and never reused. Within one
//! log generation they are contiguous; a clear starts a new generation at the
//! next unused number.
//!
//! Every clock update happens under the index mutex, so a local tick and the
//! append it stamps cannot interleave with another writer.

use crate::error::{CoreError, CoreResult};
use crate::time::TimeSource;
use driftsync_codec::{from_bytes, to_canonical_bytes};
use driftsync_protocol::{Command, Operation, Timestamp, VectorClock};
use driftsync_storage::KvStore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

const META_KEY: &str = "oplog.meta";
/// Key prefix of operation-log entries; the suffix is the zero-padded sequence.
pub const OPLOG_ENTRY_PREFIX: &str = "oplog.entry.";
const CLOCK_KEY: &str = "oplog.vectorClock";
const STATE_CACHE_KEY: &str = "oplog.stateCache";

fn entry_key(seq: u64) -> String {
    format!("{OPLOG_ENTRY_PREFIX}{seq:020}")
}

/// Where a logged operation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpSource {
    /// Created on this client.
    Local,
    /// Received from another client.
    Remote,
}

/// Side-effect status of a received operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplicationStatus {
    /// Stored, not yet applied.
    Pending,
    /// Applied including archive side effects.
    Applied,
    /// State applied but a side effect failed; retried on the next sync.
    Failed,
}

/// A logged operation and its bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationLogEntry {
    /// Sequence number.
    pub seq: u64,
    /// The immutable operation.
    pub op: Operation,
    /// Time the entry was appended.
    pub applied_at: Timestamp,
    /// Origin.
    pub source: OpSource,
    /// When a local op was acknowledged by the transport.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synced_at: Option<Timestamp>,
    /// When the op was given up on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejected_at: Option<Timestamp>,
    /// Application status for remote ops.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_status: Option<ApplicationStatus>,
    /// Failed application attempts so far.
    #[serde(default)]
    pub retry_count: u32,
}

/// Point-in-time materialization of applied operations.
///
/// Re-applying every op with `seq > last_applied_op_seq` on top of `state`
/// reproduces the current application state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    /// Application state.
    pub state: Value,
    /// Last sequence folded into `state`.
    pub last_applied_op_seq: u64,
    /// Clock at snapshot time.
    pub vector_clock: VectorClock,
    /// Snapshot time.
    pub compacted_at: Timestamp,
    /// Schema version of `state`.
    #[serde(default)]
    pub schema_version: u32,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogMeta {
    first_seq: u64,
    next_seq: u64,
}

impl LogMeta {
    fn fresh() -> Self {
        Self {
            first_seq: 1,
            next_seq: 1,
        }
    }

    fn seqs(&self) -> std::ops::Range<u64> {
        self.first_seq..self.next_seq
    }
}

#[derive(Debug, Default)]
struct LogIndex {
    meta: LogMeta,
    by_id: HashMap<String, u64>,
}

/// The operation log store.
///
/// All methods serialize on an internal async mutex, so sequence assignment
/// is race-free even when several tasks append concurrently.
#[derive(Debug)]
pub struct OperationLogStore {
    store: Arc<dyn KvStore>,
    time: Arc<dyn TimeSource>,
    index: Mutex<Option<LogIndex>>,
}

impl OperationLogStore {
    /// Creates a log over `store`. Nothing is read until first use.
    pub fn new(store: Arc<dyn KvStore>, time: Arc<dyn TimeSource>) -> Self {
        Self {
            store,
            time,
            index: Mutex::new(None),
        }
    }

    async fn read_entry(&self, seq: u64) -> CoreResult<OperationLogEntry> {
        let bytes = self
            .store
            .get(&entry_key(seq))
            .await?
            .ok_or_else(|| CoreError::oplog_corrupted(format!("missing entry {seq}")))?;
        Ok(from_bytes(&bytes)?)
    }

    async fn write_entry(&self, entry: &OperationLogEntry) -> CoreResult<()> {
        self.store
            .put(&entry_key(entry.seq), to_canonical_bytes(entry)?)
            .await?;
        Ok(())
    }

    async fn write_meta(&self, meta: &LogMeta) -> CoreResult<()> {
        self.store.put(META_KEY, to_canonical_bytes(meta)?).await?;
        Ok(())
    }

    async fn load_index(&self) -> CoreResult<LogIndex> {
        let meta = match self.store.get(META_KEY).await? {
            Some(bytes) => from_bytes(&bytes)?,
            None => LogMeta::fresh(),
        };
        let mut by_id = HashMap::new();
        for seq in meta.seqs() {
            let entry = self.read_entry(seq).await?;
            by_id.insert(entry.op.id, seq);
        }
        debug!(entries = by_id.len(), next_seq = meta.next_seq, "loaded operation log");
        Ok(LogIndex { meta, by_id })
    }

    async fn index_guard(&self) -> CoreResult<MutexGuard<'_, Option<LogIndex>>> {
        let mut guard = self.index.lock().await;
        if guard.is_none() {
            *guard = Some(self.load_index().await?);
        }
        Ok(guard)
    }

    async fn with_index<T>(
        &self,
        f: impl FnOnce(&mut LogIndex) -> T,
    ) -> CoreResult<T> {
        let mut guard = self.index_guard().await?;
        Ok(f(loaded(&mut guard)?))
    }

    /// Appends one operation and returns its sequence number.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DuplicateOperation`] if the id is already logged.
    pub async fn append(&self, op: Operation, source: OpSource) -> CoreResult<u64> {
        single(self.append_batch(vec![op], source).await?)
    }

    /// Appends operations in order and returns their sequence numbers.
    ///
    /// The batch is checked for duplicates before anything is written.
    ///
    /// # Errors
    ///
    /// Returns an error if an id is already logged or the store fails.
    pub async fn append_batch(&self, ops: Vec<Operation>, source: OpSource) -> CoreResult<Vec<u64>> {
        let mut guard = self.index_guard().await?;
        self.append_to(loaded(&mut guard)?, ops, source).await
    }

    async fn append_to(&self, index: &mut LogIndex, ops: Vec<Operation>, source: OpSource) -> CoreResult<Vec<u64>> {
        let mut seen = HashSet::new();
        for op in &ops {
            if index.by_id.contains_key(&op.id) || !seen.insert(op.id.as_str()) {
                return Err(CoreError::DuplicateOperation {
                    op_id: op.id.clone(),
                });
            }
        }

        let now = self.time.now();
        let mut seqs = Vec::with_capacity(ops.len());
        for op in ops {
            let seq = index.meta.next_seq;
            let entry = OperationLogEntry {
                seq,
                applied_at: now,
                source,
                synced_at: None,
                rejected_at: None,
                application_status: match source {
                    OpSource::Remote => Some(ApplicationStatus::Pending),
                    OpSource::Local => None,
                },
                retry_count: 0,
                op,
            };
            self.write_entry(&entry).await?;
            index.meta.next_seq = seq + 1;
            self.write_meta(&index.meta).await?;
            index.by_id.insert(entry.op.id.clone(), seq);
            seqs.push(seq);
        }
        Ok(seqs)
    }

    /// Stamps a local command with the next clock tick, logs it and returns the
    /// entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized or the store fails.
    pub async fn append_local(
        &self,
        command: &Command,
        client_id: &str,
        schema_version: u32,
    ) -> CoreResult<OperationLogEntry> {
        let mut guard = self.index_guard().await?;
        let index = loaded(&mut guard)?;
        let clock = self.read_clock().await?.tick(client_id);
        let op = command.to_operation(client_id, clock.clone(), self.time.now(), schema_version)?;
        let seq = single(self.append_to(index, vec![op], OpSource::Local).await?)?;
        self.write_clock(&clock).await?;
        self.read_entry(seq).await
    }

    /// Returns all entries with `seq > after`, in append order.
    ///
    /// # Errors
    ///
    /// Returns an error if an entry inside the live range is missing.
    pub async fn get_ops_after_seq(&self, after: u64) -> CoreResult<Vec<OperationLogEntry>> {
        let meta = self.with_index(|i| i.meta).await?;
        let start = meta.first_seq.max(after.saturating_add(1));
        let mut out = Vec::new();
        for seq in start..meta.next_seq {
            out.push(self.read_entry(seq).await?);
        }
        Ok(out)
    }

    /// Returns the entry of an operation id, if logged.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn get_op_by_id(&self, op_id: &str) -> CoreResult<Option<OperationLogEntry>> {
        match self.with_index(|i| i.by_id.get(op_id).copied()).await? {
            Some(seq) => Ok(Some(self.read_entry(seq).await?)),
            None => Ok(None),
        }
    }

    /// Returns true if the operation id is logged.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be loaded.
    pub async fn has_op(&self, op_id: &str) -> CoreResult<bool> {
        self.with_index(|i| i.by_id.contains_key(op_id)).await
    }

    /// Keeps only operations not yet logged, dropping in-batch duplicates.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be loaded.
    pub async fn filter_new_ops(&self, ops: Vec<Operation>) -> CoreResult<Vec<Operation>> {
        self.with_index(|i| {
            let mut seen = HashSet::new();
            ops.into_iter()
                .filter(|op| !i.by_id.contains_key(&op.id) && seen.insert(op.id.clone()))
                .collect()
        })
        .await
    }

    /// Highest assigned sequence number, or 0 for a fresh log.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be loaded.
    pub async fn last_seq(&self) -> CoreResult<u64> {
        self.with_index(|i| i.meta.next_seq.saturating_sub(1)).await
    }

    /// Number of entries in the current generation.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be loaded.
    pub async fn entry_count(&self) -> CoreResult<u64> {
        self.with_index(|i| i.meta.next_seq - i.meta.first_seq).await
    }

    /// Local entries not yet acknowledged by the transport.
    ///
    /// # Errors
    ///
    /// Returns an error if an entry cannot be read.
    pub async fn get_unsynced(&self) -> CoreResult<Vec<OperationLogEntry>> {
        Ok(self
            .get_ops_after_seq(0)
            .await?
            .into_iter()
            .filter(|e| e.source == OpSource::Local && e.synced_at.is_none() && e.rejected_at.is_none())
            .collect())
    }

    /// Remote entries whose side effects failed and are still retryable.
    ///
    /// # Errors
    ///
    /// Returns an error if an entry cannot be read.
    pub async fn get_failed_remote_ops(&self) -> CoreResult<Vec<OperationLogEntry>> {
        Ok(self
            .get_ops_after_seq(0)
            .await?
            .into_iter()
            .filter(|e| {
                e.source == OpSource::Remote
                    && e.rejected_at.is_none()
                    && matches!(
                        e.application_status,
                        Some(ApplicationStatus::Failed | ApplicationStatus::Pending)
                    )
            })
            .collect())
    }

    async fn update_entries(
        &self,
        seqs: impl IntoIterator<Item = u64>,
        mut f: impl FnMut(&mut OperationLogEntry),
    ) -> CoreResult<()> {
        for seq in seqs {
            let mut entry = self.read_entry(seq).await?;
            f(&mut entry);
            self.write_entry(&entry).await?;
        }
        Ok(())
    }

    async fn seqs_for_ids(&self, op_ids: &[String]) -> CoreResult<Vec<u64>> {
        self.with_index(|i| op_ids.iter().filter_map(|id| i.by_id.get(id).copied()).collect())
            .await
    }

    /// Marks local entries as acknowledged by the transport.
    ///
    /// # Errors
    ///
    /// Returns an error if an entry cannot be rewritten.
    pub async fn mark_synced(&self, seqs: &[u64]) -> CoreResult<()> {
        let now = self.time.now();
        self.update_entries(seqs.iter().copied(), |e| e.synced_at = Some(now))
            .await
    }

    /// Marks operations as fully applied.
    ///
    /// # Errors
    ///
    /// Returns an error if an entry cannot be rewritten.
    pub async fn mark_applied(&self, op_ids: &[String]) -> CoreResult<()> {
        let seqs = self.seqs_for_ids(op_ids).await?;
        self.update_entries(seqs, |e| e.application_status = Some(ApplicationStatus::Applied))
            .await
    }

    /// Records a failed application attempt.
    ///
    /// Operations that reach `max_retries` are rejected and never retried
    /// again; their ids are returned.
    ///
    /// # Errors
    ///
    /// Returns an error if an entry cannot be rewritten.
    pub async fn mark_failed(&self, op_ids: &[String], max_retries: u32) -> CoreResult<Vec<String>> {
        let seqs = self.seqs_for_ids(op_ids).await?;
        let now = self.time.now();
        let mut rejected = Vec::new();
        self.update_entries(seqs, |e| {
            e.retry_count = e.retry_count.saturating_add(1);
            e.application_status = Some(ApplicationStatus::Failed);
            if e.retry_count >= max_retries {
                e.rejected_at = Some(now);
                rejected.push(e.op.id.clone());
            }
        })
        .await?;
        if !rejected.is_empty() {
            warn!(count = rejected.len(), "operations rejected after exhausting retries");
        }
        Ok(rejected)
    }

    /// Rejects operations outright.
    ///
    /// # Errors
    ///
    /// Returns an error if an entry cannot be rewritten.
    pub async fn mark_rejected(&self, op_ids: &[String]) -> CoreResult<()> {
        let seqs = self.seqs_for_ids(op_ids).await?;
        let now = self.time.now();
        self.update_entries(seqs, |e| e.rejected_at = Some(now)).await
    }

    /// Returns the persisted clock (empty when never set).
    ///
    /// # Errors
    ///
    /// Returns an error if the stored clock cannot be decoded.
    pub async fn get_vector_clock(&self) -> CoreResult<VectorClock> {
        self.read_clock().await
    }

    async fn read_clock(&self) -> CoreResult<VectorClock> {
        match self.store.get(CLOCK_KEY).await? {
            Some(bytes) => Ok(from_bytes(&bytes)?),
            None => Ok(VectorClock::new()),
        }
    }

    async fn write_clock(&self, clock: &VectorClock) -> CoreResult<()> {
        self.store.put(CLOCK_KEY, to_canonical_bytes(clock)?).await?;
        Ok(())
    }

    /// Replaces the persisted clock.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn set_vector_clock(&self, clock: &VectorClock) -> CoreResult<()> {
        let _guard = self.index.lock().await;
        self.write_clock(clock).await
    }

    /// Merges the clocks of received operations into the persisted clock.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn merge_remote_clocks(&self, ops: &[Operation]) -> CoreResult<VectorClock> {
        let _guard = self.index.lock().await;
        let mut clock = self.read_clock().await?;
        for op in ops {
            clock.merge(&op.vector_clock);
        }
        self.write_clock(&clock).await?;
        Ok(clock)
    }

    /// Loads the snapshot; `None` means replay from the start of the log.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be decoded.
    pub async fn load_state_cache(&self) -> CoreResult<Option<StateSnapshot>> {
        match self.store.get(STATE_CACHE_KEY).await? {
            Some(bytes) => Ok(Some(from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Stores the snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn save_state_cache(&self, snapshot: &StateSnapshot) -> CoreResult<()> {
        self.store
            .put(STATE_CACHE_KEY, to_canonical_bytes(snapshot)?)
            .await?;
        Ok(())
    }

    /// Erases every entry. Sequence numbers continue after the erased range.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn clear_all_operations(&self) -> CoreResult<()> {
        let mut guard = self.index_guard().await?;
        self.clear_in(loaded(&mut guard)?).await
    }

    async fn clear_in(&self, index: &mut LogIndex) -> CoreResult<()> {
        let removed = index.meta.next_seq - index.meta.first_seq;
        index.meta.first_seq = index.meta.next_seq;
        self.write_meta(&index.meta).await?;
        for key in self.store.keys_with_prefix(OPLOG_ENTRY_PREFIX).await? {
            self.store.delete(&key).await?;
        }
        index.by_id.clear();
        info!(removed, "cleared operation log");
        Ok(())
    }

    /// Replaces the log with a single genesis operation for a full import.
    ///
    /// Drops the snapshot and adopts the genesis clock.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn reset_for_import(&self, genesis: Operation) -> CoreResult<u64> {
        let mut guard = self.index_guard().await?;
        let index = loaded(&mut guard)?;
        self.reset_in(index, genesis).await
    }

    /// Stamps `command` with the next tick of `client_id` and makes it the
    /// genesis of a fresh log, as [`OperationLogStore::reset_for_import`].
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized or the store fails.
    pub async fn reset_for_local_import(
        &self,
        command: &Command,
        client_id: &str,
        schema_version: u32,
    ) -> CoreResult<OperationLogEntry> {
        let mut guard = self.index_guard().await?;
        let index = loaded(&mut guard)?;
        let clock = self.read_clock().await?.tick(client_id);
        let genesis = command.to_operation(client_id, clock, self.time.now(), schema_version)?;
        let seq = self.reset_in(index, genesis).await?;
        self.read_entry(seq).await
    }

    async fn reset_in(&self, index: &mut LogIndex, genesis: Operation) -> CoreResult<u64> {
        self.clear_in(index).await?;
        self.store.delete(STATE_CACHE_KEY).await?;
        self.write_clock(&genesis.vector_clock).await?;
        single(self.append_to(index, vec![genesis], OpSource::Local).await?)
    }
}

fn loaded<'a>(guard: &'a mut MutexGuard<'_, Option<LogIndex>>) -> CoreResult<&'a mut LogIndex> {
    (**guard)
        .as_mut()
        .ok_or_else(|| CoreError::oplog_corrupted("index unavailable"))
}

fn single(seqs: Vec<u64>) -> CoreResult<u64> {
    seqs.first()
        .copied()
        .ok_or_else(|| CoreError::oplog_corrupted("append produced no sequence"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::FixedTimeSource;
    use driftsync_protocol::{DeleteTag, OpType};
    use driftsync_storage::InMemoryStore;
    use serde_json::json;

    fn make_op(id: &str, client: &str, counter: u64) -> Operation {
        Operation {
            id: id.to_string(),
            action_type: "test/action".to_string(),
            op_type: OpType::Update,
            entity_type: "TASK".to_string(),
            entity_id: Some("t1".to_string()),
            entity_ids: None,
            payload: json!({}),
            client_id: client.to_string(),
            vector_clock: [(client, counter)].into_iter().collect(),
            timestamp: 1_000,
            schema_version: 1,
        }
    }

    fn make_log() -> (Arc<InMemoryStore>, OperationLogStore) {
        let store = Arc::new(InMemoryStore::new());
        let log = OperationLogStore::new(store.clone(), Arc::new(FixedTimeSource::new(5_000)));
        (store, log)
    }

    #[tokio::test]
    async fn append_assigns_contiguous_seqs() {
        let (_, log) = make_log();
        assert_eq!(log.last_seq().await.unwrap(), 0);

        assert_eq!(log.append(make_op("a", "c", 1), OpSource::Local).await.unwrap(), 1);
        let seqs = log
            .append_batch(vec![make_op("b", "c", 2), make_op("c", "c", 3)], OpSource::Remote)
            .await
            .unwrap();
        assert_eq!(seqs, vec![2, 3]);
        assert_eq!(log.last_seq().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn get_ops_after_seq_is_exclusive() {
        let (_, log) = make_log();
        for (i, id) in ["a", "b", "c"].iter().enumerate() {
            log.append(make_op(id, "c", i as u64 + 1), OpSource::Local)
                .await
                .unwrap();
        }

        let after: Vec<_> = log
            .get_ops_after_seq(1)
            .await
            .unwrap()
            .into_iter()
            .map(|e| (e.seq, e.op.id))
            .collect();
        assert_eq!(after, vec![(2, "b".to_string()), (3, "c".to_string())]);
        assert!(log.get_ops_after_seq(3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicate_ids_are_rejected_without_partial_write() {
        let (_, log) = make_log();
        log.append(make_op("a", "c", 1), OpSource::Local).await.unwrap();

        let err = log
            .append_batch(vec![make_op("b", "c", 2), make_op("a", "c", 3)], OpSource::Remote)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::DuplicateOperation { .. }));
        assert_eq!(log.last_seq().await.unwrap(), 1);
        assert!(!log.has_op("b").await.unwrap());
    }

    #[tokio::test]
    async fn index_survives_reopen() {
        let (store, log) = make_log();
        log.append(make_op("a", "c", 1), OpSource::Local).await.unwrap();
        drop(log);

        let reopened = OperationLogStore::new(store, Arc::new(FixedTimeSource::new(0)));
        assert!(reopened.has_op("a").await.unwrap());
        assert_eq!(
            reopened.append(make_op("b", "c", 2), OpSource::Local).await.unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn filter_new_ops_drops_known_and_repeated() {
        let (_, log) = make_log();
        log.append(make_op("a", "c", 1), OpSource::Local).await.unwrap();

        let fresh = log
            .filter_new_ops(vec![make_op("a", "c", 1), make_op("b", "d", 1), make_op("b", "d", 1)])
            .await
            .unwrap();
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].id, "b");
    }

    #[tokio::test]
    async fn append_local_ticks_and_persists_clock() {
        let (_, log) = make_log();
        let command = driftsync_protocol::Command::DeleteTag(DeleteTag { id: "tag".into() });

        let first = log.append_local(&command, "me", 1).await.unwrap();
        let second = log.append_local(&command, "me", 1).await.unwrap();

        assert_eq!(first.op.vector_clock.get("me"), 1);
        assert_eq!(second.op.vector_clock.get("me"), 2);
        assert_eq!(log.get_vector_clock().await.unwrap().get("me"), 2);
        assert_eq!(log.get_unsynced().await.unwrap().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_local_writers_never_share_a_counter() {
        let (_, log) = make_log();
        let log = Arc::new(log);
        let command = driftsync_protocol::Command::DeleteTag(DeleteTag { id: "tag".into() });

        let writers: Vec<_> = (0..16)
            .map(|_| {
                let log = Arc::clone(&log);
                let command = command.clone();
                tokio::spawn(async move { log.append_local(&command, "me", 1).await.unwrap() })
            })
            .collect();
        let import = {
            let log = Arc::clone(&log);
            let command = command.clone();
            tokio::spawn(async move { log.reset_for_local_import(&command, "me", 1).await.unwrap() })
        };

        let mut counters = Vec::new();
        for writer in writers {
            counters.push(writer.await.unwrap().op.vector_clock.get("me"));
        }
        counters.push(import.await.unwrap().op.vector_clock.get("me"));
        counters.sort_unstable();
        assert_eq!(counters, (1..=17).collect::<Vec<u64>>());
        assert_eq!(log.get_vector_clock().await.unwrap().get("me"), 17);
    }

    #[tokio::test]
    async fn merge_remote_clocks_takes_component_max() {
        let (_, log) = make_log();
        log.set_vector_clock(&[("me", 4u64)].into_iter().collect())
            .await
            .unwrap();

        let clock = log
            .merge_remote_clocks(&[make_op("x", "other", 7), make_op("y", "me", 2)])
            .await
            .unwrap();
        assert_eq!(clock.get("me"), 4);
        assert_eq!(clock.get("other"), 7);
    }

    #[tokio::test]
    async fn clear_does_not_reuse_seqs() {
        let (store, log) = make_log();
        log.append(make_op("a", "c", 1), OpSource::Local).await.unwrap();
        log.append(make_op("b", "c", 2), OpSource::Local).await.unwrap();

        log.clear_all_operations().await.unwrap();
        assert_eq!(log.entry_count().await.unwrap(), 0);
        assert!(store.keys_with_prefix(OPLOG_ENTRY_PREFIX).await.unwrap().is_empty());

        assert_eq!(log.append(make_op("c", "c", 3), OpSource::Local).await.unwrap(), 3);
        let all = log.get_ops_after_seq(0).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].seq, 3);
    }

    #[tokio::test]
    async fn reset_for_import_leaves_only_genesis() {
        let (_, log) = make_log();
        log.append(make_op("a", "c", 1), OpSource::Local).await.unwrap();
        log.save_state_cache(&StateSnapshot {
            state: json!({"x": 1}),
            last_applied_op_seq: 1,
            vector_clock: VectorClock::new(),
            compacted_at: 1,
            schema_version: 1,
        })
        .await
        .unwrap();

        let genesis = make_op("genesis", "imp", 9);
        log.reset_for_import(genesis).await.unwrap();

        assert!(log.load_state_cache().await.unwrap().is_none());
        let all = log.get_ops_after_seq(0).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].op.id, "genesis");
        assert_eq!(log.get_vector_clock().await.unwrap().get("imp"), 9);
    }

    #[tokio::test]
    async fn failed_ops_are_rejected_after_retry_budget() {
        let (_, log) = make_log();
        log.append(make_op("r", "other", 1), OpSource::Remote).await.unwrap();
        let ids = vec!["r".to_string()];

        assert!(log.mark_failed(&ids, 2).await.unwrap().is_empty());
        assert_eq!(log.get_failed_remote_ops().await.unwrap().len(), 1);

        assert_eq!(log.mark_failed(&ids, 2).await.unwrap(), ids);
        assert!(log.get_failed_remote_ops().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn applied_remote_ops_are_not_retried() {
        let (_, log) = make_log();
        log.append(make_op("r", "other", 1), OpSource::Remote).await.unwrap();
        assert_eq!(log.get_failed_remote_ops().await.unwrap().len(), 1);

        log.mark_applied(&["r".to_string()]).await.unwrap();
        let entry = log.get_op_by_id("r").await.unwrap().unwrap();
        assert_eq!(entry.application_status, Some(ApplicationStatus::Applied));
        assert!(log.get_failed_remote_ops().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn mark_synced_removes_from_unsynced() {
        let (_, log) = make_log();
        let seq = log.append(make_op("a", "c", 1), OpSource::Local).await.unwrap();
        log.mark_synced(&[seq]).await.unwrap();
        assert!(log.get_unsynced().await.unwrap().is_empty());
    }
}
