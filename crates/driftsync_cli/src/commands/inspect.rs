//! Inspect command implementation.

use super::{format_timestamp, open_store};
use driftsync_core::{
    ArchiveDb, ArchiveWriteLock, BackupConfig, OperationLogStore, SafetyBackupManager,
    SystemTimeSource, TimeSource,
};
use driftsync_protocol::{ArchiveStore, Timestamp, VectorClock};
use driftsync_storage::KvStore;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

/// Summary of one archive tier.
#[derive(Debug, Serialize)]
pub struct TierStats {
    /// Archived tasks.
    pub tasks: usize,
    /// Archived subtasks among `tasks`.
    pub subtasks: usize,
    /// Date entries of archived time tracking.
    pub time_tracking_entries: usize,
    /// Time of the last young-to-old flush.
    pub last_time_tracking_flush: Timestamp,
}

impl From<&ArchiveStore> for TierStats {
    fn from(archive: &ArchiveStore) -> Self {
        Self {
            tasks: archive.task.len(),
            subtasks: archive.task.tasks().filter(|t| !t.is_parent()).count(),
            time_tracking_entries: archive.time_tracking.entry_count(),
            last_time_tracking_flush: archive.last_time_tracking_flush,
        }
    }
}

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store path.
    pub path: String,
    /// Young archive.
    pub young: TierStats,
    /// Old archive.
    pub old: TierStats,
    /// Live operation-log entries.
    pub oplog_entries: u64,
    /// Highest assigned sequence number.
    pub last_seq: u64,
    /// Local entries not yet acknowledged by the server.
    pub unsynced: usize,
    /// Remote entries waiting for a side-effect retry.
    pub failed_remote: usize,
    /// Sequence folded into the state snapshot, if one exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_seq: Option<u64>,
    /// The log's causal clock.
    pub vector_clock: VectorClock,
    /// Stored safety backups.
    pub backups: usize,
}

/// Gathers the inspection data from `store`.
pub async fn collect(
    store: Arc<dyn KvStore>,
    path: &Path,
) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let time: Arc<dyn TimeSource> = Arc::new(SystemTimeSource);
    let db = ArchiveDb::new(Arc::clone(&store), ArchiveWriteLock::new());
    let oplog = OperationLogStore::new(Arc::clone(&store), Arc::clone(&time));
    let backups = SafetyBackupManager::new(store, BackupConfig::default(), time);

    let young = db.load_young().await?;
    let old = db.load_old().await?;

    Ok(InspectResult {
        path: path.display().to_string(),
        young: TierStats::from(&young),
        old: TierStats::from(&old),
        oplog_entries: oplog.entry_count().await?,
        last_seq: oplog.last_seq().await?,
        unsynced: oplog.get_unsynced().await?.len(),
        failed_remote: oplog.get_failed_remote_ops().await?.len(),
        snapshot_seq: oplog
            .load_state_cache()
            .await?
            .map(|snapshot| snapshot.last_applied_op_seq),
        vector_clock: oplog.get_vector_clock().await?,
        backups: backups.get_backups().await?.len(),
    })
}

/// Runs the inspect command.
pub async fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(path).await?;
    let result = collect(store, path).await?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

fn print_tier(name: &str, tier: &TierStats) {
    println!("{name} archive:");
    println!("  Tasks:         {} ({} subtasks)", tier.tasks, tier.subtasks);
    println!("  Time entries:  {}", tier.time_tracking_entries);
    if tier.last_time_tracking_flush > 0 {
        println!(
            "  Last flush:    {}",
            format_timestamp(tier.last_time_tracking_flush)
        );
    } else {
        println!("  Last flush:    never");
    }
}

fn print_text_output(result: &InspectResult) {
    println!("driftsync store: {}", result.path);
    println!();
    print_tier("Young", &result.young);
    print_tier("Old", &result.old);
    println!();
    println!("Operation log:");
    println!("  Entries:       {}", result.oplog_entries);
    println!("  Last seq:      {}", result.last_seq);
    println!("  Unsynced:      {}", result.unsynced);
    println!("  Failed remote: {}", result.failed_remote);
    match result.snapshot_seq {
        Some(seq) => println!("  Snapshot at:   seq {seq}"),
        None => println!("  Snapshot at:   none"),
    }
    println!("  Vector clock:  {}", result.vector_clock);
    println!();
    println!("Safety backups:  {}", result.backups);
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftsync_core::WriteMode;
    use driftsync_protocol::{ArchiveTask, Command, FlushYoungToOld, TaskArchive};
    use driftsync_storage::FileStore;

    fn task(id: &str, parent: Option<&str>) -> ArchiveTask {
        ArchiveTask {
            id: id.to_string(),
            parent_id: parent.map(str::to_string),
            is_done: true,
            ..ArchiveTask::default()
        }
    }

    #[tokio::test]
    async fn collects_archive_and_log_stats() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn KvStore> = Arc::new(FileStore::open(dir.path()).await.unwrap());

        let db = ArchiveDb::new(Arc::clone(&store), ArchiveWriteLock::new());
        let young = ArchiveStore {
            task: TaskArchive::from_tasks([task("p", None), task("s", Some("p"))]),
            ..ArchiveStore::default()
        };
        db.save_young(&young, WriteMode::Locked).await.unwrap();

        let oplog = OperationLogStore::new(Arc::clone(&store), Arc::new(SystemTimeSource));
        let flush = Command::FlushYoungToOld(FlushYoungToOld { timestamp: 1 });
        oplog.append_local(&flush, "cli-test", 1).await.unwrap();

        let result = collect(store, dir.path()).await.unwrap();
        assert_eq!(result.young.tasks, 2);
        assert_eq!(result.young.subtasks, 1);
        assert_eq!(result.old.tasks, 0);
        assert_eq!(result.oplog_entries, 1);
        assert_eq!(result.last_seq, 1);
        assert_eq!(result.unsynced, 1);
        assert_eq!(result.snapshot_seq, None);
        assert_eq!(result.vector_clock.get("cli-test"), 1);
        assert_eq!(result.backups, 0);
    }
}
