//! Young-to-old flush command.
//!
//! A flush on one client only converges the others when they replay it, so
//! `--client-id` also logs the flush as a local operation to be pushed on
//! that client's next sync.

use super::{format_timestamp, open_store};
use driftsync_core::{
    ArchiveConfig, ArchiveDb, ArchiveService, ArchiveWriteLock, OperationLogStore,
    SystemTimeSource, TimeSource, WriteMode,
};
use driftsync_protocol::{Command, FlushYoungToOld, Timestamp};
use driftsync_storage::KvStore;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Result of a flush attempt.
#[derive(Debug)]
pub struct FlushReport {
    /// Whether a flush ran.
    pub flushed: bool,
    /// Flush time.
    pub timestamp: Timestamp,
    /// Tasks moved from young to old.
    pub moved_task_ids: Vec<String>,
    /// Sequence of the logged flush operation.
    pub logged_seq: Option<u64>,
}

/// Flushes when due, or unconditionally with `force`.
pub async fn execute(
    store: Arc<dyn KvStore>,
    time: Arc<dyn TimeSource>,
    force: bool,
    client_id: Option<&str>,
    schema_version: u32,
) -> Result<FlushReport, Box<dyn std::error::Error>> {
    let db = ArchiveDb::new(Arc::clone(&store), ArchiveWriteLock::new());
    let service = ArchiveService::new(db, ArchiveConfig::default(), Arc::clone(&time));
    let timestamp = time.now();

    if !force && !service.is_flush_due().await? {
        return Ok(FlushReport {
            flushed: false,
            timestamp,
            moved_task_ids: Vec::new(),
            logged_seq: None,
        });
    }

    let result = service.flush_young_to_old(timestamp, WriteMode::Locked).await?;

    let logged_seq = match client_id {
        Some(client_id) => {
            let oplog = OperationLogStore::new(store, time);
            let command = Command::FlushYoungToOld(FlushYoungToOld { timestamp });
            let entry = oplog.append_local(&command, client_id, schema_version).await?;
            info!(seq = entry.seq, client_id, "logged flush for sync");
            Some(entry.seq)
        }
        None => None,
    };

    Ok(FlushReport {
        flushed: true,
        timestamp,
        moved_task_ids: result.moved_task_ids,
        logged_seq,
    })
}

/// Runs the flush command.
pub async fn run(
    path: &Path,
    now: bool,
    client_id: Option<&str>,
    schema_version: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(path).await?;
    let report = execute(store, Arc::new(SystemTimeSource), now, client_id, schema_version).await?;

    if !report.flushed {
        println!("Flush not due yet; use --now to force it.");
        return Ok(());
    }

    println!("✓ Flushed young archive into old");
    println!("  Timestamp: {}", format_timestamp(report.timestamp));
    println!("  Moved:     {} task(s)", report.moved_task_ids.len());
    match report.logged_seq {
        Some(seq) => println!("  Logged:    seq {seq}"),
        None => println!("  Logged:    no (other clients will not replay this flush)"),
    }
    Ok(())
}
