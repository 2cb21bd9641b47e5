//! Archive compression command.

use super::{format_timestamp, open_store};
use driftsync_core::{
    ArchiveConfig, ArchiveDb, ArchiveService, ArchiveWriteLock, CompressionStats,
    OperationLogStore, SystemTimeSource, TimeSource, WriteMode,
};
use driftsync_protocol::{Command, CompressArchive, Timestamp};
use driftsync_storage::KvStore;
use std::path::Path;
use std::sync::Arc;

/// Compresses both tiers with `cutoff`, or the configured age before now.
///
/// With `client_id` the compression is also logged for other clients to
/// replay. Returns the cutoff used and the stats.
pub async fn execute(
    store: Arc<dyn KvStore>,
    time: Arc<dyn TimeSource>,
    cutoff: Option<Timestamp>,
    client_id: Option<&str>,
    schema_version: u32,
) -> Result<(Timestamp, CompressionStats), Box<dyn std::error::Error>> {
    let db = ArchiveDb::new(Arc::clone(&store), ArchiveWriteLock::new());
    let service = ArchiveService::new(db, ArchiveConfig::default(), Arc::clone(&time));
    let command = CompressArchive {
        one_year_ago_timestamp: cutoff.unwrap_or_else(|| service.compression_cutoff(time.now())),
    };

    let stats = service.compress_archive(command, WriteMode::Locked).await?;
    if let Some(client_id) = client_id {
        OperationLogStore::new(store, time)
            .append_local(&Command::CompressArchive(command), client_id, schema_version)
            .await?;
    }
    Ok((command.one_year_ago_timestamp, stats))
}

/// Runs the compress command.
pub async fn run(
    path: &Path,
    cutoff: Option<Timestamp>,
    client_id: Option<&str>,
    schema_version: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(path).await?;
    let (cutoff, stats) =
        execute(store, Arc::new(SystemTimeSource), cutoff, client_id, schema_version).await?;

    println!("✓ Compressed archive");
    println!("  Cutoff:          {}", format_timestamp(cutoff));
    println!("  Merged subtasks: {}", stats.merged_subtasks);
    println!("  Stripped tasks:  {}", stats.stripped_tasks);
    Ok(())
}
