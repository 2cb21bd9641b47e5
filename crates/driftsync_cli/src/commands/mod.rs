//! CLI command implementations.

pub mod backups;
pub mod compress;
pub mod dump_oplog;
pub mod flush;
pub mod inspect;
pub mod verify;

use chrono::{DateTime, Utc};
use driftsync_protocol::Timestamp;
use driftsync_storage::FileStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Errors reported by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// The path does not point at a store directory.
    #[error("no driftsync store found at {0:?}")]
    StoreNotFound(PathBuf),

    /// `verify` found problems.
    #[error("verification failed with {0} problem(s)")]
    VerifyFailed(usize),
}

/// Opens an existing directory store. Unlike [`FileStore::open`] this never
/// creates the directory.
pub async fn open_store(path: &Path) -> Result<Arc<FileStore>, Box<dyn std::error::Error>> {
    if !path.is_dir() {
        return Err(CliError::StoreNotFound(path.to_path_buf()).into());
    }
    Ok(Arc::new(FileStore::open(path).await?))
}

/// Renders an epoch-millisecond timestamp for humans.
pub fn format_timestamp(ts: Timestamp) -> String {
    DateTime::<Utc>::from_timestamp_millis(ts).map_or_else(
        || ts.to_string(),
        |dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}
