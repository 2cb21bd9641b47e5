//! Safety-backup maintenance commands.

use super::{format_timestamp, open_store};
use driftsync_core::{
    BackupConfig, BackupReason, SafetyBackup, SafetyBackupManager, SystemTimeSource,
};
use driftsync_protocol::Timestamp;
use driftsync_storage::KvStore;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

/// Backup listing entry; the captured data itself is omitted.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupSummary {
    /// Backup id.
    pub id: String,
    /// When it was taken.
    pub timestamp: Timestamp,
    /// Why it was taken.
    pub reason: BackupReason,
    /// Last locally applied action at the time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_changed_model_id: Option<String>,
    /// Models the pending update would overwrite.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub models_to_update: Vec<String>,
    /// Young archive tasks in the backup.
    pub young_tasks: usize,
    /// Old archive tasks in the backup.
    pub old_tasks: usize,
}

impl From<&SafetyBackup> for BackupSummary {
    fn from(backup: &SafetyBackup) -> Self {
        Self {
            id: backup.id.clone(),
            timestamp: backup.timestamp,
            reason: backup.reason,
            last_changed_model_id: backup.last_changed_model_id.clone(),
            models_to_update: backup.models_to_update.clone().unwrap_or_default(),
            young_tasks: backup.data.archive_young.as_ref().map_or(0, |a| a.task.len()),
            old_tasks: backup.data.archive_old.as_ref().map_or(0, |a| a.task.len()),
        }
    }
}

fn manager(store: Arc<dyn KvStore>) -> SafetyBackupManager {
    SafetyBackupManager::new(store, BackupConfig::default(), Arc::new(SystemTimeSource))
}

/// Lists stored backups, newest first.
pub async fn summaries(
    store: Arc<dyn KvStore>,
) -> Result<Vec<BackupSummary>, Box<dyn std::error::Error>> {
    Ok(manager(store)
        .get_backups()
        .await?
        .iter()
        .map(BackupSummary::from)
        .collect())
}

/// Runs `backups list`.
pub async fn list(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(path).await?;
    let backups = summaries(store).await?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&backups)?);
        }
        _ => {
            if backups.is_empty() {
                println!("No safety backups.");
            }
            for backup in &backups {
                println!("{}", backup.id);
                println!("  Taken:    {}", format_timestamp(backup.timestamp));
                println!("  Reason:   {:?}", backup.reason);
                println!(
                    "  Archive:  {} young / {} old tasks",
                    backup.young_tasks, backup.old_tasks
                );
                if let Some(last) = &backup.last_changed_model_id {
                    println!("  Last op:  {last}");
                }
                if !backup.models_to_update.is_empty() {
                    println!("  Models:   {}", backup.models_to_update.join(", "));
                }
            }
        }
    }

    Ok(())
}

/// Runs `backups delete`.
pub async fn delete(path: &Path, id: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(path).await?;
    manager(store).delete_backup(id).await?;
    println!("✓ Deleted safety backup {id}");
    Ok(())
}

/// Runs `backups clear`.
pub async fn clear(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(path).await?;
    let backups = manager(store);
    let count = backups.get_backups().await?.len();
    backups.clear_all_backups().await?;
    println!("✓ Cleared {count} safety backup(s)");
    Ok(())
}
