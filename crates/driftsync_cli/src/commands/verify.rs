//! Verify command implementation.
//!
//! Reads the raw records instead of going through the service loaders,
//! which silently repair what this command is meant to report.

use super::{open_store, CliError};
use driftsync_codec::from_bytes;
use driftsync_core::{
    ArchiveTier, OperationLogEntry, OperationLogStore, SystemTimeSource, OPLOG_ENTRY_PREFIX,
};
use driftsync_protocol::ArchiveStore;
use driftsync_storage::KvStore;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyReport {
    /// Tasks checked across both tiers.
    pub tasks_checked: usize,
    /// Operation-log entries checked.
    pub entries_checked: usize,
    /// Problems found.
    pub problems: Vec<String>,
}

impl VerifyReport {
    /// Returns true if nothing was wrong.
    pub fn is_ok(&self) -> bool {
        self.problems.is_empty()
    }
}

/// Checks both archive tiers.
///
/// Each tier's `ids` must match its entities, a task may live in only one
/// tier, and parent links must resolve in both directions within a tier.
pub async fn check_archives(
    store: &dyn KvStore,
    report: &mut VerifyReport,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut tiers = Vec::with_capacity(ArchiveTier::ALL.len());
    for tier in ArchiveTier::ALL {
        let archive: ArchiveStore = match store.get(tier.key()).await? {
            Some(bytes) => match from_bytes(&bytes) {
                Ok(archive) => archive,
                Err(e) => {
                    report.problems.push(format!("{tier} archive cannot be decoded: {e}"));
                    continue;
                }
            },
            None => ArchiveStore::default(),
        };

        if !archive.task.is_consistent() {
            report.problems.push(format!(
                "{tier} archive ids ({}) disagree with entities ({})",
                archive.task.ids.len(),
                archive.task.entities.len()
            ));
        }
        for task in archive.task.tasks() {
            if let Some(parent_id) = &task.parent_id {
                match archive.task.get(parent_id) {
                    Some(parent) if parent.sub_task_ids.contains(&task.id) => {}
                    Some(_) => report.problems.push(format!(
                        "{tier} archive: parent {parent_id} does not list subtask {}",
                        task.id
                    )),
                    None => report.problems.push(format!(
                        "{tier} archive: subtask {} is separated from parent {parent_id}",
                        task.id
                    )),
                }
            }
        }
        report.tasks_checked += archive.task.len();
        tiers.push((tier, archive));
    }

    if let [(_, young), (_, old)] = tiers.as_slice() {
        for id in young.task.entities.keys() {
            if old.task.contains(id) {
                report
                    .problems
                    .push(format!("task {id} is present in both young and old archive"));
            }
        }
    }
    Ok(())
}

/// Checks the operation log.
///
/// Entry keys must form one contiguous sequence range, each entry must carry
/// the sequence of its key, operation ids must be unique, the log clock must
/// dominate every entry's clock, and a snapshot may not point past the log.
pub async fn check_oplog(
    store: Arc<dyn KvStore>,
    report: &mut VerifyReport,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut entries: BTreeMap<u64, OperationLogEntry> = BTreeMap::new();
    for key in store.keys_with_prefix(OPLOG_ENTRY_PREFIX).await? {
        let Some(seq) = key
            .strip_prefix(OPLOG_ENTRY_PREFIX)
            .and_then(|suffix| suffix.parse::<u64>().ok())
        else {
            report.problems.push(format!("unexpected oplog key {key}"));
            continue;
        };
        let Some(bytes) = store.get(&key).await? else {
            continue;
        };
        match from_bytes::<OperationLogEntry>(&bytes) {
            Ok(entry) => {
                if entry.seq != seq {
                    report
                        .problems
                        .push(format!("entry stored at seq {seq} claims seq {}", entry.seq));
                }
                entries.insert(seq, entry);
            }
            Err(e) => report.problems.push(format!("entry {seq} cannot be decoded: {e}")),
        }
    }

    let seqs: Vec<u64> = entries.keys().copied().collect();
    for pair in seqs.windows(2) {
        if pair[1] != pair[0] + 1 {
            report
                .problems
                .push(format!("oplog gap between seq {} and {}", pair[0], pair[1]));
        }
    }

    let mut seen: HashMap<&str, u64> = HashMap::new();
    for (seq, entry) in &entries {
        if let Some(first) = seen.insert(entry.op.id.as_str(), *seq) {
            report.problems.push(format!(
                "operation {} logged twice (seq {first} and {seq})",
                entry.op.id
            ));
        }
    }

    let oplog = OperationLogStore::new(Arc::clone(&store), Arc::new(SystemTimeSource));
    let clock = oplog.get_vector_clock().await?;
    for (seq, entry) in &entries {
        for (client, counter) in entry.op.vector_clock.iter() {
            if clock.get(client) < counter {
                report.problems.push(format!(
                    "log clock {clock} is behind entry {seq} ({client}={counter})"
                ));
            }
        }
    }

    if let Some(snapshot) = oplog.load_state_cache().await? {
        let last = seqs.last().copied().unwrap_or(0);
        if snapshot.last_applied_op_seq > last && !seqs.is_empty() {
            report.problems.push(format!(
                "snapshot covers seq {} but the log ends at {last}",
                snapshot.last_applied_op_seq
            ));
        }
    }

    report.entries_checked = entries.len();
    Ok(())
}

/// Runs both checks over `store`.
pub async fn verify_store(
    store: Arc<dyn KvStore>,
    check_archive: bool,
    check_log: bool,
) -> Result<VerifyReport, Box<dyn std::error::Error>> {
    let mut report = VerifyReport::default();
    if check_archive {
        check_archives(store.as_ref(), &mut report).await?;
    }
    if check_log {
        check_oplog(store, &mut report).await?;
    }
    Ok(report)
}

/// Runs the verify command.
pub async fn run(
    path: &Path,
    check_archive: bool,
    check_log: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying driftsync store at {:?}", path);
    println!();

    let store = open_store(path).await?;
    let report = verify_store(store, check_archive, check_log).await?;

    if check_archive {
        println!("Archive tasks checked: {}", report.tasks_checked);
    }
    if check_log {
        println!("Oplog entries checked: {}", report.entries_checked);
    }
    println!();

    if report.is_ok() {
        println!("✓ Store verification passed");
        Ok(())
    } else {
        for problem in &report.problems {
            println!("  ✗ {problem}");
        }
        println!();
        println!("✗ Store verification FAILED");
        Err(CliError::VerifyFailed(report.problems.len()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftsync_codec::to_canonical_bytes;
    use driftsync_core::{ArchiveDb, ArchiveWriteLock, WriteMode};
    use driftsync_protocol::{ArchiveTask, Command, DeleteTag, TaskArchive};
    use driftsync_storage::FileStore;

    fn task(id: &str) -> ArchiveTask {
        ArchiveTask {
            id: id.to_string(),
            ..ArchiveTask::default()
        }
    }

    async fn file_store(dir: &tempfile::TempDir) -> Arc<dyn KvStore> {
        Arc::new(FileStore::open(dir.path()).await.unwrap())
    }

    #[tokio::test]
    async fn healthy_store_passes() {
        let dir = tempfile::tempdir().unwrap();
        let store = file_store(&dir).await;

        let mut parent = task("p");
        parent.sub_task_ids = vec!["s".to_string()];
        let mut sub = task("s");
        sub.parent_id = Some("p".to_string());
        let young = ArchiveStore {
            task: TaskArchive::from_tasks([parent, sub]),
            ..ArchiveStore::default()
        };
        ArchiveDb::new(Arc::clone(&store), ArchiveWriteLock::new())
            .save_young(&young, WriteMode::Locked)
            .await
            .unwrap();

        let oplog = OperationLogStore::new(Arc::clone(&store), Arc::new(SystemTimeSource));
        for tag in ["a", "b"] {
            let cmd = Command::DeleteTag(DeleteTag { id: tag.to_string() });
            oplog.append_local(&cmd, "cli-test", 1).await.unwrap();
        }

        let report = verify_store(store, true, true).await.unwrap();
        assert!(report.is_ok(), "{:?}", report.problems);
        assert_eq!(report.tasks_checked, 2);
        assert_eq!(report.entries_checked, 2);
    }

    #[tokio::test]
    async fn reports_archive_damage() {
        let dir = tempfile::tempdir().unwrap();
        let store = file_store(&dir).await;

        let mut young = ArchiveStore {
            task: TaskArchive::from_tasks([task("a"), task("dup")]),
            ..ArchiveStore::default()
        };
        young.task.ids.push("ghost".to_string());
        let mut orphan = task("s");
        orphan.parent_id = Some("missing".to_string());
        let old = ArchiveStore {
            task: TaskArchive::from_tasks([task("dup"), orphan]),
            ..ArchiveStore::default()
        };
        store
            .put(ArchiveTier::Young.key(), to_canonical_bytes(&young).unwrap())
            .await
            .unwrap();
        store
            .put(ArchiveTier::Old.key(), to_canonical_bytes(&old).unwrap())
            .await
            .unwrap();

        let report = verify_store(store, true, false).await.unwrap();
        assert_eq!(report.problems.len(), 3, "{:?}", report.problems);
        assert!(report.problems.iter().any(|p| p.contains("disagree")));
        assert!(report.problems.iter().any(|p| p.contains("separated from parent missing")));
        assert!(report.problems.iter().any(|p| p.contains("task dup")));
    }

    #[tokio::test]
    async fn reports_oplog_gap() {
        let dir = tempfile::tempdir().unwrap();
        let store = file_store(&dir).await;
        let oplog = OperationLogStore::new(Arc::clone(&store), Arc::new(SystemTimeSource));
        for tag in ["a", "b", "c"] {
            let cmd = Command::DeleteTag(DeleteTag { id: tag.to_string() });
            oplog.append_local(&cmd, "cli-test", 1).await.unwrap();
        }
        store
            .delete(&format!("{OPLOG_ENTRY_PREFIX}{:020}", 2))
            .await
            .unwrap();

        let report = verify_store(store, false, true).await.unwrap();
        assert_eq!(report.entries_checked, 2);
        assert_eq!(report.problems, vec!["oplog gap between seq 1 and 3".to_string()]);
    }
}
