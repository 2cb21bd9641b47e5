//! Test fixtures and environment helpers.
//!
//! [`TestEnv`] wires every core service over one store the way an engine
//! would, with a [`FixedTimeSource`] so tests control the clock.

use driftsync_core::{
    ArchiveConfig, ArchiveDb, ArchiveOperationHandler, ArchiveService, ArchiveWriteLock,
    BackupConfig, FixedTimeSource, OperationLogStore, SafetyBackupManager, TaskArchiveService,
    DAY_MS,
};
use driftsync_protocol::{ArchiveTask, TaskWithSubTasks, TimeTrackingEntry, TimeTrackingState, Timestamp};
use driftsync_storage::{FileStore, InMemoryStore, KvStore};
use std::collections::BTreeMap;
use std::sync::Arc;
use tempfile::TempDir;

/// 2023-11-15 12:00 UTC.
pub const NOW: Timestamp = 1_700_049_600_000;

/// All core services over a single store.
pub struct TestEnv {
    /// The store every service writes to.
    pub store: Arc<dyn KvStore>,
    /// The controllable clock.
    pub time: Arc<FixedTimeSource>,
    /// The archive write lock.
    pub lock: ArchiveWriteLock,
    /// Archive tier access.
    pub db: ArchiveDb,
    /// Archive move/flush/compress.
    pub archive: ArchiveService,
    /// Task-level archive edits.
    pub tasks: TaskArchiveService,
    /// The side-effect router.
    pub router: ArchiveOperationHandler,
    /// The operation log.
    pub oplog: Arc<OperationLogStore>,
    /// Safety backups.
    pub backups: Arc<SafetyBackupManager>,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestEnv {
    /// Creates an environment over a fresh [`InMemoryStore`] at [`NOW`].
    pub fn memory() -> Self {
        Self::with_store(Arc::new(InMemoryStore::new()), ArchiveConfig::default())
    }

    /// Creates an environment over a [`FileStore`] in a temp directory.
    pub async fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = FileStore::open(temp_dir.path())
            .await
            .expect("Failed to open file store");
        let mut env = Self::with_store(Arc::new(store), ArchiveConfig::default());
        env._temp_dir = Some(temp_dir);
        env
    }

    /// Creates an environment over `store`.
    pub fn with_store(store: Arc<dyn KvStore>, config: ArchiveConfig) -> Self {
        let time = Arc::new(FixedTimeSource::new(NOW));
        let lock = ArchiveWriteLock::new();
        let db = ArchiveDb::new(Arc::clone(&store), lock.clone());
        let archive = ArchiveService::new(db.clone(), config, time.clone());
        let tasks = TaskArchiveService::new(db.clone());
        let router = ArchiveOperationHandler::new(archive.clone(), tasks.clone());
        let oplog = Arc::new(OperationLogStore::new(Arc::clone(&store), time.clone()));
        let backups = Arc::new(SafetyBackupManager::new(
            Arc::clone(&store),
            BackupConfig::default(),
            time.clone(),
        ));
        Self {
            store,
            time,
            lock,
            db,
            archive,
            tasks,
            router,
            oplog,
            backups,
            _temp_dir: None,
        }
    }
}

/// A completed task done `days_ago` days before [`NOW`].
pub fn done_task(id: &str, days_ago: i64) -> ArchiveTask {
    ArchiveTask {
        id: id.to_string(),
        title: format!("Task {id}"),
        is_done: true,
        done_on: Some(NOW - days_ago * DAY_MS),
        created: NOW - (days_ago + 1) * DAY_MS,
        ..ArchiveTask::default()
    }
}

/// A parent with `n` subtasks, all done `days_ago` days before [`NOW`].
///
/// Every task carries notes and per-day time so round trips can be checked
/// field by field.
pub fn parent_with_subtasks(id: &str, n: usize, days_ago: i64) -> TaskWithSubTasks {
    let mut parent = done_task(id, days_ago);
    parent.notes = Some(format!("notes of {id}"));
    let mut sub_tasks = Vec::with_capacity(n);
    for i in 0..n {
        let mut sub = done_task(&format!("{id}-sub{i}"), days_ago);
        sub.parent_id = Some(id.to_string());
        sub.notes = Some(format!("sub notes {i}"));
        sub.time_spent = 1_000 * (i as u64 + 1);
        sub.time_spent_on_day = BTreeMap::from([("2023-11-14".to_string(), sub.time_spent)]);
        parent.sub_task_ids.push(sub.id.clone());
        sub_tasks.push(sub);
    }
    TaskWithSubTasks {
        task: parent,
        sub_tasks,
    }
}

/// Time tracking for one project over the given days.
pub fn project_time_tracking(project_id: &str, days: &[&str]) -> TimeTrackingState {
    let mut state = TimeTrackingState::default();
    let dates = state.project.entry(project_id.to_string()).or_default();
    for (i, day) in days.iter().enumerate() {
        let start = NOW - DAY_MS + i as i64;
        dates.insert(
            (*day).to_string(),
            TimeTrackingEntry {
                start: Some(start),
                end: Some(start + 3_600_000),
                break_count: Some(1),
                break_time: Some(300_000),
            },
        );
    }
    state
}
