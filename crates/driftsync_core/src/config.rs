//! Archive and backup configuration.

use driftsync_protocol::Timestamp;

/// One day in milliseconds.
pub const DAY_MS: Timestamp = 24 * 60 * 60 * 1000;

/// Configuration of the tiered archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveConfig {
    /// Age (by `doneOn`) after which a young task moves to the old archive.
    pub task_young_to_old_threshold: Timestamp,

    /// Minimum time between two young-to-old flushes.
    ///
    /// A flush is due when `now - lastTimeTrackingFlush` exceeds this.
    pub flush_interval: Timestamp,

    /// Age after which archived tasks are compressed.
    pub compression_age: Timestamp,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            task_young_to_old_threshold: 21 * DAY_MS,
            flush_interval: 14 * DAY_MS,
            compression_age: 365 * DAY_MS,
        }
    }
}

impl ArchiveConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the task age threshold for young-to-old moves.
    #[must_use]
    pub const fn task_young_to_old_threshold(mut self, ms: Timestamp) -> Self {
        self.task_young_to_old_threshold = ms;
        self
    }

    /// Sets the minimum interval between flushes.
    #[must_use]
    pub const fn flush_interval(mut self, ms: Timestamp) -> Self {
        self.flush_interval = ms;
        self
    }

    /// Sets the compression age.
    #[must_use]
    pub const fn compression_age(mut self, ms: Timestamp) -> Self {
        self.compression_age = ms;
        self
    }

    /// Returns true if a flush is due at `now` given the last flush time.
    #[must_use]
    pub fn is_flush_due(&self, now: Timestamp, last_flush: Timestamp) -> bool {
        now.saturating_sub(last_flush) > self.flush_interval
    }
}

/// Configuration of the safety-backup slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupConfig {
    /// Rolling slots for the most recent backups of today.
    pub max_recent_backups: usize,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            max_recent_backups: 2,
        }
    }
}

impl BackupConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of rolling slots for today.
    #[must_use]
    pub const fn max_recent_backups(mut self, n: usize) -> Self {
        self.max_recent_backups = n;
        self
    }

    /// Upper bound on stored backups: the recent slots, one oldest-of-today
    /// slot and one before-today slot.
    #[must_use]
    pub const fn total_slots(&self) -> usize {
        self.max_recent_backups + 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_archive_config() {
        let config = ArchiveConfig::default();
        assert_eq!(config.task_young_to_old_threshold, 21 * DAY_MS);
        assert_eq!(config.flush_interval, 14 * DAY_MS);
        assert!(!config.is_flush_due(20 * DAY_MS, 6 * DAY_MS));
        assert!(config.is_flush_due(20 * DAY_MS + 1, 6 * DAY_MS));
    }

    #[test]
    fn flush_due_is_strictly_after_interval() {
        let config = ArchiveConfig::new().flush_interval(1_000);
        assert!(!config.is_flush_due(10_000, 9_999));
        assert!(!config.is_flush_due(10_000, 9_000), "equal to the interval is not due");
        assert!(config.is_flush_due(10_000, 8_999));
    }

    #[test]
    fn default_backup_slots() {
        let config = BackupConfig::default();
        assert_eq!(config.total_slots(), 4);
        assert_eq!(BackupConfig::new().max_recent_backups(3).total_slots(), 5);
    }
}
