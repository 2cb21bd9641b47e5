//! Configuration for the engine.

use driftsync_core::{ArchiveConfig, BackupConfig};
use std::time::Duration;

/// Configuration for one client's engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Client id (unique per device).
    pub client_id: String,
    /// Schema version stamped on new operations.
    pub schema_version: u32,
    /// How long after a replayed batch no new sync may start.
    pub post_sync_cooldown: Duration,
    /// Failed side-effect attempts before a remote operation is rejected.
    pub max_op_retries: u32,
    /// Maximum operations per pull.
    pub pull_batch_size: u32,
    /// Capacity of the local command queue.
    pub command_queue_capacity: usize,
    /// Retry configuration for sync cycles.
    pub retry: RetryConfig,
    /// Archive flush and compression settings.
    pub archive: ArchiveConfig,
    /// Safety-backup slots.
    pub backup: BackupConfig,
}

impl EngineConfig {
    /// Creates a configuration for `client_id`.
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            schema_version: 1,
            post_sync_cooldown: Duration::from_secs(3),
            max_op_retries: 3,
            pull_batch_size: 500,
            command_queue_capacity: 256,
            retry: RetryConfig::default(),
            archive: ArchiveConfig::default(),
            backup: BackupConfig::default(),
        }
    }

    /// Sets the schema version.
    pub fn with_schema_version(mut self, version: u32) -> Self {
        self.schema_version = version;
        self
    }

    /// Sets the post-sync cooldown.
    pub fn with_post_sync_cooldown(mut self, cooldown: Duration) -> Self {
        self.post_sync_cooldown = cooldown;
        self
    }

    /// Sets the retry budget for failed remote operations.
    pub fn with_max_op_retries(mut self, retries: u32) -> Self {
        self.max_op_retries = retries;
        self
    }

    /// Sets the pull batch size.
    pub fn with_pull_batch_size(mut self, size: u32) -> Self {
        self.pull_batch_size = size;
        self
    }

    /// Sets the command queue capacity.
    pub fn with_command_queue_capacity(mut self, capacity: usize) -> Self {
        self.command_queue_capacity = capacity;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the archive configuration.
    pub fn with_archive(mut self, archive: ArchiveConfig) -> Self {
        self.archive = archive;
        self
    }

    /// Sets the backup configuration.
    pub fn with_backup(mut self, backup: BackupConfig) -> Self {
        self.backup = backup;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new("local")
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first one included.
    pub max_attempts: u32,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Calculates the delay before a given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let base = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        Duration::from_secs_f64(base.min(self.max_delay.as_secs_f64()))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftsync_core::DAY_MS;

    #[test]
    fn engine_config_builder() {
        let config = EngineConfig::new("client-a")
            .with_schema_version(2)
            .with_post_sync_cooldown(Duration::ZERO)
            .with_max_op_retries(5)
            .with_pull_batch_size(50);

        assert_eq!(config.client_id, "client-a");
        assert_eq!(config.schema_version, 2);
        assert_eq!(config.post_sync_cooldown, Duration::ZERO);
        assert_eq!(config.max_op_retries, 5);
        assert_eq!(config.pull_batch_size, 50);
    }

    #[test]
    fn defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.post_sync_cooldown, Duration::from_secs(3));
        assert_eq!(config.max_op_retries, 3);
        assert_eq!(RetryConfig::no_retry().max_attempts, 1);
    }

    #[test]
    fn archive_and_backup_settings_pass_through() {
        let config = EngineConfig::new("client-a")
            .with_archive(ArchiveConfig::new().flush_interval(DAY_MS))
            .with_backup(BackupConfig::new().max_recent_backups(3));

        assert_eq!(config.archive.flush_interval, DAY_MS);
        assert_eq!(config.archive.task_young_to_old_threshold, 21 * DAY_MS);
        assert_eq!(config.backup.max_recent_backups, 3);
        assert_eq!(EngineConfig::default().backup.total_slots(), 4);
    }

    #[test]
    fn retry_delay_calculation() {
        let config = RetryConfig::new(5)
            .with_initial_delay(Duration::from_millis(100))
            .with_backoff_multiplier(2.0);

        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(400));
    }

    #[test]
    fn retry_delay_respects_max() {
        let config = RetryConfig::new(10)
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5))
            .with_backoff_multiplier(10.0);

        assert_eq!(config.delay_for_attempt(5), Duration::from_secs(5));
    }
}
