//! Replay bookkeeping shared by the applier, command bus and sync session.

use driftsync_protocol::{Command, Timestamp};
use parking_lot::Mutex;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Default)]
struct Inner {
    applying_remote_ops: bool,
    cooldown_until: Option<Timestamp>,
    deferred: Vec<Command>,
}

/// Whether remote operations are being applied, the post-sync cooldown,
/// and the local commands deferred meanwhile.
///
/// One instance is created per engine and handed to every component that
/// needs it.
#[derive(Debug, Default)]
pub struct HydrationState {
    inner: Mutex<Inner>,
}

impl HydrationState {
    /// Creates idle state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the start of a remote batch.
    pub fn start_applying_remote_ops(&self) {
        self.inner.lock().applying_remote_ops = true;
    }

    /// Marks the end of a remote batch.
    pub fn end_applying_remote_ops(&self) {
        self.inner.lock().applying_remote_ops = false;
    }

    /// Returns true while a remote batch is being applied.
    pub fn is_applying_remote_ops(&self) -> bool {
        self.inner.lock().applying_remote_ops
    }

    /// Starts the cooldown window at `now`.
    pub fn start_post_sync_cooldown(&self, now: Timestamp, cooldown: Duration) {
        let ms = Timestamp::try_from(cooldown.as_millis()).unwrap_or(Timestamp::MAX);
        self.inner.lock().cooldown_until = Some(now.saturating_add(ms));
    }

    /// Returns true while the cooldown window is open.
    pub fn is_in_cooldown(&self, now: Timestamp) -> bool {
        self.inner
            .lock()
            .cooldown_until
            .is_some_and(|until| now < until)
    }

    /// Returns true if a new sync must not start.
    pub fn is_in_sync_window(&self, now: Timestamp) -> bool {
        self.is_applying_remote_ops() || self.is_in_cooldown(now)
    }

    /// Defers a local command until the current remote batch settles.
    pub fn defer(&self, command: Command) {
        let mut inner = self.inner.lock();
        inner.deferred.push(command);
        debug!(pending = inner.deferred.len(), "deferred local command");
    }

    /// Takes all deferred commands in issue order.
    pub fn take_deferred(&self) -> Vec<Command> {
        std::mem::take(&mut self.inner.lock().deferred)
    }

    /// Number of deferred commands.
    pub fn deferred_count(&self) -> usize {
        self.inner.lock().deferred.len()
    }
}
