//! Fan-out notifications for archive and backup changes.
//!
//! Read paths subscribe once and refresh whenever an event arrives.
//!
//! # Usage
//!
//! ```rust
//! use driftsync_core::{ArchiveEvent, ChangeFeed};
//!
//! let feed = ChangeFeed::new();
//! let mut rx = feed.subscribe();
//! feed.emit(ArchiveEvent::RemoteArchiveDataApplied);
//! assert_eq!(rx.try_recv().unwrap(), ArchiveEvent::RemoteArchiveDataApplied);
//! ```

use parking_lot::RwLock;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Events about archive storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveEvent {
    /// A replayed batch changed archive data.
    RemoteArchiveDataApplied,
}

/// Events about the safety-backup list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupEvent {
    /// The stored list changed; carries the new backup count.
    BackupsChanged {
        /// Number of stored backups.
        count: usize,
    },
}

/// A multi-subscriber event feed.
///
/// The feed:
/// - Delivers every event to every live subscriber, in emit order
/// - Never blocks the emitter
/// - Drops subscribers whose receiver was dropped
pub struct ChangeFeed<E> {
    subscribers: RwLock<Vec<UnboundedSender<E>>>,
}

impl<E: Clone> ChangeFeed<E> {
    /// Creates a feed with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
        }
    }

    /// Subscribes to all future events.
    pub fn subscribe(&self) -> UnboundedReceiver<E> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Sends `event` to all subscribers.
    pub fn emit(&self, event: E) {
        let mut subscribers = self.subscribers.write();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl<E: Clone> Default for ChangeFeed<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> std::fmt::Debug for ChangeFeed<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeFeed")
            .field("subscribers", &self.subscribers.read().len())
            .finish()
    }
}
