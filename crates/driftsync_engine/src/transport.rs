//! Transport layer abstraction for operation exchange.
//!
//! The engine only needs ordered, at-least-once, batched delivery. The
//! cursor is opaque to the engine; it is persisted between syncs and handed
//! back unchanged.

use crate::error::{EngineError, EngineResult};
use async_trait::async_trait;
use driftsync_protocol::Operation;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One page of pulled operations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PullResponse {
    /// Operations from other clients, in delivery order.
    pub ops: Vec<Operation>,
    /// Cursor to pass to the next pull.
    pub cursor: u64,
    /// More operations are available after `cursor`.
    pub has_more: bool,
}

/// Moves operations between this client and its peers.
#[async_trait]
pub trait OpTransport: Send + Sync {
    /// Pulls operations from other clients after `cursor`.
    async fn pull(&self, client_id: &str, cursor: u64, limit: u32) -> EngineResult<PullResponse>;

    /// Pushes local operations. Returns how many were new to the peer.
    async fn push(&self, client_id: &str, ops: Vec<Operation>) -> EngineResult<u64>;

    /// Checks if the transport is connected.
    fn is_connected(&self) -> bool;
}

#[derive(Debug, Default)]
struct HubLog {
    ops: Vec<Operation>,
    ids: HashSet<String>,
}

/// A shared in-memory operation log that several clients sync through.
#[derive(Debug, Default)]
pub struct LoopbackHub {
    log: RwLock<HubLog>,
    redeliver: AtomicBool,
}

impl LoopbackHub {
    /// Creates an empty hub.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of operations stored.
    pub fn len(&self) -> usize {
        self.log.read().ops.len()
    }

    /// Returns true if nothing was pushed yet.
    pub fn is_empty(&self) -> bool {
        self.log.read().ops.is_empty()
    }

    /// Makes the next pull start from the beginning, delivering every
    /// operation again.
    pub fn redeliver_next_pull(&self) {
        self.redeliver.store(true, Ordering::SeqCst);
    }
}

/// A client's connection to a [`LoopbackHub`].
#[derive(Debug)]
pub struct LoopbackTransport {
    hub: Arc<LoopbackHub>,
    connected: AtomicBool,
}

impl LoopbackTransport {
    /// Connects to `hub`.
    pub fn new(hub: Arc<LoopbackHub>) -> Self {
        Self {
            hub,
            connected: AtomicBool::new(true),
        }
    }

    /// Sets the connected state.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    fn check_connected(&self) -> EngineResult<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(EngineError::NotConnected)
        }
    }
}

#[async_trait]
impl OpTransport for LoopbackTransport {
    async fn pull(&self, client_id: &str, cursor: u64, limit: u32) -> EngineResult<PullResponse> {
        self.check_connected()?;
        let start = if self.hub.redeliver.swap(false, Ordering::SeqCst) {
            0
        } else {
            usize::try_from(cursor).unwrap_or(usize::MAX)
        };

        let log = self.hub.log.read();
        let limit = limit.max(1) as usize;
        let mut ops = Vec::new();
        let mut position = start.min(log.ops.len());
        while position < log.ops.len() && ops.len() < limit {
            let op = &log.ops[position];
            if op.client_id != client_id {
                ops.push(op.clone());
            }
            position += 1;
        }
        Ok(PullResponse {
            ops,
            cursor: position as u64,
            has_more: position < log.ops.len(),
        })
    }

    async fn push(&self, _client_id: &str, ops: Vec<Operation>) -> EngineResult<u64> {
        self.check_connected()?;
        let mut log = self.hub.log.write();
        let mut accepted = 0;
        for op in ops {
            if log.ids.insert(op.id.clone()) {
                log.ops.push(op);
                accepted += 1;
            }
        }
        Ok(accepted)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
