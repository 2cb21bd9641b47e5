//! Local command bus.
//!
//! Local commands are queued and handled one at a time by a single worker
//! task: log the command, then run its archive side effect on the local
//! path. Side-effect errors are logged and swallowed so one failed archive
//! write never stops the stream. While a remote batch is being applied,
//! commands are deferred and handed back by the applier afterwards.
//!
//! Handed-back commands travel on their own unbounded queue, which the worker
//! drains before new commands. The applier hands them back while the sync
//! session still holds the archive lock, so it must never wait on the
//! bounded queue.

use crate::error::{EngineError, EngineResult};
use crate::hydration::HydrationState;
use driftsync_core::{ArchiveSideEffects, OperationLogStore};
use driftsync_protocol::{Command, PersistentCommand};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error};

enum BusMessage {
    Dispatch(Command),
    Barrier(oneshot::Sender<()>),
}

/// Sends commands to the bus worker.
#[derive(Clone)]
pub struct CommandBusHandle {
    tx: mpsc::Sender<BusMessage>,
    requeue_tx: mpsc::UnboundedSender<Command>,
}

impl CommandBusHandle {
    /// Queues a local command.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::CommandBusClosed`] if the worker has stopped.
    pub async fn dispatch(&self, command: Command) -> EngineResult<()> {
        self.tx
            .send(BusMessage::Dispatch(command))
            .await
            .map_err(|_| EngineError::CommandBusClosed)
    }

    /// Hands deferred commands back to the worker without waiting.
    ///
    /// They are handled in order, ahead of anything still in the main queue.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::CommandBusClosed`] if the worker has stopped.
    pub fn requeue(&self, commands: Vec<Command>) -> EngineResult<()> {
        for command in commands {
            self.requeue_tx
                .send(command)
                .map_err(|_| EngineError::CommandBusClosed)?;
        }
        Ok(())
    }

    /// Waits until every command queued before this call has been handled.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::CommandBusClosed`] if the worker has stopped.
    pub async fn barrier(&self) -> EngineResult<()> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(BusMessage::Barrier(tx))
            .await
            .map_err(|_| EngineError::CommandBusClosed)?;
        rx.await.map_err(|_| EngineError::CommandBusClosed)
    }
}

/// The bus worker's collaborators.
pub struct CommandBus {
    oplog: Arc<OperationLogStore>,
    router: Arc<dyn ArchiveSideEffects>,
    hydration: Arc<HydrationState>,
    client_id: String,
    schema_version: u32,
}

impl CommandBus {
    /// Creates a bus for `client_id`.
    pub fn new(
        oplog: Arc<OperationLogStore>,
        router: Arc<dyn ArchiveSideEffects>,
        hydration: Arc<HydrationState>,
        client_id: impl Into<String>,
        schema_version: u32,
    ) -> Self {
        Self {
            oplog,
            router,
            hydration,
            client_id: client_id.into(),
            schema_version,
        }
    }

    /// Starts the worker. It stops once every handle is dropped.
    pub fn spawn(self, capacity: usize) -> (CommandBusHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (requeue_tx, requeue_rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(self.run(rx, requeue_rx));
        (CommandBusHandle { tx, requeue_tx }, worker)
    }

    async fn run(self, mut rx: mpsc::Receiver<BusMessage>, mut requeue_rx: mpsc::UnboundedReceiver<Command>) {
        loop {
            let message = tokio::select! {
                biased;
                Some(command) = requeue_rx.recv() => BusMessage::Dispatch(command),
                message = rx.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };
            match message {
                BusMessage::Dispatch(command) => self.process(command).await,
                BusMessage::Barrier(done) => {
                    let _ = done.send(());
                }
            }
        }
        debug!("command bus stopped");
    }

    async fn process(&self, command: Command) {
        if self.hydration.is_applying_remote_ops() {
            self.hydration.defer(command);
            return;
        }

        let entry = match self
            .oplog
            .append_local(&command, &self.client_id, self.schema_version)
            .await
        {
            Ok(entry) => entry,
            Err(e) => {
                error!(action = command.action_type(), error = %e, "failed to log local command");
                return;
            }
        };
        debug!(seq = entry.seq, op_id = %entry.op.id, action = %entry.op.action_type, "logged local command");

        if !command.is_archive_affecting() {
            return;
        }
        let action = entry.op.action_type;
        if let Err(e) = self.router.handle(&PersistentCommand::local(command)).await {
            error!(action = %action, op_id = %entry.op.id, error = %e, "archive side effect failed for local command");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use driftsync_core::{CoreError, CoreResult, FixedTimeSource};
    use driftsync_protocol::{DeleteTag, FlushYoungToOld};
    use driftsync_storage::InMemoryStore;
    use parking_lot::Mutex;
    use serde_json::json;

    #[derive(Default)]
    struct FailingRouter {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ArchiveSideEffects for FailingRouter {
        async fn handle(&self, command: &PersistentCommand) -> CoreResult<()> {
            assert!(!command.is_remote());
            self.seen.lock().push(command.command.action_type().to_string());
            Err(CoreError::inconsistent("disk on fire"))
        }
    }

    fn bus() -> (Arc<OperationLogStore>, Arc<HydrationState>, Arc<FailingRouter>, CommandBusHandle) {
        let store = Arc::new(InMemoryStore::new());
        let oplog = Arc::new(OperationLogStore::new(store, Arc::new(FixedTimeSource::new(1_000))));
        let hydration = Arc::new(HydrationState::new());
        let router = Arc::new(FailingRouter::default());
        let (handle, _) = CommandBus::new(oplog.clone(), router.clone(), hydration.clone(), "me", 1).spawn(8);
        (oplog, hydration, router, handle)
    }

    #[tokio::test]
    async fn logs_and_routes_even_when_side_effects_fail() {
        let (oplog, _, router, handle) = bus();
        handle
            .dispatch(Command::DeleteTag(DeleteTag { id: "t".into() }))
            .await
            .unwrap();
        handle
            .dispatch(Command::FlushYoungToOld(FlushYoungToOld { timestamp: 5 }))
            .await
            .unwrap();
        handle
            .dispatch(Command::Other {
                action_type: "note/add".into(),
                payload: json!({}),
            })
            .await
            .unwrap();
        handle.barrier().await.unwrap();

        assert_eq!(oplog.last_seq().await.unwrap(), 3);
        assert_eq!(*router.seen.lock(), vec!["tag/delete", "archive/flushYoungToOld"]);
        assert_eq!(oplog.get_vector_clock().await.unwrap().get("me"), 3);
    }

    #[tokio::test]
    async fn commands_are_deferred_while_applying_remote_ops() {
        let (oplog, hydration, router, handle) = bus();
        hydration.start_applying_remote_ops();
        handle
            .dispatch(Command::DeleteTag(DeleteTag { id: "t".into() }))
            .await
            .unwrap();
        handle.barrier().await.unwrap();

        assert_eq!(oplog.last_seq().await.unwrap(), 0);
        assert!(router.seen.lock().is_empty());
        assert_eq!(hydration.deferred_count(), 1);
    }

    #[tokio::test]
    async fn requeue_does_not_wait_for_a_full_queue() {
        let (oplog, hydration, router, handle) = bus();
        let commands: Vec<Command> = (0..20)
            .map(|i| Command::DeleteTag(DeleteTag { id: format!("t{i}") }))
            .collect();

        hydration.start_applying_remote_ops();
        handle.requeue(commands).unwrap();
        handle.barrier().await.unwrap();
        assert_eq!(hydration.deferred_count(), 20);

        hydration.end_applying_remote_ops();
        handle.requeue(hydration.take_deferred()).unwrap();
        handle.barrier().await.unwrap();

        assert_eq!(oplog.last_seq().await.unwrap(), 20);
        assert_eq!(router.seen.lock().len(), 20);
    }
}
