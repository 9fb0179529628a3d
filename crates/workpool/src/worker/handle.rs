use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::adapter::runtime::run_worker;
use crate::adapter::{ExecutionAdapter, WorkerContext};
use crate::error::{PoolError, WorkerError};
use crate::protocol::{ManagerMessage, WorkerEnvelope, WorkerId};

/// Manager-side handle to one worker thread
///
/// Dropping the handle closes the worker's inbox, which stops the worker
/// once its current loop iteration ends.
pub(crate) struct WorkerHandle {
    ctx: WorkerContext,
    sender: mpsc::UnboundedSender<ManagerMessage>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Start a worker for `slot` with a fresh identity
    pub(crate) fn spawn(
        slot: usize,
        adapter: Arc<dyn ExecutionAdapter>,
        events: mpsc::UnboundedSender<WorkerEnvelope>,
    ) -> Result<Self, PoolError> {
        let ctx = WorkerContext {
            slot,
            identity: WorkerId::next(),
        };
        let (sender, inbox) = mpsc::unbounded_channel();

        let thread = std::thread::Builder::new()
            .name(format!("workpool-slot-{}", slot))
            .spawn(move || run_worker(ctx, adapter, inbox, events))
            .map_err(|source| PoolError::Spawn { slot, source })?;

        debug!(slot, worker = %ctx.identity, "Spawned worker");
        Ok(Self {
            ctx,
            sender,
            thread: Some(thread),
        })
    }

    pub(crate) fn id(&self) -> WorkerId {
        self.ctx.identity
    }

    pub(crate) fn slot(&self) -> usize {
        self.ctx.slot
    }

    /// Queue a message; returns false if the worker is gone
    pub(crate) fn send(&self, message: ManagerMessage) -> bool {
        match self.sender.send(message) {
            Ok(()) => true,
            Err(_) => {
                trace!(slot = self.ctx.slot, worker = %self.ctx.identity, "Worker inbox closed");
                false
            }
        }
    }

    /// Ask the worker to stop and wait up to `grace` for its thread
    ///
    /// A thread stuck in a blocking computation cannot be interrupted; after
    /// `grace` it is left to finish on its own.
    pub(crate) async fn terminate(mut self, grace: Duration) -> Result<(), WorkerError> {
        self.send(ManagerMessage::Terminate);

        let Some(thread) = self.thread.take() else {
            return Ok(());
        };

        let joined = tokio::time::timeout(grace, tokio::task::spawn_blocking(move || thread.join()))
            .await
            .map_err(|_| WorkerError::TerminateTimeout(grace))?;

        match joined {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(WorkerError::Panicked),
            Err(e) => Err(WorkerError::Join(e.to_string())),
        }
    }
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("slot", &self.ctx.slot)
            .field("identity", &self.ctx.identity)
            .finish()
    }
}
