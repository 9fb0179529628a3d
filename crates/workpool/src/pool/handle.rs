//! Public pool handle

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::{join_all, try_join_all};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, instrument};

use super::manager::{Command, Manager};
use crate::adapter::ExecutionAdapter;
use crate::config::PoolConfig;
use crate::error::{PoolError, TaskError};
use crate::metrics::PoolMetrics;
use crate::protocol::{Task, TaskId, TaskPayload};
use crate::worker::WorkerHandle;

/// Point-in-time view of the pool's bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Configured number of slots
    pub worker_count: usize,
    /// Slots that currently hold a running worker
    pub live_workers: usize,
    /// Tasks submitted but not yet resolved
    pub pending_tasks: usize,
    /// Workers replaced since the pool started
    pub restarts: u64,
    /// Whether new submissions are currently admitted
    pub accepting: bool,
}

/// Resolves to the outcome of one submitted task
///
/// Dropping the handle does not cancel the task; its result is discarded.
#[derive(Debug)]
#[must_use = "a task handle does nothing unless awaited"]
pub struct TaskHandle {
    id: TaskId,
    receiver: oneshot::Receiver<Result<Value, TaskError>>,
}

impl TaskHandle {
    /// Identifier assigned at submission
    pub fn id(&self) -> TaskId {
        self.id
    }
}

impl Future for TaskHandle {
    type Output = Result<Value, TaskError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|result| result.unwrap_or_else(|_| Err(TaskError::PoolClosed)))
    }
}

/// A fixed-size pool of isolated workers
///
/// Workers run on dedicated threads. A worker that faults, exits or stops
/// answering health checks is replaced in the same slot; callers only ever
/// see their own task's outcome.
///
/// # Example
///
/// ```ignore
/// use workpool::prelude::*;
///
/// let mut registry = ComputationRegistry::new();
/// registry.register_fn("double", |_ctx, args| async move {
///     Ok(json!(args[0].as_i64().unwrap_or_default() * 2))
/// });
///
/// let pool = WorkerPool::new(PoolConfig::new().with_worker_count(2), Arc::new(registry))?;
///
/// let value = pool.execute("double", vec![json!(21)]).await?;
/// assert_eq!(value, json!(42));
///
/// pool.shutdown().await?;
/// ```
pub struct WorkerPool {
    commands: mpsc::UnboundedSender<Command>,
    next_task_id: AtomicU64,
    shutting_down: Arc<AtomicBool>,
    worker_count: usize,
    manager: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Start `config.worker_count` workers and the pool manager
    ///
    /// Must be called from within a tokio runtime; the manager runs as a
    /// task on it.
    pub fn new(config: PoolConfig, adapter: Arc<dyn ExecutionAdapter>) -> Result<Self, PoolError> {
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| PoolError::NoRuntime)?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mut handles = Vec::with_capacity(config.worker_count);
        for slot in 0..config.worker_count {
            // On failure the handles spawned so far are dropped, which closes
            // their inboxes and stops them.
            handles.push(WorkerHandle::spawn(slot, Arc::clone(&adapter), events_tx.clone())?);
        }

        let (commands, commands_rx) = mpsc::unbounded_channel();
        let shutting_down = Arc::new(AtomicBool::new(false));
        let worker_count = config.worker_count;

        info!(worker_count, "Starting worker pool");
        let manager = Manager::new(
            config,
            adapter,
            handles,
            events_tx,
            Arc::clone(&shutting_down),
        );
        let manager = runtime.spawn(manager.run(commands_rx, events_rx));

        Ok(Self {
            commands,
            next_task_id: AtomicU64::new(0),
            shutting_down,
            worker_count,
            manager: Mutex::new(Some(manager)),
        })
    }

    /// Start a pool configured from `WORKPOOL_*` environment variables
    pub fn from_env(adapter: Arc<dyn ExecutionAdapter>) -> Result<Self, PoolError> {
        Self::new(PoolConfig::from_env(), adapter)
    }

    /// Submit `computation` with `args`
    ///
    /// Fails immediately with [`TaskError::PoolClosed`] once shutdown has
    /// begun. Every other outcome, including backpressure rejection, is
    /// delivered through the returned handle.
    pub fn submit(
        &self,
        computation: impl Into<String>,
        args: Vec<Value>,
    ) -> Result<TaskHandle, TaskError> {
        self.submit_payload(TaskPayload::new(computation, args))
    }

    /// Submit a prepared payload
    pub fn submit_payload(&self, payload: TaskPayload) -> Result<TaskHandle, TaskError> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(TaskError::PoolClosed);
        }

        let id = TaskId(self.next_task_id.fetch_add(1, Ordering::Relaxed));
        let (reply, receiver) = oneshot::channel();
        self.commands
            .send(Command::Submit {
                task: Task::new(id, payload),
                reply,
            })
            .map_err(|_| TaskError::PoolClosed)?;

        Ok(TaskHandle { id, receiver })
    }

    /// Submit a task and wait for its outcome
    pub async fn execute(
        &self,
        computation: impl Into<String>,
        args: Vec<Value>,
    ) -> Result<Value, TaskError> {
        self.submit(computation, args)?.await
    }

    /// Run `computation` once per argument list, concurrently
    ///
    /// Results come back in input order. The first failure wins; the other
    /// tasks keep running and their results are discarded.
    pub async fn execute_batch<I>(&self, computation: &str, arg_lists: I) -> Result<Vec<Value>, TaskError>
    where
        I: IntoIterator<Item = Vec<Value>>,
    {
        let handles = arg_lists
            .into_iter()
            .map(|args| self.submit(computation, args))
            .collect::<Result<Vec<_>, _>>()?;
        try_join_all(handles).await
    }

    /// Like [`execute_batch`](Self::execute_batch) but waits for every task
    /// and reports each outcome in input order
    pub async fn execute_batch_settled<I>(
        &self,
        computation: &str,
        arg_lists: I,
    ) -> Vec<Result<Value, TaskError>>
    where
        I: IntoIterator<Item = Vec<Value>>,
    {
        let handles: Vec<_> = arg_lists
            .into_iter()
            .map(|args| self.submit(computation, args))
            .collect();
        join_all(handles.into_iter().map(|handle| async move {
            match handle {
                Ok(handle) => handle.await,
                Err(e) => Err(e),
            }
        }))
        .await
    }

    /// Snapshot of per-slot metrics
    pub async fn metrics(&self) -> Result<PoolMetrics, PoolError> {
        let (reply, receiver) = oneshot::channel();
        self.commands
            .send(Command::Metrics { reply })
            .map_err(|_| PoolError::Closed)?;
        receiver.await.map_err(|_| PoolError::Closed)
    }

    /// Snapshot of pool bookkeeping
    pub async fn stats(&self) -> Result<PoolStats, PoolError> {
        let (reply, receiver) = oneshot::channel();
        self.commands
            .send(Command::Stats { reply })
            .map_err(|_| PoolError::Closed)?;
        receiver.await.map_err(|_| PoolError::Closed)
    }

    /// Number of worker slots
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Whether shutdown has begun
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Stop accepting tasks, fail pending ones and terminate every worker
    ///
    /// Safe to call more than once; later calls wait for the first to finish.
    #[instrument(skip(self), fields(worker_count = self.worker_count))]
    pub async fn shutdown(&self) -> Result<(), PoolError> {
        if !self.shutting_down.swap(true, Ordering::AcqRel) {
            info!("Initiating worker pool shutdown");
        }

        let (reply, receiver) = oneshot::channel();
        if self.commands.send(Command::Shutdown { reply }).is_ok() {
            // A dropped reply means another call already stopped the manager
            let _ = receiver.await;
        }

        let manager = self.manager.lock().take();
        if let Some(manager) = manager {
            manager
                .await
                .map_err(|e| PoolError::Manager(e.to_string()))?;
            info!("Worker pool stopped");
        }
        Ok(())
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("worker_count", &self.worker_count)
            .field("shutting_down", &self.is_shutting_down())
            .finish()
    }
}
