//! Error types
//!
//! Task-level errors are delivered to the caller of that task only.
//! Pool-level errors come from construction and shutdown. Worker-level
//! failures stay inside the manager, which recovers from them by replacing
//! the worker.

use std::time::Duration;

use crate::config::ConfigError;
use crate::protocol::TaskId;

/// Outcome of a task that did not produce a value
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    /// The pool is shutting down or already shut down
    #[error("worker pool is closed")]
    PoolClosed,

    /// No worker reply arrived within the configured window
    #[error("task {id} timed out after {timeout:?}")]
    TaskTimeout { id: TaskId, timeout: Duration },

    /// The computation failed inside the worker
    #[error("task {id} failed: {message}")]
    TaskExecution { id: TaskId, message: String },

    /// The pending task table is at its configured bound
    #[error("task queue is full (limit {limit})")]
    QueueFull { limit: usize },

    /// The worker running the task was replaced before it replied
    #[error("task {id} lost: worker in slot {slot} was replaced")]
    WorkerLost { id: TaskId, slot: usize },
}

impl TaskError {
    /// Message reported by the worker, for execution failures
    pub fn execution_message(&self) -> Option<&str> {
        match self {
            Self::TaskExecution { message, .. } => Some(message),
            _ => None,
        }
    }

    /// Whether this error is a timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TaskTimeout { .. })
    }
}

/// Worker pool errors
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// Configuration rejected by validation
    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    /// The pool was created outside a tokio runtime
    #[error("worker pool must be created inside a tokio runtime")]
    NoRuntime,

    /// A worker thread could not be started
    #[error("failed to spawn worker for slot {slot}: {source}")]
    Spawn {
        slot: usize,
        #[source]
        source: std::io::Error,
    },

    /// The manager is no longer running
    #[error("worker pool is closed")]
    Closed,

    /// The manager task ended abnormally
    #[error("pool manager failed: {0}")]
    Manager(String),
}

/// Infrastructure failures of a single worker
///
/// These never reach task callers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkerError {
    /// The execution context faulted
    #[error("worker faulted: {0}")]
    Fault(String),

    /// The execution context exited on its own
    #[error("worker exited with code {0}")]
    Exit(i32),

    /// The worker stopped answering health checks
    #[error("worker missed {0} consecutive health checks")]
    Unresponsive(u32),

    /// The worker did not stop within its grace period
    #[error("worker did not terminate within {0:?}")]
    TerminateTimeout(Duration),

    /// The worker thread panicked outside any task
    #[error("worker thread panicked")]
    Panicked,

    /// Joining the worker thread failed
    #[error("failed to join worker thread: {0}")]
    Join(String),
}
