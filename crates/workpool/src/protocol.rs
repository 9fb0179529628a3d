//! Manager ⇄ worker message protocol
//!
//! Messages are plain serde types tagged by `type`. Inside this crate they
//! travel over in-process channels by value; the serde shape is the stable
//! contract for adapters that host workers elsewhere.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::metrics::WorkerMetrics;

/// Task identifier, unique for the lifetime of a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

static NEXT_WORKER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one execution context
///
/// Unlike the slot, this changes every time a worker is replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(pub u64);

impl WorkerId {
    pub(crate) fn next() -> Self {
        Self(NEXT_WORKER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// Description of the computation to run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPayload {
    /// Name the execution adapter resolves to a computation
    pub computation: String,
    /// Arguments, passed by value
    pub args: Vec<Value>,
}

impl TaskPayload {
    pub fn new(computation: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            computation: computation.into(),
            args,
        }
    }
}

/// A submitted unit of work
#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub payload: TaskPayload,
    pub submitted_at: Instant,
}

impl Task {
    pub(crate) fn new(id: TaskId, payload: TaskPayload) -> Self {
        Self {
            id,
            payload,
            submitted_at: Instant::now(),
        }
    }
}

/// Message from the manager to a worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ManagerMessage {
    /// Run a task
    Task { id: TaskId, payload: TaskPayload },
    /// Report current metrics
    HealthCheck,
    /// Stop the execution context
    Terminate,
}

/// Result of one computation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    /// The computation returned a value
    Result(Value),
    /// The computation failed; the message is passed to the caller verbatim
    Error(String),
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Result(_))
    }
}

/// Message from a worker to the manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    /// Execution context is up
    Ready {
        identity: WorkerId,
        metrics: WorkerMetrics,
    },
    /// A task finished
    TaskResult {
        id: TaskId,
        outcome: TaskOutcome,
        metrics: WorkerMetrics,
    },
    /// Reply to a health check
    HealthReport {
        identity: WorkerId,
        metrics: WorkerMetrics,
    },
    /// The execution context hit an uncaught fault
    Faulted { identity: WorkerId, message: String },
    /// The execution context is gone; `code` is 0 for a requested stop
    Exited { identity: WorkerId, code: i32 },
}

/// A worker message stamped with where it came from
#[derive(Debug, Clone)]
pub struct WorkerEnvelope {
    pub slot: usize,
    pub worker: WorkerId,
    pub message: WorkerMessage,
}
