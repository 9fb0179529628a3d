//! Execution adapter trait definition

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::protocol::{TaskId, TaskPayload, WorkerId};

/// Where a worker lives in the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerContext {
    /// Stable slot index
    pub slot: usize,
    /// Identity of this execution context
    pub identity: WorkerId,
}

/// Context handed to a computation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskContext {
    /// Task being executed
    pub task_id: TaskId,
    /// Slot of the worker running the task
    pub slot: usize,
    /// Identity of the worker running the task
    pub worker: WorkerId,
}

/// Runs computations inside a worker
///
/// One adapter instance is shared read-only by every worker of a pool.
/// Workers call [`execute`](Self::execute) concurrently, possibly from
/// different threads. Failures are reported to the caller of the task as
/// `TaskError::TaskExecution` with the error's `Display` text; a panic is
/// treated as a fault of the whole worker.
///
/// # Example
///
/// ```ignore
/// struct Echo;
///
/// #[async_trait]
/// impl ExecutionAdapter for Echo {
///     async fn execute(&self, _ctx: &TaskContext, payload: TaskPayload) -> anyhow::Result<Value> {
///         Ok(Value::Array(payload.args))
///     }
/// }
/// ```
#[async_trait]
pub trait ExecutionAdapter: Send + Sync + 'static {
    /// Run the computation described by `payload`
    async fn execute(&self, ctx: &TaskContext, payload: TaskPayload) -> anyhow::Result<Value>;

    /// Called on the worker thread before it announces readiness
    fn on_worker_start(&self, _worker: &WorkerContext) {}

    /// Called on the worker thread after its runtime has stopped
    fn on_worker_stop(&self, _worker: &WorkerContext) {}
}

/// A typed, named computation
///
/// The task's argument list is deserialized into [`Input`](Self::Input) as a
/// JSON array, so a tuple such as `(i64, i64)` takes two positional
/// arguments.
///
/// # Example
///
/// ```ignore
/// struct Double;
///
/// #[async_trait]
/// impl Computation for Double {
///     const NAME: &'static str = "double";
///     type Input = (i64,);
///     type Output = i64;
///
///     async fn compute(&self, _ctx: &TaskContext, (x,): (i64,)) -> anyhow::Result<i64> {
///         Ok(x * 2)
///     }
/// }
/// ```
#[async_trait]
pub trait Computation: Send + Sync + 'static {
    /// Name used in [`TaskPayload::computation`]
    const NAME: &'static str;

    /// Arguments, deserialized from the argument list
    type Input: DeserializeOwned + Send;

    /// Result, serialized back to the caller
    type Output: Serialize + Send;

    /// Run the computation
    async fn compute(&self, ctx: &TaskContext, input: Self::Input)
        -> anyhow::Result<Self::Output>;
}
