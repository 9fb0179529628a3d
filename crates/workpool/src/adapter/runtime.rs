//! Worker-side runtime
//!
//! Runs on a dedicated thread with its own single-threaded tokio runtime.
//! It announces readiness, executes tasks through the [`ExecutionAdapter`],
//! answers health checks and reports its exit to the manager.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, error, trace, warn};

use super::memory::MemoryProbe;
use super::{ExecutionAdapter, TaskContext, WorkerContext};
use crate::error::WorkerError;
use crate::metrics::WorkerMetrics;
use crate::protocol::{
    ManagerMessage, TaskId, TaskOutcome, TaskPayload, WorkerEnvelope, WorkerMessage,
};

/// Exit code for a worker stopped on request
pub const EXIT_CLEAN: i32 = 0;
/// Exit code for a worker that faulted
pub const EXIT_FAULT: i32 = 1;
/// Exit code for a worker whose thread panicked outside any task
pub const EXIT_PANIC: i32 = 101;

/// Sends envelopes stamped with this worker's slot and identity
#[derive(Clone)]
struct Reporter {
    ctx: WorkerContext,
    outbox: mpsc::UnboundedSender<WorkerEnvelope>,
}

impl Reporter {
    fn send(&self, message: WorkerMessage) {
        let envelope = WorkerEnvelope {
            slot: self.ctx.slot,
            worker: self.ctx.identity,
            message,
        };
        if self.outbox.send(envelope).is_err() {
            trace!(slot = self.ctx.slot, worker = %self.ctx.identity, "Manager gone, dropping report");
        }
    }
}

/// Counters and memory probe local to one worker
#[derive(Default)]
struct WorkerState {
    metrics: Mutex<WorkerMetrics>,
    probe: Mutex<MemoryProbe>,
}

impl WorkerState {
    fn snapshot(&self) -> WorkerMetrics {
        self.metrics.lock().clone()
    }

    fn sample_memory(&self) -> u64 {
        self.probe.lock().sample()
    }
}

/// Thread entry point of a worker
///
/// Always ends by reporting `Exited`; a fault is reported as `Faulted` first.
pub(crate) fn run_worker(
    ctx: WorkerContext,
    adapter: Arc<dyn ExecutionAdapter>,
    inbox: mpsc::UnboundedReceiver<ManagerMessage>,
    outbox: mpsc::UnboundedSender<WorkerEnvelope>,
) {
    let reporter = Reporter { ctx, outbox };

    let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
        adapter.on_worker_start(&ctx);
        run_runtime(ctx, Arc::clone(&adapter), inbox, reporter.clone())
    }));

    let code = match outcome {
        Ok(Ok(())) => EXIT_CLEAN,
        Ok(Err(err)) => {
            warn!(slot = ctx.slot, worker = %ctx.identity, error = %err, "Worker faulted");
            reporter.send(WorkerMessage::Faulted {
                identity: ctx.identity,
                message: err.to_string(),
            });
            EXIT_FAULT
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!(slot = ctx.slot, worker = %ctx.identity, panic = %message, "Worker thread panicked");
            reporter.send(WorkerMessage::Faulted {
                identity: ctx.identity,
                message,
            });
            EXIT_PANIC
        }
    };

    if std::panic::catch_unwind(AssertUnwindSafe(|| adapter.on_worker_stop(&ctx))).is_err() {
        warn!(slot = ctx.slot, worker = %ctx.identity, "on_worker_stop panicked");
    }

    debug!(slot = ctx.slot, worker = %ctx.identity, code, "Worker exited");
    reporter.send(WorkerMessage::Exited {
        identity: ctx.identity,
        code,
    });
}

fn run_runtime(
    ctx: WorkerContext,
    adapter: Arc<dyn ExecutionAdapter>,
    inbox: mpsc::UnboundedReceiver<ManagerMessage>,
    reporter: Reporter,
) -> Result<(), WorkerError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| WorkerError::Fault(format!("failed to start worker runtime: {}", e)))?;

    let result = runtime.block_on(worker_loop(ctx, adapter, inbox, reporter));

    // Computations still in flight are dropped with the runtime
    drop(runtime);
    result
}

async fn worker_loop(
    ctx: WorkerContext,
    adapter: Arc<dyn ExecutionAdapter>,
    mut inbox: mpsc::UnboundedReceiver<ManagerMessage>,
    reporter: Reporter,
) -> Result<(), WorkerError> {
    let state = Arc::new(WorkerState::default());
    let (fault_tx, mut fault_rx) = mpsc::unbounded_channel::<String>();

    reporter.send(WorkerMessage::Ready {
        identity: ctx.identity,
        metrics: state.snapshot(),
    });
    debug!(slot = ctx.slot, worker = %ctx.identity, "Worker ready");

    loop {
        tokio::select! {
            biased;

            Some(message) = fault_rx.recv() => {
                return Err(WorkerError::Fault(message));
            }
            message = inbox.recv() => match message {
                Some(ManagerMessage::Task { id, payload }) => {
                    let task_ctx = TaskContext {
                        task_id: id,
                        slot: ctx.slot,
                        worker: ctx.identity,
                    };
                    tokio::spawn(run_task(
                        task_ctx,
                        payload,
                        Arc::clone(&adapter),
                        Arc::clone(&state),
                        reporter.clone(),
                        fault_tx.clone(),
                    ));
                }
                Some(ManagerMessage::HealthCheck) => {
                    reporter.send(WorkerMessage::HealthReport {
                        identity: ctx.identity,
                        metrics: state.snapshot(),
                    });
                }
                Some(ManagerMessage::Terminate) => {
                    debug!(slot = ctx.slot, worker = %ctx.identity, "Terminate requested");
                    return Ok(());
                }
                None => {
                    debug!(slot = ctx.slot, worker = %ctx.identity, "Manager channel closed");
                    return Ok(());
                }
            }
        }
    }
}

async fn run_task(
    ctx: TaskContext,
    payload: TaskPayload,
    adapter: Arc<dyn ExecutionAdapter>,
    state: Arc<WorkerState>,
    reporter: Reporter,
    fault_tx: mpsc::UnboundedSender<String>,
) {
    let id: TaskId = ctx.task_id;
    let started = Instant::now();
    let baseline = state.sample_memory();

    let result = AssertUnwindSafe(adapter.execute(&ctx, payload))
        .catch_unwind()
        .await;

    let elapsed = started.elapsed();
    let memory_delta = state.sample_memory().saturating_sub(baseline);

    let (outcome, fault) = match result {
        Ok(Ok(value)) => (TaskOutcome::Result(value), None),
        Ok(Err(err)) => (TaskOutcome::Error(err.to_string()), None),
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            (
                TaskOutcome::Error(format!("computation panicked: {}", message)),
                Some(message),
            )
        }
    };

    let metrics = {
        let mut metrics = state.metrics.lock();
        metrics.record(elapsed, memory_delta, outcome.is_success());
        metrics.clone()
    };

    trace!(
        task_id = %id,
        slot = ctx.slot,
        elapsed_ms = elapsed.as_millis() as u64,
        success = outcome.is_success(),
        "Task finished"
    );
    reporter.send(WorkerMessage::TaskResult {
        id,
        outcome,
        metrics,
    });

    if let Some(message) = fault {
        let _ = fault_tx.send(message);
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
