//! Pool manager actor
//!
//! Single owner of the slots, the pending table and the backpressure state.
//! Every mutation happens on this task, so a task resolves exactly once no
//! matter whether its result, its timeout or a drain gets there first.

use std::future::poll_fn;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use super::backpressure::BackpressureState;
use super::handle::PoolStats;
use super::pending::{PendingTable, TaskReply};
use crate::adapter::ExecutionAdapter;
use crate::config::PoolConfig;
use crate::error::{TaskError, WorkerError};
use crate::metrics::{PoolMetrics, WorkerMetrics};
use crate::protocol::{
    ManagerMessage, Task, TaskId, TaskOutcome, WorkerEnvelope, WorkerId, WorkerMessage,
};
use crate::worker::WorkerHandle;

/// Requests from [`WorkerPool`](super::WorkerPool) handles
#[derive(Debug)]
pub(crate) enum Command {
    Submit { task: Task, reply: TaskReply },
    Metrics { reply: oneshot::Sender<PoolMetrics> },
    Stats { reply: oneshot::Sender<PoolStats> },
    Shutdown { reply: oneshot::Sender<()> },
}

#[derive(Debug, Default)]
struct Slot {
    handle: Option<WorkerHandle>,
    metrics: WorkerMetrics,
    awaiting_health: bool,
    missed_health_checks: u32,
}

impl Slot {
    fn with_handle(handle: WorkerHandle) -> Self {
        Self {
            handle: Some(handle),
            ..Default::default()
        }
    }

    /// Whether `worker` is the execution context currently in this slot
    fn is_current(&self, worker: WorkerId) -> bool {
        self.handle.as_ref().is_some_and(|h| h.id() == worker)
    }
}

enum Event {
    Command(Option<Command>),
    Worker(WorkerEnvelope),
    HealthTick,
    Expired(TaskId),
}

pub(crate) struct Manager {
    config: PoolConfig,
    adapter: Arc<dyn ExecutionAdapter>,
    slots: Vec<Slot>,
    pending: PendingTable,
    backpressure: BackpressureState,
    events_tx: mpsc::UnboundedSender<WorkerEnvelope>,
    shutting_down: Arc<AtomicBool>,
    restarts: u64,
}

impl Manager {
    pub(crate) fn new(
        config: PoolConfig,
        adapter: Arc<dyn ExecutionAdapter>,
        handles: Vec<WorkerHandle>,
        events_tx: mpsc::UnboundedSender<WorkerEnvelope>,
        shutting_down: Arc<AtomicBool>,
    ) -> Self {
        Self {
            pending: PendingTable::new(config.task_timeout),
            backpressure: BackpressureState::new(config.backpressure.clone()),
            slots: handles.into_iter().map(Slot::with_handle).collect(),
            config,
            adapter,
            events_tx,
            shutting_down,
            restarts: 0,
        }
    }

    /// Drive the pool until shutdown or until every pool handle is dropped
    pub(crate) async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<WorkerEnvelope>,
    ) {
        let period = self.config.health_check_interval;
        let mut health = interval_at(Instant::now() + period, period);
        health.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            worker_count = self.slots.len(),
            routing = ?self.config.routing,
            task_timeout_ms = self.config.task_timeout.as_millis() as u64,
            "Pool manager started"
        );

        loop {
            let event = tokio::select! {
                command = commands.recv() => Event::Command(command),
                Some(envelope) = events.recv() => Event::Worker(envelope),
                _ = health.tick() => Event::HealthTick,
                id = poll_fn(|cx| self.pending.poll_expired(cx)) => Event::Expired(id),
            };

            match event {
                Event::Command(Some(Command::Shutdown { reply })) => {
                    self.shutdown().await;
                    let _ = reply.send(());
                    break;
                }
                Event::Command(Some(Command::Submit { task, reply })) => self.submit(task, reply),
                Event::Command(Some(Command::Metrics { reply })) => {
                    let _ = reply.send(self.metrics());
                }
                Event::Command(Some(Command::Stats { reply })) => {
                    let _ = reply.send(self.stats());
                }
                Event::Command(None) => {
                    debug!("All pool handles dropped");
                    self.shutdown().await;
                    break;
                }
                Event::Worker(envelope) => self.handle_worker_event(envelope),
                Event::HealthTick => self.health_tick(),
                Event::Expired(id) => self.handle_timeout(id),
            }
        }

        info!(restarts = self.restarts, "Pool manager stopped");
    }

    fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    fn submit(&mut self, task: Task, reply: TaskReply) {
        if self.is_shutting_down() {
            let _ = reply.send(Err(TaskError::PoolClosed));
            return;
        }

        if !self.backpressure.should_accept(self.pending.len()) {
            let limit = self.backpressure.limit().unwrap_or_default();
            debug!(task_id = %task.id, pending = self.pending.len(), limit, "Rejecting task under backpressure");
            let _ = reply.send(Err(TaskError::QueueFull { limit }));
            return;
        }

        let slot = self
            .config
            .routing
            .select_slot(task.id, self.slots.len(), &self.pending);
        self.pending.insert(task.id, slot, task.submitted_at, reply);

        let message = ManagerMessage::Task {
            id: task.id,
            payload: task.payload,
        };
        let dispatched = self.slots[slot]
            .handle
            .as_ref()
            .map(|handle| (handle.id(), handle.send(message)));
        match dispatched {
            Some((worker, true)) => {
                trace!(task_id = %task.id, slot, worker = %worker, "Dispatched task");
            }
            _ => {
                warn!(task_id = %task.id, slot, "No live worker in slot, task left to its timeout");
            }
        }
    }

    fn handle_worker_event(&mut self, envelope: WorkerEnvelope) {
        let WorkerEnvelope {
            slot,
            worker,
            message,
        } = envelope;

        let Some(state) = self.slots.get_mut(slot) else {
            debug!(slot, worker = %worker, "Event for unknown slot");
            return;
        };
        let current = state.is_current(worker);

        match message {
            WorkerMessage::Ready { metrics, .. } => {
                if current {
                    state.metrics = metrics;
                    debug!(slot, worker = %worker, "Worker ready");
                }
            }
            WorkerMessage::TaskResult {
                id,
                outcome,
                metrics,
            } => {
                if current {
                    state.metrics = metrics;
                }
                let result = match outcome {
                    TaskOutcome::Result(value) => Ok(value),
                    TaskOutcome::Error(message) => Err(TaskError::TaskExecution { id, message }),
                };
                if !self.pending.resolve(id, result) {
                    debug!(task_id = %id, slot, "Discarding result of task no longer pending");
                }
            }
            WorkerMessage::HealthReport { metrics, .. } => {
                if current {
                    state.metrics = metrics;
                    state.awaiting_health = false;
                    state.missed_health_checks = 0;
                }
            }
            WorkerMessage::Faulted { message, .. } => {
                if current && !self.is_shutting_down() {
                    self.replace_worker(slot, WorkerError::Fault(message));
                }
            }
            WorkerMessage::Exited { code, .. } => {
                if current && !self.is_shutting_down() {
                    self.replace_worker(slot, WorkerError::Exit(code));
                }
            }
        }
    }

    /// Swap the worker in `slot` for a fresh one with zeroed metrics
    fn replace_worker(&mut self, slot: usize, reason: WorkerError) {
        let grace = self.config.terminate_timeout;
        let state = &mut self.slots[slot];

        if let Some(old) = state.handle.take() {
            let worker = old.id();
            warn!(slot, worker = %worker, reason = %reason, "Replacing worker");
            tokio::spawn(async move {
                if let Err(e) = old.terminate(grace).await {
                    warn!(slot, worker = %worker, error = %e, "Replaced worker did not stop cleanly");
                }
            });
        }

        state.metrics = WorkerMetrics::default();
        state.awaiting_health = false;
        state.missed_health_checks = 0;
        self.restarts += 1;

        if self.config.fail_in_flight_on_crash {
            for id in self.pending.in_flight_on(slot) {
                self.pending.resolve(id, Err(TaskError::WorkerLost { id, slot }));
            }
        }

        self.spawn_into(slot);
    }

    fn spawn_into(&mut self, slot: usize) {
        match WorkerHandle::spawn(slot, Arc::clone(&self.adapter), self.events_tx.clone()) {
            Ok(handle) => {
                info!(slot, worker = %handle.id(), "Worker started");
                self.slots[slot].handle = Some(handle);
            }
            Err(e) => {
                error!(slot, error = %e, "Failed to spawn worker, retrying on next health check");
            }
        }
    }

    fn health_tick(&mut self) {
        for slot in 0..self.slots.len() {
            if self.slots[slot].handle.is_none() {
                self.spawn_into(slot);
                continue;
            }

            let state = &mut self.slots[slot];
            if state.awaiting_health {
                state.missed_health_checks += 1;
                let missed = state.missed_health_checks;
                debug!(slot, missed, "Worker missed health check");

                if self
                    .config
                    .max_missed_health_checks
                    .is_some_and(|max| missed >= max)
                {
                    self.replace_worker(slot, WorkerError::Unresponsive(missed));
                    continue;
                }
            }

            let state = &mut self.slots[slot];
            if let Some(handle) = state.handle.as_ref() {
                handle.send(ManagerMessage::HealthCheck);
                state.awaiting_health = true;
            }
        }
    }

    fn handle_timeout(&mut self, id: TaskId) {
        if let Some(elapsed) = self.pending.expire(id) {
            warn!(
                task_id = %id,
                elapsed_ms = elapsed.as_millis() as u64,
                "Task timed out"
            );
        }
    }

    fn metrics(&self) -> PoolMetrics {
        let records: Vec<WorkerMetrics> = self.slots.iter().map(|s| s.metrics.clone()).collect();
        PoolMetrics::from_slots(&records)
    }

    fn stats(&self) -> PoolStats {
        PoolStats {
            worker_count: self.slots.len(),
            live_workers: self.slots.iter().filter(|s| s.handle.is_some()).count(),
            pending_tasks: self.pending.len(),
            restarts: self.restarts,
            accepting: self.backpressure.is_accepting() && !self.is_shutting_down(),
        }
    }

    async fn shutdown(&mut self) {
        self.shutting_down.store(true, Ordering::Release);

        let drained = self.pending.drain_all(TaskError::PoolClosed);
        info!(drained, "Shutting down worker pool");

        let grace = self.config.terminate_timeout;
        let terminations = self
            .slots
            .iter_mut()
            .filter_map(|s| s.handle.take())
            .map(|handle| async move {
                let slot = handle.slot();
                let worker = handle.id();
                if let Err(e) = handle.terminate(grace).await {
                    warn!(slot, worker = %worker, error = %e, "Worker did not stop cleanly");
                }
            });
        join_all(terminations).await;

        self.slots.clear();
    }
}
