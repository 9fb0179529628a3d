//! Pending task table
//!
//! Tracks every submitted task that has not resolved yet, together with its
//! timeout. A task leaves the table exactly once: on its result, on its
//! timeout, or when the pool drains it.

use std::collections::HashMap;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::oneshot;
use tokio_util::time::{delay_queue, DelayQueue};

use crate::error::TaskError;
use crate::protocol::TaskId;

/// Channel used to answer the submitter of a task
pub(crate) type TaskReply = oneshot::Sender<Result<Value, TaskError>>;

#[derive(Debug)]
struct PendingEntry {
    slot: usize,
    submitted_at: Instant,
    reply: TaskReply,
    timer: delay_queue::Key,
}

#[derive(Debug)]
pub(crate) struct PendingTable {
    entries: HashMap<TaskId, PendingEntry>,
    timers: DelayQueue<TaskId>,
    timeout: Duration,
}

impl PendingTable {
    pub(crate) fn new(timeout: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            timers: DelayQueue::new(),
            timeout,
        }
    }

    /// Register a task routed to `slot` and arm its timeout
    pub(crate) fn insert(&mut self, id: TaskId, slot: usize, submitted_at: Instant, reply: TaskReply) {
        let timer = self.timers.insert(id, self.timeout);
        if let Some(previous) = self.entries.insert(
            id,
            PendingEntry {
                slot,
                submitted_at,
                reply,
                timer,
            },
        ) {
            // A replaced entry must not leave its old timer armed
            self.timers.try_remove(&previous.timer);
        }
    }

    /// Resolve a task; returns false if it already left the table
    pub(crate) fn resolve(&mut self, id: TaskId, result: Result<Value, TaskError>) -> bool {
        let Some(entry) = self.entries.remove(&id) else {
            return false;
        };
        self.timers.try_remove(&entry.timer);
        // The submitter may have dropped its handle
        let _ = entry.reply.send(result);
        true
    }

    /// Fail a task whose timer fired
    pub(crate) fn expire(&mut self, id: TaskId) -> Option<Duration> {
        let entry = self.entries.remove(&id)?;
        let _ = entry.reply.send(Err(TaskError::TaskTimeout {
            id,
            timeout: self.timeout,
        }));
        Some(entry.submitted_at.elapsed())
    }

    /// Next task whose timeout elapsed
    ///
    /// Stays pending while the timer queue is empty; the queue wakes the
    /// task again on the next insert.
    pub(crate) fn poll_expired(&mut self, cx: &mut Context<'_>) -> Poll<TaskId> {
        match self.timers.poll_expired(cx) {
            Poll::Ready(Some(expired)) => Poll::Ready(expired.into_inner()),
            Poll::Ready(None) | Poll::Pending => Poll::Pending,
        }
    }

    /// Ids of tasks routed to `slot`
    pub(crate) fn in_flight_on(&self, slot: usize) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.slot == slot)
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        ids
    }

    /// Pending task count per slot
    pub(crate) fn load_by_slot(&self, worker_count: usize) -> Vec<usize> {
        let mut load = vec![0; worker_count];
        for entry in self.entries.values() {
            if let Some(count) = load.get_mut(entry.slot) {
                *count += 1;
            }
        }
        load
    }

    /// Answer every pending task with `error` and empty the table
    pub(crate) fn drain_all(&mut self, error: TaskError) -> usize {
        let drained = self.entries.len();
        for (_, entry) in self.entries.drain() {
            let _ = entry.reply.send(Err(error.clone()));
        }
        self.timers.clear();
        drained
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn table() -> PendingTable {
        PendingTable::new(Duration::from_millis(50))
    }

    #[tokio::test]
    async fn test_resolve_delivers_once() {
        let mut pending = table();
        let (tx, rx) = oneshot::channel();
        pending.insert(TaskId(1), 0, Instant::now(), tx);

        assert!(pending.resolve(TaskId(1), Ok(json!(2))));
        assert!(!pending.resolve(TaskId(1), Ok(json!(3))));
        assert_eq!(rx.await.unwrap(), Ok(json!(2)));
        assert_eq!(pending.len(), 0);
    }

    #[tokio::test]
    async fn test_timeout_fires_and_late_result_is_ignored() {
        let mut pending = table();
        let (tx, rx) = oneshot::channel();
        pending.insert(TaskId(7), 1, Instant::now(), tx);

        let id = std::future::poll_fn(|cx| pending.poll_expired(cx)).await;
        assert_eq!(id, TaskId(7));
        assert!(pending.expire(id).is_some());

        assert_eq!(
            rx.await.unwrap(),
            Err(TaskError::TaskTimeout {
                id: TaskId(7),
                timeout: Duration::from_millis(50)
            })
        );
        assert!(!pending.resolve(TaskId(7), Ok(json!(1))));
    }

    #[tokio::test]
    async fn test_resolved_task_never_times_out() {
        let mut pending = table();
        let (tx, _rx) = oneshot::channel();
        pending.insert(TaskId(1), 0, Instant::now(), tx);
        pending.resolve(TaskId(1), Ok(json!(null)));

        let fired = tokio::time::timeout(
            Duration::from_millis(150),
            std::future::poll_fn(|cx| pending.poll_expired(cx)),
        )
        .await;
        assert!(fired.is_err());
    }

    #[tokio::test]
    async fn test_slot_queries() {
        let mut pending = table();
        let mut receivers = Vec::new();
        for (id, slot) in [(1, 0), (2, 1), (3, 0), (4, 2)] {
            let (tx, rx) = oneshot::channel();
            pending.insert(TaskId(id), slot, Instant::now(), tx);
            receivers.push(rx);
        }

        assert_eq!(pending.in_flight_on(0), vec![TaskId(1), TaskId(3)]);
        assert_eq!(pending.load_by_slot(3), vec![2, 1, 1]);
        assert_eq!(pending.len(), 4);
    }

    #[tokio::test]
    async fn test_drain_all_rejects_everything() {
        let mut pending = table();
        let (tx1, rx1) = oneshot::channel();
        let (tx2, rx2) = oneshot::channel();
        pending.insert(TaskId(1), 0, Instant::now(), tx1);
        pending.insert(TaskId(2), 1, Instant::now(), tx2);

        assert_eq!(pending.drain_all(TaskError::PoolClosed), 2);
        assert_eq!(rx1.await.unwrap(), Err(TaskError::PoolClosed));
        assert_eq!(rx2.await.unwrap(), Err(TaskError::PoolClosed));
        assert_eq!(pending.len(), 0);
    }
}
