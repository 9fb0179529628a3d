//! Per-worker metrics
//!
//! Workers keep their own [`WorkerMetrics`] and attach a copy to every
//! reply. The manager stores the latest copy per slot and hands out
//! [`PoolMetrics`] snapshots that never change after they are taken.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::duration_millis;

/// Counters for one worker slot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerMetrics {
    /// Tasks the worker has finished, successfully or not
    pub total_tasks: u64,
    /// Tasks whose computation returned a value
    pub successful_tasks: u64,
    /// Tasks whose computation failed or panicked
    pub failed_tasks: u64,
    /// Sum of per-task execution times
    #[serde(with = "duration_millis")]
    pub total_execution_time: Duration,
    /// Largest per-task memory delta observed, in bytes
    pub peak_memory_usage: u64,
}

impl WorkerMetrics {
    /// Record one finished task
    pub fn record(&mut self, elapsed: Duration, memory_delta: u64, success: bool) {
        self.total_tasks += 1;
        if success {
            self.successful_tasks += 1;
        } else {
            self.failed_tasks += 1;
        }
        self.total_execution_time += elapsed;
        self.peak_memory_usage = self.peak_memory_usage.max(memory_delta);
    }

    /// `successful_tasks + failed_tasks == total_tasks`
    pub fn is_consistent(&self) -> bool {
        self.successful_tasks + self.failed_tasks == self.total_tasks
    }

    /// Mean execution time per finished task
    pub fn average_execution_time(&self) -> Duration {
        if self.total_tasks == 0 {
            return Duration::ZERO;
        }
        self.total_execution_time / self.total_tasks as u32
    }

    /// Whether all counters are zero
    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

/// Point-in-time copy of every slot's metrics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolMetrics {
    slots: BTreeMap<usize, WorkerMetrics>,
}

impl PoolMetrics {
    pub(crate) fn from_slots(records: &[WorkerMetrics]) -> Self {
        Self {
            slots: records.iter().cloned().enumerate().collect(),
        }
    }

    /// Metrics for one slot
    pub fn slot(&self, slot: usize) -> Option<&WorkerMetrics> {
        self.slots.get(&slot)
    }

    /// Iterate over `(slot, metrics)` in slot order
    pub fn iter(&self) -> impl Iterator<Item = (usize, &WorkerMetrics)> {
        self.slots.iter().map(|(slot, m)| (*slot, m))
    }

    /// Number of slots in the snapshot
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the snapshot has no slots (pool shut down)
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Sum over all slots; peak memory is the maximum
    pub fn total(&self) -> WorkerMetrics {
        self.slots
            .values()
            .fold(WorkerMetrics::default(), |mut acc, m| {
                acc.total_tasks += m.total_tasks;
                acc.successful_tasks += m.successful_tasks;
                acc.failed_tasks += m.failed_tasks;
                acc.total_execution_time += m.total_execution_time;
                acc.peak_memory_usage = acc.peak_memory_usage.max(m.peak_memory_usage);
                acc
            })
    }
}
