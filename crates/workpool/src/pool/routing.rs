//! Slot selection for new tasks

use crate::config::RoutingStrategy;
use crate::protocol::TaskId;

use super::pending::PendingTable;

impl RoutingStrategy {
    /// Pick the slot for task `id` in a pool of `worker_count` slots
    pub(crate) fn select_slot(&self, id: TaskId, worker_count: usize, pending: &PendingTable) -> usize {
        debug_assert!(worker_count > 0);
        match self {
            Self::TaskId => (id.0 % worker_count as u64) as usize,
            Self::LeastPending => least_loaded(&pending.load_by_slot(worker_count)),
        }
    }
}

fn least_loaded(load: &[usize]) -> usize {
    load.iter()
        .enumerate()
        .min_by_key(|(slot, count)| (**count, *slot))
        .map(|(slot, _)| slot)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};
    use tokio::sync::oneshot;

    #[test]
    fn test_task_id_routing_is_modulo() {
        let pending = PendingTable::new(Duration::from_secs(1));
        let slots: Vec<usize> = (0..7)
            .map(|i| RoutingStrategy::TaskId.select_slot(TaskId(i), 3, &pending))
            .collect();
        assert_eq!(slots, vec![0, 1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn test_least_loaded_prefers_lowest_slot_on_ties() {
        assert_eq!(least_loaded(&[0, 0, 0]), 0);
        assert_eq!(least_loaded(&[2, 1, 1]), 1);
        assert_eq!(least_loaded(&[3, 4, 0]), 2);
        assert_eq!(least_loaded(&[]), 0);
    }

    #[tokio::test]
    async fn test_least_pending_uses_table_load() {
        let mut pending = PendingTable::new(Duration::from_secs(10));
        let mut receivers = Vec::new();
        for (id, slot) in [(0, 0), (1, 0), (2, 1)] {
            let (tx, rx) = oneshot::channel();
            pending.insert(TaskId(id), slot, Instant::now(), tx);
            receivers.push(rx);
        }

        let slot = RoutingStrategy::LeastPending.select_slot(TaskId(3), 3, &pending);
        assert_eq!(slot, 2);
    }
}
