//! Memory sampling for per-task deltas

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// Samples the resident set size of the hosting process
///
/// Workers share one address space, so a delta taken around a task
/// includes allocations made concurrently by other workers.
pub struct MemoryProbe {
    pid: Pid,
    system: System,
}

impl MemoryProbe {
    pub fn new() -> Self {
        // Starts empty; the first sample loads only this process
        Self {
            pid: Pid::from_u32(std::process::id()),
            system: System::new(),
        }
    }

    /// Current resident memory in bytes, 0 if unavailable
    pub fn sample(&mut self) -> u64 {
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[self.pid]),
            true,
            ProcessRefreshKind::new().with_memory(),
        );
        self.system
            .process(self.pid)
            .map(|process| process.memory())
            .unwrap_or(0)
    }
}

impl Default for MemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}
