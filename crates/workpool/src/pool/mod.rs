//! Worker pool
//!
//! This module provides:
//! - [`WorkerPool`] - Public handle: submit tasks, read metrics, shut down
//! - [`TaskHandle`] - Future resolving to one task's outcome
//! - [`BackpressureConfig`] - Optional bound on pending tasks
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  Command   ┌──────────────────────────────────────────┐
//! │  WorkerPool  │──────────▶│                 Manager                   │
//! │ (any thread) │◀ ─ ─ ─ ─ ─│  ┌──────────────┐  ┌───────────────────┐  │
//! └──────────────┘  oneshot   │  │ PendingTable │  │ BackpressureState │  │
//!                             │  │ + DelayQueue │  │  (watermarks)     │  │
//!                             │  └──────────────┘  └───────────────────┘  │
//!                             │  health ticker ──▶ HealthCheck broadcast  │
//!                             └───────┬───────────────────────▲──────────┘
//!                     ManagerMessage  │                       │ WorkerEnvelope
//!                 ┌───────────────────┼───────────────┐       │ (shared channel)
//!                 ▼                   ▼               ▼       │
//!           ┌──────────┐        ┌──────────┐    ┌──────────┐  │
//!           │ slot 0   │        │ slot 1   │    │ slot N-1 │──┘
//!           │ thread + │        │ thread + │    │ thread + │
//!           │ runtime  │        │ runtime  │    │ runtime  │
//!           └──────────┘        └──────────┘    └──────────┘
//! ```
//!
//! The manager is the only owner of pool state. A task leaves the pending
//! table exactly once: through its result, its timeout, a worker loss or
//! shutdown. Events from a worker that has already been replaced are
//! recognised by identity and never touch the new worker's metrics.

mod backpressure;
mod handle;
mod manager;
mod pending;
mod routing;

pub use backpressure::{BackpressureConfig, BackpressureError};
pub use handle::{PoolStats, TaskHandle, WorkerPool};
