//! # Workpool
//!
//! A resilient pool of isolated workers for CPU-bound async computations.
//!
//! ## Features
//!
//! - **Isolated workers**: each worker owns a thread and a single-threaded
//!   tokio runtime; a panic takes down that worker only
//! - **Automatic recovery**: faulted or exited workers are replaced in place,
//!   with their metrics reset
//! - **Per-task timeouts**: every task resolves exactly once, late results
//!   are discarded
//! - **Health checks**: periodic metrics refresh, optional eviction of
//!   unresponsive workers
//! - **Backpressure**: optional bound on pending tasks with watermark
//!   hysteresis
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        WorkerPool                            │
//! │  (submit / execute / metrics / shutdown, any task)           │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ commands
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Pool manager                            │
//! │  (routing, pending table + timeouts, health, replacement)    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ ManagerMessage / WorkerMessage
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Workers (one thread per slot)                │
//! │  (run computations through an ExecutionAdapter)              │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use workpool::prelude::*;
//!
//! let mut registry = ComputationRegistry::new();
//! registry.register_fn("double", |_ctx, args| async move {
//!     Ok(json!(args[0].as_i64().unwrap_or_default() * 2))
//! });
//!
//! let pool = WorkerPool::new(PoolConfig::new().with_worker_count(4), Arc::new(registry))?;
//!
//! let doubled = pool
//!     .execute_batch("double", vec![vec![json!(1)], vec![json!(2)], vec![json!(3)]])
//!     .await?;
//! assert_eq!(doubled, vec![json!(2), json!(4), json!(6)]);
//!
//! pool.shutdown().await?;
//! ```

pub mod adapter;
pub mod config;
pub mod error;
pub mod metrics;
pub mod pool;
pub mod protocol;
mod worker;

/// Prelude for common imports
pub mod prelude {
    pub use crate::adapter::{
        Computation, ComputationRegistry, ExecutionAdapter, TaskContext, WorkerContext,
    };
    pub use crate::config::{PoolConfig, RoutingStrategy};
    pub use crate::error::{PoolError, TaskError};
    pub use crate::metrics::{PoolMetrics, WorkerMetrics};
    pub use crate::pool::{BackpressureConfig, PoolStats, TaskHandle, WorkerPool};
    pub use crate::protocol::{TaskId, TaskPayload};
    pub use serde_json::{json, Value};
}

// Re-export key types at crate root
pub use adapter::{Computation, ComputationRegistry, ExecutionAdapter, TaskContext, WorkerContext};
pub use config::{ConfigError, PoolConfig, RoutingStrategy};
pub use error::{PoolError, TaskError, WorkerError};
pub use metrics::{PoolMetrics, WorkerMetrics};
pub use pool::{BackpressureConfig, PoolStats, TaskHandle, WorkerPool};
pub use protocol::{TaskId, TaskPayload, WorkerId};
