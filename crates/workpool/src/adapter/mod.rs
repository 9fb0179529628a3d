//! Execution adapters
//!
//! The pool never runs computations itself. Each worker hands tasks to an
//! [`ExecutionAdapter`], which owns the mapping from computation names to
//! code. [`ComputationRegistry`] is the stock adapter.
//!
//! # Example
//!
//! ```ignore
//! use workpool::prelude::*;
//!
//! let mut registry = ComputationRegistry::new();
//! registry.register_fn("double", |_ctx, args| async move {
//!     Ok(json!(args[0].as_i64().unwrap_or_default() * 2))
//! });
//!
//! let pool = WorkerPool::new(PoolConfig::new().with_worker_count(4), Arc::new(registry))?;
//! ```

mod definition;
mod memory;
mod registry;
pub(crate) mod runtime;

pub use definition::{Computation, ExecutionAdapter, TaskContext, WorkerContext};
pub use memory::MemoryProbe;
pub use registry::{ComputationFuture, ComputationHandler, ComputationRegistry};
pub use runtime::{EXIT_CLEAN, EXIT_FAULT, EXIT_PANIC};
