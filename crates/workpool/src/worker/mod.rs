//! Handles to worker threads
//!
//! A worker owns one OS thread running a single-threaded tokio runtime. The
//! manager talks to it through a [`WorkerHandle`]; the worker answers on the
//! shared event channel with [`WorkerEnvelope`](crate::protocol::WorkerEnvelope)s.

mod handle;

pub(crate) use handle::WorkerHandle;
