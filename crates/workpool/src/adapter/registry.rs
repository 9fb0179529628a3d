//! Computation registry
//!
//! The default [`ExecutionAdapter`]: maps computation names to async
//! handlers, either closures or typed [`Computation`]s.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use serde_json::Value;

use super::{Computation, ExecutionAdapter, TaskContext};
use crate::protocol::TaskPayload;

/// Boxed future returned by a computation handler
pub type ComputationFuture = Pin<Box<dyn Future<Output = anyhow::Result<Value>> + Send>>;

/// Type-erased computation handler
pub type ComputationHandler = Arc<dyn Fn(TaskContext, Vec<Value>) -> ComputationFuture + Send + Sync>;

/// Registry of named computations
///
/// # Example
///
/// ```ignore
/// let mut registry = ComputationRegistry::new();
/// registry.register_fn("double", |_ctx, args| async move {
///     let x = args[0].as_i64().unwrap_or_default();
///     Ok(json!(x * 2))
/// });
/// ```
#[derive(Clone, Default)]
pub struct ComputationRegistry {
    handlers: HashMap<String, ComputationHandler>,
}

impl ComputationRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a closure under `name`, replacing any previous entry
    pub fn register_fn<F, Fut>(&mut self, name: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(TaskContext, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let handler: ComputationHandler = Arc::new(move |ctx: TaskContext, args: Vec<Value>| {
            Box::pin(handler(ctx, args)) as ComputationFuture
        });
        self.handlers.insert(name.into(), handler);
        self
    }

    /// Register a typed computation under [`Computation::NAME`]
    pub fn register<C: Computation>(&mut self, computation: C) -> &mut Self {
        let computation = Arc::new(computation);
        self.register_fn(C::NAME, move |ctx: TaskContext, args: Vec<Value>| {
            let computation = Arc::clone(&computation);
            async move {
                let input: C::Input = serde_json::from_value(Value::Array(args))
                    .map_err(|e| anyhow!("invalid arguments for {}: {}", C::NAME, e))?;
                let output = computation.compute(&ctx, input).await?;
                Ok(serde_json::to_value(output)?)
            }
        })
    }

    /// Check if a computation is registered
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Number of registered computations
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Check if registry is empty
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Registered computation names
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(|s| s.as_str())
    }
}

#[async_trait]
impl ExecutionAdapter for ComputationRegistry {
    async fn execute(&self, ctx: &TaskContext, payload: TaskPayload) -> anyhow::Result<Value> {
        let handler = self
            .handlers
            .get(&payload.computation)
            .cloned()
            .ok_or_else(|| anyhow!("unknown computation: {}", payload.computation))?;

        handler(*ctx, payload.args).await
    }
}

impl fmt::Debug for ComputationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputationRegistry")
            .field("computations", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}
