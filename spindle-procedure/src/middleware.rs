//! Middleware for the procedure pipeline.
//!
//! The pattern is identical to axum's `from_fn` — each middleware
//! receives a `Next` that it can call to continue the chain, or skip to
//! short-circuit. Passing different args to `next.run` transforms the
//! input seen by the rest of the chain; post-processing the returned
//! result transforms the output.

use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use spindle_types::{ProcedureError, ProcedureOutput, TraceId};

/// Result alias used throughout the pipeline.
pub type ProcedureResult = Result<ProcedureOutput, ProcedureError>;

/// Whether a procedure was built as a procedure or a hook.
///
/// Purely informational; hooks have identical runtime semantics and are
/// distinguished only for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceType {
    /// A regular procedure.
    #[default]
    Procedure,
    /// A lifecycle hook.
    Hook,
}

/// Call metadata handed to every middleware alongside the args.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// The procedure's name.
    pub name: String,
    /// Whether this is a procedure or a hook.
    pub source_type: SourceType,
    /// The procedure's configured metadata.
    pub metadata: HashMap<String, Value>,
    /// Trace the invocation belongs to.
    pub trace_id: TraceId,
}

/// The terminal handler at the end of the chain.
pub type HandlerFn =
    Arc<dyn Fn(Value, Envelope) -> BoxFuture<'static, ProcedureResult> + Send + Sync>;

/// Middleware that wraps procedure execution.
///
/// Middleware can:
/// - Inspect/transform the args before passing them on
/// - Short-circuit by returning without calling `next.run()`
/// - Inspect/transform the result after the handler runs
/// - Wrap `next.run()` in a try/catch for error handling
///
/// Uses boxed futures for dyn-compatibility (heterogeneous middleware
/// collections).
pub trait ProcedureMiddleware: Send + Sync {
    /// Process a call, optionally delegating to the rest of the chain.
    fn process<'a>(
        &'a self,
        args: Value,
        envelope: &'a Envelope,
        next: Next<'a>,
    ) -> BoxFuture<'a, ProcedureResult>;
}

/// The remaining middleware chain plus the handler.
///
/// Consumed on call to prevent double-invoke.
pub struct Next<'a> {
    handler: &'a HandlerFn,
    middleware: &'a [Arc<dyn ProcedureMiddleware>],
}

impl<'a> Next<'a> {
    pub(crate) fn new(
        handler: &'a HandlerFn,
        middleware: &'a [Arc<dyn ProcedureMiddleware>],
    ) -> Self {
        Self {
            handler,
            middleware,
        }
    }

    /// Continue the chain with the given (possibly transformed) args,
    /// eventually invoking the handler with the most recent args.
    ///
    /// The ambient cancellation signal is observed at every boundary.
    pub async fn run(self, args: Value, envelope: &'a Envelope) -> ProcedureResult {
        if let Some(ctx) = spindle_context::try_current()
            && ctx.signal.is_cancelled()
        {
            return Err(ProcedureError::Aborted);
        }
        if let Some((head, tail)) = self.middleware.split_first() {
            let next = Next::new(self.handler, tail);
            head.process(args, envelope, next).await
        } else {
            // End of chain — invoke the handler
            (self.handler)(args, envelope.clone()).await
        }
    }
}

/// Wrapper that implements `ProcedureMiddleware` for a closure
/// returning a boxed future.
struct MiddlewareFn<F> {
    f: F,
}

impl<F> ProcedureMiddleware for MiddlewareFn<F>
where
    F: for<'a> Fn(Value, &'a Envelope, Next<'a>) -> BoxFuture<'a, ProcedureResult> + Send + Sync,
{
    fn process<'a>(
        &'a self,
        args: Value,
        envelope: &'a Envelope,
        next: Next<'a>,
    ) -> BoxFuture<'a, ProcedureResult> {
        (self.f)(args, envelope, next)
    }
}

/// Create middleware from a closure (like axum's `from_fn`).
///
/// The closure must return a `Box::pin(async move { ... })` future.
///
/// # Example
///
/// ```ignore
/// use spindle_procedure::*;
///
/// let logging = middleware_fn(|args, env, next| {
///     Box::pin(async move {
///         tracing::debug!(name = %env.name, "calling");
///         let result = next.run(args, env).await;
///         tracing::debug!(name = %env.name, "done");
///         result
///     })
/// });
/// ```
#[must_use]
pub fn middleware_fn<F>(f: F) -> impl ProcedureMiddleware
where
    F: for<'a> Fn(Value, &'a Envelope, Next<'a>) -> BoxFuture<'a, ProcedureResult> + Send + Sync,
{
    MiddlewareFn { f }
}

/// A named ordered bundle of middleware.
///
/// Attaching a pipeline to a procedure flattens its middleware in
/// place, preserving order.
pub struct Pipeline {
    name: String,
    middleware: Vec<Arc<dyn ProcedureMiddleware>>,
}

impl Pipeline {
    /// Create an empty pipeline.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            middleware: Vec::new(),
        }
    }

    /// Append a middleware.
    #[must_use]
    pub fn with(mut self, middleware: impl ProcedureMiddleware + 'static) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// The pipeline's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn middleware(&self) -> &[Arc<dyn ProcedureMiddleware>] {
        &self.middleware
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("len", &self.middleware.len())
            .finish()
    }
}
