//! The procedure itself: construction, invocation, composition.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use spindle_context::{ContextOverrides, KernelContext};
use spindle_graph::ProcedureGraph;
use spindle_track::{ExecutionTracker, TrackOptions};
use spindle_types::{ExecutionId, ProcedureError, ProcedureOutput, TraceId, ValueStream};

use crate::handle::{ExecutionHandle, HandleInvocation};
use crate::middleware::{
    Envelope, HandlerFn, Next, Pipeline, ProcedureMiddleware, ProcedureResult, SourceType,
};
use crate::validator::Validator;

#[derive(Clone)]
struct ProcedureInner {
    name: String,
    handler: HandlerFn,
    middleware: Vec<Arc<dyn ProcedureMiddleware>>,
    validator: Option<Validator>,
    timeout: Option<Duration>,
    metadata: HashMap<String, Value>,
    source_type: SourceType,
    context_overrides: Option<ContextOverrides>,
}

/// A callable operation built from a handler plus configuration.
///
/// Invocation resolves an effective context (ambient, child, or fresh
/// root), tracks the call as a graph node, walks the middleware chain,
/// and runs the handler — re-checking the cancellation signal at every
/// boundary. Cloning is cheap; every composition method returns a new
/// `Procedure` and leaves the original unchanged.
#[derive(Clone)]
pub struct Procedure {
    inner: Arc<ProcedureInner>,
}

impl std::fmt::Debug for Procedure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Procedure")
            .field("name", &self.inner.name)
            .field("middleware", &self.inner.middleware.len())
            .field("timeout", &self.inner.timeout)
            .field("source_type", &self.inner.source_type)
            .finish_non_exhaustive()
    }
}

impl Procedure {
    /// Start building a procedure.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> ProcedureBuilder {
        ProcedureBuilder::new(name, SourceType::Procedure)
    }

    /// Start building a hook (identical semantics, tagged for
    /// observability).
    #[must_use]
    pub fn hook(name: impl Into<String>) -> ProcedureBuilder {
        ProcedureBuilder::new(name, SourceType::Hook)
    }

    /// The procedure's name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Invoke and unwrap a plain value result.
    ///
    /// # Errors
    ///
    /// Validation, cancellation, timeout, and handler errors; also
    /// fails when the handler produced a stream.
    pub async fn call(&self, args: Value) -> Result<Value, ProcedureError> {
        self.invoke(args, None).await?.into_value()
    }

    /// Invoke and unwrap a streaming result.
    ///
    /// # Errors
    ///
    /// As [`call`](Self::call), but fails when the handler produced a
    /// plain value.
    pub async fn call_stream(&self, args: Value) -> Result<ValueStream, ProcedureError> {
        self.invoke(args, None).await?.into_stream()
    }

    /// Invoke with optional per-call context overrides.
    ///
    /// # Errors
    ///
    /// Validation, cancellation, timeout, and handler errors.
    pub async fn invoke(
        &self,
        args: Value,
        overrides: Option<ContextOverrides>,
    ) -> ProcedureResult {
        self.invoke_inner(args, overrides, None).await
    }

    async fn invoke_inner(
        &self,
        args: Value,
        call_overrides: Option<ContextOverrides>,
        execution_id: Option<ExecutionId>,
    ) -> ProcedureResult {
        // Validation surfaces synchronously from the invocation
        // boundary, before any tracking begins.
        let args = match &self.inner.validator {
            Some(validator) => validator
                .validate(&args)
                .map_err(ProcedureError::Validation)?,
            None => args,
        };

        let proc_overrides = self.inner.context_overrides.clone();
        match spindle_context::try_current() {
            Some(ambient) => {
                if proc_overrides.is_none() && call_overrides.is_none() {
                    // Reuse the ambient context directly.
                    self.tracked(ambient, args, execution_id).await
                } else {
                    let mut ctx = ambient;
                    if let Some(overrides) = proc_overrides {
                        ctx = ctx.child(overrides);
                    }
                    if let Some(overrides) = call_overrides {
                        ctx = ctx.child(overrides);
                    }
                    let fut = self.tracked(ctx.clone(), args, execution_id);
                    spindle_context::run(ctx, fut).await
                }
            }
            None => {
                let root = KernelContext::create(proc_overrides.unwrap_or_default());
                let ctx = match call_overrides {
                    Some(overrides) => root.child(overrides),
                    None => root,
                };
                let fut = self.tracked(ctx.clone(), args, execution_id);
                spindle_context::run(ctx, fut).await
            }
        }
    }

    async fn tracked(
        &self,
        ctx: Arc<KernelContext>,
        args: Value,
        execution_id: Option<ExecutionId>,
    ) -> ProcedureResult {
        let inner = self.inner.clone();
        let trace_id = ctx.trace_id.clone();
        let mut options =
            TrackOptions::new(inner.name.clone()).with_metadata(inner.metadata.clone());
        if let Some(id) = execution_id {
            options = options.with_execution_id(id);
        }
        ExecutionTracker::track(&ctx, options, move |_node| {
            run_chain(inner, args, trace_id)
        })
        .await
    }

    /// Return a new procedure with this middleware appended.
    #[must_use]
    pub fn use_mw(&self, middleware: impl ProcedureMiddleware + 'static) -> Procedure {
        let mut inner = (*self.inner).clone();
        inner.middleware.push(Arc::new(middleware));
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Return a new procedure with a pipeline's middleware flattened in,
    /// preserving order.
    #[must_use]
    pub fn use_pipeline(&self, pipeline: &Pipeline) -> Procedure {
        let mut inner = (*self.inner).clone();
        inner
            .middleware
            .extend(pipeline.middleware().iter().cloned());
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Return a new procedure with the given timeout.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Procedure {
        let mut inner = (*self.inner).clone();
        inner.timeout = Some(timeout);
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Return a new procedure whose invocations merge these overrides
    /// into the ambient context.
    ///
    /// Middleware is not re-applied; it still runs inside this
    /// procedure's own invocation.
    #[must_use]
    pub fn with_context(&self, overrides: ContextOverrides) -> Procedure {
        let mut inner = (*self.inner).clone();
        inner.context_overrides = Some(overrides);
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Return a new procedure that awaits this one, then feeds its
    /// value result into `next` as the sole argument.
    #[must_use]
    pub fn pipe(&self, next: &Procedure) -> Procedure {
        let first = self.clone();
        let second = next.clone();
        let name = format!("{}|{}", self.name(), next.name());
        let handler: HandlerFn = Arc::new(move |args, _envelope| {
            let first = first.clone();
            let second = second.clone();
            Box::pin(async move {
                let value = first.invoke(args, None).await?.into_value()?;
                second.invoke(value, None).await
            })
        });
        Self {
            inner: Arc::new(ProcedureInner {
                name,
                handler,
                middleware: Vec::new(),
                validator: None,
                timeout: None,
                metadata: HashMap::new(),
                source_type: SourceType::Procedure,
                context_overrides: None,
            }),
        }
    }

    /// Return a callable wrapper whose calls yield `{handle, result}`
    /// instead of the bare result.
    #[must_use]
    pub fn with_handle(&self) -> HandledProcedure {
        HandledProcedure {
            procedure: self.clone(),
        }
    }
}

/// Runs the middleware chain under the per-procedure timeout.
async fn run_chain(inner: Arc<ProcedureInner>, args: Value, trace_id: TraceId) -> ProcedureResult {
    let envelope = Envelope {
        name: inner.name.clone(),
        source_type: inner.source_type,
        metadata: inner.metadata.clone(),
        trace_id,
    };
    let chain = Next::new(&inner.handler, &inner.middleware).run(args, &envelope);
    match inner.timeout {
        Some(timeout) if !timeout.is_zero() => {
            // The timer is dropped on every exit path.
            match tokio::time::timeout(timeout, chain).await {
                Ok(result) => result,
                Err(_) => Err(ProcedureError::Timeout(timeout)),
            }
        }
        _ => chain.await,
    }
}

/// Callable wrapper returned by [`Procedure::with_handle`].
#[derive(Debug, Clone)]
pub struct HandledProcedure {
    procedure: Procedure,
}

impl HandledProcedure {
    /// Invoke, returning the observer handle immediately alongside the
    /// result future.
    ///
    /// The handle's bus receives the invocation's lifecycle events; its
    /// internal pid becomes the root boundary's execution id, and
    /// `cancel()` aborts the invocation cooperatively.
    pub fn call(&self, args: Value) -> HandleInvocation {
        let ambient = spindle_context::try_current();
        let trace_id = ambient
            .as_ref()
            .map(|ctx| ctx.trace_id.clone())
            .unwrap_or_else(TraceId::fresh);
        let signal = ambient
            .as_ref()
            .map(|ctx| ctx.signal.child_token())
            .unwrap_or_default();
        let graph = ambient
            .as_ref()
            .and_then(|ctx| ctx.graph.clone())
            .unwrap_or_else(|| Arc::new(ProcedureGraph::new()));

        let handle = ExecutionHandle::new(trace_id.clone(), signal.clone(), graph.clone());
        let overrides = ContextOverrides {
            trace_id: Some(trace_id),
            signal: Some(signal),
            graph: Some(graph),
            execution_handle: Some(handle.events.clone()),
            ..Default::default()
        };
        let procedure = self.procedure.clone();
        let execution_id = handle.pid().clone();
        let result: BoxFuture<'static, ProcedureResult> = Box::pin(async move {
            procedure
                .invoke_inner(args, Some(overrides), Some(execution_id))
                .await
        });
        HandleInvocation { handle, result }
    }
}

/// Builder for [`Procedure`].
///
/// Only `name` and a handler are required.
pub struct ProcedureBuilder {
    name: String,
    handler: Option<HandlerFn>,
    middleware: Vec<Arc<dyn ProcedureMiddleware>>,
    validator: Option<Validator>,
    timeout: Option<Duration>,
    metadata: HashMap<String, Value>,
    source_type: SourceType,
}

impl ProcedureBuilder {
    fn new(name: impl Into<String>, source_type: SourceType) -> Self {
        Self {
            name: name.into(),
            handler: None,
            middleware: Vec::new(),
            validator: None,
            timeout: None,
            metadata: HashMap::new(),
            source_type,
        }
    }

    /// Set a handler producing a single value.
    #[must_use]
    pub fn handler<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Value, ProcedureError>> + Send + 'static,
    {
        self.handler = Some(Arc::new(move |args, _envelope| {
            let fut = f(args);
            Box::pin(async move { Ok(ProcedureOutput::Value(fut.await?)) })
        }));
        self
    }

    /// Set a handler producing a stream of values.
    #[must_use]
    pub fn stream_handler<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<ValueStream, ProcedureError>> + Send + 'static,
    {
        self.handler = Some(Arc::new(move |args, _envelope| {
            let fut = f(args);
            Box::pin(async move { Ok(ProcedureOutput::Stream(fut.await?)) })
        }));
        self
    }

    /// Set a handler with the full `(args, envelope)` signature.
    #[must_use]
    pub fn raw_handler(mut self, handler: HandlerFn) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Validate (and normalize) the call args before invocation.
    #[must_use]
    pub fn schema(mut self, validator: Validator) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Race the whole invocation against a timer.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Attach one metadata entry (applied to the tracking node).
    #[must_use]
    pub fn metadata_entry(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Append a middleware.
    #[must_use]
    pub fn middleware(mut self, middleware: impl ProcedureMiddleware + 'static) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// Flatten a pipeline's middleware in, preserving order.
    #[must_use]
    pub fn pipeline(mut self, pipeline: &Pipeline) -> Self {
        self.middleware.extend(pipeline.middleware().iter().cloned());
        self
    }

    /// Build the procedure.
    ///
    /// # Errors
    ///
    /// [`ProcedureError::Validation`] when no handler was configured.
    pub fn build(self) -> Result<Procedure, ProcedureError> {
        let handler = self
            .handler
            .ok_or_else(|| ProcedureError::Validation("a handler is required".into()))?;
        Ok(Procedure {
            inner: Arc::new(ProcedureInner {
                name: self.name,
                handler,
                middleware: self.middleware,
                validator: self.validator,
                timeout: self.timeout,
                metadata: self.metadata,
                source_type: self.source_type,
                context_overrides: None,
            }),
        })
    }
}
