//! The request-scoped context record and its ambient storage.

use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

use spindle_graph::{MetricsView, ProcedureGraph, ProcedureNode};
use spindle_types::{ContextError, ExecutionId, KernelEvent, Metrics, Pid, RequestId, TraceId};

use crate::bus::EventBus;
use crate::service::ChannelService;

/// The authenticated principal a request runs as.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Principal {
    /// Stable user id.
    pub id: String,
    /// Tenant the user belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    /// Role names granted to the user.
    #[serde(default)]
    pub roles: Vec<String>,
}

impl Principal {
    /// Create a principal with just an id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tenant_id: None,
            roles: Vec::new(),
        }
    }
}

/// Where context metric writes land.
///
/// Outside any tracked call the context carries a plain shared map;
/// inside one, the tracker installs a [`MetricsView`] over the current
/// node so writes accumulate on the node and propagate upward on
/// completion.
#[derive(Debug, Clone)]
pub enum MetricsHandle {
    /// A request-level shared map.
    Shared(Arc<Mutex<Metrics>>),
    /// A view over the current procedure node.
    Node(MetricsView),
}

impl MetricsHandle {
    /// Create a fresh shared map.
    #[must_use]
    pub fn shared() -> Self {
        Self::Shared(Arc::new(Mutex::new(Metrics::new())))
    }

    /// Write an absolute value.
    pub fn set(&self, key: &str, value: f64) {
        match self {
            Self::Shared(map) => map.lock().expect("metrics poisoned").set(key, value),
            Self::Node(view) => view.set(key, value),
        }
    }

    /// Add a delta.
    pub fn add(&self, key: &str, delta: f64) {
        match self {
            Self::Shared(map) => map.lock().expect("metrics poisoned").add(key, delta),
            Self::Node(view) => view.add(key, delta),
        }
    }

    /// Read the current value.
    pub fn get(&self, key: &str) -> Option<f64> {
        match self {
            Self::Shared(map) => map.lock().expect("metrics poisoned").get(key),
            Self::Node(view) => view.get(key),
        }
    }

    /// Snapshot every metric.
    pub fn snapshot(&self) -> Metrics {
        match self {
            Self::Shared(map) => map.lock().expect("metrics poisoned").clone(),
            Self::Node(view) => view.node().metrics(),
        }
    }
}

/// Request-scoped state carried implicitly with every call.
///
/// Shared fields (`events`, `signal`, `graph`, `channels`) alias the
/// parent across [`KernelContext::child`]; scalar cursor fields are
/// copied so overrides never leak back to the parent or to sibling
/// forks.
#[derive(Clone)]
pub struct KernelContext {
    /// Opaque unique id for the logical request.
    pub request_id: RequestId,
    /// Opaque unique id correlating everything in the trace.
    pub trace_id: TraceId,
    /// The principal the request runs as.
    pub user: Option<Principal>,
    /// Free-form request attributes (e.g. `conversationId`).
    pub metadata: HashMap<String, Value>,
    /// Live metric view (see [`MetricsHandle`]).
    pub metrics: MetricsHandle,
    /// Per-request lifecycle bus.
    pub events: EventBus,
    /// Cooperative cancellation handle, shared with every fork.
    pub signal: CancellationToken,
    /// Richer bus exposed to external observers, when attached.
    pub execution_handle: Option<EventBus>,
    /// Session-scoped channel access, when attached.
    pub channels: Option<Arc<dyn ChannelService>>,
    /// The request's procedure tree.
    pub graph: Option<Arc<ProcedureGraph>>,
    /// The current node's id.
    pub procedure_pid: Option<Pid>,
    /// The current node.
    pub procedure_node: Option<Arc<ProcedureNode>>,
    /// Root node of the current chain.
    pub origin: Option<Arc<ProcedureNode>>,
    /// Grouping key for the user-visible execution.
    pub execution_id: Option<ExecutionId>,
    /// Execution type of the current boundary.
    pub execution_type: Option<String>,
    /// Execution the current one was spawned from.
    pub parent_execution_id: Option<ExecutionId>,
}

impl std::fmt::Debug for KernelContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelContext")
            .field("request_id", &self.request_id)
            .field("trace_id", &self.trace_id)
            .field("procedure_pid", &self.procedure_pid)
            .field("execution_id", &self.execution_id)
            .finish_non_exhaustive()
    }
}

/// Field overrides applied when creating or forking a context.
#[derive(Default, Clone)]
pub struct ContextOverrides {
    /// Replace the request id.
    pub request_id: Option<RequestId>,
    /// Replace the trace id.
    pub trace_id: Option<TraceId>,
    /// Replace the principal.
    pub user: Option<Principal>,
    /// Replace the metadata map.
    pub metadata: Option<HashMap<String, Value>>,
    /// Replace the metric handle.
    pub metrics: Option<MetricsHandle>,
    /// Replace the event bus.
    pub events: Option<EventBus>,
    /// Replace the cancellation handle.
    pub signal: Option<CancellationToken>,
    /// Attach an execution handle bus.
    pub execution_handle: Option<EventBus>,
    /// Attach a channel service.
    pub channels: Option<Arc<dyn ChannelService>>,
    /// Replace the procedure graph.
    pub graph: Option<Arc<ProcedureGraph>>,
    /// Move the cursor to this node id.
    pub procedure_pid: Option<Pid>,
    /// Move the cursor to this node.
    pub procedure_node: Option<Arc<ProcedureNode>>,
    /// Set the chain origin.
    pub origin: Option<Arc<ProcedureNode>>,
    /// Set the execution grouping key.
    pub execution_id: Option<ExecutionId>,
    /// Set the execution type.
    pub execution_type: Option<String>,
    /// Set the parent execution key.
    pub parent_execution_id: Option<ExecutionId>,
}

impl ContextOverrides {
    /// Start an empty override set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the principal.
    #[must_use]
    pub fn with_user(mut self, user: Principal) -> Self {
        self.user = Some(user);
        self
    }

    /// Set a metadata entry, creating the map override if needed.
    #[must_use]
    pub fn with_metadata_entry(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value);
        self
    }

    /// Attach a channel service.
    #[must_use]
    pub fn with_channels(mut self, channels: Arc<dyn ChannelService>) -> Self {
        self.channels = Some(channels);
        self
    }

    /// Replace the cancellation handle.
    #[must_use]
    pub fn with_signal(mut self, signal: CancellationToken) -> Self {
        self.signal = Some(signal);
        self
    }

    /// Attach an execution handle bus.
    #[must_use]
    pub fn with_execution_handle(mut self, bus: EventBus) -> Self {
        self.execution_handle = Some(bus);
        self
    }
}

impl std::fmt::Debug for ContextOverrides {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextOverrides").finish_non_exhaustive()
    }
}

impl KernelContext {
    /// Construct a fresh root context: new ids, a fresh event bus and
    /// cancellation handle, a shared metric map, and an empty graph.
    #[must_use]
    pub fn create(overrides: ContextOverrides) -> Arc<Self> {
        Arc::new(Self {
            request_id: overrides.request_id.unwrap_or_else(RequestId::fresh),
            trace_id: overrides.trace_id.unwrap_or_else(TraceId::fresh),
            user: overrides.user,
            metadata: overrides.metadata.unwrap_or_default(),
            metrics: overrides.metrics.unwrap_or_else(MetricsHandle::shared),
            events: overrides.events.unwrap_or_default(),
            signal: overrides.signal.unwrap_or_default(),
            execution_handle: overrides.execution_handle,
            channels: overrides.channels,
            graph: Some(
                overrides
                    .graph
                    .unwrap_or_else(|| Arc::new(ProcedureGraph::new())),
            ),
            procedure_pid: overrides.procedure_pid,
            procedure_node: overrides.procedure_node,
            origin: overrides.origin,
            execution_id: overrides.execution_id,
            execution_type: overrides.execution_type,
            parent_execution_id: overrides.parent_execution_id,
        })
    }

    /// Shallow-copy this context with scalar overrides.
    ///
    /// Shared fields alias the parent; cursor fields are replaced when
    /// overridden. The parent is never mutated.
    #[must_use]
    pub fn child(&self, overrides: ContextOverrides) -> Arc<Self> {
        let mut child = self.clone();
        if let Some(request_id) = overrides.request_id {
            child.request_id = request_id;
        }
        if let Some(trace_id) = overrides.trace_id {
            child.trace_id = trace_id;
        }
        if let Some(user) = overrides.user {
            child.user = Some(user);
        }
        if let Some(metadata) = overrides.metadata {
            child.metadata = metadata;
        }
        if let Some(metrics) = overrides.metrics {
            child.metrics = metrics;
        }
        if let Some(events) = overrides.events {
            child.events = events;
        }
        if let Some(signal) = overrides.signal {
            child.signal = signal;
        }
        if let Some(handle) = overrides.execution_handle {
            child.execution_handle = Some(handle);
        }
        if let Some(channels) = overrides.channels {
            child.channels = Some(channels);
        }
        if let Some(graph) = overrides.graph {
            child.graph = Some(graph);
        }
        if let Some(pid) = overrides.procedure_pid {
            child.procedure_pid = Some(pid);
        }
        if let Some(node) = overrides.procedure_node {
            child.procedure_node = Some(node);
        }
        if let Some(origin) = overrides.origin {
            child.origin = Some(origin);
        }
        if let Some(execution_id) = overrides.execution_id {
            child.execution_id = Some(execution_id);
        }
        if let Some(execution_type) = overrides.execution_type {
            child.execution_type = Some(execution_type);
        }
        if let Some(parent) = overrides.parent_execution_id {
            child.parent_execution_id = Some(parent);
        }
        Arc::new(child)
    }

    /// Publish a lifecycle event on the context's buses.
    ///
    /// The event lands on `events` and, when attached, on
    /// `execution_handle`; wildcard subscribers on either bus receive
    /// it as well.
    pub fn emit(&self, event_type: impl Into<String>, payload: Value, source: Option<&str>) {
        let mut event = KernelEvent::new(event_type, payload);
        event.metadata.timestamp = Some(Utc::now());
        event.metadata.source = source.map(Into::into);
        event.metadata.execution_id = self.execution_id.clone();
        self.events.publish(&event);
        if let Some(handle) = &self.execution_handle {
            handle.publish(&event);
        }
    }
}

tokio::task_local! {
    static CURRENT: Arc<KernelContext>;
}

/// Establish `ctx` as the ambient context for the extent of `fut`,
/// including every `.await` it suspends through. Nested scopes shadow
/// and restore.
pub async fn run<F: Future>(ctx: Arc<KernelContext>, fut: F) -> F::Output {
    CURRENT.scope(ctx, fut).await
}

/// Synchronous variant of [`run`] for non-async extents.
pub fn run_sync<R>(ctx: Arc<KernelContext>, f: impl FnOnce() -> R) -> R {
    CURRENT.sync_scope(ctx, f)
}

/// The ambient context.
///
/// # Errors
///
/// [`ContextError::NotFound`] outside any [`run`] scope.
pub fn current() -> Result<Arc<KernelContext>, ContextError> {
    CURRENT
        .try_with(Arc::clone)
        .map_err(|_| ContextError::NotFound)
}

/// The ambient context, or `None` outside any scope.
pub fn try_current() -> Option<Arc<KernelContext>> {
    CURRENT.try_with(Arc::clone).ok()
}

/// Fork the ambient context with overrides and run `fut` under the
/// fork.
///
/// # Errors
///
/// [`ContextError::NotFound`] outside any [`run`] scope.
pub async fn fork<F: Future>(
    overrides: ContextOverrides,
    fut: F,
) -> Result<F::Output, ContextError> {
    let child = current()?.child(overrides);
    Ok(run(child, fut).await)
}

/// Emit a lifecycle event on the ambient context's buses.
///
/// # Errors
///
/// [`ContextError::NotFound`] outside any [`run`] scope.
pub fn emit(
    event_type: impl Into<String>,
    payload: Value,
    source: Option<&str>,
) -> Result<(), ContextError> {
    current()?.emit(event_type, payload, source);
    Ok(())
}
