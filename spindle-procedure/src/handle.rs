//! The external-facing execution handle.

use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use spindle_context::EventBus;
use spindle_graph::{NodeStatus, ProcedureGraph};
use spindle_types::{ExecutionId, TraceId};

use crate::middleware::ProcedureResult;

/// Facade handed to external observers (transport layer, UI) of one
/// root invocation.
///
/// `procedure:start`, `stream:chunk`, `procedure:end`,
/// `procedure:error`, and application events arrive on `events`. The
/// handle's internal pid becomes the `execution_id` of the root
/// boundary, so observers can correlate events with the handle.
#[derive(Clone)]
pub struct ExecutionHandle {
    pid: ExecutionId,
    /// Bus carrying the invocation's lifecycle and application events.
    pub events: EventBus,
    /// Stable trace id for correlation.
    pub trace_id: TraceId,
    signal: CancellationToken,
    graph: Arc<ProcedureGraph>,
}

impl ExecutionHandle {
    pub(crate) fn new(
        trace_id: TraceId,
        signal: CancellationToken,
        graph: Arc<ProcedureGraph>,
    ) -> Self {
        Self {
            pid: ExecutionId::fresh(),
            events: EventBus::new(),
            trace_id,
            signal,
            graph,
        }
    }

    /// The handle's internal pid (the root boundary's execution id).
    pub fn pid(&self) -> &ExecutionId {
        &self.pid
    }

    /// Cooperatively cancel the invocation and everything under it.
    pub fn cancel(&self) {
        self.signal.cancel();
    }

    /// Status of the invocation's root node, once tracking has begun.
    pub fn status(&self) -> Option<NodeStatus> {
        self.graph.root().map(|node| node.status())
    }
}

impl fmt::Debug for ExecutionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionHandle")
            .field("pid", &self.pid)
            .field("trace_id", &self.trace_id)
            .finish_non_exhaustive()
    }
}

/// What a handled call returns: the observer facade plus the result
/// future.
///
/// Subscribe on `handle.events` before awaiting `result` to observe the
/// full lifecycle.
pub struct HandleInvocation {
    /// The observer facade.
    pub handle: ExecutionHandle,
    /// The invocation's output.
    pub result: BoxFuture<'static, ProcedureResult>,
}

impl fmt::Debug for HandleInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleInvocation")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}
