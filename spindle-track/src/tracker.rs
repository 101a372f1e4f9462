//! The tracker itself.

use futures::{SinkExt, StreamExt};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use tracing::Instrument;

use spindle_context::{self as context, ContextOverrides, KernelContext, MetricsHandle};
use spindle_graph::{MetricsView, NodeError, NodeStatus, ProcedureGraph, ProcedureNode, RegisterNode};
use spindle_types::{ExecutionId, Pid, ProcedureError, ProcedureOutput, ValueStream, event_type};

use crate::options::{ExecutionBoundary, TrackOptions, derive_execution_type};

struct ResolvedExecution {
    execution_id: Option<ExecutionId>,
    is_boundary: bool,
    execution_type: Option<String>,
    parent_execution_id: Option<ExecutionId>,
}

fn resolve_execution(ctx: &KernelContext, options: &TrackOptions, pid: &Pid) -> ResolvedExecution {
    let minted_type = || {
        Some(
            options
                .execution_type
                .clone()
                .unwrap_or_else(|| derive_execution_type(&options.name)),
        )
    };
    match options.boundary {
        ExecutionBoundary::Always => ResolvedExecution {
            execution_id: Some(
                options
                    .execution_id
                    .clone()
                    .unwrap_or_else(|| ExecutionId::new(pid.as_str())),
            ),
            is_boundary: true,
            execution_type: minted_type(),
            parent_execution_id: ctx.execution_id.clone(),
        },
        ExecutionBoundary::Child => ResolvedExecution {
            execution_id: Some(ExecutionId::new(pid.as_str())),
            is_boundary: true,
            execution_type: minted_type(),
            parent_execution_id: ctx.execution_id.clone(),
        },
        ExecutionBoundary::Auto => {
            if ctx.execution_id.is_some() {
                ResolvedExecution {
                    execution_id: ctx.execution_id.clone(),
                    is_boundary: false,
                    execution_type: ctx.execution_type.clone(),
                    parent_execution_id: ctx.parent_execution_id.clone(),
                }
            } else {
                ResolvedExecution {
                    execution_id: Some(
                        options
                            .execution_id
                            .clone()
                            .unwrap_or_else(|| ExecutionId::new(pid.as_str())),
                    ),
                    is_boundary: true,
                    execution_type: minted_type(),
                    parent_execution_id: None,
                }
            }
        }
        ExecutionBoundary::Disabled => ResolvedExecution {
            execution_id: ctx.execution_id.clone(),
            is_boundary: false,
            execution_type: ctx.execution_type.clone(),
            parent_execution_id: ctx.parent_execution_id.clone(),
        },
    }
}

/// Wraps async operations as tracked nodes in the request graph.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecutionTracker;

impl ExecutionTracker {
    /// Track one async operation.
    ///
    /// Registers a node under the ambient cursor (or
    /// `options.parent_pid`), forks the context with the node cursor
    /// and a node-backed metric view, emits `procedure:start`, and runs
    /// `f` under the fork inside a tracing span.
    ///
    /// A plain value result completes the node (propagating metrics to
    /// the parent) and emits `procedure:end`. A stream result is
    /// re-wrapped so each item is produced under the fork, emits
    /// `stream:chunk`, and observes the cancellation signal; the node
    /// settles when the stream ends. Errors mark the node failed — or
    /// cancelled when classified as an abort — emit `procedure:error`,
    /// and are re-thrown.
    ///
    /// # Errors
    ///
    /// [`ProcedureError::Aborted`] when the signal is already set, or
    /// whatever `f` fails with.
    pub async fn track<F, Fut>(
        ctx: &Arc<KernelContext>,
        options: TrackOptions,
        f: F,
    ) -> Result<ProcedureOutput, ProcedureError>
    where
        F: FnOnce(Arc<ProcedureNode>) -> Fut,
        Fut: Future<Output = Result<ProcedureOutput, ProcedureError>> + Send,
    {
        // Graph is created lazily for contexts built without one.
        let graph = ctx
            .graph
            .clone()
            .unwrap_or_else(|| Arc::new(ProcedureGraph::new()));

        let pid = Pid::fresh();
        let parent_pid = options
            .parent_pid
            .clone()
            .or_else(|| ctx.procedure_pid.clone());
        let origin = if parent_pid.is_none() {
            None
        } else {
            ctx.origin.clone().or_else(|| graph.root())
        };
        let resolved = resolve_execution(ctx, &options, &pid);
        let node_execution_type = Some(
            options
                .execution_type
                .clone()
                .unwrap_or_else(|| derive_execution_type(&options.name)),
        );

        let node = graph.register(
            RegisterNode::new(pid.clone(), options.name.clone())
                .with_parent(parent_pid.clone())
                .with_metadata(options.metadata.clone())
                .with_execution(
                    resolved.execution_id.clone(),
                    resolved.is_boundary,
                    node_execution_type,
                ),
        );

        let view = MetricsView::new(node.clone());
        let forked = ctx.child(ContextOverrides {
            graph: Some(graph.clone()),
            procedure_pid: Some(pid.clone()),
            procedure_node: Some(node.clone()),
            origin,
            metrics: Some(MetricsHandle::Node(view)),
            execution_id: resolved.execution_id,
            execution_type: resolved.execution_type,
            parent_execution_id: resolved.parent_execution_id,
            ..Default::default()
        });

        let span = tracing::info_span!(
            "procedure",
            pid = %pid,
            name = %options.name,
            execution_id = forked.execution_id.as_ref().map(|id| id.as_str()),
        );

        forked.emit(
            event_type::PROCEDURE_START,
            json!({
                "pid": pid.as_str(),
                "name": options.name.as_str(),
                "parent_pid": parent_pid.as_ref().map(Pid::as_str),
            }),
            Some("tracker"),
        );

        let outcome = {
            let forked = forked.clone();
            let node = node.clone();
            context::run(forked.clone(), async move {
                if forked.signal.is_cancelled() {
                    return Err(ProcedureError::Aborted);
                }
                f(node).await
            })
            .instrument(span)
            .await
        };

        match outcome {
            Ok(ProcedureOutput::Value(value)) => {
                graph.update_status(&pid, NodeStatus::Completed, None);
                tracing::debug!(pid = %pid, metrics = ?node.metrics(), "procedure completed");
                forked.emit(
                    event_type::PROCEDURE_END,
                    json!({"pid": pid.as_str(), "name": options.name.as_str()}),
                    Some("tracker"),
                );
                Ok(ProcedureOutput::Value(value))
            }
            Ok(ProcedureOutput::Stream(inner)) => Ok(ProcedureOutput::Stream(wrap_stream(
                forked,
                graph,
                pid,
                options.name,
                inner,
            ))),
            Err(error) => {
                let cancelled = error.is_abort();
                let status = if cancelled {
                    NodeStatus::Cancelled
                } else {
                    NodeStatus::Failed
                };
                graph.update_status(&pid, status, Some(NodeError::new(error.to_string())));
                tracing::warn!(pid = %pid, %error, cancelled, "procedure failed");
                forked.emit(
                    event_type::PROCEDURE_ERROR,
                    json!({
                        "pid": pid.as_str(),
                        "name": options.name.as_str(),
                        "error": error.to_string(),
                        "cancelled": cancelled,
                    }),
                    Some("tracker"),
                );
                Err(error)
            }
        }
    }
}

/// Re-wrap a handler's stream so production happens under the forked
/// context and the node settles when the stream ends.
///
/// The producer stays at most one item ahead of the consumer (bounded
/// channel), checks the signal before each pull, and drops the inner
/// stream on exit, which closes the underlying source.
fn wrap_stream(
    forked: Arc<KernelContext>,
    graph: Arc<ProcedureGraph>,
    pid: Pid,
    name: String,
    inner: ValueStream,
) -> ValueStream {
    let (tx, rx) = futures::channel::mpsc::channel::<Result<serde_json::Value, ProcedureError>>(0);

    let producer = {
        let forked = forked.clone();
        async move {
            let mut tx = tx;
            let mut inner = inner;
            loop {
                if forked.signal.is_cancelled() {
                    settle_stream(&graph, &forked, &pid, &name, StreamEnd::Aborted);
                    let _ = tx.send(Err(ProcedureError::Aborted)).await;
                    break;
                }
                match inner.next().await {
                    Some(Ok(value)) => {
                        // Re-check after the pull: an abort that landed
                        // while the source was producing stops the
                        // stream before this item is yielded.
                        if forked.signal.is_cancelled() {
                            settle_stream(&graph, &forked, &pid, &name, StreamEnd::Aborted);
                            let _ = tx.send(Err(ProcedureError::Aborted)).await;
                            break;
                        }
                        forked.emit(
                            event_type::STREAM_CHUNK,
                            json!({"pid": pid.as_str(), "value": value.clone()}),
                            Some("tracker"),
                        );
                        if tx.send(Ok(value)).await.is_err() {
                            settle_stream(&graph, &forked, &pid, &name, StreamEnd::Abandoned);
                            break;
                        }
                    }
                    Some(Err(error)) => {
                        let end = if error.is_abort() {
                            StreamEnd::Aborted
                        } else {
                            StreamEnd::Failed(error.to_string())
                        };
                        settle_stream(&graph, &forked, &pid, &name, end);
                        let _ = tx.send(Err(error)).await;
                        break;
                    }
                    None => {
                        settle_stream(&graph, &forked, &pid, &name, StreamEnd::Exhausted);
                        break;
                    }
                }
            }
        }
    };
    tokio::spawn(context::run(forked, producer));

    Box::pin(rx)
}

enum StreamEnd {
    Exhausted,
    Failed(String),
    Aborted,
    Abandoned,
}

fn settle_stream(
    graph: &ProcedureGraph,
    ctx: &KernelContext,
    pid: &Pid,
    name: &str,
    end: StreamEnd,
) {
    match end {
        StreamEnd::Exhausted => {
            graph.update_status(pid, NodeStatus::Completed, None);
            ctx.emit(
                event_type::PROCEDURE_END,
                json!({"pid": pid.as_str(), "name": name}),
                Some("tracker"),
            );
        }
        StreamEnd::Failed(message) => {
            graph.update_status(pid, NodeStatus::Failed, Some(NodeError::new(&message)));
            ctx.emit(
                event_type::PROCEDURE_ERROR,
                json!({"pid": pid.as_str(), "name": name, "error": message, "cancelled": false}),
                Some("tracker"),
            );
        }
        StreamEnd::Aborted => {
            graph.update_status(pid, NodeStatus::Cancelled, Some(NodeError::new("aborted")));
            ctx.emit(
                event_type::PROCEDURE_ERROR,
                json!({"pid": pid.as_str(), "name": name, "error": "aborted", "cancelled": true}),
                Some("tracker"),
            );
        }
        StreamEnd::Abandoned => {
            graph.update_status(
                pid,
                NodeStatus::Cancelled,
                Some(NodeError::new("stream abandoned by consumer")),
            );
            ctx.emit(
                event_type::PROCEDURE_ERROR,
                json!({
                    "pid": pid.as_str(),
                    "name": name,
                    "error": "stream abandoned by consumer",
                    "cancelled": true,
                }),
                Some("tracker"),
            );
        }
    }
}
