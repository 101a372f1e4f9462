//! Nodes of the procedure tree.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;

use spindle_types::{ExecutionId, Metrics, Pid};

/// Lifecycle status of a tracked procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// The procedure is executing.
    Running,
    /// The procedure finished normally.
    Completed,
    /// The procedure raised an error or timed out.
    Failed,
    /// The procedure was cooperatively cancelled.
    Cancelled,
}

impl NodeStatus {
    /// Whether this status ends the node's lifecycle.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Error record attached to failed or cancelled nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeError {
    /// Human-readable failure message.
    pub message: String,
}

impl NodeError {
    /// Create an error record from a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug)]
struct NodeState {
    status: NodeStatus,
    completed_at: Option<DateTime<Utc>>,
    error: Option<NodeError>,
    metrics: Metrics,
}

/// One tracked operation in the procedure tree.
///
/// Identity fields are immutable; status, error, and metrics live behind
/// a lock so the tracker and concurrent children can update them.
#[derive(Debug)]
pub struct ProcedureNode {
    /// Unique node id.
    pub pid: Pid,
    /// Parent node id; absent for the root.
    pub parent_pid: Option<Pid>,
    /// Human-readable name, conventionally `component:operation`.
    pub name: String,
    /// Free-form attributes.
    pub metadata: HashMap<String, Value>,
    /// Grouping key for the user-visible execution this node belongs to.
    pub execution_id: Option<ExecutionId>,
    /// Whether this node minted its own execution boundary.
    pub is_execution_boundary: bool,
    /// Execution type, derived from the name prefix unless explicit.
    pub execution_type: Option<String>,
    /// When tracking began.
    pub started_at: DateTime<Utc>,
    state: Mutex<NodeState>,
}

impl ProcedureNode {
    pub(crate) fn new(
        pid: Pid,
        parent_pid: Option<Pid>,
        name: String,
        metadata: HashMap<String, Value>,
        execution_id: Option<ExecutionId>,
        is_execution_boundary: bool,
        execution_type: Option<String>,
    ) -> Self {
        Self {
            pid,
            parent_pid,
            name,
            metadata,
            execution_id,
            is_execution_boundary,
            execution_type,
            started_at: Utc::now(),
            state: Mutex::new(NodeState {
                status: NodeStatus::Running,
                completed_at: None,
                error: None,
                metrics: Metrics::new(),
            }),
        }
    }

    /// Current status.
    pub fn status(&self) -> NodeStatus {
        self.state.lock().expect("node state poisoned").status
    }

    /// When the node reached a terminal status.
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.state.lock().expect("node state poisoned").completed_at
    }

    /// The error record, for failed/cancelled nodes.
    pub fn error(&self) -> Option<NodeError> {
        self.state
            .lock()
            .expect("node state poisoned")
            .error
            .clone()
    }

    /// Snapshot of the accumulated metrics.
    pub fn metrics(&self) -> Metrics {
        self.state
            .lock()
            .expect("node state poisoned")
            .metrics
            .clone()
    }

    /// Read one metric value.
    pub fn metric(&self, key: &str) -> Option<f64> {
        self.state
            .lock()
            .expect("node state poisoned")
            .metrics
            .get(key)
    }

    /// Add a delta to one metric.
    pub fn add_metric(&self, key: &str, delta: f64) {
        self.state
            .lock()
            .expect("node state poisoned")
            .metrics
            .add(key, delta);
    }

    /// Additively merge a metric snapshot into this node.
    pub fn merge_metrics(&self, other: &Metrics) {
        self.state
            .lock()
            .expect("node state poisoned")
            .metrics
            .merge_from(other);
    }

    /// Transition to a terminal status.
    ///
    /// Returns false (and changes nothing) when the node already
    /// reached a terminal status: the transition happens exactly once.
    pub fn transition(&self, status: NodeStatus, error: Option<NodeError>) -> bool {
        let mut state = self.state.lock().expect("node state poisoned");
        if state.status.is_terminal() {
            tracing::debug!(
                pid = %self.pid,
                current = ?state.status,
                requested = ?status,
                "ignoring repeated terminal transition"
            );
            return false;
        }
        if !status.is_terminal() {
            return false;
        }
        state.status = status;
        state.completed_at = Some(Utc::now());
        state.error = error;
        true
    }
}
