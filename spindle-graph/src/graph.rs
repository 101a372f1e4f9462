//! The append-only per-request tree.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use spindle_types::{ExecutionId, Pid};

use crate::node::{NodeError, NodeStatus, ProcedureNode};

/// Registration input for one node.
#[derive(Debug, Clone)]
pub struct RegisterNode {
    /// Unique node id.
    pub pid: Pid,
    /// Parent node id; absent for a root.
    pub parent_pid: Option<Pid>,
    /// Human-readable name, conventionally `component:operation`.
    pub name: String,
    /// Free-form attributes.
    pub metadata: HashMap<String, Value>,
    /// Grouping key for the user-visible execution.
    pub execution_id: Option<ExecutionId>,
    /// Whether this node mints its own execution boundary.
    pub is_execution_boundary: bool,
    /// Execution type, when explicitly set.
    pub execution_type: Option<String>,
}

impl RegisterNode {
    /// Start a registration for the given pid and name.
    #[must_use]
    pub fn new(pid: Pid, name: impl Into<String>) -> Self {
        Self {
            pid,
            parent_pid: None,
            name: name.into(),
            metadata: HashMap::new(),
            execution_id: None,
            is_execution_boundary: false,
            execution_type: None,
        }
    }

    /// Set the parent node.
    #[must_use]
    pub fn with_parent(mut self, parent_pid: Option<Pid>) -> Self {
        self.parent_pid = parent_pid;
        self
    }

    /// Attach free-form attributes.
    #[must_use]
    pub fn with_metadata(mut self, metadata: HashMap<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Set the execution grouping fields.
    #[must_use]
    pub fn with_execution(
        mut self,
        execution_id: Option<ExecutionId>,
        is_boundary: bool,
        execution_type: Option<String>,
    ) -> Self {
        self.execution_id = execution_id;
        self.is_execution_boundary = is_boundary;
        self.execution_type = execution_type;
        self
    }
}

#[derive(Debug, Default)]
struct GraphState {
    nodes: HashMap<Pid, Arc<ProcedureNode>>,
    order: Vec<Pid>,
    root: Option<Pid>,
}

/// In-memory tree of every tracked operation for one request.
///
/// Owned by the request's context; only code running under that context
/// mutates it, so a plain mutex suffices.
#[derive(Debug, Default)]
pub struct ProcedureGraph {
    inner: Mutex<GraphState>,
}

impl ProcedureGraph {
    /// Create an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and store a node.
    ///
    /// The first node registered without a parent becomes the cached
    /// root. Later parentless registrations are stored but do not
    /// replace it.
    pub fn register(&self, reg: RegisterNode) -> Arc<ProcedureNode> {
        let node = Arc::new(ProcedureNode::new(
            reg.pid.clone(),
            reg.parent_pid,
            reg.name,
            reg.metadata,
            reg.execution_id,
            reg.is_execution_boundary,
            reg.execution_type,
        ));
        let mut state = self.inner.lock().expect("graph state poisoned");
        if node.parent_pid.is_none() && state.root.is_none() {
            state.root = Some(reg.pid.clone());
        }
        state.order.push(reg.pid.clone());
        state.nodes.insert(reg.pid, node.clone());
        node
    }

    /// Look up a node by id.
    pub fn get(&self, pid: &Pid) -> Option<Arc<ProcedureNode>> {
        self.inner
            .lock()
            .expect("graph state poisoned")
            .nodes
            .get(pid)
            .cloned()
    }

    /// The cached root node.
    pub fn root(&self) -> Option<Arc<ProcedureNode>> {
        let state = self.inner.lock().expect("graph state poisoned");
        state
            .root
            .as_ref()
            .and_then(|pid| state.nodes.get(pid))
            .cloned()
    }

    /// Transition a node to a terminal status.
    ///
    /// Completion and failure propagate the node's metrics additively
    /// into its parent; cancellation does not. Repeated terminal
    /// transitions are ignored.
    pub fn update_status(&self, pid: &Pid, status: NodeStatus, error: Option<NodeError>) {
        let Some(node) = self.get(pid) else {
            tracing::debug!(%pid, "status update for unknown node");
            return;
        };
        if !node.transition(status, error) {
            return;
        }
        if matches!(status, NodeStatus::Completed | NodeStatus::Failed) {
            self.propagate_metrics(pid);
        }
    }

    /// Additively merge a node's metrics into its parent's metrics.
    ///
    /// No-op when the node has no parent.
    pub fn propagate_metrics(&self, pid: &Pid) {
        let Some(node) = self.get(pid) else { return };
        let Some(parent_pid) = &node.parent_pid else {
            return;
        };
        let Some(parent) = self.get(parent_pid) else {
            return;
        };
        let snapshot = node.metrics();
        if !snapshot.is_empty() {
            parent.merge_metrics(&snapshot);
        }
    }

    /// Walk the parent chain (starting at `pid` itself) until the
    /// predicate holds or the root is reached.
    pub fn has_ancestor<F>(&self, pid: &Pid, predicate: F) -> bool
    where
        F: Fn(&ProcedureNode) -> bool,
    {
        let state = self.inner.lock().expect("graph state poisoned");
        let mut cursor = state.nodes.get(pid);
        while let Some(node) = cursor {
            if predicate(node) {
                return true;
            }
            cursor = node
                .parent_pid
                .as_ref()
                .and_then(|parent| state.nodes.get(parent));
        }
        false
    }

    /// Whether `pid` or any of its ancestors is named `name`.
    pub fn has_ancestor_with_name(&self, pid: &Pid, name: &str) -> bool {
        self.has_ancestor(pid, |node| node.name == name)
    }

    /// Direct children of a node, in registration order.
    pub fn children_of(&self, pid: &Pid) -> Vec<Arc<ProcedureNode>> {
        let state = self.inner.lock().expect("graph state poisoned");
        state
            .order
            .iter()
            .filter_map(|id| state.nodes.get(id))
            .filter(|node| node.parent_pid.as_ref() == Some(pid))
            .cloned()
            .collect()
    }

    /// Every node, in registration order.
    pub fn nodes(&self) -> Vec<Arc<ProcedureNode>> {
        let state = self.inner.lock().expect("graph state poisoned");
        state
            .order
            .iter()
            .filter_map(|id| state.nodes.get(id))
            .cloned()
            .collect()
    }

    /// Number of registered nodes.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("graph state poisoned").nodes.len()
    }

    /// Whether no nodes have been registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register(graph: &ProcedureGraph, name: &str, parent: Option<&Pid>) -> Pid {
        let pid = Pid::fresh();
        graph.register(RegisterNode::new(pid.clone(), name).with_parent(parent.cloned()));
        pid
    }

    #[test]
    fn first_parentless_node_is_cached_root() {
        let graph = ProcedureGraph::new();
        let first = register(&graph, "engine:run", None);
        let _second = register(&graph, "engine:retry", None);
        assert_eq!(graph.root().unwrap().pid, first);
        assert_eq!(graph.len(), 2);
    }

    #[test]
    fn completion_propagates_metrics_to_parent() {
        let graph = ProcedureGraph::new();
        let root = register(&graph, "engine:run", None);
        let a = register(&graph, "model:generate", Some(&root));
        let b = register(&graph, "tool:run", Some(&root));

        graph.get(&a).unwrap().add_metric("tokens", 100.0);
        graph.get(&b).unwrap().add_metric("tokens", 200.0);

        // Leaves complete in arbitrary order.
        graph.update_status(&b, NodeStatus::Completed, None);
        graph.update_status(&a, NodeStatus::Completed, None);

        assert_eq!(graph.get(&root).unwrap().metric("tokens"), Some(300.0));
    }

    #[test]
    fn failure_propagates_but_cancellation_does_not() {
        let graph = ProcedureGraph::new();
        let root = register(&graph, "engine:run", None);
        let failed = register(&graph, "tool:run", Some(&root));
        let cancelled = register(&graph, "tool:spawn", Some(&root));

        graph.get(&failed).unwrap().add_metric("calls", 1.0);
        graph.get(&cancelled).unwrap().add_metric("calls", 5.0);

        graph.update_status(&failed, NodeStatus::Failed, Some(NodeError::new("boom")));
        graph.update_status(&cancelled, NodeStatus::Cancelled, None);

        assert_eq!(graph.get(&root).unwrap().metric("calls"), Some(1.0));
    }

    #[test]
    fn repeated_terminal_transition_does_not_double_propagate() {
        let graph = ProcedureGraph::new();
        let root = register(&graph, "engine:run", None);
        let child = register(&graph, "tool:run", Some(&root));
        graph.get(&child).unwrap().add_metric("calls", 1.0);

        graph.update_status(&child, NodeStatus::Completed, None);
        graph.update_status(&child, NodeStatus::Completed, None);

        assert_eq!(graph.get(&root).unwrap().metric("calls"), Some(1.0));
    }

    #[test]
    fn ancestor_queries_include_self() {
        let graph = ProcedureGraph::new();
        let root = register(&graph, "engine:run", None);
        let mid = register(&graph, "model:generate", Some(&root));
        let leaf = register(&graph, "model:chunk", Some(&mid));

        assert!(graph.has_ancestor_with_name(&leaf, "model:chunk"));
        assert!(graph.has_ancestor_with_name(&leaf, "engine:run"));
        assert!(!graph.has_ancestor_with_name(&leaf, "tool:run"));
        assert!(!graph.has_ancestor_with_name(&root, "model:generate"));
    }

    #[test]
    fn children_in_registration_order() {
        let graph = ProcedureGraph::new();
        let root = register(&graph, "engine:run", None);
        let a = register(&graph, "first", Some(&root));
        let b = register(&graph, "second", Some(&root));
        let children = graph.children_of(&root);
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].pid, a);
        assert_eq!(children[1].pid, b);
    }
}
