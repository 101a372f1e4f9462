//! The metric write surface handed to running procedures.

use std::sync::Arc;

use crate::node::ProcedureNode;

/// Delta-tracking metric view over one node.
///
/// Callers write absolute values with [`set`](MetricsView::set); the
/// view turns each write into a delta against the node's current value
/// so the node accumulates correctly even though writers think in
/// assignments. Reads return the node's current value.
#[derive(Debug, Clone)]
pub struct MetricsView {
    node: Arc<ProcedureNode>,
}

impl MetricsView {
    /// Create a view over the given node.
    #[must_use]
    pub fn new(node: Arc<ProcedureNode>) -> Self {
        Self { node }
    }

    /// Write an absolute value for a metric.
    pub fn set(&self, key: &str, value: f64) {
        let previous = self.node.metric(key).unwrap_or(0.0);
        self.node.add_metric(key, value - previous);
    }

    /// Add a delta to a metric.
    pub fn add(&self, key: &str, delta: f64) {
        self.node.add_metric(key, delta);
    }

    /// Read the node's current value for a metric.
    pub fn get(&self, key: &str) -> Option<f64> {
        self.node.metric(key)
    }

    /// The node this view writes to.
    pub fn node(&self) -> &Arc<ProcedureNode> {
        &self.node
    }
}
