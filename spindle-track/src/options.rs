//! Tracking options and execution-boundary policies.

use serde_json::Value;
use std::collections::HashMap;

use spindle_types::{ExecutionId, Pid};

/// How a tracked call participates in user-visible execution grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionBoundary {
    /// Always mint a new boundary with a fresh or provided execution
    /// id; the parent execution comes from the ambient context (useful
    /// for fork/spawn).
    Always,
    /// Always mint a new boundary parented to the ambient execution.
    Child,
    /// Inherit the ambient execution when one exists, else mint a root
    /// boundary.
    #[default]
    Auto,
    /// Inherit from ambient, never mark as a boundary.
    Disabled,
}

/// Options for one tracked call.
#[derive(Debug, Clone)]
pub struct TrackOptions {
    /// Node name, conventionally `component:operation`.
    pub name: String,
    /// Explicit parent node; defaults to the ambient cursor.
    pub parent_pid: Option<Pid>,
    /// Free-form node attributes.
    pub metadata: HashMap<String, Value>,
    /// Boundary policy (see [`ExecutionBoundary`]).
    pub boundary: ExecutionBoundary,
    /// Execution id to use when minting a boundary.
    pub execution_id: Option<ExecutionId>,
    /// Explicit execution type; wins over name-prefix derivation.
    pub execution_type: Option<String>,
}

impl TrackOptions {
    /// Options with defaults for the given node name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent_pid: None,
            metadata: HashMap::new(),
            boundary: ExecutionBoundary::Auto,
            execution_id: None,
            execution_type: None,
        }
    }

    /// Set the parent node explicitly.
    #[must_use]
    pub fn with_parent_pid(mut self, parent_pid: Option<Pid>) -> Self {
        self.parent_pid = parent_pid;
        self
    }

    /// Attach node attributes.
    #[must_use]
    pub fn with_metadata(mut self, metadata: HashMap<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Set the boundary policy.
    #[must_use]
    pub fn with_boundary(mut self, boundary: ExecutionBoundary) -> Self {
        self.boundary = boundary;
        self
    }

    /// Provide the execution id minted at a boundary.
    #[must_use]
    pub fn with_execution_id(mut self, execution_id: ExecutionId) -> Self {
        self.execution_id = Some(execution_id);
        self
    }

    /// Set the execution type explicitly.
    #[must_use]
    pub fn with_execution_type(mut self, execution_type: impl Into<String>) -> Self {
        self.execution_type = Some(execution_type.into());
        self
    }
}

/// Derive an execution type from a node name: the prefix before `:`
/// (`engine:stream` → `engine`), or the whole name when there is none.
#[must_use]
pub fn derive_execution_type(name: &str) -> String {
    name.split(':').next().unwrap_or(name).to_string()
}
