#![deny(missing_docs)]
//! Execution tracking — every async operation becomes a node.
//!
//! [`ExecutionTracker::track`] wraps an async operation as a
//! [`ProcedureNode`](spindle_graph::ProcedureNode) in the request's
//! graph: it forks the ambient context with the node cursor and a
//! node-backed metric view, opens a tracing span, runs the operation
//! under the fork, and settles the node on completion — merging metrics
//! upward, emitting `procedure:end` / `procedure:error`, and
//! classifying aborts as cancellation.
//!
//! Streaming results are re-wrapped: a producer task drives the inner
//! stream under the forked context, emits one `stream:chunk` per item,
//! and checks the cancellation signal between items.

mod options;
mod tracker;

pub use options::{ExecutionBoundary, TrackOptions, derive_execution_type};
pub use tracker::ExecutionTracker;
