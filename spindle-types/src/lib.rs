#![deny(missing_docs)]
//! Core types shared by every spindle crate.
//!
//! Defines the typed identifiers, kernel event records, metric maps,
//! procedure output surface, tool configuration, and the error enums for
//! each kernel domain. Nothing here holds runtime state; the behavioral
//! crates (`spindle-context`, `spindle-graph`, `spindle-channel`, …)
//! build on these.
//!
//! ## Dependency Notes
//!
//! This crate depends on `serde_json::Value` for every opaque payload
//! (event payloads, tool inputs, metadata). JSON is the interchange
//! format of agentic systems and `Value` is the ecosystem standard; a
//! generic `T: Serialize` would complicate trait object safety for no
//! practical benefit.

pub mod error;
pub mod event;
pub mod ids;
pub mod metrics;
pub mod output;
pub mod tool;

// Re-exports for convenience
pub use error::{ChannelError, ContextError, ErrorKind, ProcedureError, ToolError};
pub use event::{EventMetadata, EventTarget, KernelEvent, event_type};
pub use ids::{ExecutionId, Pid, RequestId, ToolUseId, TraceId};
pub use metrics::Metrics;
pub use output::{ProcedureOutput, ValueStream};
pub use tool::{
    AgentToolResult, ConfirmationCheck, ConfirmationMessage, ConfirmationOutcome,
    ConfirmationPolicy, ToolCallRequest, ToolHandler, ToolKind, ToolResultContent, ToolSpec,
};
