#![deny(missing_docs)]
//! # spindle — composable async procedure kernel for agentic runtimes
//!
//! spindle runs composable asynchronous operations ("procedures") with
//! request-scoped ambient context, hierarchical execution tracking,
//! streaming results, cooperative cancellation, session-scoped pub/sub
//! channels, and a tool-execution coordinator with human-in-the-loop
//! confirmation and deferred client-side execution.
//!
//! ## The pieces
//!
//! | Feature | Crate | What it does |
//! |---------|-------|-------------|
//! | `core` | [`context`], [`graph`], [`track`] | Ambient context, execution tree, tracking |
//! | `procedure` | [`procedure`] | Middleware-pipeline procedures |
//! | `channel` | [`channel`] | Channels, sessions, coordinators |
//! | `tool` | [`tool`] | Tool executor |
//!
//! ## Quick start
//!
//! ```ignore
//! use spindle::prelude::*;
//! use serde_json::json;
//!
//! let greet = Procedure::builder("greet:run")
//!     .handler(|args| async move {
//!         Ok(json!(format!("Hi, {}", args["name"].as_str().unwrap_or("there"))))
//!     })
//!     .build()?;
//!
//! let invocation = greet.with_handle().call(json!({"name": "World"}));
//! let result = invocation.result.await?;
//! ```

#[cfg(feature = "core")]
pub use spindle_types as types;

#[cfg(feature = "core")]
pub use spindle_context as context;

#[cfg(feature = "core")]
pub use spindle_graph as graph;

#[cfg(feature = "core")]
pub use spindle_track as track;

#[cfg(feature = "procedure")]
pub use spindle_procedure as procedure;

#[cfg(feature = "channel")]
pub use spindle_channel as channel;

#[cfg(feature = "tool")]
pub use spindle_tool as tool;

/// Commonly used items, one import away.
pub mod prelude {
    #[cfg(feature = "core")]
    pub use spindle_context::{ContextOverrides, EventBus, KernelContext, MetricsHandle, Principal};
    #[cfg(feature = "core")]
    pub use spindle_graph::{NodeStatus, ProcedureGraph, ProcedureNode};
    #[cfg(feature = "core")]
    pub use spindle_track::{ExecutionBoundary, ExecutionTracker, TrackOptions};
    #[cfg(feature = "core")]
    pub use spindle_types::{
        ChannelError, ContextError, KernelEvent, Metrics, ProcedureError, ProcedureOutput,
        ToolError, event_type,
    };

    #[cfg(feature = "procedure")]
    pub use spindle_procedure::{
        ExecutionHandle, Pipeline, Procedure, ProcedureMiddleware, Validator, middleware_fn,
    };

    #[cfg(feature = "channel")]
    pub use spindle_channel::{
        Channel, ChannelSession, ClientToolCoordinator, ConfirmationCoordinator,
        SessionChannelService,
    };

    #[cfg(feature = "tool")]
    pub use spindle_tool::{ProcessCallbacks, ToolExecutor, ToolRegistry};

    #[cfg(feature = "tool")]
    pub use spindle_types::{AgentToolResult, ToolCallRequest, ToolKind, ToolSpec, ToolUseId};
}
