//! Tool execution for the spindle kernel.
//!
//! [`ToolRegistry`] holds the tools an engine exposes; [`ToolExecutor`]
//! runs calls against it with the full confirm-then-execute lifecycle:
//! policy check, human confirmation (unbounded wait), dispatch by tool
//! kind, and structured — never thrown — error results.

mod executor;
mod registry;

pub use executor::{ProcessCallbacks, ProcessedTool, ToolExecutor, classify_error};
pub use registry::ToolRegistry;
