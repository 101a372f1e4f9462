//! Error types for each kernel domain.

use std::time::Duration;
use thiserror::Error;

use crate::ids::ToolUseId;

/// Errors from ambient context access.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ContextError {
    /// `current()` was called outside any `Context::run` scope.
    #[error("no ambient context: current() called outside a context scope")]
    NotFound,
}

/// Errors from procedure invocation and tracking.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ProcedureError {
    /// Input failed schema validation.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The invocation was cooperatively cancelled.
    #[error("aborted")]
    Aborted,

    /// The invocation exceeded its configured timeout.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The handler itself failed.
    #[error("handler error: {0}")]
    Handler(String),

    /// Ambient context was required but missing.
    #[error("context error: {0}")]
    Context(#[from] ContextError),

    /// Catch-all for other errors.
    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl ProcedureError {
    /// Whether this error represents cooperative cancellation.
    ///
    /// Besides the [`ProcedureError::Aborted`] variant, any error whose
    /// message names `AbortError` or contains `aborted` is classified as
    /// cancellation; everything else (timeouts included) is a failure.
    #[must_use]
    pub fn is_abort(&self) -> bool {
        match self {
            Self::Aborted => true,
            Self::Timeout(_) => false,
            other => {
                let message = other.to_string();
                message.contains("AbortError") || message.contains("aborted")
            }
        }
    }
}

/// Errors from channel operations.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ChannelError {
    /// No matching response arrived within the wait window.
    #[error("timed out after {timeout:?} waiting for response {request_id}")]
    Timeout {
        /// The correlation id that was awaited.
        request_id: String,
        /// How long the caller waited.
        timeout: Duration,
    },

    /// The channel was destroyed while the waiter was pending.
    #[error("channel destroyed: {0}")]
    Destroyed(String),

    /// Catch-all for other errors.
    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

/// Errors from tool execution and the tool coordinators.
///
/// The executor never throws these out of `execute_single_tool`; they
/// become structured [`AgentToolResult`](crate::tool::AgentToolResult)
/// records. Coordinator errors ARE thrown (as rejected futures) to the
/// waiter.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ToolError {
    /// The requested tool is not registered.
    #[error("tool not found: {0}")]
    NotFound(String),

    /// The tool has no handler to execute.
    #[error("tool has no handler: {0}")]
    NoHandler(String),

    /// The tool's kind cannot be executed here (provider tools belong
    /// to the model adapter).
    #[error("invalid execution type for {tool}: {kind}")]
    InvalidExecutionType {
        /// The tool name.
        tool: String,
        /// The offending kind.
        kind: String,
    },

    /// The handler returned something that cannot be represented.
    #[error("invalid return type from {0}")]
    InvalidReturnType(String),

    /// A result content block could not be encoded.
    #[error("invalid content block: {0}")]
    InvalidContentBlock(String),

    /// A client-side tool did not report its result in time.
    #[error("client tool timed out after {after:?}: {tool_use_id}")]
    ClientTimeout {
        /// The tool invocation that timed out.
        tool_use_id: ToolUseId,
        /// The wait window that elapsed.
        after: Duration,
    },

    /// A client-side tool wait was cancelled.
    #[error("client tool cancelled: {0}")]
    ClientCancelled(ToolUseId),

    /// A pending confirmation wait was cancelled.
    #[error("confirmation cancelled: {0}")]
    ConfirmationCancelled(ToolUseId),

    /// The handler failed.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// Catch-all for other errors.
    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

/// Classification tag attached to structured tool error results as
/// `error_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The tool is not registered.
    ToolNotFound,
    /// The tool has no handler.
    ToolNoHandler,
    /// The tool kind is out-of-band for the executor.
    InvalidExecutionType,
    /// The handler's return value could not be represented.
    InvalidReturnType,
    /// A content block could not be encoded.
    InvalidContentBlock,
    /// A network-level failure during execution.
    NetworkError,
    /// The underlying service rate-limited the call.
    RateLimitError,
    /// Authentication or authorization failed.
    AuthError,
    /// A client-side tool wait timed out.
    ClientToolTimeout,
    /// A client-side tool wait was cancelled.
    ClientToolCancelled,
    /// The user denied the tool confirmation.
    ConfirmationDenied,
    /// Any other execution failure.
    ExecutionError,
}

impl ErrorKind {
    /// The snake_case wire tag for this kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ToolNotFound => "tool_not_found",
            Self::ToolNoHandler => "tool_no_handler",
            Self::InvalidExecutionType => "invalid_execution_type",
            Self::InvalidReturnType => "invalid_return_type",
            Self::InvalidContentBlock => "invalid_content_block",
            Self::NetworkError => "network_error",
            Self::RateLimitError => "rate_limit_error",
            Self::AuthError => "auth_error",
            Self::ClientToolTimeout => "client_tool_timeout",
            Self::ClientToolCancelled => "client_tool_cancelled",
            Self::ConfirmationDenied => "confirmation_denied",
            Self::ExecutionError => "execution_error",
        }
    }
}
