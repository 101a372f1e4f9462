//! Tool configuration and result types.
//!
//! Tool kinds are a tagged union dispatched inside the executor, not an
//! inheritance hierarchy. `Provider` tools are rejected by the executor
//! because they belong to the model adapter.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{ErrorKind, ToolError};
use crate::ids::ToolUseId;

/// Where a tool executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    /// Executed in-process by the engine.
    Server,
    /// Executed by the client; the engine waits for the reported result.
    Client,
    /// Executed through an MCP bridge handler.
    Mcp,
    /// Executed by the model provider; out-of-band for the executor.
    Provider,
}

impl ToolKind {
    /// The snake_case tag for this kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Server => "server",
            Self::Client => "client",
            Self::Mcp => "mcp",
            Self::Provider => "provider",
        }
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Unique identifier for this tool call (from the model).
    pub tool_use_id: ToolUseId,
    /// Name of the tool being called.
    pub name: String,
    /// JSON input arguments.
    pub input: Value,
}

impl ToolCallRequest {
    /// Create a call request.
    #[must_use]
    pub fn new(tool_use_id: impl Into<ToolUseId>, name: impl Into<String>, input: Value) -> Self {
        Self {
            tool_use_id: tool_use_id.into(),
            name: name.into(),
            input,
        }
    }
}

/// Async handler invoked with the tool's JSON input.
///
/// Handlers read ambient context (`spindle_context::try_current()`) for
/// cancellation, channels, and metrics; no context parameter is passed.
pub type ToolHandler =
    Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, ToolError>> + Send + Sync>;

/// Whether a tool call must be confirmed by a human before execution.
#[derive(Clone)]
pub enum ConfirmationPolicy {
    /// Never ask.
    Never,
    /// Always ask.
    Always,
    /// Ask when the predicate holds for the call input.
    When(Arc<dyn Fn(&Value) -> bool + Send + Sync>),
}

impl ConfirmationPolicy {
    /// Evaluate the policy against a call input.
    pub fn requires_confirmation(&self, input: &Value) -> bool {
        match self {
            Self::Never => false,
            Self::Always => true,
            Self::When(predicate) => predicate(input),
        }
    }
}

impl fmt::Debug for ConfirmationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Never => write!(f, "Never"),
            Self::Always => write!(f, "Always"),
            Self::When(_) => write!(f, "When(..)"),
        }
    }
}

/// The prompt shown when asking for confirmation.
#[derive(Clone)]
pub enum ConfirmationMessage {
    /// A fixed message.
    Text(String),
    /// A message rendered from the call input.
    Render(Arc<dyn Fn(&Value) -> String + Send + Sync>),
}

impl ConfirmationMessage {
    /// Render the message for a call input.
    pub fn render(&self, input: &Value) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Render(render) => render(input),
        }
    }
}

impl fmt::Debug for ConfirmationMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Self::Render(_) => write!(f, "Render(..)"),
        }
    }
}

/// The outcome of a confirmation-required check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmationCheck {
    /// Whether the call must be confirmed before execution.
    pub required: bool,
    /// The rendered confirmation prompt, when required.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ConfirmationCheck {
    /// A check that requires no confirmation.
    #[must_use]
    pub fn not_required() -> Self {
        Self {
            required: false,
            message: None,
        }
    }
}

/// What the human decided about a pending tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmationOutcome {
    /// The tool call this decision applies to.
    pub tool_use_id: ToolUseId,
    /// Name of the tool.
    pub tool_name: String,
    /// Whether execution was approved.
    pub confirmed: bool,
    /// Whether to skip confirmation for this tool from now on.
    pub always: bool,
}

/// Configuration for one tool.
#[derive(Clone)]
pub struct ToolSpec {
    /// Unique tool name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// JSON Schema for the tool's input parameters.
    pub parameters: Value,
    /// Handler for server/MCP execution; client tools may omit it.
    pub handler: Option<ToolHandler>,
    /// Where the tool executes.
    pub kind: ToolKind,
    /// Declared intent (free-form, for policy engines).
    pub intent: Option<String>,
    /// Whether a client tool must report a result before the engine
    /// continues. When false, `default_result` is returned immediately.
    pub requires_response: bool,
    /// Per-call execution / client-wait timeout.
    pub timeout: Option<Duration>,
    /// Result substituted when a client tool needs no response.
    pub default_result: Option<Value>,
    /// When to require human confirmation.
    pub confirmation: ConfirmationPolicy,
    /// Prompt shown when confirmation is required.
    pub confirmation_message: Option<ConfirmationMessage>,
    /// Options forwarded opaquely to the model provider.
    pub provider_options: Option<Value>,
    /// Connection config for MCP-bridged tools.
    pub mcp_config: Option<Value>,
}

impl ToolSpec {
    /// Create a server-side tool spec with an object-typed schema.
    #[must_use]
    pub fn server(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::with_kind(name, description, ToolKind::Server)
    }

    /// Create a client-side tool spec.
    #[must_use]
    pub fn client(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::with_kind(name, description, ToolKind::Client)
    }

    /// Create a tool spec with an explicit kind.
    #[must_use]
    pub fn with_kind(
        name: impl Into<String>,
        description: impl Into<String>,
        kind: ToolKind,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: json!({"type": "object"}),
            handler: None,
            kind,
            intent: None,
            requires_response: false,
            timeout: None,
            default_result: None,
            confirmation: ConfirmationPolicy::Never,
            confirmation_message: None,
            provider_options: None,
            mcp_config: None,
        }
    }

    /// Set the input parameter schema.
    #[must_use]
    pub fn with_parameters(mut self, schema: Value) -> Self {
        self.parameters = schema;
        self
    }

    /// Set the execution handler.
    #[must_use]
    pub fn with_handler<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Value, ToolError>> + Send + 'static,
    {
        self.handler = Some(Arc::new(move |input| Box::pin(f(input))));
        self
    }

    /// Require human confirmation for every call.
    #[must_use]
    pub fn with_confirmation(mut self) -> Self {
        self.confirmation = ConfirmationPolicy::Always;
        self
    }

    /// Require confirmation when the predicate holds for the input.
    #[must_use]
    pub fn with_confirmation_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.confirmation = ConfirmationPolicy::When(Arc::new(predicate));
        self
    }

    /// Set a fixed confirmation prompt.
    #[must_use]
    pub fn with_confirmation_message(mut self, message: impl Into<String>) -> Self {
        self.confirmation_message = Some(ConfirmationMessage::Text(message.into()));
        self
    }

    /// Set a confirmation prompt rendered from the call input.
    #[must_use]
    pub fn with_confirmation_renderer<F>(mut self, render: F) -> Self
    where
        F: Fn(&Value) -> String + Send + Sync + 'static,
    {
        self.confirmation_message = Some(ConfirmationMessage::Render(Arc::new(render)));
        self
    }

    /// Require a client-reported result before continuing.
    #[must_use]
    pub fn with_requires_response(mut self, requires_response: bool) -> Self {
        self.requires_response = requires_response;
        self
    }

    /// Set the per-call timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the result substituted when no response is required.
    #[must_use]
    pub fn with_default_result(mut self, result: Value) -> Self {
        self.default_result = Some(result);
        self
    }

    /// Set the declared intent.
    #[must_use]
    pub fn with_intent(mut self, intent: impl Into<String>) -> Self {
        self.intent = Some(intent.into());
        self
    }
}

impl fmt::Debug for ToolSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolSpec")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("requires_response", &self.requires_response)
            .field("confirmation", &self.confirmation)
            .finish_non_exhaustive()
    }
}

/// One content item in a tool result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolResultContent {
    /// Plain text (structured errors are JSON-encoded into this).
    Text {
        /// The text content.
        text: String,
    },
}

/// Structured result of one tool execution.
///
/// The executor never throws: failures become records with
/// `success: false` and a JSON-encoded error content block carrying an
/// `error_type` tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentToolResult {
    /// The tool call this result answers.
    pub tool_use_id: ToolUseId,
    /// Name of the tool.
    pub tool_name: String,
    /// Whether execution succeeded.
    pub success: bool,
    /// Structured output for programmatic consumption.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error message for failed executions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Content blocks returned to the model.
    pub content: Vec<ToolResultContent>,
}

impl AgentToolResult {
    /// Build a successful result.
    #[must_use]
    pub fn success(tool_use_id: ToolUseId, tool_name: impl Into<String>, result: Value) -> Self {
        let text = result.to_string();
        Self {
            tool_use_id,
            tool_name: tool_name.into(),
            success: true,
            result: Some(result),
            error: None,
            content: vec![ToolResultContent::Text { text }],
        }
    }

    /// Build a failed result with a classified error tag.
    #[must_use]
    pub fn failure(
        tool_use_id: ToolUseId,
        tool_name: impl Into<String>,
        error: impl Into<String>,
        kind: ErrorKind,
    ) -> Self {
        let error = error.into();
        let block = json!({"error": error.as_str(), "error_type": kind.as_str()});
        Self {
            tool_use_id,
            tool_name: tool_name.into(),
            success: false,
            result: None,
            error: Some(error),
            content: vec![ToolResultContent::Text {
                text: block.to_string(),
            }],
        }
    }
}
