//! The tool executor: confirmation lifecycle plus dispatch by kind.

use std::fmt;
use std::sync::Arc;

use spindle_channel::{ClientToolCoordinator, ConfirmationCoordinator};
use spindle_types::{
    AgentToolResult, ConfirmationCheck, ConfirmationOutcome, ErrorKind, ToolCallRequest,
    ToolError, ToolKind,
};

use crate::registry::ToolRegistry;

/// Classify a handler failure message into a structured error bucket.
pub fn classify_error(message: &str) -> ErrorKind {
    let lower = message.to_lowercase();
    if lower.contains("network") || lower.contains("connection") || lower.contains("dns") {
        ErrorKind::NetworkError
    } else if lower.contains("rate limit")
        || lower.contains("too many requests")
        || lower.contains("429")
    {
        ErrorKind::RateLimitError
    } else if lower.contains("unauthorized")
        || lower.contains("forbidden")
        || lower.contains("authentication")
        || lower.contains("401")
        || lower.contains("403")
    {
        ErrorKind::AuthError
    } else {
        ErrorKind::ExecutionError
    }
}

/// Callbacks surfaced during
/// [`ToolExecutor::process_tool_with_confirmation`].
#[derive(Default, Clone)]
pub struct ProcessCallbacks {
    /// Fired when a confirmation request should be shown to the user.
    pub on_confirmation_request:
        Option<Arc<dyn Fn(&ToolCallRequest, &ConfirmationCheck) + Send + Sync>>,
    /// Fired with the final result of each processed call.
    pub on_result: Option<Arc<dyn Fn(&AgentToolResult) + Send + Sync>>,
}

impl ProcessCallbacks {
    /// Callbacks with nothing attached.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach the confirmation-request callback.
    #[must_use]
    pub fn on_confirmation_request<F>(mut self, f: F) -> Self
    where
        F: Fn(&ToolCallRequest, &ConfirmationCheck) + Send + Sync + 'static,
    {
        self.on_confirmation_request = Some(Arc::new(f));
        self
    }

    /// Attach the result callback.
    #[must_use]
    pub fn on_result<F>(mut self, f: F) -> Self
    where
        F: Fn(&AgentToolResult) + Send + Sync + 'static,
    {
        self.on_result = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for ProcessCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessCallbacks").finish_non_exhaustive()
    }
}

/// Everything that happened while processing one call.
#[derive(Debug)]
pub struct ProcessedTool {
    /// The confirmation-required check that ran first.
    pub check: ConfirmationCheck,
    /// The human's decision, when confirmation was required.
    pub confirmation: Option<ConfirmationOutcome>,
    /// The final structured result.
    pub result: AgentToolResult,
}

/// Executes tool calls with the full confirm-then-execute lifecycle.
///
/// Execution errors never escape as `Err`: every failure becomes an
/// [`AgentToolResult`] with `success: false` and a classified
/// `error_type`, so the engine can hand it straight back to the model.
/// Coordinator errors (cancelled confirmations, client timeouts) reach
/// waiters as rejected futures.
pub struct ToolExecutor {
    registry: ToolRegistry,
    confirmations: Arc<ConfirmationCoordinator>,
    client_results: Arc<ClientToolCoordinator>,
}

impl ToolExecutor {
    /// Create an executor over a registry of tools.
    #[must_use]
    pub fn new(registry: ToolRegistry) -> Self {
        Self {
            registry,
            confirmations: Arc::new(ConfirmationCoordinator::new()),
            client_results: Arc::new(ClientToolCoordinator::new()),
        }
    }

    /// The registry this executor dispatches over.
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// The confirmation coordinator (the transport routes
    /// `resolve_confirmation` here).
    pub fn confirmations(&self) -> &Arc<ConfirmationCoordinator> {
        &self.confirmations
    }

    /// The client-result coordinator (the transport routes
    /// `resolve_result` here).
    pub fn client_results(&self) -> &Arc<ClientToolCoordinator> {
        &self.client_results
    }

    /// Evaluate the tool's confirmation policy against the call input
    /// and render the prompt when confirmation is required.
    pub fn check_confirmation_required(&self, call: &ToolCallRequest) -> ConfirmationCheck {
        let Some(spec) = self.registry.get(&call.name) else {
            return ConfirmationCheck::not_required();
        };
        let required = spec.confirmation.requires_confirmation(&call.input);
        let message = if required {
            spec.confirmation_message
                .as_ref()
                .map(|message| message.render(&call.input))
        } else {
            None
        };
        ConfirmationCheck { required, message }
    }

    /// Park until the human decides about this call. No timeout.
    ///
    /// # Errors
    ///
    /// [`ToolError::ConfirmationCancelled`] when the wait is cancelled.
    pub async fn wait_for_confirmation(
        &self,
        call: &ToolCallRequest,
    ) -> Result<ConfirmationOutcome, ToolError> {
        self.confirmations
            .wait_for_confirmation(call.tool_use_id.clone(), call.name.clone())
            .await
    }

    /// The structured result recorded when the user denies a call.
    #[must_use]
    pub fn create_denial_result(&self, call: &ToolCallRequest) -> AgentToolResult {
        AgentToolResult::failure(
            call.tool_use_id.clone(),
            call.name.clone(),
            "User denied tool execution",
            ErrorKind::ConfirmationDenied,
        )
    }

    /// Execute one call, dispatching on the tool's kind.
    ///
    /// Never returns an error: lookup failures, missing handlers,
    /// out-of-band kinds, timeouts, and handler failures all become
    /// structured failure results.
    pub async fn execute_single_tool(&self, call: &ToolCallRequest) -> AgentToolResult {
        let Some(spec) = self.registry.get(&call.name) else {
            return AgentToolResult::failure(
                call.tool_use_id.clone(),
                call.name.clone(),
                format!("tool not found: {}", call.name),
                ErrorKind::ToolNotFound,
            );
        };

        match spec.kind {
            ToolKind::Provider => AgentToolResult::failure(
                call.tool_use_id.clone(),
                call.name.clone(),
                "provider tools are executed by the model adapter",
                ErrorKind::InvalidExecutionType,
            ),
            ToolKind::Client => {
                let wait = self.client_results.wait_for_result(
                    call.tool_use_id.clone(),
                    spec.default_result.clone(),
                    spec.requires_response,
                    spec.timeout,
                );
                match wait.await {
                    Ok(value) => {
                        AgentToolResult::success(call.tool_use_id.clone(), call.name.clone(), value)
                    }
                    Err(error @ ToolError::ClientTimeout { .. }) => AgentToolResult::failure(
                        call.tool_use_id.clone(),
                        call.name.clone(),
                        error.to_string(),
                        ErrorKind::ClientToolTimeout,
                    ),
                    Err(error @ ToolError::ClientCancelled(_)) => AgentToolResult::failure(
                        call.tool_use_id.clone(),
                        call.name.clone(),
                        error.to_string(),
                        ErrorKind::ClientToolCancelled,
                    ),
                    Err(error) => AgentToolResult::failure(
                        call.tool_use_id.clone(),
                        call.name.clone(),
                        error.to_string(),
                        ErrorKind::ExecutionError,
                    ),
                }
            }
            ToolKind::Server | ToolKind::Mcp => {
                let Some(handler) = spec.handler.clone() else {
                    return AgentToolResult::failure(
                        call.tool_use_id.clone(),
                        call.name.clone(),
                        format!("tool has no handler: {}", call.name),
                        ErrorKind::ToolNoHandler,
                    );
                };
                let invocation = handler(call.input.clone());
                let outcome = match spec.timeout {
                    Some(timeout) => match tokio::time::timeout(timeout, invocation).await {
                        Ok(outcome) => outcome,
                        Err(_) => Err(ToolError::ExecutionFailed(format!(
                            "timed out after {timeout:?}"
                        ))),
                    },
                    None => invocation.await,
                };
                match outcome {
                    Ok(value) => {
                        AgentToolResult::success(call.tool_use_id.clone(), call.name.clone(), value)
                    }
                    Err(error) => {
                        let message = error.to_string();
                        let kind = classify_error(&message);
                        tracing::warn!(tool = %call.name, %error, "tool execution failed");
                        AgentToolResult::failure(
                            call.tool_use_id.clone(),
                            call.name.clone(),
                            message,
                            kind,
                        )
                    }
                }
            }
        }
    }

    /// Orchestrate the full confirm-then-execute lifecycle for one
    /// call.
    ///
    /// When confirmation is required, the request callback fires and
    /// the executor parks until the decision arrives: denial produces
    /// the denial result without touching the handler; approval
    /// proceeds to [`execute_single_tool`](Self::execute_single_tool).
    pub async fn process_tool_with_confirmation(
        &self,
        call: &ToolCallRequest,
        callbacks: &ProcessCallbacks,
    ) -> ProcessedTool {
        let check = self.check_confirmation_required(call);
        let mut confirmation = None;

        if check.required {
            if let Some(on_request) = &callbacks.on_confirmation_request {
                on_request(call, &check);
            }
            match self.wait_for_confirmation(call).await {
                Ok(outcome) if outcome.confirmed => confirmation = Some(outcome),
                Ok(outcome) => {
                    let result = self.create_denial_result(call);
                    if let Some(on_result) = &callbacks.on_result {
                        on_result(&result);
                    }
                    return ProcessedTool {
                        check,
                        confirmation: Some(outcome),
                        result,
                    };
                }
                Err(error) => {
                    let result = AgentToolResult::failure(
                        call.tool_use_id.clone(),
                        call.name.clone(),
                        error.to_string(),
                        ErrorKind::ExecutionError,
                    );
                    if let Some(on_result) = &callbacks.on_result {
                        on_result(&result);
                    }
                    return ProcessedTool {
                        check,
                        confirmation: None,
                        result,
                    };
                }
            }
        }

        let result = self.execute_single_tool(call).await;
        if let Some(on_result) = &callbacks.on_result {
            on_result(&result);
        }
        ProcessedTool {
            check,
            confirmation,
            result,
        }
    }

    /// Flush every outstanding confirmation and client-result waiter
    /// (engine shutdown).
    pub fn cancel_all(&self) {
        self.confirmations.cancel_all();
        self.client_results.cancel_all();
    }
}

impl fmt::Debug for ToolExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolExecutor")
            .field("tools", &self.registry.len())
            .finish_non_exhaustive()
    }
}
