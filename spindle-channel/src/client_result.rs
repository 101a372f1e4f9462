//! Parks tool calls whose results are produced by the client.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::oneshot;

use spindle_types::{ToolError, ToolUseId};

/// Default wait window for a client-reported result.
pub const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

/// One waiter per `tool_use_id`, resolved when the transport routes the
/// client's result back.
///
/// Each wait is bounded by a timeout; the timer is part of the waiting
/// future itself, so it is dropped — never leaked — on resolve, cancel,
/// and expiry alike. On expiry the pending entry is removed, which is
/// what lets [`resolve_result`](Self::resolve_result) report a late
/// arrival with `false` so the caller can persist it instead.
#[derive(Default)]
pub struct ClientToolCoordinator {
    pending: Mutex<HashMap<ToolUseId, oneshot::Sender<Value>>>,
}

impl ClientToolCoordinator {
    /// Create an empty coordinator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the client to report a result.
    ///
    /// When `requires_response` is false the `default_result` (or
    /// `null`) is returned immediately without registering a waiter.
    ///
    /// # Errors
    ///
    /// [`ToolError::ClientTimeout`] when the window (default
    /// [`DEFAULT_CLIENT_TIMEOUT`]) elapses,
    /// [`ToolError::ClientCancelled`] when the waiter is cancelled.
    pub async fn wait_for_result(
        &self,
        tool_use_id: ToolUseId,
        default_result: Option<Value>,
        requires_response: bool,
        timeout: Option<Duration>,
    ) -> Result<Value, ToolError> {
        if !requires_response {
            return Ok(default_result.unwrap_or(Value::Null));
        }
        let timeout = timeout.unwrap_or(DEFAULT_CLIENT_TIMEOUT);
        let receiver = {
            let mut pending = self.pending.lock().expect("pending map poisoned");
            let (sender, receiver) = oneshot::channel();
            pending.insert(tool_use_id.clone(), sender);
            receiver
        };

        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(_)) => Err(ToolError::ClientCancelled(tool_use_id)),
            Err(_) => {
                self.pending
                    .lock()
                    .expect("pending map poisoned")
                    .remove(&tool_use_id);
                Err(ToolError::ClientTimeout {
                    tool_use_id,
                    after: timeout,
                })
            }
        }
    }

    /// Deliver a client-reported result.
    ///
    /// Returns true when a waiter was found and resolved; false when
    /// none is pending (the caller decides whether to persist the late
    /// result and resume a new execution).
    pub fn resolve_result(&self, tool_use_id: &ToolUseId, result: Value) -> bool {
        let sender = self
            .pending
            .lock()
            .expect("pending map poisoned")
            .remove(tool_use_id);
        match sender {
            Some(sender) => sender.send(result).is_ok(),
            None => false,
        }
    }

    /// Reject one pending waiter. Returns whether it existed.
    pub fn cancel_execution(&self, tool_use_id: &ToolUseId) -> bool {
        self.pending
            .lock()
            .expect("pending map poisoned")
            .remove(tool_use_id)
            .is_some()
    }

    /// Reject every pending waiter.
    pub fn cancel_all(&self) {
        self.pending.lock().expect("pending map poisoned").clear();
    }

    /// Whether a waiter is pending for this id.
    pub fn has_pending(&self, tool_use_id: &ToolUseId) -> bool {
        self.pending
            .lock()
            .expect("pending map poisoned")
            .contains_key(tool_use_id)
    }

    /// Number of pending waiters.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().expect("pending map poisoned").len()
    }
}

impl std::fmt::Debug for ClientToolCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientToolCoordinator")
            .field("pending", &self.pending_count())
            .finish()
    }
}
