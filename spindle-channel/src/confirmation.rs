//! Parks tool calls awaiting human confirmation.

use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::oneshot;

use spindle_types::{ConfirmationOutcome, ToolError, ToolUseId};

struct PendingConfirmation {
    tool_name: String,
    sender: oneshot::Sender<ConfirmationOutcome>,
}

/// One waiter per `tool_use_id`, resolved by the transport when the
/// human decides.
///
/// There is deliberately no timeout: confirmation is
/// human-in-the-loop and waits indefinitely. Resolving an id twice is a
/// no-op on the second call; cancelling rejects the waiter.
#[derive(Default)]
pub struct ConfirmationCoordinator {
    pending: Mutex<HashMap<ToolUseId, PendingConfirmation>>,
}

impl ConfirmationCoordinator {
    /// Create an empty coordinator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Park until [`resolve_confirmation`](Self::resolve_confirmation)
    /// is called for this `tool_use_id`.
    ///
    /// # Errors
    ///
    /// [`ToolError::ConfirmationCancelled`] when the waiter is
    /// cancelled before a decision arrives.
    pub async fn wait_for_confirmation(
        &self,
        tool_use_id: ToolUseId,
        tool_name: impl Into<String>,
    ) -> Result<ConfirmationOutcome, ToolError> {
        let receiver = {
            let mut pending = self.pending.lock().expect("pending map poisoned");
            let (sender, receiver) = oneshot::channel();
            pending.insert(
                tool_use_id.clone(),
                PendingConfirmation {
                    tool_name: tool_name.into(),
                    sender,
                },
            );
            receiver
        };
        receiver
            .await
            .map_err(|_| ToolError::ConfirmationCancelled(tool_use_id))
    }

    /// Resolve a pending confirmation.
    ///
    /// Returns the outcome delivered to the waiter, or `None` when no
    /// entry is pending for this id (late or repeated resolutions are
    /// the caller's decision to handle).
    pub fn resolve_confirmation(
        &self,
        tool_use_id: &ToolUseId,
        confirmed: bool,
        always: bool,
    ) -> Option<ConfirmationOutcome> {
        let entry = self
            .pending
            .lock()
            .expect("pending map poisoned")
            .remove(tool_use_id)?;
        let outcome = ConfirmationOutcome {
            tool_use_id: tool_use_id.clone(),
            tool_name: entry.tool_name,
            confirmed,
            always,
        };
        let _ = entry.sender.send(outcome.clone());
        Some(outcome)
    }

    /// Reject one pending waiter. Returns whether it existed.
    pub fn cancel_confirmation(&self, tool_use_id: &ToolUseId) -> bool {
        // Dropping the sender rejects the waiter.
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

    /// Whether a waiter is pending for this id (reflects the state
    /// after any resolve/cancel has taken effect).
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

impl std::fmt::Debug for ConfirmationCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfirmationCoordinator")
            .field("pending", &self.pending_count())
            .finish()
    }
}
