//! Boundary traits the transport layer implements for the kernel.
//!
//! The kernel consumes channels through these traits; session scoping
//! happens behind them. An in-process implementation lives in
//! `spindle-channel`; an HTTP/SSE/WebSocket transport provides its own.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use spindle_types::{ChannelError, KernelEvent};

use crate::context::KernelContext;

/// Callback invoked for each event delivered on a channel.
pub type ChannelEventHandler = Arc<dyn Fn(&KernelEvent) + Send + Sync>;

/// Disposer that removes exactly the matching subscription.
pub type Unsubscribe = Box<dyn FnOnce() + Send>;

/// One named pub/sub topic.
#[async_trait]
pub trait ChannelPort: Send + Sync {
    /// The channel's name.
    fn name(&self) -> &str;

    /// Publish an event: stamp its timestamp, force its `channel`
    /// field, deliver synchronously to subscribers in registration
    /// order, and resolve or cache correlated responses.
    fn publish(&self, event: KernelEvent);

    /// Register a subscriber; the disposer removes it.
    fn subscribe(&self, handler: ChannelEventHandler) -> Unsubscribe;

    /// Wait for a `response` event with the given correlation id,
    /// checking the response cache first.
    ///
    /// # Errors
    ///
    /// [`ChannelError::Timeout`] when nothing arrives within the
    /// window, [`ChannelError::Destroyed`] when the channel is
    /// destroyed while waiting.
    async fn wait_for_response(
        &self,
        request_id: &str,
        timeout: Option<Duration>,
    ) -> Result<KernelEvent, ChannelError>;

    /// Reject every pending waiter and remove all subscribers.
    fn destroy(&self);
}

/// Session-scoped access to channels, keyed off the request context.
#[async_trait]
pub trait ChannelService: Send + Sync {
    /// Resolve (lazily creating) the named channel for the context's
    /// session.
    fn channel(&self, ctx: &KernelContext, name: &str) -> Arc<dyn ChannelPort>;

    /// Publish on the named channel.
    fn publish(&self, ctx: &KernelContext, name: &str, event: KernelEvent) {
        self.channel(ctx, name).publish(event);
    }

    /// Subscribe to the named channel.
    fn subscribe(
        &self,
        ctx: &KernelContext,
        name: &str,
        handler: ChannelEventHandler,
    ) -> Unsubscribe {
        self.channel(ctx, name).subscribe(handler)
    }

    /// Wait for a correlated response on the named channel.
    ///
    /// # Errors
    ///
    /// Propagates [`ChannelPort::wait_for_response`] errors.
    async fn wait_for_response(
        &self,
        ctx: &KernelContext,
        name: &str,
        request_id: &str,
        timeout: Option<Duration>,
    ) -> Result<KernelEvent, ChannelError> {
        self.channel(ctx, name)
            .wait_for_response(request_id, timeout)
            .await
    }
}
