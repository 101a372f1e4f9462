//! One named pub/sub topic.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

use spindle_context::{ChannelEventHandler, ChannelPort, Unsubscribe};
use spindle_types::{ChannelError, KernelEvent};

/// How long an unmatched response is retained so a late
/// `wait_for_response` with the same id still resolves.
pub const RESPONSE_CACHE_TTL: Duration = Duration::from_secs(5);

/// Default wait window for `wait_for_response`.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

struct ChannelState {
    next_subscriber_id: u64,
    subscribers: Vec<(u64, ChannelEventHandler)>,
    pending: HashMap<String, oneshot::Sender<KernelEvent>>,
    response_cache: HashMap<String, (KernelEvent, Instant)>,
    destroyed: bool,
    event_count: u64,
}

fn purge_expired(cache: &mut HashMap<String, (KernelEvent, Instant)>) {
    cache.retain(|_, (_, cached_at)| cached_at.elapsed() < RESPONSE_CACHE_TTL);
}

/// A named pub/sub topic within one session.
///
/// Delivery is synchronous and FIFO per publisher. A `response` event
/// with a correlation id resolves the matching waiter, or is cached for
/// [`RESPONSE_CACHE_TTL`] when no waiter is registered yet. Eviction is
/// lazy: expired entries are dropped on the next publish or lookup, so
/// there is no background timer to leak.
pub struct Channel {
    name: String,
    state: Arc<Mutex<ChannelState>>,
}

impl Channel {
    /// Create a channel with the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(ChannelState {
                next_subscriber_id: 0,
                subscribers: Vec::new(),
                pending: HashMap::new(),
                response_cache: HashMap::new(),
                destroyed: false,
                event_count: 0,
            })),
        }
    }

    /// The channel's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Publish an event to every current subscriber, in registration
    /// order.
    ///
    /// Stamps `metadata.timestamp`, forces `channel` to this channel's
    /// name, resolves or caches correlated responses, and bumps the
    /// `channel.published` counter on the ambient procedure node.
    /// Publishing on a destroyed channel is a no-op.
    pub fn publish(&self, mut event: KernelEvent) {
        let handlers: Vec<ChannelEventHandler> = {
            let mut state = self.state.lock().expect("channel state poisoned");
            if state.destroyed {
                tracing::debug!(channel = %self.name, "publish on destroyed channel dropped");
                return;
            }
            event.metadata.timestamp = Some(Utc::now());
            event.channel = Some(self.name.clone());
            state.event_count += 1;
            purge_expired(&mut state.response_cache);
            if event.is_correlated_response() {
                let id = event.id.clone().unwrap_or_default();
                if let Some(waiter) = state.pending.remove(&id) {
                    let _ = waiter.send(event.clone());
                } else {
                    state
                        .response_cache
                        .insert(id, (event.clone(), Instant::now()));
                }
            }
            state
                .subscribers
                .iter()
                .map(|(_, handler)| handler.clone())
                .collect()
        };

        if let Some(ctx) = spindle_context::try_current()
            && let Some(node) = &ctx.procedure_node
        {
            node.add_metric("channel.published", 1.0);
        }

        for handler in handlers {
            handler(&event);
        }
    }

    /// Register a subscriber; the disposer removes exactly it.
    pub fn subscribe(&self, handler: ChannelEventHandler) -> Unsubscribe {
        let id = {
            let mut state = self.state.lock().expect("channel state poisoned");
            state.next_subscriber_id += 1;
            let id = state.next_subscriber_id;
            state.subscribers.push((id, handler));
            id
        };
        let state = self.state.clone();
        Box::new(move || {
            state
                .lock()
                .expect("channel state poisoned")
                .subscribers
                .retain(|(subscriber_id, _)| *subscriber_id != id);
        })
    }

    /// Wait for a `response` event carrying `request_id`.
    ///
    /// A response cached within the grace window resolves immediately.
    ///
    /// # Errors
    ///
    /// [`ChannelError::Timeout`] when nothing arrives within the window
    /// (default [`DEFAULT_RESPONSE_TIMEOUT`]), [`ChannelError::Destroyed`]
    /// when the channel is destroyed before or while waiting.
    pub async fn wait_for_response(
        &self,
        request_id: &str,
        timeout: Option<Duration>,
    ) -> Result<KernelEvent, ChannelError> {
        let timeout = timeout.unwrap_or(DEFAULT_RESPONSE_TIMEOUT);
        let receiver = {
            let mut state = self.state.lock().expect("channel state poisoned");
            purge_expired(&mut state.response_cache);
            if let Some((event, _)) = state.response_cache.remove(request_id) {
                return Ok(event);
            }
            if state.destroyed {
                return Err(ChannelError::Destroyed(self.name.clone()));
            }
            let (sender, receiver) = oneshot::channel();
            state.pending.insert(request_id.to_string(), sender);
            receiver
        };

        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(event)) => Ok(event),
            // Sender dropped: the channel was destroyed under us.
            Ok(Err(_)) => Err(ChannelError::Destroyed(self.name.clone())),
            Err(_) => {
                self.state
                    .lock()
                    .expect("channel state poisoned")
                    .pending
                    .remove(request_id);
                Err(ChannelError::Timeout {
                    request_id: request_id.to_string(),
                    timeout,
                })
            }
        }
    }

    /// Reject every pending waiter and drop all subscribers.
    pub fn destroy(&self) {
        let mut state = self.state.lock().expect("channel state poisoned");
        state.destroyed = true;
        state.subscribers.clear();
        // Dropping the senders rejects the corresponding waiters.
        state.pending.clear();
        state.response_cache.clear();
    }

    /// Whether the channel has been destroyed.
    pub fn is_destroyed(&self) -> bool {
        self.state.lock().expect("channel state poisoned").destroyed
    }

    /// Number of events published so far.
    pub fn event_count(&self) -> u64 {
        self.state
            .lock()
            .expect("channel state poisoned")
            .event_count
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.state
            .lock()
            .expect("channel state poisoned")
            .subscribers
            .len()
    }

    /// Number of waiters currently pending.
    pub fn pending_count(&self) -> usize {
        self.state
            .lock()
            .expect("channel state poisoned")
            .pending
            .len()
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.name)
            .field("subscribers", &self.subscriber_count())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

#[async_trait]
impl ChannelPort for Channel {
    fn name(&self) -> &str {
        Channel::name(self)
    }

    fn publish(&self, event: KernelEvent) {
        Channel::publish(self, event);
    }

    fn subscribe(&self, handler: ChannelEventHandler) -> Unsubscribe {
        Channel::subscribe(self, handler)
    }

    async fn wait_for_response(
        &self,
        request_id: &str,
        timeout: Option<Duration>,
    ) -> Result<KernelEvent, ChannelError> {
        Channel::wait_for_response(self, request_id, timeout).await
    }

    fn destroy(&self) {
        Channel::destroy(self);
    }
}
