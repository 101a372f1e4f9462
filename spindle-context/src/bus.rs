//! Per-request synchronous event bus.

use std::sync::{Arc, Mutex, Weak};

use spindle_types::{KernelEvent, event_type};

/// Callback invoked for each delivered event.
pub type EventHandler = Arc<dyn Fn(&KernelEvent) + Send + Sync>;

struct Subscriber {
    id: u64,
    event_type: String,
    handler: EventHandler,
}

#[derive(Default)]
struct BusState {
    next_id: u64,
    subscribers: Vec<Subscriber>,
}

/// Synchronous fan-out bus scoped to one request.
///
/// Cloning aliases the same bus. Subscribers are invoked in
/// registration order; a subscription to [`event_type::WILDCARD`]
/// receives every event. Delivery happens on the publisher's task —
/// within one request everything runs on a single logical task, so
/// publish order is delivery order.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Mutex<BusState>>,
}

impl EventBus {
    /// Create a fresh bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one event type (or the `*` wildcard).
    ///
    /// The returned [`Subscription`] removes exactly this handler when
    /// cancelled.
    pub fn subscribe<F>(&self, event_type: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(&KernelEvent) + Send + Sync + 'static,
    {
        let mut state = self.inner.lock().expect("bus state poisoned");
        state.next_id += 1;
        let id = state.next_id;
        state.subscribers.push(Subscriber {
            id,
            event_type: event_type.into(),
            handler: Arc::new(handler),
        });
        Subscription {
            bus: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// Deliver an event to every matching subscriber, in registration
    /// order.
    pub fn publish(&self, event: &KernelEvent) {
        let handlers: Vec<EventHandler> = {
            let state = self.inner.lock().expect("bus state poisoned");
            state
                .subscribers
                .iter()
                .filter(|sub| {
                    sub.event_type == event.event_type || sub.event_type == event_type::WILDCARD
                })
                .map(|sub| sub.handler.clone())
                .collect()
        };
        for handler in handlers {
            handler(event);
        }
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .lock()
            .expect("bus state poisoned")
            .subscribers
            .len()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Disposer returned by [`EventBus::subscribe`].
#[must_use = "dropping a Subscription without cancel() leaves the handler registered"]
pub struct Subscription {
    bus: Weak<Mutex<BusState>>,
    id: u64,
}

impl Subscription {
    /// Remove the subscribed handler.
    pub fn cancel(self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.lock()
                .expect("bus state poisoned")
                .subscribers
                .retain(|sub| sub.id != self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn delivers_in_registration_order() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let seen = seen.clone();
            let _sub = bus.subscribe("status", move |_| {
                seen.lock().unwrap().push(tag);
            });
        }

        bus.publish(&KernelEvent::new("status", json!(null)));
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn wildcard_receives_everything() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let _sub = bus.subscribe(event_type::WILDCARD, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(&KernelEvent::new("status", json!(null)));
        bus.publish(&KernelEvent::new("progress", json!(null)));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn cancel_removes_exactly_one_handler() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));

        let counter = count.clone();
        let keep = bus.subscribe("status", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let counter = count.clone();
        let drop_me = bus.subscribe("status", move |_| {
            counter.fetch_add(10, Ordering::SeqCst);
        });

        drop_me.cancel();
        bus.publish(&KernelEvent::new("status", json!(null)));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        keep.cancel();
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn clones_alias_the_same_bus() {
        let bus = EventBus::new();
        let alias = bus.clone();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let _sub = alias.subscribe("status", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        bus.publish(&KernelEvent::new("status", json!(null)));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
