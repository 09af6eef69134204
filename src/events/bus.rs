//! Typed publish/subscribe bus shared by every component.
//!
//! Logical subscribers are multiplexed over a single transport listener per
//! event name. The listener is installed on the first subscription to a name
//! and removed when the last subscriber for that name goes away.
//!
//! Delivery to subscribers of one event is FIFO by subscription order. A
//! subscriber that returns an error or panics is logged and skipped; the rest
//! still receive the event.

use super::transport::{Envelope, ListenerId, Transport};
use super::types::{BusEvent, EventName};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// Subscriber callback
pub type Handler = Arc<dyn Fn(&BusEvent) -> anyhow::Result<()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscriber {
    id: SubscriptionId,
    owner: Option<String>,
    handler: Handler,
}

/// Subscribers of one event name plus the shared transport listener
struct Channel {
    listener: ListenerId,
    subscribers: Vec<Subscriber>,
}

struct BusInner {
    transport: Arc<dyn Transport>,
    channels: Mutex<HashMap<EventName, Channel>>,
    next_id: AtomicU64,
}

impl BusInner {
    fn channels(&self) -> MutexGuard<'_, HashMap<EventName, Channel>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn deliver(&self, name: EventName, envelope: &Envelope) {
        let event = match BusEvent::from_envelope(envelope) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(event = %name, error = %e, "Dropping undecodable event");
                return;
            }
        };

        // Snapshot handlers so subscribers can (un)subscribe while handling
        let handlers: Vec<(SubscriptionId, Handler)> = match self.channels().get(&name) {
            Some(channel) => channel
                .subscribers
                .iter()
                .map(|s| (s.id, Arc::clone(&s.handler)))
                .collect(),
            None => return,
        };

        for (id, handler) in handlers {
            match panic::catch_unwind(AssertUnwindSafe(|| handler(&event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(event = %name, subscription = id.0, error = %e, "Subscriber failed");
                }
                Err(_) => {
                    tracing::error!(event = %name, subscription = id.0, "Subscriber panicked");
                }
            }
        }
    }

    fn remove_where<F>(&self, mut predicate: F) -> usize
    where
        F: FnMut(EventName, &Subscriber) -> bool,
    {
        let mut removed = 0;
        let mut released = Vec::new();
        {
            let mut channels = self.channels();
            channels.retain(|name, channel| {
                let before = channel.subscribers.len();
                channel.subscribers.retain(|s| !predicate(*name, s));
                removed += before - channel.subscribers.len();

                if channel.subscribers.is_empty() {
                    released.push(channel.listener);
                    false
                } else {
                    true
                }
            });
        }

        for listener in released {
            self.transport.remove_listener(listener);
        }
        removed
    }
}

/// Handle to the shared event bus; cheap to clone
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            inner: Arc::new(BusInner {
                transport,
                channels: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Register a handler for one event name, optionally tagged with an owner
    pub fn subscribe<F>(&self, name: EventName, owner: Option<&str>, handler: F) -> Subscription
    where
        F: Fn(&BusEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let subscriber = Subscriber {
            id,
            owner: owner.map(str::to_string),
            handler: Arc::new(handler),
        };

        let mut channels = self.inner.channels();
        match channels.get_mut(&name) {
            Some(channel) => channel.subscribers.push(subscriber),
            None => {
                let weak: Weak<BusInner> = Arc::downgrade(&self.inner);
                let listener = self.inner.transport.add_listener(
                    name.as_str(),
                    Arc::new(move |envelope| {
                        if let Some(inner) = weak.upgrade() {
                            inner.deliver(name, envelope);
                        }
                    }),
                );
                tracing::debug!(event = %name, "Installed transport listener");
                channels.insert(
                    name,
                    Channel {
                        listener,
                        subscribers: vec![subscriber],
                    },
                );
            }
        }

        Subscription {
            bus: Arc::downgrade(&self.inner),
            name,
            id,
        }
    }

    /// Publish an event. Never blocks on subscribers' behalf and never panics.
    pub fn emit(&self, event: BusEvent) {
        match event.to_envelope() {
            Ok(envelope) => self.inner.transport.broadcast(&envelope),
            Err(e) => {
                tracing::error!(event = %event.name(), error = %e, "Failed to serialize event");
            }
        }
    }

    /// Remove every subscription registered by `owner`; returns how many
    pub fn release_owner(&self, owner: &str) -> usize {
        let removed = self
            .inner
            .remove_where(|_, s| s.owner.as_deref() == Some(owner));
        if removed > 0 {
            tracing::debug!(owner, removed, "Released owner subscriptions");
        }
        removed
    }

    /// Remove every subscription and transport listener
    pub fn release_all(&self) -> usize {
        self.inner.remove_where(|_, _| true)
    }

    /// Logical subscribers for a name
    pub fn subscriber_count(&self, name: EventName) -> usize {
        self.inner
            .channels()
            .get(&name)
            .map(|c| c.subscribers.len())
            .unwrap_or(0)
    }

    /// Transport listeners for a name (0 or 1)
    pub fn transport_listener_count(&self, name: EventName) -> usize {
        self.inner.transport.listener_count(name.as_str())
    }
}

/// Returned by [`EventBus::subscribe`]; call [`Subscription::unsubscribe`] to release
#[must_use = "dropping a Subscription keeps the handler registered; call unsubscribe() to release it"]
pub struct Subscription {
    bus: Weak<BusInner>,
    name: EventName,
    id: SubscriptionId,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn event_name(&self) -> EventName {
        self.name
    }

    /// Release this subscription; returns false if it was already gone
    pub fn unsubscribe(self) -> bool {
        match self.bus.upgrade() {
            Some(inner) => inner.remove_where(|name, s| name == self.name && s.id == self.id) > 0,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::transport::InProcessTransport;
    use std::sync::atomic::AtomicUsize;

    fn bus() -> EventBus {
        EventBus::new(Arc::new(InProcessTransport::new()))
    }

    #[test]
    fn test_listener_installed_lazily_and_removed_with_last_subscriber() {
        let bus = bus();
        assert_eq!(bus.transport_listener_count(EventName::ToastRequested), 0);

        let first = bus.subscribe(EventName::ToastRequested, None, |_| Ok(()));
        let second = bus.subscribe(EventName::ToastRequested, None, |_| Ok(()));
        assert_eq!(bus.transport_listener_count(EventName::ToastRequested), 1);
        assert_eq!(bus.subscriber_count(EventName::ToastRequested), 2);

        assert!(first.unsubscribe());
        assert_eq!(bus.transport_listener_count(EventName::ToastRequested), 1);

        assert!(second.unsubscribe());
        assert_eq!(bus.transport_listener_count(EventName::ToastRequested), 0);
    }

    #[test]
    fn test_delivery_is_fifo() {
        let bus = bus();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let order = Arc::clone(&order);
            let _ = bus.subscribe(EventName::ConnectivityOnline, None, move |_| {
                order.lock().unwrap().push(i);
                Ok(())
            });
        }

        bus.emit(BusEvent::ConnectivityOnline);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_failing_subscriber_does_not_block_others() {
        let bus = bus();
        let delivered = Arc::new(AtomicUsize::new(0));

        let _ = bus.subscribe(EventName::ConnectivityOffline, None, |_| {
            Err(anyhow::anyhow!("toast renderer unavailable"))
        });
        let _ = bus.subscribe(EventName::ConnectivityOffline, None, |_| {
            panic!("subscriber bug");
        });
        let counter = Arc::clone(&delivered);
        let _ = bus.subscribe(EventName::ConnectivityOffline, None, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        bus.emit(BusEvent::ConnectivityOffline);
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_release_owner_keeps_other_owners() {
        let bus = bus();
        let hits = Arc::new(AtomicUsize::new(0));

        let _ = bus.subscribe(EventName::ConnectivityOnline, Some("bmi-form"), |_| Ok(()));
        let counter = Arc::clone(&hits);
        let _ = bus.subscribe(EventName::ConnectivityOnline, Some("gcs-form"), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert_eq!(bus.release_owner("bmi-form"), 1);
        assert_eq!(bus.transport_listener_count(EventName::ConnectivityOnline), 1);

        bus.emit(BusEvent::ConnectivityOnline);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_release_all_tears_down_listeners() {
        let bus = bus();
        let _ = bus.subscribe(EventName::ConnectivityOnline, Some("a"), |_| Ok(()));
        let _ = bus.subscribe(EventName::ToastRequested, None, |_| Ok(()));

        assert_eq!(bus.release_all(), 2);
        for name in EventName::ALL {
            assert_eq!(bus.transport_listener_count(name), 0);
        }
    }

    #[test]
    fn test_subscriber_may_unsubscribe_during_delivery() {
        let bus = bus();
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let inner_slot = Arc::clone(&slot);
        let subscription = bus.subscribe(EventName::ConnectivityOnline, None, move |_| {
            if let Some(sub) = inner_slot.lock().unwrap().take() {
                sub.unsubscribe();
            }
            Ok(())
        });
        *slot.lock().unwrap() = Some(subscription);

        bus.emit(BusEvent::ConnectivityOnline);
        assert_eq!(bus.subscriber_count(EventName::ConnectivityOnline), 0);
    }
}
