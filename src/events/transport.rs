//! Broadcast primitive underneath the event bus.
//!
//! The bus never talks to subscribers directly: it installs one listener per
//! event name on a [`Transport`] and fans out from there. Payloads cross the
//! transport as serialized JSON so any host broadcast mechanism can carry them.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Serialized event as it travels over a transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub name: String,
    pub payload: Option<serde_json::Value>,
}

/// Transport-level listener
pub type Listener = Arc<dyn Fn(&Envelope) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Generic broadcast primitive
pub trait Transport: Send + Sync {
    /// Register a listener for one event name
    fn add_listener(&self, name: &str, listener: Listener) -> ListenerId;

    /// Remove a listener; returns false if it was not registered
    fn remove_listener(&self, id: ListenerId) -> bool;

    /// Deliver an envelope to every listener registered for its name
    fn broadcast(&self, envelope: &Envelope);

    /// Number of listeners registered for a name
    fn listener_count(&self, name: &str) -> usize;
}

/// Synchronous in-process transport
#[derive(Default)]
pub struct InProcessTransport {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(ListenerId, String, Listener)>>,
}

impl InProcessTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transport for InProcessTransport {
    fn add_listener(&self, name: &str, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, name.to_string(), listener));
        id
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(existing, _, _)| *existing != id);
        listeners.len() != before
    }

    fn broadcast(&self, envelope: &Envelope) {
        // Listeners run outside the lock so they may subscribe or emit
        let targets: Vec<Listener> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, name, _)| *name == envelope.name)
            .map(|(_, _, listener)| Arc::clone(listener))
            .collect();

        for listener in targets {
            listener(envelope);
        }
    }

    fn listener_count(&self, name: &str) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, n, _)| n == name)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_broadcast_reaches_matching_listeners_only() {
        let transport = InProcessTransport::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&hits);
        transport.add_listener(
            "toast-requested",
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        transport.broadcast(&Envelope {
            name: "toast-requested".to_string(),
            payload: None,
        });
        transport.broadcast(&Envelope {
            name: "failure-reported".to_string(),
            payload: None,
        });

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_remove_listener() {
        let transport = InProcessTransport::new();
        let id = transport.add_listener("connectivity-online", Arc::new(|_| {}));

        assert_eq!(transport.listener_count("connectivity-online"), 1);
        assert!(transport.remove_listener(id));
        assert!(!transport.remove_listener(id));
        assert_eq!(transport.listener_count("connectivity-online"), 0);
    }
}
