//! Online/offline tracking.
//!
//! The monitor owns the connectivity flag, publishes `connectivity-online` and
//! `connectivity-offline` on every change, and lets async tasks wait for the
//! process to come back online.

use crate::events::{BusEvent, EventBus};
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Clone)]
pub struct ConnectivityMonitor {
    tx: Arc<watch::Sender<bool>>,
    bus: EventBus,
}

impl ConnectivityMonitor {
    pub fn new(bus: EventBus, online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self {
            tx: Arc::new(tx),
            bus,
        }
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Update the flag; emits a bus event only when the value changes.
    /// Returns true if it changed.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });

        if changed {
            tracing::info!(online, "Connectivity changed");
            self.bus.emit(if online {
                BusEvent::ConnectivityOnline
            } else {
                BusEvent::ConnectivityOffline
            });
        }
        changed
    }

    /// Resolve once the process is online (immediately if it already is)
    pub async fn wait_online(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as self, so this cannot observe a closed channel
        let _ = rx.wait_for(|online| *online).await;
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventName, InProcessTransport};
    use std::sync::Mutex;
    use std::time::Duration;

    fn monitor(online: bool) -> (ConnectivityMonitor, EventBus) {
        let bus = EventBus::new(Arc::new(InProcessTransport::new()));
        (ConnectivityMonitor::new(bus.clone(), online), bus)
    }

    #[test]
    fn test_emits_only_on_change() {
        let (monitor, bus) = monitor(true);
        let seen = Arc::new(Mutex::new(Vec::new()));

        for name in [EventName::ConnectivityOnline, EventName::ConnectivityOffline] {
            let seen = Arc::clone(&seen);
            let _ = bus.subscribe(name, None, move |event| {
                seen.lock().unwrap().push(event.name());
                Ok(())
            });
        }

        assert!(!monitor.set_online(true));
        assert!(monitor.set_online(false));
        assert!(!monitor.set_online(false));
        assert!(monitor.set_online(true));

        assert_eq!(
            *seen.lock().unwrap(),
            vec![EventName::ConnectivityOffline, EventName::ConnectivityOnline]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_online_resolves_on_reconnect() {
        let (monitor, _bus) = monitor(false);

        let waiter = {
            let monitor = monitor.clone();
            tokio::spawn(async move { monitor.wait_online().await })
        };

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!waiter.is_finished());

        monitor.set_online(true);
        waiter.await.unwrap();
        assert!(monitor.is_online());
    }
}
