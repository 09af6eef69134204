//! Cross-component event bus
//!
//! - `types`: the typed events and their transport-level names
//! - `transport`: the injectable broadcast primitive
//! - `bus`: owner-scoped subscriptions multiplexed over one listener per name

pub mod bus;
pub mod transport;
pub mod types;

pub use bus::{EventBus, Handler, Subscription, SubscriptionId};
pub use transport::{Envelope, InProcessTransport, Listener, ListenerId, Transport};
pub use types::{BusEvent, EventName, RecoveryNotice, RecoveryStage, Toast, ToastSeverity};
