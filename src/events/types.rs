//! Typed events carried over the bus and their transport names.

use crate::error::{ErrorKind, FailureRecord, RetryKey};
use crate::events::transport::Envelope;
use crate::GuardError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Transport-level event identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventName {
    ConnectivityOnline,
    ConnectivityOffline,
    FailureReported,
    RecoveryRequested,
    ToastRequested,
}

impl EventName {
    pub const ALL: [EventName; 5] = [
        EventName::ConnectivityOnline,
        EventName::ConnectivityOffline,
        EventName::FailureReported,
        EventName::RecoveryRequested,
        EventName::ToastRequested,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventName::ConnectivityOnline => "connectivity-online",
            EventName::ConnectivityOffline => "connectivity-offline",
            EventName::FailureReported => "failure-reported",
            EventName::RecoveryRequested => "recovery-requested",
            EventName::ToastRequested => "toast-requested",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|n| n.as_str() == name)
    }

    /// Connectivity changes are bare signals without a payload
    pub fn carries_payload(&self) -> bool {
        !matches!(
            self,
            EventName::ConnectivityOnline | EventName::ConnectivityOffline
        )
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stage a retry lineage moved into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStage {
    /// Backoff timer armed
    Scheduled,
    /// Timer fired; the caller should retry now
    RetryRequested,
    /// Retry succeeded, key back to idle
    Recovered,
    /// Attempts used up
    Exhausted,
    /// Permanent failure signal, sent once per exhaustion
    GaveUp,
    /// Key cleared by explicit reset or owner disposal
    Reset,
}

/// Payload of `recovery-requested`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryNotice {
    pub key: RetryKey,
    pub stage: RecoveryStage,
    pub attempt: u32,
    pub delay_ms: Option<u64>,
    pub at: DateTime<Utc>,
}

impl RecoveryNotice {
    pub fn new(key: RetryKey, stage: RecoveryStage, attempt: u32) -> Self {
        Self {
            key,
            stage,
            attempt,
            delay_ms: None,
            at: Utc::now(),
        }
    }

    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = Some(delay_ms);
        self
    }
}

/// Notification color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToastSeverity {
    Error,
    Warning,
    Info,
    Success,
}

/// Payload of `toast-requested`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Toast {
    pub message: String,
    pub severity: ToastSeverity,
    /// Auto-dismiss delay
    pub duration_ms: u64,
    pub kind: Option<ErrorKind>,
}

/// Every event the bus carries
#[derive(Debug, Clone, PartialEq)]
pub enum BusEvent {
    ConnectivityOnline,
    ConnectivityOffline,
    FailureReported(FailureRecord),
    RecoveryRequested(RecoveryNotice),
    ToastRequested(Toast),
}

impl BusEvent {
    pub fn name(&self) -> EventName {
        match self {
            BusEvent::ConnectivityOnline => EventName::ConnectivityOnline,
            BusEvent::ConnectivityOffline => EventName::ConnectivityOffline,
            BusEvent::FailureReported(_) => EventName::FailureReported,
            BusEvent::RecoveryRequested(_) => EventName::RecoveryRequested,
            BusEvent::ToastRequested(_) => EventName::ToastRequested,
        }
    }

    /// Serialize into the transport representation
    pub fn to_envelope(&self) -> Result<Envelope, serde_json::Error> {
        let payload = match self {
            BusEvent::ConnectivityOnline | BusEvent::ConnectivityOffline => None,
            BusEvent::FailureReported(record) => Some(serde_json::to_value(record)?),
            BusEvent::RecoveryRequested(notice) => Some(serde_json::to_value(notice)?),
            BusEvent::ToastRequested(toast) => Some(serde_json::to_value(toast)?),
        };

        Ok(Envelope {
            name: self.name().as_str().to_string(),
            payload,
        })
    }

    /// Rebuild a typed event from the transport representation
    pub fn from_envelope(envelope: &Envelope) -> Result<Self, GuardError> {
        let name = EventName::parse(&envelope.name)
            .ok_or_else(|| GuardError::UnknownEvent(envelope.name.clone()))?;

        if !name.carries_payload() {
            return Ok(match name {
                EventName::ConnectivityOnline => BusEvent::ConnectivityOnline,
                _ => BusEvent::ConnectivityOffline,
            });
        }

        let payload = envelope
            .payload
            .clone()
            .ok_or_else(|| GuardError::MissingPayload(envelope.name.clone()))?;

        Ok(match name {
            EventName::FailureReported => BusEvent::FailureReported(serde_json::from_value(payload)?),
            EventName::RecoveryRequested => {
                BusEvent::RecoveryRequested(serde_json::from_value(payload)?)
            }
            _ => BusEvent::ToastRequested(serde_json::from_value(payload)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Classification, Failure};

    #[test]
    fn test_event_names_round_trip() {
        for name in EventName::ALL {
            assert_eq!(EventName::parse(name.as_str()), Some(name));
        }
        assert_eq!(EventName::parse("page-unload"), None);
    }

    #[test]
    fn test_connectivity_events_have_no_payload() {
        let envelope = BusEvent::ConnectivityOffline.to_envelope().unwrap();
        assert_eq!(envelope.name, "connectivity-offline");
        assert!(envelope.payload.is_none());
    }

    #[test]
    fn test_failure_event_survives_transport() {
        let record = FailureRecord::new(
            &Failure::new("Failed to fetch").in_component("curb65-form"),
            Classification::from(ErrorKind::Network),
        );
        let event = BusEvent::FailureReported(record);

        let envelope = event.to_envelope().unwrap();
        assert_eq!(envelope.name, "failure-reported");
        assert_eq!(BusEvent::from_envelope(&envelope).unwrap(), event);
    }

    #[test]
    fn test_missing_payload_is_rejected() {
        let envelope = Envelope {
            name: "toast-requested".to_string(),
            payload: None,
        };
        assert!(matches!(
            BusEvent::from_envelope(&envelope),
            Err(GuardError::MissingPayload(_))
        ));
    }
}
