/// Retry keys, retry state and exponential backoff
///
/// A retry lineage is identified by a [`RetryKey`]: the component, the action
/// it was performing and the kind of failure. Each key walks the
/// Idle → Scheduled → Executing → (Idle | Scheduled | Exhausted) state machine
/// driven by the recovery coordinator.
use super::classification::ErrorKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Retry strategy trait
pub trait RetryStrategy: Send + Sync {
    /// Determine if another retry may be scheduled after `attempts` retries
    fn should_retry(&self, attempts: u32, kind: ErrorKind) -> bool;

    /// Calculate delay before the next retry, given the retries already made
    fn next_delay(&self, attempts: u32) -> Duration;

    /// Maximum number of retry attempts
    fn max_attempts(&self) -> u32;
}

/// Exponential backoff retry strategy
///
/// Implements `delay = min(base * 2^attempts, max_delay)`
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// Delay before the first retry
    base_delay: Duration,

    /// Maximum delay cap
    max_delay: Duration,

    /// Maximum retry attempts
    max_attempts: u32,
}

impl ExponentialBackoff {
    /// Create new exponential backoff strategy
    pub fn new(base_delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_delay: max_delay.max(base_delay),
            max_attempts,
        }
    }

    /// Calculate exponential delay, saturating instead of overflowing
    fn calculate_delay(&self, attempts: u32) -> Duration {
        let factor = 2_u128.checked_pow(attempts).unwrap_or(u128::MAX);
        let exponential_ms = self.base_delay.as_millis().saturating_mul(factor);
        let capped_ms = exponential_ms.min(self.max_delay.as_millis());

        Duration::from_millis(capped_ms as u64)
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30), 3)
    }
}

impl RetryStrategy for ExponentialBackoff {
    fn should_retry(&self, attempts: u32, kind: ErrorKind) -> bool {
        attempts < self.max_attempts && kind == ErrorKind::Network
    }

    fn next_delay(&self, attempts: u32) -> Duration {
        self.calculate_delay(attempts)
    }

    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

/// Identity of one retry lineage
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RetryKey {
    pub component: String,
    pub action: String,
    pub kind: ErrorKind,
}

impl RetryKey {
    pub fn new(component: impl Into<String>, action: impl Into<String>, kind: ErrorKind) -> Self {
        Self {
            component: component.into(),
            action: action.into(),
            kind,
        }
    }
}

impl fmt::Display for RetryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.component, self.action, self.kind.as_str())
    }
}

/// Phase of a retry lineage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryPhase {
    /// No retry pending
    Idle,

    /// Backoff timer armed
    Scheduled,

    /// Retry requested, caller is re-running the operation
    Executing,

    /// Out of attempts until an explicit reset
    Exhausted,
}

/// Point-in-time copy of one key's retry state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySnapshot {
    pub key: RetryKey,
    pub phase: RetryPhase,
    pub attempts: u32,
    pub last_scheduled_at: Option<DateTime<Utc>>,

    /// Backoff elapsed while offline; waiting for reconnect
    pub deferred: bool,
}

impl RetrySnapshot {
    /// Snapshot for a key the coordinator holds no state for
    pub fn idle(key: RetryKey) -> Self {
        Self {
            key,
            phase: RetryPhase::Idle,
            attempts: 0,
            last_scheduled_at: None,
            deferred: false,
        }
    }
}
