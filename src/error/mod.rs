/// Failure handling for the scoring forms
///
/// This module provides:
/// - Failure taxonomy and classification
/// - Capped failure history
/// - Exponential backoff and per-key retry state
/// - The recovery coordinator (retry/give-up state machine)
/// - The error boundary that ties them together for call sites
///
/// # Architecture
///
/// ```text
/// ┌──────────────────────────────────────────┐
/// │        Error Boundary (front door)       │
/// └────────────────┬─────────────────────────┘
///                  │
///      ┌───────────┴───────────┐
///      ↓                       ↓
/// ┌──────────────┐      ┌──────────────────┐
/// │Classification│      │    Recovery      │
/// │ & History    │      │   Coordinator    │──→ Event Bus
/// └──────────────┘      └──────────────────┘
/// ```
///
/// # Usage Example
///
/// ```rust,ignore
/// use medscore_guard::error::Failure;
///
/// let outcome = runtime.boundary().report(
///     Failure::new("getaddrinfo ENOTFOUND api.example.org")
///         .with_code("ENOTFOUND")
///         .in_component("curb65-form")
///         .during("submit"),
/// );
///
/// if outcome.decision.will_retry() {
///     runtime.coordinator().wait_for_retry(&outcome.retry_key).await;
/// }
/// ```

pub mod boundary;
pub mod classification;
pub mod failure;
pub mod recovery_coordinator;
pub mod retry;

// Re-export main types for convenience
pub use boundary::{ErrorBoundary, FailureOutcome, GLOBAL_COMPONENT, UNKNOWN_ACTION};
pub use classification::{Classification, ErrorClassifier, ErrorKind};
pub use failure::{DomainFailure, Failure, FailureHistory, FailureRecord, DEFAULT_MAX_FAILURE_RECORDS};
pub use recovery_coordinator::{RecoveryCoordinator, RecoveryDecision};
pub use retry::{ExponentialBackoff, RetryKey, RetryPhase, RetrySnapshot, RetryStrategy};
