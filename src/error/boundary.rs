/// Error boundary - the single front door for failures raised by components
///
/// Reporting a failure classifies it, appends the record to the capped
/// failure history, publishes `failure-reported`, hands the retry key to the
/// recovery coordinator and requests a toast matching the decision.
use super::classification::{ErrorClassifier, ErrorKind};
use super::failure::{Failure, FailureHistory, FailureRecord};
use super::recovery_coordinator::{RecoveryCoordinator, RecoveryDecision};
use super::retry::RetryKey;
use crate::events::{BusEvent, EventBus, Toast, ToastSeverity};
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Component name used when a failure does not say where it came from
pub const GLOBAL_COMPONENT: &str = "global";

/// Action name used when a failure does not say what was in progress
pub const UNKNOWN_ACTION: &str = "unknown";

/// What happened to one reported failure
#[derive(Debug, Clone, PartialEq)]
pub struct FailureOutcome {
    pub record: FailureRecord,
    pub decision: RecoveryDecision,
    pub retry_key: RetryKey,
}

pub struct ErrorBoundary {
    classifier: ErrorClassifier,
    coordinator: RecoveryCoordinator,
    history: Mutex<FailureHistory>,
    bus: EventBus,

    /// Publish `toast-requested` for reported failures
    show_toast: bool,

    /// Toast lifetime for kinds that resolve on their own
    recoverable_toast: Duration,

    /// Toast lifetime for kinds that need intervention
    persistent_toast: Duration,
}

impl ErrorBoundary {
    pub fn new(classifier: ErrorClassifier, coordinator: RecoveryCoordinator, bus: EventBus) -> Self {
        Self {
            classifier,
            coordinator,
            history: Mutex::new(FailureHistory::default()),
            bus,
            show_toast: true,
            recoverable_toast: Duration::from_millis(5000),
            persistent_toast: Duration::from_millis(10000),
        }
    }

    pub fn with_history_capacity(mut self, max_records: usize) -> Self {
        self.history = Mutex::new(FailureHistory::new(max_records));
        self
    }

    pub fn with_toasts(mut self, enabled: bool, recoverable: Duration, persistent: Duration) -> Self {
        self.show_toast = enabled;
        self.recoverable_toast = recoverable;
        self.persistent_toast = persistent.max(recoverable);
        self
    }

    pub fn coordinator(&self) -> &RecoveryCoordinator {
        &self.coordinator
    }

    fn history_guard(&self) -> MutexGuard<'_, FailureHistory> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Classify, record and publish a failure, then let the coordinator decide
    pub fn report(&self, failure: Failure) -> FailureOutcome {
        let classification = self.classifier.classify(&failure);
        let record = FailureRecord::new(&failure, classification);

        tracing::warn!(
            kind = %record.kind,
            component = record.originating_component.as_deref().unwrap_or(GLOBAL_COMPONENT),
            recoverable = record.recoverable,
            code = record.code.as_deref().unwrap_or("-"),
            "Failure reported"
        );

        self.history_guard().push(record.clone());
        self.bus.emit(BusEvent::FailureReported(record.clone()));

        let retry_key = RetryKey::new(
            record
                .originating_component
                .as_deref()
                .unwrap_or(GLOBAL_COMPONENT),
            record.action.as_deref().unwrap_or(UNKNOWN_ACTION),
            record.kind,
        );
        let decision = self.coordinator.handle_failure(&retry_key);

        if self.show_toast {
            if let Some(toast) = self.toast_for(&record, decision) {
                self.bus.emit(BusEvent::ToastRequested(toast));
            }
        }

        FailureOutcome {
            record,
            decision,
            retry_key,
        }
    }

    fn toast_for(&self, record: &FailureRecord, decision: RecoveryDecision) -> Option<Toast> {
        let short = self.recoverable_toast.as_millis() as u64;
        let long = self.persistent_toast.as_millis() as u64;

        let (message, severity, duration_ms) = match decision {
            RecoveryDecision::AlreadyScheduled => return None,
            RecoveryDecision::Scheduled { after, .. } => (
                format!(
                    "{}. Retrying in {}.",
                    record.kind.description(),
                    humantime::format_duration(after)
                ),
                ToastSeverity::Warning,
                short,
            ),
            RecoveryDecision::AwaitingInput => {
                (record.message.clone(), ToastSeverity::Warning, short)
            }
            RecoveryDecision::GaveUp { attempts } | RecoveryDecision::Exhausted { attempts } => (
                format!(
                    "{}. Gave up after {} {}.",
                    record.kind.description(),
                    attempts,
                    if attempts == 1 { "retry" } else { "retries" }
                ),
                ToastSeverity::Error,
                long,
            ),
            RecoveryDecision::Disabled | RecoveryDecision::NotRecoverable => {
                let duration = if record.recoverable { short } else { long };
                let severity = if record.recoverable {
                    ToastSeverity::Warning
                } else {
                    ToastSeverity::Error
                };
                (
                    format!("{}: {}", record.kind.description(), record.message),
                    severity,
                    duration,
                )
            }
        };

        Some(Toast {
            message,
            severity,
            duration_ms,
            kind: Some(record.kind),
        })
    }

    /// Run an async operation, retrying it whenever the coordinator signals.
    ///
    /// Failures without component or action are attributed to the ones given
    /// here. Returns the last failure record once no retry is pending.
    pub async fn run<T, F, Fut>(&self, component: &str, action: &str, mut op: F) -> Result<T, FailureRecord>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Failure>>,
    {
        let mut retried: Option<RetryKey> = None;

        loop {
            match op().await {
                Ok(value) => {
                    if let Some(key) = retried {
                        self.coordinator.report_success(&key);
                    }
                    return Ok(value);
                }
                Err(mut failure) => {
                    if failure.component.is_none() {
                        failure.component = Some(component.to_string());
                    }
                    if failure.action.is_none() {
                        failure.action = Some(action.to_string());
                    }

                    let outcome = self.report(failure);
                    if outcome.decision.will_retry()
                        && self.coordinator.wait_for_retry(&outcome.retry_key).await
                    {
                        tracing::debug!(key = %outcome.retry_key, "Re-running operation");
                        retried = Some(outcome.retry_key);
                        continue;
                    }
                    return Err(outcome.record);
                }
            }
        }
    }

    /// Failure records, oldest first
    pub fn history(&self) -> Vec<FailureRecord> {
        self.history_guard().snapshot()
    }

    pub fn history_of_kind(&self, kind: ErrorKind) -> Vec<FailureRecord> {
        self.history_guard().of_kind(kind)
    }

    pub fn clear_history(&self) {
        self.history_guard().clear();
    }

    /// Explicitly reset one retry lineage, including an exhausted one
    pub fn resolve(&self, key: &RetryKey) -> bool {
        self.coordinator.reset(key)
    }

    /// Tear down everything a component owns: retry state and bus subscriptions
    pub fn dispose_component(&self, component: &str) {
        let keys = self.coordinator.release_component(component);
        let subscriptions = self.bus.release_owner(component);
        tracing::debug!(component, keys, subscriptions, "Component disposed");
    }
}
