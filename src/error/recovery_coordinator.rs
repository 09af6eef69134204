/// Recovery coordinator - per-key retry state machine
///
/// This module owns the retry state of every failure key and:
/// - Decides whether a classified failure is retried, surfaced or given up
/// - Arms cancelable backoff timers (one per key, aborted on reset/release)
/// - Defers network retries while offline and fires them on reconnect
/// - Publishes every transition on the `recovery-requested` channel
///
/// The coordinator never panics or returns errors to its callers. Internal
/// failures (poisoned state, no async runtime to arm a timer) degrade the key
/// to exhausted.
use super::classification::ErrorKind;
use super::retry::{RetryKey, RetryPhase, RetrySnapshot, RetryStrategy};
use crate::connectivity::ConnectivityMonitor;
use crate::events::{BusEvent, EventBus, RecoveryNotice, RecoveryStage};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Outcome of handing a failure to the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryDecision {
    /// Backoff timer armed for this attempt
    Scheduled { attempt: u32, after: Duration },

    /// Needs new user input; surfaced, never timer-retried
    AwaitingInput,

    /// Kind is never retried
    NotRecoverable,

    /// A retry for this key is already pending
    AlreadyScheduled,

    /// Attempts just ran out; the give-up notice was published
    GaveUp { attempts: u32 },

    /// Key was already exhausted; nothing published
    Exhausted { attempts: u32 },

    /// Automatic retry is switched off
    Disabled,
}

impl RecoveryDecision {
    /// True when the caller can expect a retry signal for this key
    pub fn will_retry(&self) -> bool {
        matches!(
            self,
            RecoveryDecision::Scheduled { .. } | RecoveryDecision::AlreadyScheduled
        )
    }
}

/// Retry state for one key
struct RetryEntry {
    attempts: u32,
    phase: RetryPhase,
    last_scheduled_at: Option<DateTime<Utc>>,
    deferred: bool,

    /// Bumped on every scheduling so a stale timer cannot fire a newer one
    generation: u64,

    /// Pending backoff timer
    timer: Option<JoinHandle<()>>,

    /// Signalled when the timer fires or the key is reset
    fired: Arc<Notify>,
}

impl RetryEntry {
    fn new() -> Self {
        Self {
            attempts: 0,
            phase: RetryPhase::Idle,
            last_scheduled_at: None,
            deferred: false,
            generation: 0,
            timer: None,
            fired: Arc::new(Notify::new()),
        }
    }

    fn snapshot(&self, key: &RetryKey) -> RetrySnapshot {
        RetrySnapshot {
            key: key.clone(),
            phase: self.phase,
            attempts: self.attempts,
            last_scheduled_at: self.last_scheduled_at,
            deferred: self.deferred,
        }
    }

    /// Cancel the timer and wake anyone waiting on this key
    fn cancel(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.fired.notify_one();
    }
}

struct CoordinatorInner {
    strategy: Box<dyn RetryStrategy>,
    entries: Mutex<HashMap<RetryKey, RetryEntry>>,
    bus: EventBus,
    connectivity: ConnectivityMonitor,
    auto_retry: AtomicBool,
}

impl CoordinatorInner {
    /// Lock the retry map; a poisoned lock is recovered and reported
    fn entries(&self) -> (MutexGuard<'_, HashMap<RetryKey, RetryEntry>>, bool) {
        match self.entries.lock() {
            Ok(guard) => (guard, false),
            Err(poisoned) => (poisoned.into_inner(), true),
        }
    }

    fn emit(&self, notice: RecoveryNotice) {
        self.bus.emit(BusEvent::RecoveryRequested(notice));
    }

    fn mark_deferred(&self, key: &RetryKey, generation: u64) {
        let (mut entries, _) = self.entries();
        if let Some(entry) = entries.get_mut(key) {
            if entry.generation == generation && entry.phase == RetryPhase::Scheduled {
                entry.deferred = true;
                tracing::info!(key = %key, attempt = entry.attempts, "Retry deferred until reconnect");
            }
        }
    }

    /// Timer fired: Scheduled -> Executing
    fn fire(&self, key: &RetryKey, generation: u64) {
        let attempt = {
            let (mut entries, _) = self.entries();
            let Some(entry) = entries.get_mut(key) else {
                return;
            };
            if entry.generation != generation || entry.phase != RetryPhase::Scheduled {
                return;
            }

            entry.phase = RetryPhase::Executing;
            entry.deferred = false;
            entry.timer = None;
            entry.fired.notify_one();
            entry.attempts
        };

        tracing::info!(key = %key, attempt, "Retry requested");
        self.emit(RecoveryNotice::new(key.clone(), RecoveryStage::RetryRequested, attempt));
    }
}

/// Process-wide retry coordinator; cheap to clone
#[derive(Clone)]
pub struct RecoveryCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl RecoveryCoordinator {
    /// Create new recovery coordinator
    pub fn new(
        strategy: impl RetryStrategy + 'static,
        bus: EventBus,
        connectivity: ConnectivityMonitor,
    ) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                strategy: Box::new(strategy),
                entries: Mutex::new(HashMap::new()),
                bus,
                connectivity,
                auto_retry: AtomicBool::new(true),
            }),
        }
    }

    pub fn with_auto_retry(self, enabled: bool) -> Self {
        self.set_auto_retry(enabled);
        self
    }

    pub fn set_auto_retry(&self, enabled: bool) {
        self.inner.auto_retry.store(enabled, Ordering::Relaxed);
    }

    pub fn max_attempts(&self) -> u32 {
        self.inner.strategy.max_attempts()
    }

    /// Feed a classified failure for `key` into the state machine
    pub fn handle_failure(&self, key: &RetryKey) -> RecoveryDecision {
        match key.kind {
            ErrorKind::Network => {}
            ErrorKind::Validation => {
                tracing::debug!(key = %key, "Validation failure awaits user input");
                return RecoveryDecision::AwaitingInput;
            }
            _ => return RecoveryDecision::NotRecoverable,
        }

        if !self.inner.auto_retry.load(Ordering::Relaxed) {
            return RecoveryDecision::Disabled;
        }

        let mut notices = Vec::new();
        let decision = {
            let (mut entries, poisoned) = self.inner.entries();
            let entry = entries.entry(key.clone()).or_insert_with(RetryEntry::new);

            match entry.phase {
                RetryPhase::Scheduled if !poisoned => RecoveryDecision::AlreadyScheduled,
                RetryPhase::Exhausted => RecoveryDecision::Exhausted {
                    attempts: entry.attempts,
                },
                _ => {
                    let runtime = tokio::runtime::Handle::try_current();
                    let can_retry = self.inner.strategy.should_retry(entry.attempts, key.kind);

                    match runtime {
                        Ok(runtime) if can_retry && !poisoned => {
                            let after = self.inner.strategy.next_delay(entry.attempts);
                            entry.attempts += 1;
                            entry.phase = RetryPhase::Scheduled;
                            entry.last_scheduled_at = Some(Utc::now());
                            entry.deferred = false;
                            entry.generation += 1;
                            entry.fired = Arc::new(Notify::new());
                            if let Some(stale) = entry.timer.take() {
                                stale.abort();
                            }
                            entry.timer = Some(runtime.spawn(retry_timer(
                                Arc::downgrade(&self.inner),
                                self.inner.connectivity.clone(),
                                key.clone(),
                                entry.generation,
                                after,
                            )));

                            tracing::info!(
                                key = %key,
                                attempt = entry.attempts,
                                delay = %humantime::format_duration(after),
                                "Retry scheduled"
                            );
                            notices.push(
                                RecoveryNotice::new(key.clone(), RecoveryStage::Scheduled, entry.attempts)
                                    .with_delay_ms(after.as_millis() as u64),
                            );
                            RecoveryDecision::Scheduled {
                                attempt: entry.attempts,
                                after,
                            }
                        }
                        runtime => {
                            if poisoned {
                                tracing::error!(key = %key, "Retry state poisoned, giving up");
                            } else if runtime.is_err() {
                                tracing::error!(key = %key, "No async runtime to arm retry timer, giving up");
                            } else {
                                tracing::warn!(
                                    key = %key,
                                    attempts = entry.attempts,
                                    max_attempts = self.inner.strategy.max_attempts(),
                                    "Max retry attempts reached"
                                );
                            }

                            entry.cancel();
                            entry.phase = RetryPhase::Exhausted;
                            entry.deferred = false;
                            notices.push(RecoveryNotice::new(
                                key.clone(),
                                RecoveryStage::Exhausted,
                                entry.attempts,
                            ));
                            notices.push(RecoveryNotice::new(
                                key.clone(),
                                RecoveryStage::GaveUp,
                                entry.attempts,
                            ));
                            RecoveryDecision::GaveUp {
                                attempts: entry.attempts,
                            }
                        }
                    }
                }
            }
        };

        for notice in notices {
            self.inner.emit(notice);
        }
        decision
    }

    /// The retried operation succeeded: key back to idle.
    /// Returns true if the key had retry state.
    pub fn report_success(&self, key: &RetryKey) -> bool {
        let removed = {
            let (mut entries, _) = self.inner.entries();
            entries.remove(key).map(|mut entry| {
                entry.cancel();
                entry.attempts
            })
        };

        match removed {
            Some(attempts) => {
                tracing::info!(key = %key, attempts, "Recovered after retry");
                self.inner
                    .emit(RecoveryNotice::new(key.clone(), RecoveryStage::Recovered, attempts));
                true
            }
            None => false,
        }
    }

    /// Explicit external reset; the only way out of Exhausted
    pub fn reset(&self, key: &RetryKey) -> bool {
        let removed = {
            let (mut entries, _) = self.inner.entries();
            entries.remove(key).map(|mut entry| {
                entry.cancel();
                entry.attempts
            })
        };

        match removed {
            Some(attempts) => {
                tracing::debug!(key = %key, "Retry state reset");
                self.inner
                    .emit(RecoveryNotice::new(key.clone(), RecoveryStage::Reset, attempts));
                true
            }
            None => false,
        }
    }

    /// Reset every key owned by `component`; returns how many were cleared
    pub fn release_component(&self, component: &str) -> usize {
        self.release_where(|key| key.component == component)
    }

    /// Reset every key
    pub fn release_all(&self) -> usize {
        self.release_where(|_| true)
    }

    fn release_where<F>(&self, predicate: F) -> usize
    where
        F: Fn(&RetryKey) -> bool,
    {
        let released: Vec<(RetryKey, u32)> = {
            let (mut entries, _) = self.inner.entries();
            let keys: Vec<RetryKey> = entries.keys().filter(|k| predicate(k)).cloned().collect();
            keys.into_iter()
                .filter_map(|key| {
                    entries.remove(&key).map(|mut entry| {
                        entry.cancel();
                        (key, entry.attempts)
                    })
                })
                .collect()
        };

        let count = released.len();
        for (key, attempts) in released {
            self.inner
                .emit(RecoveryNotice::new(key, RecoveryStage::Reset, attempts));
        }
        count
    }

    /// Copy of one key's state; keys without state are idle
    pub fn snapshot(&self, key: &RetryKey) -> RetrySnapshot {
        let (entries, _) = self.inner.entries();
        entries
            .get(key)
            .map(|entry| entry.snapshot(key))
            .unwrap_or_else(|| RetrySnapshot::idle(key.clone()))
    }

    /// Copy of every tracked key, ordered by key
    pub fn snapshots(&self) -> Vec<RetrySnapshot> {
        let mut snapshots: Vec<RetrySnapshot> = {
            let (entries, _) = self.inner.entries();
            entries.iter().map(|(key, entry)| entry.snapshot(key)).collect()
        };
        snapshots.sort_by_key(|s| s.key.to_string());
        snapshots
    }

    /// Wait until the pending retry for `key` fires.
    ///
    /// Returns true when the caller should retry now, false if the key has no
    /// pending retry or was reset while waiting.
    pub async fn wait_for_retry(&self, key: &RetryKey) -> bool {
        let fired = {
            let (entries, _) = self.inner.entries();
            match entries.get(key) {
                Some(entry) if entry.phase == RetryPhase::Scheduled => Arc::clone(&entry.fired),
                Some(entry) => return entry.phase == RetryPhase::Executing,
                None => return false,
            }
        };

        fired.notified().await;

        let (entries, _) = self.inner.entries();
        entries
            .get(key)
            .map(|entry| entry.phase == RetryPhase::Executing)
            .unwrap_or(false)
    }
}

/// Backoff timer body; holds only a weak reference to the coordinator
async fn retry_timer(
    inner: Weak<CoordinatorInner>,
    connectivity: ConnectivityMonitor,
    key: RetryKey,
    generation: u64,
    delay: Duration,
) {
    tokio::time::sleep(delay).await;

    if !connectivity.is_online() {
        match inner.upgrade() {
            Some(inner) => inner.mark_deferred(&key, generation),
            None => return,
        }
        connectivity.wait_online().await;
    }

    if let Some(inner) = inner.upgrade() {
        inner.fire(&key, generation);
    }
}

impl Drop for CoordinatorInner {
    fn drop(&mut self) {
        let entries = self.entries.get_mut().unwrap_or_else(PoisonError::into_inner);
        for entry in entries.values_mut() {
            if let Some(timer) = entry.timer.take() {
                timer.abort();
            }
        }
    }
}
