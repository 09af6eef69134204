//! Anonymizing, batching audit/log pipeline.
//!
//! Every `record` call masks the details, appends the entry to the capped
//! in-memory list, queues it for remote delivery and persists the most recent
//! entries locally. Audit entries are also persisted one key per entry.
//!
//! Remote delivery happens on a background worker: when the pending queue
//! reaches the batch size, when connectivity comes back, and on a recurring
//! timer. Nothing here ever returns an error to the caller that logged;
//! storage and delivery problems are downgraded to local log output.

use super::anonymize::Anonymizer;
use super::entry::{category, LogBatch, LogEntry, LogLevel};
use super::storage::{audit_key, load_rolling_entries, LocalStore, ROLLING_LOG_KEY};
use super::sink::RemoteSink;
use crate::config::GuardConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::events::{BusEvent, EventBus, EventName, RecoveryStage};
use anyhow::Context;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use uuid::Uuid;

/// Owner id of the pipeline's own bus subscriptions
pub const PIPELINE_OWNER: &str = "log-pipeline";

/// Pipeline limits and switches
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// In-memory entries kept before the oldest are dropped
    pub max_local_entries: usize,

    /// Entries written to the rolling key after every write
    pub persisted_entries: usize,

    /// Pending entries that trigger an immediate flush
    pub batch_size: usize,

    /// Recurring flush period
    pub flush_interval: Duration,

    pub enable_local_storage: bool,
    pub enable_remote_logging: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from(&GuardConfig::default())
    }
}

impl From<&GuardConfig> for PipelineSettings {
    fn from(config: &GuardConfig) -> Self {
        Self {
            max_local_entries: config.max_local_entries.max(1),
            persisted_entries: config.persisted_entries,
            batch_size: config.batch_size.max(1),
            flush_interval: Duration::from_millis(config.flush_interval_ms.max(1)),
            enable_local_storage: config.enable_local_storage,
            enable_remote_logging: config.enable_remote_logging,
        }
    }
}

/// Result of one flush attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Remote logging off or no sink configured
    Disabled,
    /// Nothing pending
    Empty,
    /// Skipped; pending entries stay queued
    Offline,
    /// Batch of this many entries delivered and discarded
    Sent(usize),
    /// Delivery failed; this many entries restored to the front
    Failed(usize),
}

/// Why the worker was asked to flush
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlushTrigger {
    BatchFull,
    Reconnected,
}

#[derive(Default)]
struct PipelineState {
    entries: VecDeque<LogEntry>,
    pending: VecDeque<LogEntry>,
}

struct PipelineInner {
    settings: PipelineSettings,
    anonymizer: Anonymizer,
    session_id: String,
    correlation_id: Mutex<String>,
    state: Mutex<PipelineState>,

    /// One flush in flight at a time
    flush_lock: tokio::sync::Mutex<()>,

    store: Option<Arc<dyn LocalStore>>,
    sink: Option<Arc<dyn RemoteSink>>,
    bus: EventBus,
    connectivity: ConnectivityMonitor,

    trigger_tx: mpsc::UnboundedSender<FlushTrigger>,
    trigger_rx: Mutex<Option<mpsc::UnboundedReceiver<FlushTrigger>>>,
    started: AtomicBool,
    stop: Arc<Notify>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl PipelineInner {
    fn state(&self) -> MutexGuard<'_, PipelineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn correlation_id(&self) -> String {
        self.correlation_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn remote_enabled(&self) -> bool {
        self.settings.enable_remote_logging && self.sink.is_some()
    }

    /// Best-effort local persistence; failures only reach the tracing output
    fn persist(&self, state: &PipelineState, entry: &LogEntry) {
        if !self.settings.enable_local_storage {
            return;
        }
        let Some(store) = &self.store else {
            return;
        };

        let skip = state
            .entries
            .len()
            .saturating_sub(self.settings.persisted_entries);
        let recent: Vec<&LogEntry> = state.entries.iter().skip(skip).collect();

        let rolling = serde_json::to_string(&recent)
            .context("Failed to serialize recent entries")
            .and_then(|json| store.put(ROLLING_LOG_KEY, &json));
        if let Err(e) = rolling {
            tracing::warn!(error = %format!("{:#}", e), "Failed to persist recent log entries");
        }

        if entry.level == LogLevel::Audit {
            let key = audit_key(entry);
            let audit = serde_json::to_string(entry)
                .context("Failed to serialize audit entry")
                .and_then(|json| store.put(&key, &json));
            if let Err(e) = audit {
                tracing::warn!(key = %key, error = %format!("{:#}", e), "Failed to persist audit entry");
            }
        }
    }

    fn record_entry(
        &self,
        level: LogLevel,
        message: String,
        category: &str,
        details: Option<Value>,
        context: Option<String>,
        allow_trigger: bool,
    ) -> LogEntry {
        let mut entry = LogEntry::new(
            level,
            category,
            message,
            self.session_id.clone(),
            self.correlation_id(),
        )
        .with_context(context);

        if let Some(raw) = details {
            let anonymized = self.anonymizer.anonymize(&raw);
            entry = entry.with_details(raw, anonymized);
        }

        mirror(&entry);

        let batch_full = {
            let mut state = self.state();

            state.entries.push_back(entry.clone());
            while state.entries.len() > self.settings.max_local_entries {
                state.entries.pop_front();
            }

            let mut batch_full = false;
            if self.remote_enabled() {
                state.pending.push_back(entry.clone());
                batch_full = state.pending.len() >= self.settings.batch_size;
            }

            self.persist(&state, &entry);
            batch_full
        };

        if batch_full && allow_trigger {
            // The receiver lives as long as the pipeline; a send error means shutdown
            let _ = self.trigger_tx.send(FlushTrigger::BatchFull);
        }

        entry
    }
}

/// Emit the entry on the process's own tracing output, anonymized details only
fn mirror(entry: &LogEntry) {
    let details = entry
        .anonymized_details
        .as_ref()
        .map(Value::to_string)
        .unwrap_or_default();
    let calculator = entry.calculator_context.as_deref().unwrap_or("-");

    match entry.level {
        LogLevel::Error => tracing::error!(category = %entry.category, calculator, details = %details, "{}", entry.message),
        LogLevel::Warn => tracing::warn!(category = %entry.category, calculator, details = %details, "{}", entry.message),
        LogLevel::Info => tracing::info!(category = %entry.category, calculator, details = %details, "{}", entry.message),
        LogLevel::Debug => tracing::debug!(category = %entry.category, calculator, details = %details, "{}", entry.message),
        LogLevel::Audit => tracing::info!(audit = true, category = %entry.category, calculator, details = %details, "{}", entry.message),
    }
}

/// Handle to the session's log pipeline; cheap to clone
#[derive(Clone)]
pub struct LogPipeline {
    inner: Arc<PipelineInner>,
}

impl LogPipeline {
    pub fn new(
        settings: PipelineSettings,
        anonymizer: Anonymizer,
        bus: EventBus,
        connectivity: ConnectivityMonitor,
        store: Option<Arc<dyn LocalStore>>,
        sink: Option<Arc<dyn RemoteSink>>,
    ) -> Self {
        let (trigger_tx, trigger_rx) = mpsc::unbounded_channel();

        Self {
            inner: Arc::new(PipelineInner {
                settings,
                anonymizer,
                session_id: Uuid::new_v4().to_string(),
                correlation_id: Mutex::new(Uuid::new_v4().to_string()),
                state: Mutex::new(PipelineState::default()),
                flush_lock: tokio::sync::Mutex::new(()),
                store,
                sink,
                bus,
                connectivity,
                trigger_tx,
                trigger_rx: Mutex::new(Some(trigger_rx)),
                started: AtomicBool::new(false),
                stop: Arc::new(Notify::new()),
                worker: Mutex::new(None),
            }),
        }
    }

    /// Build a pipeline from configuration
    pub fn from_config(
        config: &GuardConfig,
        bus: EventBus,
        connectivity: ConnectivityMonitor,
        store: Option<Arc<dyn LocalStore>>,
        sink: Option<Arc<dyn RemoteSink>>,
    ) -> Self {
        Self::new(
            PipelineSettings::from(config),
            config.anonymizer(),
            bus,
            connectivity,
            store,
            sink,
        )
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn correlation_id(&self) -> String {
        self.inner.correlation_id()
    }

    /// Start a new correlation group; returns its id
    pub fn new_correlation_id(&self) -> String {
        let id = Uuid::new_v4().to_string();
        self.set_correlation_id(id.clone());
        id
    }

    pub fn set_correlation_id(&self, id: impl Into<String>) {
        *self
            .inner
            .correlation_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = id.into();
    }

    /// Record one entry
    pub fn record(
        &self,
        level: LogLevel,
        message: impl Into<String>,
        category: &str,
        details: Option<Value>,
        context: Option<&str>,
    ) -> LogEntry {
        self.inner.record_entry(
            level,
            message.into(),
            category,
            details,
            context.map(str::to_string),
            true,
        )
    }

    pub fn error(&self, message: impl Into<String>, details: Option<Value>) -> LogEntry {
        self.record(LogLevel::Error, message, category::ERROR, details, None)
    }

    pub fn warn(&self, message: impl Into<String>, details: Option<Value>) -> LogEntry {
        self.record(LogLevel::Warn, message, category::GENERAL, details, None)
    }

    pub fn info(&self, message: impl Into<String>, details: Option<Value>) -> LogEntry {
        self.record(LogLevel::Info, message, category::GENERAL, details, None)
    }

    pub fn debug(&self, message: impl Into<String>, details: Option<Value>) -> LogEntry {
        self.record(LogLevel::Debug, message, category::GENERAL, details, None)
    }

    pub fn audit(&self, message: impl Into<String>, details: Option<Value>, context: Option<&str>) -> LogEntry {
        self.record(LogLevel::Audit, message, category::AUDIT_TRAIL, details, context)
    }

    /// A score was computed
    pub fn log_calculation(&self, calculator: &str, inputs: Value, result: Value) -> LogEntry {
        self.record(
            LogLevel::Info,
            format!("{} calculated", calculator),
            category::CALCULATION,
            Some(json!({ "inputs": inputs, "result": result })),
            Some(calculator),
        )
    }

    pub fn log_user_action(&self, action: &str, details: Option<Value>, context: Option<&str>) -> LogEntry {
        self.record(LogLevel::Info, action, category::USER_ACTION, details, context)
    }

    pub fn log_audit_trail(&self, action: &str, details: Option<Value>, context: Option<&str>) -> LogEntry {
        self.record(LogLevel::Audit, action, category::AUDIT_TRAIL, details, context)
    }

    /// In-memory entries, oldest first
    pub fn entries(&self) -> Vec<LogEntry> {
        self.inner.state().entries.iter().cloned().collect()
    }

    /// Entries awaiting remote delivery, in submission order
    pub fn pending(&self) -> Vec<LogEntry> {
        self.inner.state().pending.iter().cloned().collect()
    }

    /// In-memory entries as pretty JSON (anonymized details only)
    pub fn export_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.entries())
    }

    /// Drop in-memory and pending entries and the rolling key
    pub fn clear(&self) {
        {
            let mut state = self.inner.state();
            state.entries.clear();
            state.pending.clear();
        }

        if let Some(store) = &self.inner.store {
            if let Err(e) = store.remove(ROLLING_LOG_KEY) {
                tracing::warn!(error = %format!("{:#}", e), "Failed to clear persisted log entries");
            }
        }
    }

    /// Reload entries persisted by an earlier session.
    ///
    /// Restored entries go in front of anything recorded since startup. With
    /// `requeue`, they are also queued for remote delivery.
    pub fn restore_persisted(&self, requeue: bool) -> anyhow::Result<usize> {
        let Some(store) = &self.inner.store else {
            return Ok(0);
        };
        let restored = load_rolling_entries(store.as_ref())?;
        let count = restored.len();

        let mut state = self.inner.state();
        let requeue = requeue && self.inner.remote_enabled();
        for entry in restored.into_iter().rev() {
            if requeue {
                state.pending.push_front(entry.clone());
            }
            state.entries.push_front(entry);
        }
        while state.entries.len() > self.inner.settings.max_local_entries {
            state.entries.pop_front();
        }

        tracing::info!(count, requeue, "Restored persisted log entries");
        Ok(count)
    }

    /// Send every pending entry to the remote sink.
    ///
    /// A failed batch goes back to the front of the queue in its original
    /// order and a `log-delivery` warning is recorded without triggering
    /// another immediate flush.
    pub async fn flush(&self) -> FlushOutcome {
        let Some(sink) = self.inner.sink.as_ref().filter(|_| self.inner.settings.enable_remote_logging) else {
            return FlushOutcome::Disabled;
        };

        let _in_flight = self.inner.flush_lock.lock().await;

        if self.inner.state().pending.is_empty() {
            return FlushOutcome::Empty;
        }
        if !self.inner.connectivity.is_online() {
            tracing::debug!("Offline, flush skipped");
            return FlushOutcome::Offline;
        }

        let logs: Vec<LogEntry> = self.inner.state().pending.drain(..).collect();
        let count = logs.len();
        let batch = LogBatch::new(logs, self.inner.session_id.clone());

        match sink.send(&batch).await {
            Ok(()) => {
                tracing::debug!(entries = count, "Log batch flushed");
                FlushOutcome::Sent(count)
            }
            Err(e) => {
                {
                    let mut state = self.inner.state();
                    for entry in batch.logs.into_iter().rev() {
                        state.pending.push_front(entry);
                    }
                }

                self.inner.record_entry(
                    LogLevel::Warn,
                    "Log delivery failed".to_string(),
                    category::LOG_DELIVERY,
                    Some(json!({ "error": e.to_string(), "entries": count })),
                    None,
                    false,
                );
                FlushOutcome::Failed(count)
            }
        }
    }

    /// Spawn the flush worker and subscribe to bus events.
    ///
    /// Returns false if already started or no async runtime is available.
    pub fn start(&self) -> bool {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                tracing::warn!("No async runtime, log pipeline worker not started");
                return false;
            }
        };
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return false;
        }

        self.subscribe_bus();

        let receiver = self
            .inner
            .trigger_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(receiver) = receiver {
            let worker = runtime.spawn(flush_worker(
                Arc::downgrade(&self.inner),
                receiver,
                Arc::clone(&self.inner.stop),
                self.inner.settings.flush_interval,
            ));
            *self.inner.worker.lock().unwrap_or_else(PoisonError::into_inner) = Some(worker);
        }

        tracing::debug!(session = %self.inner.session_id, "Log pipeline started");
        true
    }

    fn subscribe_bus(&self) {
        let bus = &self.inner.bus;

        let weak = Arc::downgrade(&self.inner);
        let _ = bus.subscribe(EventName::ConnectivityOnline, Some(PIPELINE_OWNER), move |_| {
            if let Some(inner) = weak.upgrade() {
                let _ = inner.trigger_tx.send(FlushTrigger::Reconnected);
            }
            Ok(())
        });

        let weak = Arc::downgrade(&self.inner);
        let _ = bus.subscribe(EventName::FailureReported, Some(PIPELINE_OWNER), move |event| {
            let (Some(inner), BusEvent::FailureReported(record)) = (weak.upgrade(), event) else {
                return Ok(());
            };
            inner.record_entry(
                LogLevel::Error,
                record.to_string(),
                category::ERROR,
                Some(serde_json::to_value(record)?),
                record.calculator_context.clone(),
                true,
            );
            Ok(())
        });

        let weak = Arc::downgrade(&self.inner);
        let _ = bus.subscribe(EventName::RecoveryRequested, Some(PIPELINE_OWNER), move |event| {
            let (Some(inner), BusEvent::RecoveryRequested(notice)) = (weak.upgrade(), event) else {
                return Ok(());
            };
            let level = match notice.stage {
                RecoveryStage::GaveUp | RecoveryStage::Exhausted => LogLevel::Warn,
                _ => LogLevel::Info,
            };
            inner.record_entry(
                level,
                format!("Recovery {:?} for {}", notice.stage, notice.key),
                category::RECOVERY,
                Some(serde_json::to_value(notice)?),
                None,
                true,
            );
            Ok(())
        });
    }

    /// Stop the worker, drop bus subscriptions and attempt a final flush
    pub async fn shutdown(&self) -> FlushOutcome {
        self.inner.bus.release_owner(PIPELINE_OWNER);

        let worker = self
            .inner
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            self.inner.stop.notify_one();
            if let Err(e) = worker.await {
                tracing::warn!(error = %e, "Log pipeline worker ended abnormally");
            }
        }

        let outcome = self.flush().await;
        tracing::debug!(?outcome, "Log pipeline shut down");
        outcome
    }
}

/// Background flush loop: batch-full and reconnect triggers plus a recurring timer
async fn flush_worker(
    inner: Weak<PipelineInner>,
    mut triggers: mpsc::UnboundedReceiver<FlushTrigger>,
    stop: Arc<Notify>,
    period: Duration,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let reason = tokio::select! {
            trigger = triggers.recv() => match trigger {
                Some(FlushTrigger::BatchFull) => "batch-full",
                Some(FlushTrigger::Reconnected) => "reconnected",
                None => break,
            },
            _ = ticker.tick() => "interval",
            _ = stop.notified() => break,
        };

        let Some(inner) = inner.upgrade() else {
            break;
        };
        let outcome = LogPipeline { inner }.flush().await;
        tracing::trace!(reason, ?outcome, "Flush attempt");
    }

    tracing::debug!("Log pipeline worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::InProcessTransport;
    use crate::logging::anonymize::MaskingRule;
    use crate::logging::sink::SinkError;
    use crate::logging::storage::SqliteStore;
    use futures::future::BoxFuture;
    use futures::FutureExt;

    #[derive(Default)]
    struct CountingSink {
        batches: Mutex<Vec<LogBatch>>,
    }

    impl RemoteSink for CountingSink {
        fn send<'a>(&'a self, batch: &'a LogBatch) -> BoxFuture<'a, Result<(), SinkError>> {
            self.batches.lock().unwrap().push(batch.clone());
            async { Ok(()) }.boxed()
        }
    }

    fn settings() -> PipelineSettings {
        PipelineSettings {
            max_local_entries: 5,
            persisted_entries: 3,
            batch_size: 10,
            flush_interval: Duration::from_secs(30),
            enable_local_storage: true,
            enable_remote_logging: true,
        }
    }

    fn pipeline(
        settings: PipelineSettings,
        store: Option<Arc<dyn LocalStore>>,
        sink: Option<Arc<dyn RemoteSink>>,
    ) -> LogPipeline {
        let bus = EventBus::new(Arc::new(InProcessTransport::new()));
        let connectivity = ConnectivityMonitor::new(bus.clone(), true);
        LogPipeline::new(settings, Anonymizer::default(), bus, connectivity, store, sink)
    }

    #[test]
    fn test_entries_drop_oldest() {
        let pipeline = pipeline(settings(), None, None);
        for i in 0..8 {
            pipeline.info(format!("entry {}", i), None);
        }

        let messages: Vec<_> = pipeline.entries().into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["entry 3", "entry 4", "entry 5", "entry 6", "entry 7"]);
    }

    #[test]
    fn test_pending_only_when_remote_enabled() {
        let sink: Arc<dyn RemoteSink> = Arc::new(CountingSink::default());

        let remote = pipeline(settings(), None, Some(Arc::clone(&sink)));
        remote.info("queued", None);
        assert_eq!(remote.pending().len(), 1);

        let mut local_only = settings();
        local_only.enable_remote_logging = false;
        let local = pipeline(local_only, None, Some(sink));
        local.info("not queued", None);
        assert!(local.pending().is_empty());
    }

    #[test]
    fn test_details_keep_raw_and_masked_separately() {
        let bus = EventBus::new(Arc::new(InProcessTransport::new()));
        let connectivity = ConnectivityMonitor::new(bus.clone(), true);
        let pipeline = LogPipeline::new(
            settings(),
            Anonymizer::default().with_default_rule(MaskingRule::keep_last(2)),
            bus,
            connectivity,
            None,
            None,
        );

        let entry = pipeline.info("Patient registered", Some(json!({"name": "John Doe", "age": 30})));
        assert_eq!(entry.raw_details, Some(json!({"name": "John Doe", "age": 30})));
        assert_eq!(entry.anonymized_details, Some(json!({"name": "**oe", "age": 30})));
        assert!(!pipeline.export_json().unwrap().contains("John Doe"));
    }

    #[test]
    fn test_rolling_key_holds_most_recent_entries() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let pipeline = pipeline(settings(), Some(store.clone()), None);

        for i in 0..4 {
            pipeline.info(format!("entry {}", i), None);
        }

        let json = store.get(ROLLING_LOG_KEY).unwrap().unwrap();
        let persisted: Vec<LogEntry> = serde_json::from_str(&json).unwrap();
        let messages: Vec<_> = persisted.into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["entry 1", "entry 2", "entry 3"]);
    }

    #[test]
    fn test_audit_entries_persisted_individually() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let pipeline = pipeline(settings(), Some(store.clone()), None);

        let entry = pipeline.log_audit_trail("score-submitted", Some(json!({"score": 3})), Some("curb-65"));

        let key = audit_key(&entry);
        let stored: LogEntry = serde_json::from_str(&store.get(&key).unwrap().unwrap()).unwrap();
        assert_eq!(stored.id, entry.id);
        assert_eq!(stored.level, LogLevel::Audit);
    }

    #[test]
    fn test_correlation_id_replaceable_session_fixed() {
        let pipeline = pipeline(settings(), None, None);
        let session = pipeline.session_id().to_string();

        let first = pipeline.info("a", None);
        let new_id = pipeline.new_correlation_id();
        let second = pipeline.info("b", None);

        assert_ne!(first.correlation_id, second.correlation_id);
        assert_eq!(second.correlation_id, new_id);
        assert_eq!(first.session_id, session);
        assert_eq!(second.session_id, session);
    }

    #[test]
    fn test_restore_persisted() {
        let store: Arc<dyn LocalStore> = Arc::new(SqliteStore::in_memory().unwrap());
        let sink: Arc<dyn RemoteSink> = Arc::new(CountingSink::default());

        let before = pipeline(settings(), Some(Arc::clone(&store)), Some(Arc::clone(&sink)));
        before.info("from last session", None);

        let after = pipeline(settings(), Some(store), Some(sink));
        assert_eq!(after.restore_persisted(true).unwrap(), 1);
        after.info("new session", None);

        let messages: Vec<_> = after.pending().into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["from last session", "new session"]);
    }

    #[tokio::test]
    async fn test_flush_empty_and_disabled() {
        let sink = Arc::new(CountingSink::default());
        let remote = pipeline(settings(), None, Some(sink.clone()));
        assert_eq!(remote.flush().await, FlushOutcome::Empty);
        assert_eq!(remote.flush().await, FlushOutcome::Empty);
        assert!(sink.batches.lock().unwrap().is_empty());

        let no_sink = pipeline(settings(), None, None);
        no_sink.info("x", None);
        assert_eq!(no_sink.flush().await, FlushOutcome::Disabled);
    }

    #[tokio::test]
    async fn test_flush_sends_in_order_and_clears() {
        let sink = Arc::new(CountingSink::default());
        let pipeline = pipeline(settings(), None, Some(sink.clone()));

        pipeline.info("first", None);
        pipeline.info("second", None);
        assert_eq!(pipeline.flush().await, FlushOutcome::Sent(2));
        assert!(pipeline.pending().is_empty());

        let batches = sink.batches.lock().unwrap();
        let messages: Vec<_> = batches[0].logs.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["first", "second"]);
        assert_eq!(batches[0].session_id, pipeline.session_id());
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_flush() {
        let sink = Arc::new(CountingSink::default());
        let pipeline = pipeline(settings(), None, Some(sink.clone()));
        assert!(pipeline.start());
        assert!(!pipeline.start());

        pipeline.info("waiting for timer", None);
        tokio::time::sleep(Duration::from_secs(29)).await;
        assert!(sink.batches.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(sink.batches.lock().unwrap().len(), 1);

        pipeline.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_performs_final_flush() {
        let sink = Arc::new(CountingSink::default());
        let pipeline = pipeline(settings(), None, Some(sink.clone()));
        pipeline.start();

        pipeline.info("last words", None);
        assert_eq!(pipeline.shutdown().await, FlushOutcome::Sent(1));
    }
}
