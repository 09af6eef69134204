//! Shared fixtures for the integration suites

#![allow(dead_code)]

use anyhow::{bail, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use medscore_guard::events::{BusEvent, EventBus, EventName, InProcessTransport, RecoveryStage};
use medscore_guard::logging::{LocalStore, LogBatch, RemoteSink, SinkError, SqliteStore};
use medscore_guard::{GuardConfig, GuardRuntime};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Sink that keeps every batch it accepts; can be switched to fail
#[derive(Default)]
pub struct RecordingSink {
    batches: Mutex<Vec<LogBatch>>,
    failing: AtomicBool,
    attempts: AtomicUsize,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Batches accepted so far
    pub fn batches(&self) -> Vec<LogBatch> {
        self.batches.lock().unwrap().clone()
    }

    /// Every send call, accepted or not
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn messages(&self) -> Vec<Vec<String>> {
        self.batches()
            .iter()
            .map(|b| b.logs.iter().map(|e| e.message.clone()).collect())
            .collect()
    }
}

impl RemoteSink for RecordingSink {
    fn send<'a>(&'a self, batch: &'a LogBatch) -> BoxFuture<'a, Result<(), SinkError>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let result = if self.failing.load(Ordering::SeqCst) {
            Err(SinkError::Status(503))
        } else {
            self.batches.lock().unwrap().push(batch.clone());
            Ok(())
        };
        async move { result }.boxed()
    }
}

/// Store whose every operation fails
pub struct FailingStore;

impl LocalStore for FailingStore {
    fn put(&self, key: &str, _value: &str) -> Result<()> {
        bail!("quota exceeded writing {}", key)
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        bail!("storage unavailable reading {}", key)
    }

    fn remove(&self, key: &str) -> Result<bool> {
        bail!("storage unavailable removing {}", key)
    }

    fn keys_with_prefix(&self, _prefix: &str) -> Result<Vec<String>> {
        bail!("storage unavailable")
    }
}

/// Config with remote logging on and a placeholder endpoint
pub fn remote_config() -> GuardConfig {
    GuardConfig {
        enable_remote_logging: true,
        remote_endpoint: Some("https://logs.example.org/api/logs".into()),
        ..GuardConfig::default()
    }
}

/// Runtime with an in-memory store and the given sink
pub fn runtime_with(config: GuardConfig, sink: Arc<RecordingSink>) -> (GuardRuntime, Arc<SqliteStore>) {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let runtime = GuardRuntime::with_parts(
        config,
        Arc::new(InProcessTransport::new()),
        Some(store.clone() as Arc<dyn LocalStore>),
        Some(sink as Arc<dyn RemoteSink>),
    )
    .unwrap();
    (runtime, store)
}

/// Collect every event published under `name`
pub fn record_events(bus: &EventBus, name: EventName) -> Arc<Mutex<Vec<BusEvent>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let _ = bus.subscribe(name, Some("test-recorder"), move |event| {
        sink.lock().unwrap().push(event.clone());
        Ok(())
    });
    seen
}

/// Stages of the recovery notices recorded so far
pub fn stages(events: &Mutex<Vec<BusEvent>>) -> Vec<RecoveryStage> {
    events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|event| match event {
            BusEvent::RecoveryRequested(notice) => Some(notice.stage),
            _ => None,
        })
        .collect()
}

/// Let spawned tasks run without advancing the clock
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}
