//! Process-wide wiring of the resilience components.
//!
//! A [`GuardRuntime`] is constructed once per process. It owns the event bus,
//! connectivity monitor, recovery coordinator, error boundary and log
//! pipeline, all sharing the same bus. Parts can be injected for tests.

use crate::config::GuardConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::error::{ErrorBoundary, RecoveryCoordinator};
use crate::events::{EventBus, InProcessTransport, Transport};
use crate::logging::{FlushOutcome, HttpSink, LocalStore, LogPipeline, RemoteSink, SqliteStore};
use crate::{GuardError, GuardResult};
use anyhow::Context;
use std::sync::Arc;

pub struct GuardRuntime {
    config: GuardConfig,
    bus: EventBus,
    connectivity: ConnectivityMonitor,
    boundary: Arc<ErrorBoundary>,
    pipeline: LogPipeline,
}

impl GuardRuntime {
    /// Build every component from configuration, with the SQLite store and
    /// HTTP sink the configuration asks for
    pub fn new(config: GuardConfig) -> GuardResult<Self> {
        config.validate()?;

        let store: Option<Arc<dyn LocalStore>> = if config.enable_local_storage {
            let store = SqliteStore::new(config.storage_path.as_deref())
                .context("Failed to open local log storage")?;
            Some(Arc::new(store))
        } else {
            None
        };

        let sink: Option<Arc<dyn RemoteSink>> = match (&config.remote_endpoint, config.enable_remote_logging) {
            (Some(endpoint), true) => {
                let sink = HttpSink::new(endpoint.clone())
                    .map_err(|e| GuardError::Config(format!("Failed to create remote log sink: {}", e)))?;
                Some(Arc::new(sink))
            }
            _ => None,
        };

        Self::with_parts(config, Arc::new(InProcessTransport::new()), store, sink)
    }

    /// Build with an injected transport, store and sink
    pub fn with_parts(
        config: GuardConfig,
        transport: Arc<dyn Transport>,
        store: Option<Arc<dyn LocalStore>>,
        sink: Option<Arc<dyn RemoteSink>>,
    ) -> GuardResult<Self> {
        config.validate()?;

        let bus = EventBus::new(transport);
        let connectivity = ConnectivityMonitor::new(bus.clone(), true);
        let coordinator = config.coordinator(bus.clone(), connectivity.clone());
        let boundary = Arc::new(config.boundary(coordinator, bus.clone()));
        let pipeline = LogPipeline::from_config(&config, bus.clone(), connectivity.clone(), store, sink);

        Ok(Self {
            config,
            bus,
            connectivity,
            boundary,
            pipeline,
        })
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    pub fn boundary(&self) -> &Arc<ErrorBoundary> {
        &self.boundary
    }

    pub fn coordinator(&self) -> &RecoveryCoordinator {
        self.boundary.coordinator()
    }

    pub fn pipeline(&self) -> &LogPipeline {
        &self.pipeline
    }

    /// Start the pipeline's flush worker and bus subscriptions
    pub fn start(&self) -> bool {
        self.pipeline.start()
    }

    /// Cancel pending retries, release every subscription and flush what is left
    pub async fn shutdown(&self) -> FlushOutcome {
        let released = self.coordinator().release_all();
        let outcome = self.pipeline.shutdown().await;
        self.bus.release_all();

        tracing::info!(retries_cancelled = released, ?outcome, "Runtime shut down");
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Failure;
    use crate::events::EventName;
    use crate::logging::category;

    fn runtime() -> GuardRuntime {
        let store: Arc<dyn LocalStore> = Arc::new(SqliteStore::in_memory().unwrap());
        GuardRuntime::with_parts(
            GuardConfig::default(),
            Arc::new(InProcessTransport::new()),
            Some(store),
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = GuardConfig {
            batch_size: 0,
            ..GuardConfig::default()
        };
        assert!(GuardRuntime::with_parts(config, Arc::new(InProcessTransport::new()), None, None).is_err());
    }

    #[tokio::test]
    async fn test_reported_failure_reaches_log_pipeline() {
        let runtime = runtime();
        assert!(runtime.start());

        runtime.boundary().report(
            Failure::calculation("apgar", "Score out of range")
                .in_component("apgar-form")
                .for_calculator("apgar"),
        );

        let errors: Vec<_> = runtime
            .pipeline()
            .entries()
            .into_iter()
            .filter(|e| e.category == category::ERROR)
            .collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].calculator_context.as_deref(), Some("apgar"));

        runtime.shutdown().await;
        for name in EventName::ALL {
            assert_eq!(runtime.bus().transport_listener_count(name), 0);
        }
    }
}
