//! Remote delivery of log batches.

use super::entry::LogBatch;
use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;

/// Request timeout for one flush
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Remote sink rejected batch with status {0}")]
    Status(u16),

    #[error("Failed to build client: {0}")]
    Client(String),
}

/// Destination for flushed batches; success means the batch can be discarded
pub trait RemoteSink: Send + Sync {
    fn send<'a>(&'a self, batch: &'a LogBatch) -> BoxFuture<'a, Result<(), SinkError>>;
}

/// POSTs batches as JSON; any 2xx status is success
pub struct HttpSink {
    http: Client,
    endpoint: String,
}

impl HttpSink {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, SinkError> {
        Self::with_timeout(endpoint, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, SinkError> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("medscore-guard/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SinkError::Client(e.to_string()))?;

        Ok(Self {
            http,
            endpoint: endpoint.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn post(&self, batch: &LogBatch) -> Result<(), SinkError> {
        let response = self
            .http
            .post(&self.endpoint)
            .json(batch)
            .send()
            .await
            .map_err(|e| SinkError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SinkError::Status(status.as_u16()));
        }

        tracing::debug!(endpoint = %self.endpoint, entries = batch.len(), "Batch delivered");
        Ok(())
    }
}

impl RemoteSink for HttpSink {
    fn send<'a>(&'a self, batch: &'a LogBatch) -> BoxFuture<'a, Result<(), SinkError>> {
        self.post(batch).boxed()
    }
}
