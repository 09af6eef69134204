// Allow complex types where needed for callback registries and boxed futures
#![allow(clippy::type_complexity)]

pub mod config;
pub mod connectivity;
pub mod error;
pub mod events;
pub mod logging;
pub mod runtime;
pub mod telemetry;

// Re-export the main entry points for convenience
pub use config::GuardConfig;
pub use connectivity::ConnectivityMonitor;
pub use error::{ErrorBoundary, ErrorKind, Failure, FailureRecord, RecoveryCoordinator, RecoveryDecision};
pub use events::{BusEvent, EventBus, EventName};
pub use logging::{LogLevel, LogPipeline};
pub use runtime::GuardRuntime;

use thiserror::Error;

/// Errors surfaced by the crate's own APIs
///
/// Failures of the monitored application are not errors here: they are
/// [`Failure`] values handed to the error boundary.
#[derive(Error, Debug)]
pub enum GuardError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Configuration source error: {0}")]
    ConfigSource(#[from] ::config::ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown event name: {0}")]
    UnknownEvent(String),

    #[error("Event {0} requires a payload")]
    MissingPayload(String),

    #[error("Storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}

pub type GuardResult<T> = Result<T, GuardError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            GuardError::UnknownEvent("page-unload".into()).to_string(),
            "Unknown event name: page-unload"
        );
        assert_eq!(
            GuardError::Config("batch_size must be at least 1".into()).to_string(),
            "Invalid configuration: batch_size must be at least 1"
        );
    }

    #[test]
    fn test_storage_error_keeps_context_chain() {
        let err: GuardError = anyhow::anyhow!("disk full").context("Failed to store key").into();
        assert_eq!(err.to_string(), "Storage error: Failed to store key: disk full");
    }
}
