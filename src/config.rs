//! Runtime configuration.
//!
//! Loaded from an optional TOML/JSON/YAML file, then overridden by
//! `MEDSCORE_GUARD__<OPTION>` environment variables
//! (e.g. `MEDSCORE_GUARD__BATCH_SIZE=25`). Every option has a default.

use crate::error::{ErrorBoundary, ErrorClassifier, ExponentialBackoff, RecoveryCoordinator};
use crate::events::EventBus;
use crate::connectivity::ConnectivityMonitor;
use crate::logging::anonymize::{Anonymizer, MaskingRule, DEFAULT_SENSITIVE_FIELDS};
use crate::{GuardError, GuardResult};
use ::config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "MEDSCORE_GUARD";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Publish `toast-requested` for reported failures
    pub show_toast: bool,

    /// Let the coordinator retry network failures automatically
    pub auto_retry: bool,

    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub max_retry_delay_ms: u64,

    /// Failure records kept in memory
    pub max_failure_records: usize,

    /// Log entries kept in memory
    pub max_local_entries: usize,

    /// Most recent entries written to the rolling storage key
    pub persisted_entries: usize,

    pub batch_size: usize,
    pub flush_interval_ms: u64,

    pub enable_local_storage: bool,
    pub enable_remote_logging: bool,
    pub anonymize_data: bool,

    /// Field-name terms treated as personal data
    pub sensitive_fields: Vec<String>,

    /// Per-field masking rules
    pub masking_rules: HashMap<String, MaskingRule>,

    /// Rule for sensitive fields without their own rule
    pub default_masking_rule: MaskingRule,

    pub remote_endpoint: Option<String>,

    /// Database file; platform data directory when unset
    pub storage_path: Option<PathBuf>,

    /// Toast lifetime for recoverable kinds
    pub recoverable_toast_ms: u64,

    /// Toast lifetime for everything else
    pub persistent_toast_ms: u64,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            show_toast: true,
            auto_retry: true,
            max_retries: 3,
            retry_base_delay_ms: 1000,
            max_retry_delay_ms: 30_000,
            max_failure_records: 100,
            max_local_entries: 1000,
            persisted_entries: 100,
            batch_size: 10,
            flush_interval_ms: 30_000,
            enable_local_storage: true,
            enable_remote_logging: false,
            anonymize_data: true,
            sensitive_fields: DEFAULT_SENSITIVE_FIELDS.iter().map(|s| s.to_string()).collect(),
            masking_rules: HashMap::new(),
            default_masking_rule: MaskingRule::full(),
            remote_endpoint: None,
            storage_path: None,
            recoverable_toast_ms: 5000,
            persistent_toast_ms: 10_000,
        }
    }
}

impl GuardConfig {
    /// Load configuration from an optional file plus environment overrides
    pub fn load(path: Option<&Path>) -> GuardResult<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("sensitive_fields"),
        );

        let config: GuardConfig = builder.build()?.try_deserialize()?;
        config.validate()?;

        tracing::debug!(
            file = ?path,
            remote = config.enable_remote_logging,
            local = config.enable_local_storage,
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Reject settings the pipeline or coordinator cannot work with
    pub fn validate(&self) -> GuardResult<()> {
        if self.batch_size == 0 {
            return Err(GuardError::Config("batch_size must be at least 1".into()));
        }
        if self.max_local_entries == 0 {
            return Err(GuardError::Config("max_local_entries must be at least 1".into()));
        }
        if self.max_failure_records == 0 {
            return Err(GuardError::Config("max_failure_records must be at least 1".into()));
        }
        if self.flush_interval_ms == 0 {
            return Err(GuardError::Config("flush_interval_ms must be positive".into()));
        }
        if self.retry_base_delay_ms == 0 {
            return Err(GuardError::Config("retry_base_delay_ms must be positive".into()));
        }
        if self.max_retry_delay_ms < self.retry_base_delay_ms {
            return Err(GuardError::Config(
                "max_retry_delay_ms must not be below retry_base_delay_ms".into(),
            ));
        }

        if self.enable_remote_logging {
            let endpoint = self.remote_endpoint.as_deref().ok_or_else(|| {
                GuardError::Config("enable_remote_logging requires remote_endpoint".into())
            })?;
            let url = reqwest::Url::parse(endpoint)
                .map_err(|e| GuardError::Config(format!("Invalid remote_endpoint {}: {}", endpoint, e)))?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(GuardError::Config(format!(
                    "remote_endpoint must be http(s), got {}",
                    url.scheme()
                )));
            }
        }

        Ok(())
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn retry_strategy(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(
            self.retry_base_delay(),
            Duration::from_millis(self.max_retry_delay_ms),
            self.max_retries,
        )
    }

    pub fn anonymizer(&self) -> Anonymizer {
        Anonymizer::new(&self.sensitive_fields)
            .with_rules(self.masking_rules.clone())
            .with_default_rule(self.default_masking_rule.clone())
            .with_enabled(self.anonymize_data)
    }

    pub fn coordinator(&self, bus: EventBus, connectivity: ConnectivityMonitor) -> RecoveryCoordinator {
        RecoveryCoordinator::new(self.retry_strategy(), bus, connectivity)
            .with_auto_retry(self.auto_retry)
    }

    pub fn boundary(&self, coordinator: RecoveryCoordinator, bus: EventBus) -> ErrorBoundary {
        ErrorBoundary::new(ErrorClassifier::new(), coordinator, bus)
            .with_history_capacity(self.max_failure_records)
            .with_toasts(
                self.show_toast,
                Duration::from_millis(self.recoverable_toast_ms),
                Duration::from_millis(self.persistent_toast_ms),
            )
    }
}
