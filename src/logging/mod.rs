//! Anonymizing audit/log pipeline
//!
//! - `entry`: log records and the remote batch format
//! - `anonymize`: masking rules and the recursive detail masker
//! - `storage`: local key/value persistence
//! - `sink`: remote batch delivery
//! - `pipeline`: record, batch, persist and flush

pub mod anonymize;
pub mod entry;
pub mod pipeline;
pub mod sink;
pub mod storage;

pub use anonymize::{Anonymizer, MaskingRule, DEFAULT_SENSITIVE_FIELDS};
pub use entry::{category, LogBatch, LogEntry, LogLevel};
pub use pipeline::{FlushOutcome, LogPipeline, PipelineSettings, PIPELINE_OWNER};
pub use sink::{HttpSink, RemoteSink, SinkError};
pub use storage::{audit_key, load_audit_entries, load_rolling_entries, LocalStore, SqliteStore, ROLLING_LOG_KEY};
