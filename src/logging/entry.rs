/// Structured log records and the batch wire format
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Well-known entry categories
pub mod category {
    pub const CALCULATION: &str = "calculation";
    pub const USER_ACTION: &str = "user-action";
    pub const AUDIT_TRAIL: &str = "audit-trail";
    pub const ERROR: &str = "error";
    pub const RECOVERY: &str = "recovery";
    pub const LOG_DELIVERY: &str = "log-delivery";
    pub const GENERAL: &str = "general";
}

/// Severity of a log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    /// Compliance records; also persisted individually
    Audit,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Audit => "audit",
        }
    }

    pub fn parse(level: &str) -> Option<Self> {
        match level.trim().to_ascii_lowercase().as_str() {
            "error" => Some(LogLevel::Error),
            "warn" | "warning" => Some(LogLevel::Warn),
            "info" => Some(LogLevel::Info),
            "debug" => Some(LogLevel::Debug),
            "audit" => Some(LogLevel::Audit),
            _ => None,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One log record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub category: String,
    pub message: String,

    /// Original details; in-process only, never persisted or transmitted
    #[serde(skip)]
    pub raw_details: Option<Value>,

    /// Details after masking
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anonymized_details: Option<Value>,

    pub correlation_id: String,
    pub session_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calculator_context: Option<String>,
}

impl LogEntry {
    pub fn new(
        level: LogLevel,
        category: impl Into<String>,
        message: impl Into<String>,
        session_id: impl Into<String>,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            level,
            category: category.into(),
            message: message.into(),
            raw_details: None,
            anonymized_details: None,
            correlation_id: correlation_id.into(),
            session_id: session_id.into(),
            calculator_context: None,
        }
    }

    pub fn with_details(mut self, raw: Value, anonymized: Value) -> Self {
        self.raw_details = Some(raw);
        self.anonymized_details = Some(anonymized);
        self
    }

    pub fn with_context(mut self, calculator: Option<String>) -> Self {
        self.calculator_context = calculator;
        self
    }
}

/// Body of one remote flush: `{ logs, sessionId, timestamp }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogBatch {
    pub logs: Vec<LogEntry>,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
}

impl LogBatch {
    pub fn new(logs: Vec<LogEntry>, session_id: impl Into<String>) -> Self {
        Self {
            logs,
            session_id: session_id.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.logs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.logs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_raw_details_never_serialized() {
        let entry = LogEntry::new(LogLevel::Info, category::CALCULATION, "BMI calculated", "s", "c")
            .with_details(json!({"name": "John Doe"}), json!({"name": "**oe"}));

        let wire = serde_json::to_value(&entry).unwrap();
        assert_eq!(wire["anonymizedDetails"], json!({"name": "**oe"}));
        assert!(wire.get("rawDetails").is_none());
        assert!(!wire.to_string().contains("John Doe"));

        let back: LogEntry = serde_json::from_value(wire).unwrap();
        assert!(back.raw_details.is_none());
    }

    #[test]
    fn test_batch_wire_shape() {
        let batch = LogBatch::new(Vec::new(), "session-1");
        let wire = serde_json::to_value(&batch).unwrap();

        assert!(wire.get("logs").is_some());
        assert_eq!(wire["sessionId"], "session-1");
        assert!(wire.get("timestamp").is_some());
    }

    #[test]
    fn test_level_parse() {
        assert_eq!(LogLevel::parse("WARNING"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse("audit"), Some(LogLevel::Audit));
        assert_eq!(LogLevel::parse("trace"), None);
    }
}
