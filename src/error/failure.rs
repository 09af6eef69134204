/// Raised failures and their immutable classified records
///
/// A [`Failure`] is what a call site hands to the error boundary: a message
/// plus whatever context it has (component, action, machine-readable code,
/// stack trace, calculator). Domain-specific failures carry an explicit
/// [`DomainFailure`] tag that the classifier trusts over any heuristic.
use super::classification::{Classification, ErrorKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Default number of failure records kept in memory
pub const DEFAULT_MAX_FAILURE_RECORDS: usize = 100;

/// Domain-specific failure tag with per-kind data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DomainFailure {
    Network {
        status: Option<u16>,
        endpoint: Option<String>,
    },
    Validation {
        field: Option<String>,
    },
    Calculation {
        formula: Option<String>,
    },
    Ui {
        element: Option<String>,
    },
    Security {
        reason: Option<String>,
    },
    Data {
        source: Option<String>,
    },
}

impl DomainFailure {
    /// Kind implied by this tag
    pub fn kind(&self) -> ErrorKind {
        match self {
            DomainFailure::Network { .. } => ErrorKind::Network,
            DomainFailure::Validation { .. } => ErrorKind::Validation,
            DomainFailure::Calculation { .. } => ErrorKind::Calculation,
            DomainFailure::Ui { .. } => ErrorKind::Ui,
            DomainFailure::Security { .. } => ErrorKind::Security,
            DomainFailure::Data { .. } => ErrorKind::Data,
        }
    }
}

/// A failure raised by a call site, before classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    /// Human-readable message
    pub message: String,

    /// Machine-readable code (e.g. "ENOTFOUND", "VALIDATION_ERROR")
    pub code: Option<String>,

    /// Stack trace or backtrace text, if captured
    pub stack_trace: Option<String>,

    /// Component that raised the failure (e.g. "bmi-form")
    pub component: Option<String>,

    /// Action in progress (e.g. "submit", "load-history")
    pub action: Option<String>,

    /// Calculator the failure belongs to (e.g. "curb-65")
    pub calculator_context: Option<String>,

    /// Explicit domain tag
    pub domain: Option<DomainFailure>,
}

impl Failure {
    /// Create a new untagged failure
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            stack_trace: None,
            component: None,
            action: None,
            calculator_context: None,
            domain: None,
        }
    }

    /// Network failure, optionally with an HTTP status
    pub fn network(message: impl Into<String>, status: Option<u16>) -> Self {
        Self::new(message).with_domain(DomainFailure::Network {
            status,
            endpoint: None,
        })
    }

    /// Validation failure for a form field
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(message).with_domain(DomainFailure::Validation {
            field: Some(field.into()),
        })
    }

    /// Calculation failure for a scoring formula
    pub fn calculation(formula: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(message).with_domain(DomainFailure::Calculation {
            formula: Some(formula.into()),
        })
    }

    /// Security failure
    pub fn security(message: impl Into<String>) -> Self {
        Self::new(message).with_domain(DomainFailure::Security { reason: None })
    }

    /// Data failure from the named source
    pub fn data(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(message).with_domain(DomainFailure::Data {
            source: Some(source.into()),
        })
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_stack_trace(mut self, stack_trace: impl Into<String>) -> Self {
        self.stack_trace = Some(stack_trace.into());
        self
    }

    pub fn with_domain(mut self, domain: DomainFailure) -> Self {
        self.domain = Some(domain);
        self
    }

    /// Set the originating component
    pub fn in_component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }

    /// Set the action that was in progress
    pub fn during(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    /// Attach the calculator this failure belongs to
    pub fn for_calculator(mut self, calculator: impl Into<String>) -> Self {
        self.calculator_context = Some(calculator.into());
        self
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.component, &self.code) {
            (Some(component), Some(code)) => write!(f, "[{}] {} ({})", component, self.message, code),
            (Some(component), None) => write!(f, "[{}] {}", component, self.message),
            (None, Some(code)) => write!(f, "{} ({})", self.message, code),
            (None, None) => write!(f, "{}", self.message),
        }
    }
}

impl From<&std::io::Error> for Failure {
    fn from(err: &std::io::Error) -> Self {
        use std::io::ErrorKind as Io;

        let code = match err.kind() {
            Io::ConnectionRefused => Some("ECONNREFUSED"),
            Io::ConnectionReset => Some("ECONNRESET"),
            Io::ConnectionAborted => Some("ECONNABORTED"),
            Io::TimedOut => Some("ETIMEDOUT"),
            Io::NotFound => Some("ENOENT"),
            Io::PermissionDenied => Some("EACCES"),
            Io::InvalidData => Some("PARSE_ERROR"),
            Io::InvalidInput => Some("INVALID_INPUT"),
            _ => None,
        };

        let failure = Failure::new(err.to_string());
        match code {
            Some(code) => failure.with_code(code),
            None => failure,
        }
    }
}

impl From<std::io::Error> for Failure {
    fn from(err: std::io::Error) -> Self {
        Failure::from(&err)
    }
}

impl From<serde_json::Error> for Failure {
    fn from(err: serde_json::Error) -> Self {
        Failure::data("json", err.to_string())
    }
}

/// Immutable record of a classified failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureRecord {
    pub originating_component: Option<String>,
    pub action: Option<String>,
    pub message: String,
    pub code: Option<String>,
    pub stack_trace: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub calculator_context: Option<String>,
    pub kind: ErrorKind,
    pub recoverable: bool,
}

impl FailureRecord {
    /// Freeze a failure together with its classification
    pub fn new(failure: &Failure, classification: Classification) -> Self {
        Self {
            originating_component: failure.component.clone(),
            action: failure.action.clone(),
            message: failure.message.clone(),
            code: failure.code.clone(),
            stack_trace: failure.stack_trace.clone(),
            occurred_at: Utc::now(),
            calculator_context: failure.calculator_context.clone(),
            kind: classification.kind,
            recoverable: classification.recoverable,
        }
    }
}

impl fmt::Display for FailureRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} error in {}: {}",
            self.kind,
            self.originating_component.as_deref().unwrap_or("global"),
            self.message
        )
    }
}

/// Ordered, capped list of failure records (oldest dropped first)
#[derive(Debug, Clone)]
pub struct FailureHistory {
    records: VecDeque<FailureRecord>,
    max_records: usize,
}

impl FailureHistory {
    pub fn new(max_records: usize) -> Self {
        Self {
            records: VecDeque::new(),
            max_records: max_records.max(1),
        }
    }

    /// Append a record, dropping the oldest ones beyond capacity
    pub fn push(&mut self, record: FailureRecord) {
        self.records.push_back(record);
        while self.records.len() > self.max_records {
            self.records.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Copy of the records, oldest first
    pub fn snapshot(&self) -> Vec<FailureRecord> {
        self.records.iter().cloned().collect()
    }

    /// Records of a single kind, oldest first
    pub fn of_kind(&self, kind: ErrorKind) -> Vec<FailureRecord> {
        self.records
            .iter()
            .filter(|r| r.kind == kind)
            .cloned()
            .collect()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

impl Default for FailureHistory {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FAILURE_RECORDS)
    }
}
