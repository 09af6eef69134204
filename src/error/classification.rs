/// Failure classification for recovery strategy selection
///
/// This module maps a raised [`Failure`] onto one of a fixed set of error kinds.
/// The kind decides whether the coordinator may retry automatically, how long
/// the user-facing notification stays up, and how the failure is logged.
///
/// Classification is total and deterministic: the same failure always yields
/// the same [`Classification`], and no input can make it panic.
use super::failure::Failure;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Closed taxonomy of failure kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// Connectivity or remote service failures (DNS, refused, timeout, offline)
    Network,

    /// Rejected user input (missing field, out of range, bad format)
    Validation,

    /// Score arithmetic produced no usable result (division by zero, NaN)
    Calculation,

    /// Rendering or component lifecycle failures
    Ui,

    /// Authorization, CSRF or content-policy violations
    Security,

    /// Parsing, serialization or local storage corruption
    Data,

    /// Nothing matched
    Unknown,
}

impl ErrorKind {
    /// Every kind, in classifier priority order
    pub const ALL: [ErrorKind; 7] = [
        ErrorKind::Network,
        ErrorKind::Validation,
        ErrorKind::Calculation,
        ErrorKind::Ui,
        ErrorKind::Security,
        ErrorKind::Data,
        ErrorKind::Unknown,
    ];

    /// Get human-readable description of the kind
    pub fn description(&self) -> &'static str {
        match self {
            ErrorKind::Network => "Network connection problem",
            ErrorKind::Validation => "Input needs correction",
            ErrorKind::Calculation => "Score could not be calculated",
            ErrorKind::Ui => "Display component failed",
            ErrorKind::Security => "Request was blocked for security reasons",
            ErrorKind::Data => "Stored or received data is unreadable",
            ErrorKind::Unknown => "Unexpected error",
        }
    }

    /// Whether failures of this kind may be retried without new user input.
    ///
    /// Only Network and Validation are recoverable; everything else needs
    /// manual intervention or a component reset.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ErrorKind::Network | ErrorKind::Validation)
    }

    /// Stable lowercase identifier used in retry keys and log details
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Network => "network",
            ErrorKind::Validation => "validation",
            ErrorKind::Calculation => "calculation",
            ErrorKind::Ui => "ui",
            ErrorKind::Security => "security",
            ErrorKind::Data => "data",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Network => write!(f, "Network"),
            ErrorKind::Validation => write!(f, "Validation"),
            ErrorKind::Calculation => write!(f, "Calculation"),
            ErrorKind::Ui => write!(f, "UI"),
            ErrorKind::Security => write!(f, "Security"),
            ErrorKind::Data => write!(f, "Data"),
            ErrorKind::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Result of classifying one failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub kind: ErrorKind,
    pub recoverable: bool,
}

impl From<ErrorKind> for Classification {
    fn from(kind: ErrorKind) -> Self {
        Self {
            kind,
            recoverable: kind.is_recoverable(),
        }
    }
}

lazy_static! {
    /// Machine-readable failure codes and the kind each one implies
    static ref DEFAULT_CODES: HashMap<&'static str, ErrorKind> = {
        let mut codes = HashMap::new();
        for code in [
            "ENOTFOUND", "ECONNREFUSED", "ECONNRESET", "ECONNABORTED", "ETIMEDOUT",
            "EAI_AGAIN", "EHOSTUNREACH", "ENETUNREACH", "NETWORK_ERROR", "TIMEOUT", "OFFLINE",
        ] {
            codes.insert(code, ErrorKind::Network);
        }
        for code in [
            "VALIDATION_ERROR", "INVALID_INPUT", "REQUIRED_FIELD", "OUT_OF_RANGE", "INVALID_FORMAT",
        ] {
            codes.insert(code, ErrorKind::Validation);
        }
        for code in [
            "CALCULATION_ERROR", "DIVISION_BY_ZERO", "NAN_RESULT", "SCORE_OVERFLOW",
        ] {
            codes.insert(code, ErrorKind::Calculation);
        }
        for code in ["RENDER_ERROR", "COMPONENT_ERROR", "MOUNT_ERROR"] {
            codes.insert(code, ErrorKind::Ui);
        }
        for code in [
            "UNAUTHORIZED", "FORBIDDEN", "EACCES", "EPERM", "CSRF_ERROR", "XSS_DETECTED",
            "CSP_VIOLATION",
        ] {
            codes.insert(code, ErrorKind::Security);
        }
        for code in [
            "PARSE_ERROR", "SERIALIZATION_ERROR", "DATA_CORRUPTED", "STORAGE_ERROR",
            "QUOTA_EXCEEDED", "ENOENT",
        ] {
            codes.insert(code, ErrorKind::Data);
        }
        codes
    };

    /// Ordered keyword heuristics, matched as case-insensitive substrings of the
    /// message and stack trace
    static ref DEFAULT_HEURISTICS: Vec<(ErrorKind, Regex)> = vec![
        (
            ErrorKind::Network,
            keyword_regex(&[
                "network", "fetch", "timeout", "timed out", "connection", "offline", "dns",
                "socket", "econn", "unreachable",
            ]),
        ),
        (
            ErrorKind::Validation,
            keyword_regex(&[
                "validation", "invalid", "required", "out of range", "must be", "bad format",
            ]),
        ),
        (
            ErrorKind::Calculation,
            keyword_regex(&[
                "calculat", "divi(?:de|sion) by zero", r"\bnan\b", "infinit", "overflow", "score",
            ]),
        ),
        (
            ErrorKind::Ui,
            keyword_regex(&[
                "render", "component", "element", "domexception", "dom node", "template", "layout",
            ]),
        ),
        (
            ErrorKind::Security,
            keyword_regex(&[
                "unauthori[sz]ed", "forbidden", "permission denied", "access denied", "csrf",
                "xss", "security", "authenticat",
            ]),
        ),
        (
            ErrorKind::Data,
            keyword_regex(&[
                "json", "parse", "unexpected token", "syntax", "corrupt", "storage", "quota",
                "serializ", "deserializ", "undefined",
            ]),
        ),
    ];
}

fn keyword_regex(keywords: &[&str]) -> Regex {
    let pattern = format!(r"(?i)(?:{})", keywords.join("|"));
    Regex::new(&pattern).expect("classifier keyword tables are valid regex")
}

/// Error classifier - determines the kind of a raised failure
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    /// Extra code mappings layered over the default table
    custom_codes: HashMap<String, ErrorKind>,
}

impl ErrorClassifier {
    /// Create a classifier with the default code table and heuristics
    pub fn new() -> Self {
        Self {
            custom_codes: HashMap::new(),
        }
    }

    /// Map an additional machine-readable code to a kind
    pub fn with_code(mut self, code: impl AsRef<str>, kind: ErrorKind) -> Self {
        self.custom_codes
            .insert(code.as_ref().to_ascii_uppercase(), kind);
        self
    }

    /// Classify a failure
    pub fn classify(&self, failure: &Failure) -> Classification {
        Classification::from(self.classify_kind(failure))
    }

    fn classify_kind(&self, failure: &Failure) -> ErrorKind {
        // Explicit domain tag wins
        if let Some(domain) = &failure.domain {
            return domain.kind();
        }

        if let Some(kind) = failure.code.as_deref().and_then(|c| self.kind_for_code(c)) {
            return kind;
        }

        let haystacks = [Some(failure.message.as_str()), failure.stack_trace.as_deref()];
        for (kind, pattern) in DEFAULT_HEURISTICS.iter() {
            if haystacks.iter().flatten().any(|text| pattern.is_match(text)) {
                return *kind;
            }
        }

        ErrorKind::Unknown
    }

    /// Look up a machine-readable code, ignoring case and surrounding whitespace
    pub fn kind_for_code(&self, code: &str) -> Option<ErrorKind> {
        let normalized = code.trim().to_ascii_uppercase();
        self.custom_codes
            .get(&normalized)
            .copied()
            .or_else(|| DEFAULT_CODES.get(normalized.as_str()).copied())
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}
