//! Irreversible masking of personally identifiable fields in log details.
//!
//! Any object key that contains a configured sensitive term (case-insensitive
//! substring match) has its value replaced according to its masking rule.
//! Nested objects and arrays are walked; everything else passes through.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Default replacement text for the masked portion of a value
pub const DEFAULT_REPLACEMENT: &str = "**";

/// Sensitive terms used when none are configured
pub const DEFAULT_SENSITIVE_FIELDS: &[&str] = &[
    "name",
    "email",
    "phone",
    "address",
    "ssn",
    "national_id",
    "nationalid",
    "password",
    "secret",
    "dob",
    "birth",
];

/// Custom masking function
pub type MaskFn = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// How a sensitive value is obscured
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MaskingRule {
    /// Leading characters left visible
    pub keep_first: Option<usize>,

    /// Trailing characters left visible
    pub keep_last: Option<usize>,

    /// Text substituted for the hidden part
    pub replacement: Option<String>,

    /// Replaces the built-in masking entirely
    #[serde(skip)]
    pub custom_mask: Option<MaskFn>,
}

impl fmt::Debug for MaskingRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MaskingRule")
            .field("keep_first", &self.keep_first)
            .field("keep_last", &self.keep_last)
            .field("replacement", &self.replacement)
            .field("custom_mask", &self.custom_mask.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

impl MaskingRule {
    /// Hide the whole value
    pub fn full() -> Self {
        Self::default()
    }

    pub fn keep_last(count: usize) -> Self {
        Self {
            keep_last: Some(count),
            ..Self::default()
        }
    }

    pub fn keep_first(count: usize) -> Self {
        Self {
            keep_first: Some(count),
            ..Self::default()
        }
    }

    pub fn with_replacement(mut self, replacement: impl Into<String>) -> Self {
        self.replacement = Some(replacement.into());
        self
    }

    pub fn with_custom_mask<F>(mut self, mask: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.custom_mask = Some(Arc::new(mask));
        self
    }

    pub fn replacement(&self) -> &str {
        self.replacement.as_deref().unwrap_or(DEFAULT_REPLACEMENT)
    }

    /// Mask one scalar value.
    ///
    /// When the visible prefix and suffix would cover the whole value, only the
    /// replacement is returned.
    pub fn apply(&self, value: &str) -> String {
        if let Some(mask) = &self.custom_mask {
            return mask(value);
        }

        let chars: Vec<char> = value.chars().collect();
        let first = self.keep_first.unwrap_or(0);
        let last = self.keep_last.unwrap_or(0);

        if first + last >= chars.len() {
            return self.replacement().to_string();
        }

        let mut masked = String::with_capacity(value.len());
        masked.extend(&chars[..first]);
        masked.push_str(self.replacement());
        masked.extend(&chars[chars.len() - last..]);
        masked
    }
}

/// Recursive detail masker
#[derive(Debug, Clone)]
pub struct Anonymizer {
    enabled: bool,

    /// Lowercased sensitive terms
    sensitive: Vec<String>,

    /// Rules keyed by lowercased field name or sensitive term
    rules: HashMap<String, MaskingRule>,

    default_rule: MaskingRule,
}

impl Anonymizer {
    pub fn new<I, S>(sensitive_fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            enabled: true,
            sensitive: sensitive_fields
                .into_iter()
                .map(|s| s.as_ref().trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
            rules: HashMap::new(),
            default_rule: MaskingRule::full(),
        }
    }

    pub fn with_rule(mut self, field: impl AsRef<str>, rule: MaskingRule) -> Self {
        self.rules.insert(field.as_ref().to_lowercase(), rule);
        self
    }

    pub fn with_rules(mut self, rules: HashMap<String, MaskingRule>) -> Self {
        for (field, rule) in rules {
            self.rules.insert(field.to_lowercase(), rule);
        }
        self
    }

    pub fn with_default_rule(mut self, rule: MaskingRule) -> Self {
        self.default_rule = rule;
        self
    }

    /// Disabled anonymizers return details unchanged
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Sensitive term a field name matches, if any
    pub fn matching_term(&self, field: &str) -> Option<&str> {
        let field = field.to_lowercase();
        self.sensitive
            .iter()
            .find(|term| field.contains(term.as_str()))
            .map(String::as_str)
    }

    pub fn is_sensitive(&self, field: &str) -> bool {
        self.matching_term(field).is_some()
    }

    fn rule_for(&self, field: &str, term: &str) -> &MaskingRule {
        self.rules
            .get(&field.to_lowercase())
            .or_else(|| self.rules.get(term))
            .unwrap_or(&self.default_rule)
    }

    /// Return a masked copy of `details`
    pub fn anonymize(&self, details: &Value) -> Value {
        if !self.enabled {
            return details.clone();
        }
        self.walk(details)
    }

    fn walk(&self, value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut masked = Map::with_capacity(map.len());
                for (field, inner) in map {
                    let replaced = match self.matching_term(field) {
                        Some(term) => mask_value(inner, self.rule_for(field, term)),
                        None => self.walk(inner),
                    };
                    masked.insert(field.clone(), replaced);
                }
                Value::Object(masked)
            }
            Value::Array(items) => Value::Array(items.iter().map(|v| self.walk(v)).collect()),
            other => other.clone(),
        }
    }
}

impl Default for Anonymizer {
    fn default() -> Self {
        Self::new(DEFAULT_SENSITIVE_FIELDS)
    }
}

/// Mask the value of a sensitive field. Containers are replaced wholesale.
fn mask_value(value: &Value, rule: &MaskingRule) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::String(s) => Value::String(rule.apply(s)),
        Value::Number(n) => Value::String(rule.apply(&n.to_string())),
        Value::Bool(b) => Value::String(rule.apply(&b.to_string())),
        Value::Object(_) | Value::Array(_) => Value::String(rule.replacement().to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_keep_last_masking() {
        let anonymizer = Anonymizer::default().with_default_rule(MaskingRule::keep_last(2));

        let masked = anonymizer.anonymize(&json!({"name": "John Doe", "age": 30}));
        assert_eq!(masked, json!({"name": "**oe", "age": 30}));
    }

    #[test]
    fn test_case_insensitive_substring_match() {
        let anonymizer = Anonymizer::default();

        assert!(anonymizer.is_sensitive("PatientName"));
        assert!(anonymizer.is_sensitive("contact_EMAIL"));
        assert!(anonymizer.is_sensitive("dateOfBirth"));
        assert!(!anonymizer.is_sensitive("respiratoryRate"));
    }

    #[test]
    fn test_nested_objects_and_arrays() {
        let anonymizer = Anonymizer::default();
        let details = json!({
            "patient": {"fullName": "Jane Roe", "weightKg": 61.5},
            "contacts": [{"phone": "555-0100"}, {"relation": "sister"}],
        });

        assert_eq!(
            anonymizer.anonymize(&details),
            json!({
                "patient": {"fullName": "**", "weightKg": 61.5},
                "contacts": [{"phone": "**"}, {"relation": "sister"}],
            })
        );
    }

    #[test]
    fn test_field_rule_beats_term_rule_beats_default() {
        let anonymizer = Anonymizer::default()
            .with_rule("email", MaskingRule::keep_first(1).with_replacement("***"))
            .with_rule("workEmail", MaskingRule::keep_last(4));

        let masked = anonymizer.anonymize(&json!({
            "homeEmail": "jane@example.org",
            "workEmail": "jane@clinic.org",
            "address": "1 Main St",
        }));

        assert_eq!(masked["homeEmail"], "j***");
        assert_eq!(masked["workEmail"], "**.org");
        assert_eq!(masked["address"], "**");
    }

    #[test]
    fn test_short_values_are_fully_replaced() {
        let rule = MaskingRule::keep_last(2);
        assert_eq!(rule.apply("Al"), "**");
        assert_eq!(rule.apply(""), "**");
    }

    #[test]
    fn test_non_string_and_container_values() {
        let anonymizer = Anonymizer::new(["ssn", "address"]);
        let masked = anonymizer.anonymize(&json!({
            "ssn": 123456789,
            "address": {"street": "1 Main St", "city": "Springfield"},
        }));

        assert_eq!(masked, json!({"ssn": "**", "address": "**"}));
    }

    #[test]
    fn test_custom_mask() {
        let anonymizer = Anonymizer::default().with_rule(
            "phone",
            MaskingRule::default().with_custom_mask(|v| format!("<{} digits>", v.len())),
        );

        assert_eq!(
            anonymizer.anonymize(&json!({"phone": "5550100"})),
            json!({"phone": "<7 digits>"})
        );
    }

    #[test]
    fn test_disabled_passes_through() {
        let anonymizer = Anonymizer::default().with_enabled(false);
        let details = json!({"name": "John Doe"});
        assert_eq!(anonymizer.anonymize(&details), details);
    }

    #[test]
    fn test_rule_deserializes_from_config() {
        let rule: MaskingRule =
            serde_json::from_value(json!({"keep_last": 2, "replacement": "##"})).unwrap();
        assert_eq!(rule.apply("John Doe"), "##oe");
    }

    proptest! {
        #[test]
        fn prop_non_sensitive_details_unchanged(
            rate in 0u32..60,
            label in "[a-z ]{0,20}",
            flags in proptest::collection::vec(any::<bool>(), 0..5),
        ) {
            let details = json!({"respiratoryRate": rate, "label": label, "flags": flags});
            prop_assert_eq!(Anonymizer::default().anonymize(&details), details);
        }

        #[test]
        fn prop_sensitive_value_not_recoverable(
            value in "[a-zA-Z0-9 ]{3,40}",
            keep in 0usize..3,
        ) {
            let anonymizer = Anonymizer::default().with_default_rule(MaskingRule::keep_last(keep));
            let masked = anonymizer.anonymize(&json!({"patientName": value.clone()}));
            let masked = masked["patientName"].as_str().unwrap().to_string();

            prop_assert!(!masked.contains(&value));
        }
    }
}
