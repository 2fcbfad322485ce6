// incident-core/src/core/redaction.rs
// ============================================================================
// Module: Incident Core Redaction
// Description: Pure, structure-preserving redaction for log and audit sinks.
// Purpose: Strip sensitive field values and substrings before data is written
//          to any sink, without mutating the caller's input.
// Dependencies: serde_json
// ============================================================================

//! ## Overview
//! Redaction is a pure recursive traversal: it builds a fresh
//! [`serde_json::Value`] rather than mutating the input in place. The
//! sensitive field-name set and the sensitive-pattern set are configuration
//! (held by [`RedactionPolicy`]), not hard-coded control flow, so operators
//! can extend either without a code change.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Map;
use serde_json::Value;

/// Placeholder written in place of a redacted value.
pub const REDACTED_PLACEHOLDER: &str = "[REDACTED]";

/// Default sensitive field names, matched case-insensitively.
pub const DEFAULT_SENSITIVE_FIELDS: &[&str] = &[
    "password",
    "passwd",
    "pwd",
    "secret",
    "api_key",
    "apikey",
    "access_token",
    "refresh_token",
    "bearer_token",
    "private_key",
    "secret_key",
    "client_secret",
    "auth_token",
    "authorization",
    "credit_card",
    "card_number",
    "cvv",
    "ssn",
    "social_security",
];

#[allow(clippy::expect_used, reason = "pattern is a fixed literal, compiling cannot fail")]
static EMAIL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)[a-z0-9._%+\-]+@[a-z0-9.\-]+\.[a-z]{2,}").expect("valid regex")
});
#[allow(clippy::expect_used, reason = "pattern is a fixed literal, compiling cannot fail")]
static CREDIT_CARD_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:\d[ -]?){15}\d\b").expect("valid regex"));
#[allow(clippy::expect_used, reason = "pattern is a fixed literal, compiling cannot fail")]
static SSN_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").expect("valid regex"));
#[allow(clippy::expect_used, reason = "pattern is a fixed literal, compiling cannot fail")]
static PHONE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\+?1?[ -]?\(?\d{3}\)?[ -]?\d{3}[ -]?\d{4}\b").expect("valid regex"));
#[allow(clippy::expect_used, reason = "pattern is a fixed literal, compiling cannot fail")]
static BEARER_TOKEN_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)bearer\s+[a-z0-9\-_.]+").expect("valid regex"));
#[allow(clippy::expect_used, reason = "pattern is a fixed literal, compiling cannot fail")]
static AWS_ACCESS_KEY_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bAKIA[0-9A-Z]{16}\b").expect("valid regex"));
#[allow(clippy::expect_used, reason = "pattern is a fixed literal, compiling cannot fail")]
static PROVIDER_API_KEY_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:sk|pk|rk)_(?:live|test)_[a-zA-Z0-9]{16,}\b").expect("valid regex"));

/// Configuration for [`redact_value`]: which field names and which
/// free-form-string patterns count as sensitive.
#[derive(Debug, Clone)]
pub struct RedactionPolicy {
    sensitive_fields: Vec<String>,
}

impl Default for RedactionPolicy {
    fn default() -> Self {
        Self {
            sensitive_fields: DEFAULT_SENSITIVE_FIELDS
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        }
    }
}

impl RedactionPolicy {
    /// Builds a policy from an explicit sensitive-field-name list.
    #[must_use]
    pub fn new(sensitive_fields: Vec<String>) -> Self {
        Self { sensitive_fields }
    }

    fn is_sensitive_field(&self, key: &str) -> bool {
        self.sensitive_fields
            .iter()
            .any(|field| field.eq_ignore_ascii_case(key))
    }

    /// Redacts sensitive substrings (email, card number, SSN, phone, bearer
    /// token, AWS access key, provider API key) within a free-form string.
    #[must_use]
    pub fn redact_patterns(text: &str) -> String {
        let mut out = text.to_string();
        for pattern in [
            &*BEARER_TOKEN_PATTERN,
            &*AWS_ACCESS_KEY_PATTERN,
            &*PROVIDER_API_KEY_PATTERN,
            &*CREDIT_CARD_PATTERN,
            &*SSN_PATTERN,
            &*EMAIL_PATTERN,
            &*PHONE_PATTERN,
        ] {
            out = pattern.replace_all(&out, REDACTED_PLACEHOLDER).into_owned();
        }
        out
    }

    /// Recursively redacts `value`, returning a fresh value. `value` is
    /// never mutated.
    #[must_use]
    pub fn redact(&self, value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut out = Map::with_capacity(map.len());
                for (key, child) in map {
                    let redacted = if self.is_sensitive_field(key) {
                        Value::String(REDACTED_PLACEHOLDER.to_string())
                    } else {
                        self.redact(child)
                    };
                    out.insert(key.clone(), redacted);
                }
                Value::Object(out)
            }
            Value::Array(items) => Value::Array(items.iter().map(|item| self.redact(item)).collect()),
            Value::String(text) => Value::String(Self::redact_patterns(text)),
            other => other.clone(),
        }
    }
}

/// Redacts `value` using the default policy.
#[must_use]
pub fn redact_value(value: &Value) -> Value {
    RedactionPolicy::default().redact(value)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, reason = "test assertions read values that must be present")]

    use serde_json::json;

    use super::RedactionPolicy;
    use super::redact_value;

    #[test]
    fn redacts_sensitive_field_by_name() {
        let input = json!({"api_key": "sk_live_abcdefghijklmnop", "merchant_id": "m1"});
        let redacted = redact_value(&input);
        assert_eq!(redacted["api_key"], json!("[REDACTED]"));
        assert_eq!(redacted["merchant_id"], json!("m1"));
        assert_eq!(input["api_key"], json!("sk_live_abcdefghijklmnop"));
    }

    #[test]
    fn redacts_sensitive_field_case_insensitively() {
        let input = json!({"API_Key": "secretvalue"});
        let redacted = redact_value(&input);
        assert_eq!(redacted["API_Key"], json!("[REDACTED]"));
    }

    #[test]
    fn redacts_email_pattern_in_free_form_text() {
        let input = json!({"note": "contact jane.doe@example.com for details"});
        let redacted = redact_value(&input);
        let note = redacted["note"].as_str().expect("string");
        assert!(!note.contains("jane.doe@example.com"));
        assert!(note.contains("[REDACTED]"));
    }

    #[test]
    fn preserves_structure_and_non_sensitive_values() {
        let input = json!({"outer": {"inner": [1, 2, {"password": "x"}]}});
        let redacted = redact_value(&input);
        assert_eq!(redacted["outer"]["inner"][0], json!(1));
        assert_eq!(redacted["outer"]["inner"][1], json!(2));
        assert_eq!(redacted["outer"]["inner"][2]["password"], json!("[REDACTED]"));
    }

    #[test]
    fn does_not_mutate_input() {
        let input = json!({"secret": "hunter2"});
        let clone = input.clone();
        let _ = redact_value(&input);
        assert_eq!(input, clone);
    }

    #[test]
    fn custom_policy_can_extend_sensitive_fields() {
        let policy = RedactionPolicy::new(vec!["merchant_internal_note".to_string()]);
        let input = json!({"merchant_internal_note": "do not ship"});
        let redacted = policy.redact(&input);
        assert_eq!(redacted["merchant_internal_note"], json!("[REDACTED]"));
    }
}
