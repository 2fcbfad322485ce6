// incident-pipeline/src/normalizer.rs
// ============================================================================
// Module: Signal Normalizer
// Description: Per-source-type mappers from raw vendor payloads to the
//              canonical Signal type.
// Purpose: Give every downstream stage (pattern detector, root-cause
//          analyzer) one uniform shape regardless of where a signal
//          originated.
// Dependencies: incident-core, serde_json, uuid
// ============================================================================

//! ## Overview
//! Each vendor/source gets a dedicated, pure mapping function. None of them
//! hold state or reach out to anything external; they only read the raw
//! JSON payload handed to [`normalize`] and the wire name of its source
//! type. Unrecognized source types fail closed with [`NormalizeError::UnsupportedSource`]
//! rather than guessing a shape.

use std::collections::BTreeMap;

use serde_json::Value;
use thiserror::Error;

use incident_core::ContextMap;
use incident_core::MerchantId;
use incident_core::Severity;
use incident_core::Signal;
use incident_core::SignalSource;
use incident_core::Timestamp;

/// Source-type wire name was not one of the six recognized vendors/channels.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NormalizeError {
    /// `source_type` did not match any known mapper.
    #[error("unsupported signal source: {0}")]
    UnsupportedSource(String),
}

const MERCHANT_ID_UNKNOWN: &str = "unknown";

/// Maps a raw vendor payload for `source_type` into a canonical [`Signal`].
///
/// # Errors
///
/// Returns [`NormalizeError::UnsupportedSource`] when `source_type` is not
/// one of `zendesk`, `freshdesk`, `intercom`, `api_failure`,
/// `checkout_error`, or `webhook_failure`.
pub fn normalize(source_type: &str, raw_data: &Value) -> Result<Signal, NormalizeError> {
    match source_type {
        "zendesk" => Ok(normalize_zendesk(raw_data)),
        "freshdesk" => Ok(normalize_freshdesk(raw_data)),
        "intercom" => Ok(normalize_intercom(raw_data)),
        "api_failure" => Ok(normalize_api_failure(raw_data)),
        "checkout_error" => Ok(normalize_checkout_error(raw_data)),
        "webhook_failure" => Ok(normalize_webhook_failure(raw_data)),
        other => Err(NormalizeError::UnsupportedSource(other.to_string())),
    }
}

fn new_signal(
    source: SignalSource,
    raw_data: &Value,
    merchant_id: MerchantId,
    migration_stage: Option<String>,
    affected_resource: Option<String>,
    severity: Severity,
    error_code: Option<String>,
    error_message: Option<String>,
    context: ContextMap,
) -> Signal {
    Signal {
        signal_id: uuid::Uuid::new_v4().to_string().into(),
        timestamp: Timestamp::now(),
        source,
        raw_data: raw_data.clone(),
        merchant_id,
        migration_stage,
        affected_resource,
        severity,
        error_code,
        error_message: error_message.map(|message| Signal::truncate_error_message(&message)),
        context,
    }
}

/// `custom_fields.merchant_id` → `merchant:*` tag → `requester_id` fallback
/// → `"unknown"`. Only meaningful for ticket-shaped payloads.
fn extract_merchant_id(raw_data: &Value) -> MerchantId {
    if let Some(from_custom_field) = raw_data
        .get("custom_fields")
        .and_then(|fields| fields.get("merchant_id"))
        .and_then(Value::as_str)
    {
        return MerchantId::new(from_custom_field);
    }
    if let Some(tags) = raw_data.get("tags").and_then(Value::as_array) {
        for tag in tags {
            if let Some(tag) = tag.as_str()
                && let Some(merchant_id) = tag.strip_prefix("merchant:")
            {
                return MerchantId::new(merchant_id);
            }
        }
    }
    if let Some(requester_id) = raw_data.get("requester_id") {
        if let Some(as_str) = requester_id.as_str() {
            return MerchantId::new(as_str);
        }
        if let Some(as_number) = requester_id.as_i64() {
            return MerchantId::new(as_number.to_string());
        }
    }
    MerchantId::new(MERCHANT_ID_UNKNOWN)
}

/// `custom_fields.migration_stage` → `stage:*` tag → `None`. Only
/// meaningful for ticket-shaped payloads.
fn extract_migration_stage(raw_data: &Value) -> Option<String> {
    if let Some(from_custom_field) = raw_data
        .get("custom_fields")
        .and_then(|fields| fields.get("migration_stage"))
        .and_then(Value::as_str)
    {
        return Some(from_custom_field.to_string());
    }
    if let Some(tags) = raw_data.get("tags").and_then(Value::as_array) {
        for tag in tags {
            if let Some(tag) = tag.as_str()
                && let Some(stage) = tag.strip_prefix("stage:")
            {
                return Some(stage.to_string());
            }
        }
    }
    None
}

fn string_field(raw_data: &Value, field: &str) -> Option<String> {
    raw_data.get(field).and_then(Value::as_str).map(ToString::to_string)
}

fn map_zendesk_priority(priority: &str) -> Severity {
    match priority {
        "urgent" => Severity::Critical,
        "high" => Severity::High,
        "low" => Severity::Low,
        _ => Severity::Medium,
    }
}

fn normalize_zendesk(raw_data: &Value) -> Signal {
    let merchant_id = extract_merchant_id(raw_data);
    let migration_stage = extract_migration_stage(raw_data);
    let severity = string_field(raw_data, "priority").map_or(Severity::Medium, |priority| map_zendesk_priority(&priority));
    let error_message = string_field(raw_data, "description");
    let affected_resource = string_field(raw_data, "subject");

    let mut context = ContextMap::new();
    if let Some(ticket_id) = raw_data.get("id") {
        context.insert("ticket_id".to_string(), ticket_id.clone());
    }
    if let Some(status) = raw_data.get("status") {
        context.insert("status".to_string(), status.clone());
    }

    new_signal(
        SignalSource::SupportTicket,
        raw_data,
        merchant_id,
        migration_stage,
        affected_resource,
        severity,
        None,
        error_message,
        context,
    )
}

fn map_freshdesk_priority(priority: i64) -> Severity {
    match priority {
        1 => Severity::Low,
        3 => Severity::High,
        4.. => Severity::Critical,
        _ => Severity::Medium,
    }
}

fn normalize_freshdesk(raw_data: &Value) -> Signal {
    let merchant_id = extract_merchant_id(raw_data);
    let migration_stage = extract_migration_stage(raw_data);
    let severity = raw_data
        .get("priority")
        .and_then(Value::as_i64)
        .map_or(Severity::Medium, map_freshdesk_priority);
    let error_message = string_field(raw_data, "description_text").or_else(|| string_field(raw_data, "description"));
    let affected_resource = string_field(raw_data, "subject");

    let mut context = ContextMap::new();
    if let Some(ticket_id) = raw_data.get("id") {
        context.insert("ticket_id".to_string(), ticket_id.clone());
    }
    if let Some(status) = raw_data.get("status") {
        context.insert("status".to_string(), status.clone());
    }

    new_signal(
        SignalSource::SupportTicket,
        raw_data,
        merchant_id,
        migration_stage,
        affected_resource,
        severity,
        None,
        error_message,
        context,
    )
}

fn map_intercom_state(state: &str) -> Severity {
    match state {
        "snoozed" | "closed" => Severity::Low,
        _ => Severity::Medium,
    }
}

fn normalize_intercom(raw_data: &Value) -> Signal {
    let merchant_id = raw_data
        .get("user")
        .and_then(|user| user.get("user_id").or_else(|| user.get("id")))
        .and_then(Value::as_str)
        .map_or_else(|| MerchantId::new(MERCHANT_ID_UNKNOWN), MerchantId::new);
    let severity = string_field(raw_data, "state").map_or(Severity::Medium, |state| map_intercom_state(&state));

    let first_part = raw_data
        .get("conversation_parts")
        .and_then(|parts| parts.get("conversation_parts"))
        .and_then(Value::as_array)
        .and_then(|parts| parts.first());
    let error_message = first_part.and_then(|part| string_field(part, "body"));
    let affected_resource = first_part.and_then(|part| string_field(part, "id")).or_else(|| string_field(raw_data, "id"));

    let mut context = ContextMap::new();
    if let Some(conversation_id) = raw_data.get("id") {
        context.insert("conversation_id".to_string(), conversation_id.clone());
    }

    new_signal(
        SignalSource::SupportTicket,
        raw_data,
        merchant_id,
        None,
        affected_resource,
        severity,
        None,
        error_message,
        context,
    )
}

fn map_http_status_to_severity(status: i64) -> Severity {
    if status >= 500 {
        Severity::Critical
    } else if status >= 400 {
        Severity::High
    } else if status >= 300 {
        Severity::Medium
    } else {
        Severity::Low
    }
}

fn normalize_api_failure(raw_data: &Value) -> Signal {
    let merchant_id = string_field(raw_data, "merchant_id").map_or_else(|| MerchantId::new(MERCHANT_ID_UNKNOWN), MerchantId::new);
    let status = raw_data.get("status_code").and_then(Value::as_i64);
    let severity = status.map_or(Severity::Medium, map_http_status_to_severity);
    let error_code = status.map(|status| status.to_string());
    let error_message = string_field(raw_data, "error_message").or_else(|| string_field(raw_data, "message"));
    let affected_resource = string_field(raw_data, "endpoint");

    let mut context = ContextMap::new();
    if let Some(method) = raw_data.get("method") {
        context.insert("method".to_string(), method.clone());
    }
    if let Some(duration) = raw_data.get("duration_ms") {
        context.insert("duration_ms".to_string(), duration.clone());
    }

    new_signal(
        SignalSource::ApiFailure,
        raw_data,
        merchant_id,
        None,
        affected_resource,
        severity,
        error_code,
        error_message,
        context,
    )
}

fn normalize_checkout_error(raw_data: &Value) -> Signal {
    let merchant_id = string_field(raw_data, "merchant_id").map_or_else(|| MerchantId::new(MERCHANT_ID_UNKNOWN), MerchantId::new);
    let error_code = string_field(raw_data, "error_code");
    let error_message = string_field(raw_data, "error_message").or_else(|| string_field(raw_data, "message"));
    let affected_resource = string_field(raw_data, "cart_id").or_else(|| string_field(raw_data, "order_id"));

    let mut context = ContextMap::new();
    if let Some(step) = raw_data.get("step") {
        context.insert("step".to_string(), step.clone());
    }
    if let Some(payment_method) = raw_data.get("payment_method") {
        context.insert("payment_method".to_string(), payment_method.clone());
    }
    if let Some(value) = raw_data.get("value") {
        context.insert("value".to_string(), value.clone());
    }

    new_signal(
        SignalSource::CheckoutError,
        raw_data,
        merchant_id,
        None,
        affected_resource,
        Severity::High,
        error_code,
        error_message,
        context,
    )
}

fn map_webhook_failure_count(count: i64) -> Severity {
    if count >= 5 {
        Severity::Critical
    } else if count >= 3 {
        Severity::High
    } else {
        Severity::Medium
    }
}

fn normalize_webhook_failure(raw_data: &Value) -> Signal {
    let merchant_id = string_field(raw_data, "merchant_id").map_or_else(|| MerchantId::new(MERCHANT_ID_UNKNOWN), MerchantId::new);
    let failure_count = raw_data.get("failure_count").and_then(Value::as_i64).unwrap_or(0);
    let severity = map_webhook_failure_count(failure_count);
    let error_code = string_field(raw_data, "error_code");
    let error_message = string_field(raw_data, "error_message").or_else(|| string_field(raw_data, "message"));
    let affected_resource = string_field(raw_data, "webhook_url");

    let mut context = ContextMap::new();
    context.insert("failure_count".to_string(), Value::from(failure_count));
    if let Some(event_type) = raw_data.get("event_type") {
        context.insert("event_type".to_string(), event_type.clone());
    }

    new_signal(
        SignalSource::WebhookFailure,
        raw_data,
        merchant_id,
        None,
        affected_resource,
        severity,
        error_code,
        error_message,
        context,
    )
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, reason = "test assertions read values that must be present")]

    use serde_json::json;

    use super::NormalizeError;
    use super::normalize;
    use incident_core::Severity;
    use incident_core::SignalSource;

    #[test]
    fn unsupported_source_is_rejected() {
        let err = normalize("carrier_pigeon", &json!({})).expect_err("must fail");
        assert_eq!(err, NormalizeError::UnsupportedSource("carrier_pigeon".to_string()));
    }

    #[test]
    fn zendesk_extracts_merchant_from_custom_field() {
        let raw = json!({
            "priority": "urgent",
            "description": "checkout is broken",
            "subject": "Checkout failing",
            "custom_fields": { "merchant_id": "m-42", "migration_stage": "cutover" },
        });
        let signal = normalize("zendesk", &raw).expect("normalizes");
        assert_eq!(signal.source, SignalSource::SupportTicket);
        assert_eq!(signal.merchant_id.as_str(), "m-42");
        assert_eq!(signal.migration_stage.as_deref(), Some("cutover"));
        assert_eq!(signal.severity, Severity::Critical);
        assert_eq!(signal.affected_resource.as_deref(), Some("Checkout failing"));
    }

    #[test]
    fn zendesk_falls_back_to_tag_then_requester_id() {
        let tagged = json!({ "priority": "low", "tags": ["merchant:m-7", "other"] });
        let signal = normalize("zendesk", &tagged).expect("normalizes");
        assert_eq!(signal.merchant_id.as_str(), "m-7");

        let requester_only = json!({ "priority": "normal", "requester_id": 99 });
        let signal = normalize("zendesk", &requester_only).expect("normalizes");
        assert_eq!(signal.merchant_id.as_str(), "99");
        assert_eq!(signal.severity, Severity::Medium);
    }

    #[test]
    fn freshdesk_maps_integer_priority() {
        let raw = json!({ "priority": 4, "description_text": "api is down", "requester_id": "m-1" });
        let signal = normalize("freshdesk", &raw).expect("normalizes");
        assert_eq!(signal.severity, Severity::Critical);
        assert_eq!(signal.error_message.as_deref(), Some("api is down"));
    }

    #[test]
    fn intercom_reads_merchant_from_user_and_first_conversation_part() {
        let raw = json!({
            "state": "open",
            "user": { "user_id": "m-9" },
            "conversation_parts": {
                "conversation_parts": [{ "id": "part-1", "body": "still seeing errors" }]
            },
        });
        let signal = normalize("intercom", &raw).expect("normalizes");
        assert_eq!(signal.merchant_id.as_str(), "m-9");
        assert_eq!(signal.severity, Severity::Medium);
        assert_eq!(signal.error_message.as_deref(), Some("still seeing errors"));
        assert_eq!(signal.affected_resource.as_deref(), Some("part-1"));
    }

    #[test]
    fn api_failure_maps_status_code_to_severity() {
        let raw = json!({ "merchant_id": "m-3", "status_code": 503, "endpoint": "/v1/orders" });
        let signal = normalize("api_failure", &raw).expect("normalizes");
        assert_eq!(signal.source, SignalSource::ApiFailure);
        assert_eq!(signal.severity, Severity::Critical);
        assert_eq!(signal.error_code.as_deref(), Some("503"));
        assert_eq!(signal.affected_resource.as_deref(), Some("/v1/orders"));
    }

    #[test]
    fn checkout_error_is_always_high_severity() {
        let raw = json!({ "merchant_id": "m-4", "cart_id": "cart-1", "error_code": "PAYMENT_DECLINED" });
        let signal = normalize("checkout_error", &raw).expect("normalizes");
        assert_eq!(signal.severity, Severity::High);
        assert_eq!(signal.affected_resource.as_deref(), Some("cart-1"));
    }

    #[test]
    fn webhook_failure_count_drives_severity() {
        let raw = json!({ "merchant_id": "m-5", "webhook_url": "https://example.com/hook", "failure_count": 5 });
        let signal = normalize("webhook_failure", &raw).expect("normalizes");
        assert_eq!(signal.severity, Severity::Critical);
        assert_eq!(signal.affected_resource.as_deref(), Some("https://example.com/hook"));
    }

    #[test]
    fn error_message_is_truncated_to_limit() {
        let long_message = "e".repeat(900);
        let raw = json!({ "merchant_id": "m-6", "error_code": "PAYMENT_DECLINED", "error_message": long_message });
        let signal = normalize("checkout_error", &raw).expect("normalizes");
        assert_eq!(signal.error_message.expect("present").len(), 500);
    }
}
