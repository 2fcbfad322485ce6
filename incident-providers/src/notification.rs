// incident-providers/src/notification.rs
// ============================================================================
// Module: Notification Action Handler
// Description: HTTP-backed ActionHandler for proactive_communication.
// Purpose: Fan a single decision out to every affected recipient's preferred
//          channel and aggregate the per-recipient delivery outcome.
// Dependencies: incident-core, reqwest, serde_json
// ============================================================================

//! ## Overview
//! `proactive_communication` carries a list of recipients, each with a
//! channel (email, sms, in-app) and an address. The handler sends one
//! notification per recipient and never fails the whole action just
//! because one recipient's channel rejected it: the action succeeds as
//! long as at least one recipient was notified, matching how support
//! teams treat partial delivery as still useful.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::time::Duration;

use incident_core::Action;
use incident_core::ActionHandler;
use incident_core::ActionHandlerError;
use incident_core::ActionResult;
use incident_core::ActionType;
use incident_core::MerchantId;
use incident_core::Timestamp;
use reqwest::blocking::Client;
use serde::Serialize;
use serde_json::Value;

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Configuration for [`NotificationActionHandler`].
#[derive(Debug, Clone)]
pub struct NotificationConfig {
    /// Base URL of the notification service.
    pub base_url: String,
    /// Request timeout in milliseconds.
    pub timeout_ms: u64,
}

// ============================================================================
// SECTION: Handler
// ============================================================================

/// `ActionHandler` for `proactive_communication`.
pub struct NotificationActionHandler {
    config: NotificationConfig,
    client: Client,
}

impl NotificationActionHandler {
    /// Builds a handler from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`ActionHandlerError::Transport`] if the underlying HTTP
    /// client cannot be constructed.
    pub fn new(config: NotificationConfig) -> Result<Self, ActionHandlerError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|err| ActionHandlerError::Transport(err.to_string()))?;
        Ok(Self { config, client })
    }

    fn send_one(&self, recipient: &Recipient, message: &str, action_id: &str) -> Result<(), ActionHandlerError> {
        let request = SendRequest {
            idempotency_key: action_id,
            channel: &recipient.channel,
            address: &recipient.address,
            message,
        };
        let response = self
            .client
            .post(format!("{}/notifications", self.config.base_url))
            .json(&request)
            .send()
            .map_err(|err| ActionHandlerError::Transport(err.to_string()))?;
        if !response.status().is_success() {
            if response.status().is_server_error() {
                return Err(ActionHandlerError::Transport(format!("http {}", response.status())));
            }
            return Err(ActionHandlerError::Rejected(format!("http {}", response.status())));
        }
        Ok(())
    }
}

impl ActionHandler for NotificationActionHandler {
    fn execute(&self, action: &Action, _merchant_id: &MerchantId) -> Result<ActionResult, ActionHandlerError> {
        if action.action_type != ActionType::ProactiveCommunication {
            return Err(ActionHandlerError::Rejected(format!(
                "notification handler does not support {:?}",
                action.action_type
            )));
        }

        let message = action
            .parameters
            .get("message")
            .and_then(Value::as_str)
            .ok_or_else(|| ActionHandlerError::Rejected("missing message parameter".to_string()))?;
        let recipients = parse_recipients(action)?;
        if recipients.is_empty() {
            return Err(ActionHandlerError::Rejected("no recipients provided".to_string()));
        }

        let mut per_recipient_status = BTreeMap::new();
        let mut notified = 0usize;
        for recipient in &recipients {
            match self.send_one(recipient, message, action.action_id.as_str()) {
                Ok(()) => {
                    notified += 1;
                    per_recipient_status.insert(recipient.address.clone(), Value::from("sent"));
                }
                Err(err) => {
                    per_recipient_status.insert(recipient.address.clone(), Value::from(err.to_string()));
                }
            }
        }

        let total = recipients.len();
        let success = notified > 0;
        let mut result = BTreeMap::new();
        result.insert("notified".to_string(), Value::from(notified));
        result.insert("total".to_string(), Value::from(total));
        result.insert(
            "per_recipient_status".to_string(),
            Value::Object(per_recipient_status.into_iter().collect()),
        );

        Ok(ActionResult {
            success,
            error_message: if success { None } else { Some("no recipients could be notified".to_string()) },
            result,
            executed_at: Timestamp::now(),
            rollback_data: None,
        })
    }
}

// ============================================================================
// SECTION: Parameter Parsing
// ============================================================================

/// One notification recipient extracted from `action.parameters["recipients"]`.
struct Recipient {
    /// Delivery channel, e.g. `"email"`, `"sms"`, `"in_app"`.
    channel: String,
    /// Destination address within that channel.
    address: String,
}

fn parse_recipients(action: &Action) -> Result<Vec<Recipient>, ActionHandlerError> {
    let raw = action
        .parameters
        .get("recipients")
        .and_then(Value::as_array)
        .ok_or_else(|| ActionHandlerError::Rejected("missing recipients parameter".to_string()))?;
    raw.iter()
        .map(|entry| {
            let channel = entry
                .get("channel")
                .and_then(Value::as_str)
                .ok_or_else(|| ActionHandlerError::Rejected("recipient missing channel".to_string()))?
                .to_string();
            let address = entry
                .get("address")
                .and_then(Value::as_str)
                .ok_or_else(|| ActionHandlerError::Rejected("recipient missing address".to_string()))?
                .to_string();
            Ok(Recipient { channel, address })
        })
        .collect()
}

// ============================================================================
// SECTION: Wire Types
// ============================================================================

/// Request body for a single notification send.
#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    /// Key the backend can use to dedupe retried requests.
    idempotency_key: &'a str,
    /// Delivery channel.
    channel: &'a str,
    /// Destination address.
    address: &'a str,
    /// Message body.
    message: &'a str,
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use incident_core::ActionId;
    use incident_core::IssueId;
    use incident_core::RiskLevel;
    use serde_json::json;

    use super::*;

    fn sample_action(parameters: BTreeMap<String, Value>) -> Action {
        Action {
            action_id: ActionId::new("act-1"),
            issue_id: IssueId::new("issue-1"),
            action_type: ActionType::ProactiveCommunication,
            risk_level: RiskLevel::Low,
            merchant_id: MerchantId::new("merchant-1"),
            parameters,
        }
    }

    #[test]
    fn missing_message_is_rejected() {
        let action = sample_action(BTreeMap::new());
        let error = parse_recipients(&action).expect_err("no recipients present");
        assert!(matches!(error, ActionHandlerError::Rejected(_)));
    }

    #[test]
    fn parses_well_formed_recipients() {
        let mut parameters = BTreeMap::new();
        parameters.insert(
            "recipients".to_string(),
            json!([{"channel": "email", "address": "merchant@example.com"}]),
        );
        let action = sample_action(parameters);
        let recipients = parse_recipients(&action).expect("recipients parse");
        assert_eq!(recipients.len(), 1);
        assert_eq!(recipients[0].channel, "email");
    }

    #[test]
    fn rejects_recipient_missing_address() {
        let mut parameters = BTreeMap::new();
        parameters.insert("recipients".to_string(), json!([{"channel": "email"}]));
        let action = sample_action(parameters);
        let error = parse_recipients(&action).expect_err("rejects");
        assert!(matches!(error, ActionHandlerError::Rejected(_)));
    }
}
