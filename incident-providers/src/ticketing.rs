// incident-providers/src/ticketing.rs
// ============================================================================
// Module: Ticketing Action Handler
// Description: HTTP-backed ActionHandler for the ticket-creating action
//              types: support_guidance, engineering_escalation, and
//              documentation_update.
// Purpose: Translate a routed Decision's parameters into a create-or-update
//          call against a support-desk/ticketing backend.
// Dependencies: incident-core, reqwest, serde_json
// ============================================================================

//! ## Overview
//! One [`TicketingActionHandler`] is registered for all three ticket-shaped
//! action types. `support_guidance` updates an existing ticket when the
//! decision carried a `ticket_id`, otherwise creates one; `engineering_escalation`
//! and `documentation_update` always create a new ticket, since neither
//! routes back to an existing support conversation. Every call is keyed by
//! `action.action_id` so retried calls are idempotent on the backend side.

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
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Configuration for [`TicketingActionHandler`].
#[derive(Debug, Clone)]
pub struct TicketingConfig {
    /// Base URL of the ticketing service.
    pub base_url: String,
    /// Request timeout in milliseconds.
    pub timeout_ms: u64,
}

// ============================================================================
// SECTION: Handler
// ============================================================================

/// `ActionHandler` for `support_guidance`, `engineering_escalation`, and
/// `documentation_update`, all of which resolve to a ticket create or
/// update call.
pub struct TicketingActionHandler {
    config: TicketingConfig,
    client: Client,
}

impl TicketingActionHandler {
    /// Builds a handler from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`ActionHandlerError::Transport`] if the underlying HTTP
    /// client cannot be constructed.
    pub fn new(config: TicketingConfig) -> Result<Self, ActionHandlerError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|err| ActionHandlerError::Transport(err.to_string()))?;
        Ok(Self { config, client })
    }

    fn create_ticket(&self, request: &TicketRequest<'_>) -> Result<TicketResponse, ActionHandlerError> {
        let response = self
            .client
            .post(format!("{}/tickets", self.config.base_url))
            .json(request)
            .send()
            .map_err(classify_transport_error)?;
        if !response.status().is_success() {
            return Err(classify_status_error(response.status()));
        }
        response.json().map_err(|err| ActionHandlerError::Transport(err.to_string()))
    }

    fn update_ticket(&self, ticket_id: &str, request: &TicketUpdateRequest<'_>) -> Result<TicketResponse, ActionHandlerError> {
        let response = self
            .client
            .patch(format!("{}/tickets/{ticket_id}", self.config.base_url))
            .json(request)
            .send()
            .map_err(classify_transport_error)?;
        if !response.status().is_success() {
            return Err(classify_status_error(response.status()));
        }
        response.json().map_err(|err| ActionHandlerError::Transport(err.to_string()))
    }
}

impl ActionHandler for TicketingActionHandler {
    fn execute(&self, action: &Action, merchant_id: &MerchantId) -> Result<ActionResult, ActionHandlerError> {
        match action.action_type {
            ActionType::SupportGuidance => self.execute_support_guidance(action, merchant_id),
            ActionType::EngineeringEscalation => self.execute_engineering_escalation(action, merchant_id),
            ActionType::DocumentationUpdate => self.execute_documentation_update(action, merchant_id),
            other => Err(ActionHandlerError::Rejected(format!("ticketing handler does not support {other:?}"))),
        }
    }
}

impl TicketingActionHandler {
    fn execute_support_guidance(&self, action: &Action, merchant_id: &MerchantId) -> Result<ActionResult, ActionHandlerError> {
        let message = string_param(action, "message").ok_or_else(|| ActionHandlerError::Rejected("missing message parameter".to_string()))?;
        let ticket = if let Some(ticket_id) = string_param(action, "ticket_id") {
            let request = TicketUpdateRequest { idempotency_key: action.action_id.as_str(), body: message };
            self.update_ticket(ticket_id, &request)?
        } else {
            let request = TicketRequest {
                idempotency_key: action.action_id.as_str(),
                kind: "support_guidance",
                title: "Migration support guidance",
                body: message,
                merchant_id: merchant_id.as_str(),
                priority: None,
            };
            self.create_ticket(&request)?
        };
        Ok(success_result(&ticket, None))
    }

    fn execute_engineering_escalation(&self, action: &Action, merchant_id: &MerchantId) -> Result<ActionResult, ActionHandlerError> {
        let title = string_param(action, "title").unwrap_or("Engineering escalation");
        let description = string_param(action, "description").ok_or_else(|| ActionHandlerError::Rejected("missing description parameter".to_string()))?;
        let priority = string_param(action, "priority");
        let request = TicketRequest {
            idempotency_key: action.action_id.as_str(),
            kind: "engineering_escalation",
            title,
            body: description,
            merchant_id: merchant_id.as_str(),
            priority,
        };
        let ticket = self.create_ticket(&request)?;
        Ok(success_result(&ticket, None))
    }

    fn execute_documentation_update(&self, action: &Action, merchant_id: &MerchantId) -> Result<ActionResult, ActionHandlerError> {
        let section = string_param(action, "section").unwrap_or("migration_guide");
        let content = string_param(action, "suggested_content").ok_or_else(|| ActionHandlerError::Rejected("missing suggested_content parameter".to_string()))?;
        let request = TicketRequest {
            idempotency_key: action.action_id.as_str(),
            kind: "documentation_update",
            title: section,
            body: content,
            merchant_id: merchant_id.as_str(),
            priority: None,
        };
        let ticket = self.create_ticket(&request)?;
        Ok(success_result(&ticket, Some(section)))
    }
}

// ============================================================================
// SECTION: Wire Types
// ============================================================================

/// Request body for creating a ticket.
#[derive(Debug, Serialize)]
struct TicketRequest<'a> {
    /// Key the backend can use to dedupe retried requests.
    idempotency_key: &'a str,
    /// Ticket category.
    kind: &'a str,
    /// Ticket title/subject.
    title: &'a str,
    /// Ticket body.
    body: &'a str,
    /// Merchant the ticket concerns.
    merchant_id: &'a str,
    /// Optional priority label.
    #[serde(skip_serializing_if = "Option::is_none")]
    priority: Option<&'a str>,
}

/// Request body for updating an existing ticket.
#[derive(Debug, Serialize)]
struct TicketUpdateRequest<'a> {
    /// Key the backend can use to dedupe retried requests.
    idempotency_key: &'a str,
    /// Comment/body to append.
    body: &'a str,
}

/// Response body shared by create and update calls.
#[derive(Debug, Deserialize)]
struct TicketResponse {
    /// Backend-assigned ticket identifier.
    ticket_id: String,
    /// Ticket status as reported by the backend.
    #[serde(default)]
    status: Option<String>,
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn string_param<'a>(action: &'a Action, key: &str) -> Option<&'a str> {
    action.parameters.get(key).and_then(Value::as_str)
}

fn success_result(ticket: &TicketResponse, section: Option<&str>) -> ActionResult {
    let mut result = BTreeMap::new();
    result.insert("ticket_id".to_string(), Value::from(ticket.ticket_id.clone()));
    if let Some(status) = &ticket.status {
        result.insert("status".to_string(), Value::from(status.clone()));
    }
    if let Some(section) = section {
        result.insert("section".to_string(), Value::from(section));
    }
    ActionResult {
        success: true,
        result,
        error_message: None,
        executed_at: Timestamp::now(),
        rollback_data: None,
    }
}

/// Maps a `reqwest` send failure to the appropriate [`ActionHandlerError`].
fn classify_transport_error(error: reqwest::Error) -> ActionHandlerError {
    if error.is_timeout() || error.is_connect() {
        ActionHandlerError::Transport(error.to_string())
    } else {
        ActionHandlerError::Transport(error.to_string())
    }
}

/// Maps an HTTP status to the appropriate [`ActionHandlerError`]: 5xx and
/// 408/429 are transient (retryable), everything else is a permanent
/// rejection.
fn classify_status_error(status: reqwest::StatusCode) -> ActionHandlerError {
    if status.is_server_error() || status == reqwest::StatusCode::REQUEST_TIMEOUT || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        ActionHandlerError::Transport(format!("http {status}"))
    } else {
        ActionHandlerError::Rejected(format!("http {status}"))
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use incident_core::ActionId;
    use incident_core::IssueId;
    use incident_core::RiskLevel;

    use super::*;

    fn sample_action(action_type: ActionType, parameters: BTreeMap<String, Value>) -> Action {
        Action {
            action_id: ActionId::new("act-1"),
            issue_id: IssueId::new("issue-1"),
            action_type,
            risk_level: RiskLevel::Low,
            merchant_id: MerchantId::new("merchant-1"),
            parameters,
        }
    }

    #[test]
    fn unsupported_action_type_is_rejected() {
        let handler = TicketingActionHandler::new(TicketingConfig { base_url: "http://localhost:1".to_string(), timeout_ms: 10 }).unwrap_or_else(|_| {
            panic!("client construction should not fail for a well-formed base url")
        });
        let action = sample_action(ActionType::ProactiveCommunication, BTreeMap::new());
        let merchant_id = MerchantId::new("merchant-1");
        let error = handler.execute(&action, &merchant_id).expect_err("rejects");
        assert!(matches!(error, ActionHandlerError::Rejected(_)));
    }

    #[test]
    fn support_guidance_without_message_is_rejected() {
        let handler = TicketingActionHandler::new(TicketingConfig { base_url: "http://localhost:1".to_string(), timeout_ms: 10 }).unwrap_or_else(|_| {
            panic!("client construction should not fail for a well-formed base url")
        });
        let action = sample_action(ActionType::SupportGuidance, BTreeMap::new());
        let merchant_id = MerchantId::new("merchant-1");
        let error = handler.execute(&action, &merchant_id).expect_err("rejects");
        assert!(matches!(error, ActionHandlerError::Rejected(_)));
    }
}
