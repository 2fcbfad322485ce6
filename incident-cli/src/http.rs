// incident-cli/src/http.rs
// ============================================================================
// Module: Ingestion and Query HTTP Surface
// Description: Axum router exposing webhook ingestion, signal submission,
//              issue/approval query, and a health check.
// Purpose: The external interface described for the incident pipeline:
//          vendor webhooks feed the orchestrator, operators inspect and
//          approve pending decisions.
// Dependencies: axum, incident-broker, incident-core, incident-pipeline,
//               serde, serde_json, tokio, tracing
// ============================================================================

//! ## Overview
//! Every handler here does one of two things: runs a blocking orchestrator
//! cycle via [`tokio::task::spawn_blocking`] (the orchestrator's providers
//! use blocking HTTP clients under the hood), or reads/mutates durable state
//! through the store directly. Every error path returns the `{error_code,
//! error_message}` shape; ingestion success paths return `{status, message,
//! signal_id?}`.

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::Path;
use axum::extract::Query;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::routing::get;
use axum::routing::post;
use incident_broker::FreshdeskVerifier;
use incident_broker::IntercomVerifier;
use incident_broker::VerifyError;
use incident_broker::WebhookVerifier;
use incident_broker::ZendeskVerifier;
use incident_core::AuditEntry;
use incident_core::AuditStore;
use incident_core::ContextMap;
use incident_core::IssueId;
use incident_core::IssueState;
use incident_core::IssueStatus;
use incident_core::IssueStore;
use incident_core::Timestamp;
use incident_pipeline::CycleOutcome;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;

use crate::wiring::Pipeline;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    /// The fully wired pipeline.
    pub pipeline: Arc<Pipeline>,
}

/// Builds the axum router for the ingestion/query HTTP surface.
#[must_use]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/v1/webhooks/{vendor}", post(webhook))
        .route("/api/v1/signals/submit", post(submit_signal))
        .route("/api/v1/issues", get(list_issues))
        .route("/api/v1/issues/{issue_id}", get(get_issue))
        .route("/api/v1/issues/{issue_id}/audit", get(get_audit_chain))
        .route("/api/v1/approvals", get(list_approvals))
        .route("/api/v1/approvals/{issue_id}/approve", post(approve_issue))
        .route("/api/v1/approvals/{issue_id}/reject", post(reject_issue))
        .route("/api/v1/metrics", get(metrics))
        .with_state(state)
}

// ============================================================================
// SECTION: Error Shape
// ============================================================================

/// The `{error_code, error_message}` body every 4xx/5xx response carries.
#[derive(Debug, Serialize)]
struct ApiError {
    error_code: String,
    error_message: String,
}

impl ApiError {
    fn response(status: StatusCode, error_code: &str, error_message: impl Into<String>) -> (StatusCode, Json<ApiError>) {
        (status, Json(Self { error_code: error_code.to_string(), error_message: error_message.into() }))
    }
}

// ============================================================================
// SECTION: Health
// ============================================================================

async fn healthz() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

// ============================================================================
// SECTION: Webhook Ingestion
// ============================================================================

/// Vendor-specific header carrying the webhook's HMAC signature.
fn signature_header_name(vendor: &str) -> Option<&'static str> {
    match vendor {
        "zendesk" => Some("x-zendesk-webhook-signature"),
        "freshdesk" => Some("x-freshdesk-signature"),
        "intercom" => Some("x-hub-signature"),
        _ => None,
    }
}

async fn webhook(
    State(state): State<AppState>,
    Path(vendor): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, (StatusCode, Json<ApiError>)> {
    let header_name = signature_header_name(&vendor)
        .ok_or_else(|| ApiError::response(StatusCode::NOT_FOUND, "unknown_vendor", format!("no webhook route for vendor {vendor}")))?;
    let secret = webhook_secret(&state, &vendor)
        .ok_or_else(|| ApiError::response(StatusCode::UNAUTHORIZED, "webhook_not_configured", format!("no signing secret configured for {vendor}")))?;
    let signature = headers
        .get(header_name)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| ApiError::response(StatusCode::UNAUTHORIZED, "missing_signature", format!("missing {header_name} header")))?;

    verify_signature(&vendor, &body, signature, &secret).map_err(|err| ApiError::response(StatusCode::UNAUTHORIZED, "signature_invalid", err.to_string()))?;

    let raw_data: Value = serde_json::from_slice(&body).map_err(|err| ApiError::response(StatusCode::BAD_REQUEST, "invalid_payload", err.to_string()))?;
    run_ingest(&state, &vendor, raw_data, None).await
}

fn webhook_secret(state: &AppState, vendor: &str) -> Option<String> {
    match vendor {
        "zendesk" => state.pipeline.config.webhooks.zendesk_secret.clone(),
        "freshdesk" => state.pipeline.config.webhooks.freshdesk_secret.clone(),
        "intercom" => state.pipeline.config.webhooks.intercom_secret.clone(),
        _ => None,
    }
}

fn verify_signature(vendor: &str, body: &[u8], signature: &str, secret: &str) -> Result<(), VerifyError> {
    match vendor {
        "zendesk" => ZendeskVerifier.verify(body, signature, secret),
        "freshdesk" => FreshdeskVerifier.verify(body, signature, secret),
        "intercom" => IntercomVerifier.verify(body, signature, secret),
        _ => Err(VerifyError::MissingMaterial),
    }
}

// ============================================================================
// SECTION: Direct Signal Submission
// ============================================================================

/// Body accepted by `/api/v1/signals/submit`: a source type recognized by
/// the normalizer plus its raw payload.
#[derive(Debug, Deserialize)]
struct SubmitSignalBody {
    source_type: String,
    raw_data: Value,
    #[serde(default)]
    merchant_context: Option<ContextMap>,
}

async fn submit_signal(State(state): State<AppState>, Json(body): Json<SubmitSignalBody>) -> Result<Json<Value>, (StatusCode, Json<ApiError>)> {
    run_ingest(&state, &body.source_type, body.raw_data, body.merchant_context).await
}

async fn run_ingest(state: &AppState, source_type: &str, raw_data: Value, merchant_context: Option<ContextMap>) -> Result<Json<Value>, (StatusCode, Json<ApiError>)> {
    let pipeline = Arc::clone(&state.pipeline);
    let source_type = source_type.to_string();
    let issue_id = IssueId::new(format!("issue_{source_type}_{}", Timestamp::now().to_rfc3339().unwrap_or_default()));
    let issue_id_for_run = issue_id.clone();

    let outcome = tokio::task::spawn_blocking(move || {
        pipeline.orchestrator.run_cycle(issue_id_for_run, &source_type, &raw_data, merchant_context.as_ref(), Timestamp::now())
    })
    .await
    .map_err(|err| ApiError::response(StatusCode::INTERNAL_SERVER_ERROR, "task_join_failed", err.to_string()))?
    .map_err(|err| ApiError::response(StatusCode::BAD_REQUEST, "ingest_failed", err.to_string()))?;

    let message = match &outcome {
        CycleOutcome::Completed(_) => "signal processed",
        CycleOutcome::PendingApproval(_) => "signal processed, decision pending approval",
    };
    Ok(Json(json!({"status": "accepted", "message": message, "signal_id": issue_id.as_str()})))
}

// ============================================================================
// SECTION: Issue Query
// ============================================================================

/// Query parameters accepted by the issue-listing endpoint.
#[derive(Debug, Deserialize, Default)]
struct IssueListQuery {
    status: Option<String>,
    #[serde(default)]
    offset: usize,
    #[serde(default = "default_limit")]
    limit: usize,
}

const fn default_limit() -> usize {
    50
}

async fn list_issues(State(state): State<AppState>, Query(query): Query<IssueListQuery>) -> Result<Json<Value>, (StatusCode, Json<ApiError>)> {
    let ids = state
        .pipeline
        .store
        .list_open()
        .map_err(|err| ApiError::response(StatusCode::INTERNAL_SERVER_ERROR, "store_error", err.to_string()))?;

    let mut issues = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(state) = state_or_none(&state, &id)? {
            issues.push(state);
        }
    }

    if let Some(status) = &query.status {
        issues.retain(|issue: &IssueState| format!("{:?}", issue.status).eq_ignore_ascii_case(status));
    }

    let total = issues.len();
    let page: Vec<_> = issues.into_iter().skip(query.offset).take(query.limit).collect();
    Ok(Json(json!({"issues": page, "total": total, "offset": query.offset, "limit": query.limit})))
}

fn state_or_none(state: &AppState, id: &IssueId) -> Result<Option<IssueState>, (StatusCode, Json<ApiError>)> {
    state.pipeline.store.load(id).map_err(|err| ApiError::response(StatusCode::INTERNAL_SERVER_ERROR, "store_error", err.to_string()))
}

async fn get_issue(State(state): State<AppState>, Path(issue_id): Path<String>) -> Result<Json<IssueState>, (StatusCode, Json<ApiError>)> {
    let id = IssueId::new(issue_id.clone());
    let issue = state_or_none(&state, &id)?.ok_or_else(|| ApiError::response(StatusCode::NOT_FOUND, "issue_not_found", format!("no issue {issue_id}")))?;
    Ok(Json(issue))
}

async fn get_audit_chain(State(state): State<AppState>, Path(issue_id): Path<String>) -> Result<Json<Vec<AuditEntry>>, (StatusCode, Json<ApiError>)> {
    let id = IssueId::new(issue_id);
    let chain = state.pipeline.store.load_chain(&id).map_err(|err| ApiError::response(StatusCode::INTERNAL_SERVER_ERROR, "store_error", err.to_string()))?;
    Ok(Json(chain))
}

// ============================================================================
// SECTION: Approvals
// ============================================================================

async fn list_approvals(State(state): State<AppState>) -> Result<Json<Value>, (StatusCode, Json<ApiError>)> {
    let ids = state.pipeline.store.list_open().map_err(|err| ApiError::response(StatusCode::INTERNAL_SERVER_ERROR, "store_error", err.to_string()))?;
    let mut pending = Vec::new();
    for id in ids {
        if let Some(issue) = state_or_none(&state, &id)? {
            if issue.status == IssueStatus::PendingApproval {
                pending.push(issue);
            }
        }
    }
    Ok(Json(json!({"approvals": pending})))
}

/// Body accepted by the approve/reject endpoints.
#[derive(Debug, Deserialize)]
struct ApprovalDecisionBody {
    operator_id: String,
    #[serde(default)]
    feedback: Option<String>,
}

async fn approve_issue(
    State(state): State<AppState>,
    Path(issue_id): Path<String>,
    Json(body): Json<ApprovalDecisionBody>,
) -> Result<Json<Value>, (StatusCode, Json<ApiError>)> {
    let id = IssueId::new(issue_id);
    let pipeline = Arc::clone(&state.pipeline);
    let result = tokio::task::spawn_blocking(move || pipeline.orchestrator.approve(&id, &body.operator_id, body.feedback.as_deref(), Timestamp::now()))
        .await
        .map_err(|err| ApiError::response(StatusCode::INTERNAL_SERVER_ERROR, "task_join_failed", err.to_string()))?
        .map_err(orchestrator_error_response)?;

    Ok(Json(json!({"status": "approved", "success": result.success, "error_message": result.error_message})))
}

async fn reject_issue(
    State(state): State<AppState>,
    Path(issue_id): Path<String>,
    Json(body): Json<ApprovalDecisionBody>,
) -> Result<Json<Value>, (StatusCode, Json<ApiError>)> {
    let id = IssueId::new(issue_id);
    let pipeline = Arc::clone(&state.pipeline);
    tokio::task::spawn_blocking(move || pipeline.orchestrator.reject(&id, &body.operator_id, body.feedback.as_deref(), Timestamp::now()))
        .await
        .map_err(|err| ApiError::response(StatusCode::INTERNAL_SERVER_ERROR, "task_join_failed", err.to_string()))?
        .map_err(orchestrator_error_response)?;

    Ok(Json(json!({"status": "rejected"})))
}

fn orchestrator_error_response(error: incident_pipeline::OrchestratorError) -> (StatusCode, Json<ApiError>) {
    match error {
        incident_pipeline::OrchestratorError::NoPendingApproval(_) => ApiError::response(StatusCode::BAD_REQUEST, "not_pending_approval", error.to_string()),
        other => ApiError::response(StatusCode::INTERNAL_SERVER_ERROR, "orchestrator_error", other.to_string()),
    }
}

// ============================================================================
// SECTION: Metrics
// ============================================================================

/// Lightweight metrics computed from current issue state. The external
/// metrics contract covers performance, deflection, and calibration
/// dimensions; this endpoint reports the subset derivable from stored issue
/// state without a separate metrics pipeline.
async fn metrics(State(state): State<AppState>) -> Result<Json<Value>, (StatusCode, Json<ApiError>)> {
    let ids = state.pipeline.store.list_open().map_err(|err| ApiError::response(StatusCode::INTERNAL_SERVER_ERROR, "store_error", err.to_string()))?;
    let mut automated = 0usize;
    let mut escalated = 0usize;
    for id in &ids {
        if let Some(issue) = state_or_none(&state, id)? {
            if issue.status == IssueStatus::PendingApproval {
                escalated += 1;
            } else if issue.status == IssueStatus::ActionExecuted {
                automated += 1;
            }
        }
    }
    Ok(Json(json!({
        "performance": {"active_issue_count": ids.len()},
        "deflection": {"automated": automated, "escalated": escalated},
    })))
}
