// incident-cli/src/settings.rs
// ============================================================================
// Module: Runtime Provider Settings
// Description: Environment-sourced settings for backends `incident.toml`
//              does not model: database path, provider base URLs, and the
//              LLM API key.
// Purpose: Keep secrets and deployment-specific endpoints out of the
//          checked-in pipeline-tuning config, matching how the teacher
//          separated server bind policy from scenario configuration.
// Dependencies: Standard library.
// ============================================================================

//! ## Overview
//! `incident.toml` (loaded via [`incident_config::IncidentConfig`]) governs
//! pipeline tuning: windows, thresholds, retry policy, webhook secrets. It
//! says nothing about where the `SQLite` file lives or which host the LLM,
//! search index, ticketing, and notification providers run on — those vary
//! per deployment and belong in the environment, not a committed file.

use std::env;
use std::path::PathBuf;

/// Default path for the `SQLite` incident store.
const DEFAULT_DB_PATH: &str = "incident.sqlite3";
/// Default base URL for the Claude Messages API.
const DEFAULT_LLM_BASE_URL: &str = "https://api.anthropic.com";
/// Default Claude model identifier.
const DEFAULT_LLM_MODEL: &str = "claude-3-5-sonnet-20241022";
/// Default provider request timeout, in milliseconds.
const DEFAULT_PROVIDER_TIMEOUT_MS: u64 = 10_000;
/// Default HTTP bind address for the `serve` command.
const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";

/// Deployment settings read from the environment at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Path to the `SQLite` incident store file.
    pub db_path: PathBuf,
    /// Address the HTTP ingestion server binds to.
    pub bind_addr: String,
    /// Claude Messages API base URL.
    pub llm_base_url: String,
    /// Claude API key. Empty when unset; callers in `serve` fail closed on
    /// an empty key rather than issuing unauthenticated requests.
    pub llm_api_key: String,
    /// Claude model identifier.
    pub llm_model: String,
    /// Base URL of the similarity search index.
    pub search_index_base_url: String,
    /// Base URL of the ticketing backend.
    pub ticketing_base_url: String,
    /// Base URL of the notification backend.
    pub notification_base_url: String,
    /// Shared request timeout for all HTTP-backed providers, in milliseconds.
    pub provider_timeout_ms: u64,
}

impl Settings {
    /// Reads settings from the environment, falling back to local-development
    /// defaults for anything unset.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            db_path: env::var("INCIDENT_DB_PATH").map_or_else(|_| PathBuf::from(DEFAULT_DB_PATH), PathBuf::from),
            bind_addr: env::var("INCIDENT_BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string()),
            llm_base_url: env::var("INCIDENT_LLM_BASE_URL").unwrap_or_else(|_| DEFAULT_LLM_BASE_URL.to_string()),
            llm_api_key: env::var("INCIDENT_LLM_API_KEY").unwrap_or_default(),
            llm_model: env::var("INCIDENT_LLM_MODEL").unwrap_or_else(|_| DEFAULT_LLM_MODEL.to_string()),
            search_index_base_url: env::var("INCIDENT_SEARCH_INDEX_URL").unwrap_or_else(|_| "http://localhost:9200".to_string()),
            ticketing_base_url: env::var("INCIDENT_TICKETING_URL").unwrap_or_else(|_| "http://localhost:9201".to_string()),
            notification_base_url: env::var("INCIDENT_NOTIFICATION_URL").unwrap_or_else(|_| "http://localhost:9202".to_string()),
            provider_timeout_ms: env::var("INCIDENT_PROVIDER_TIMEOUT_MS")
                .ok()
                .and_then(|value| value.parse().ok())
                .unwrap_or(DEFAULT_PROVIDER_TIMEOUT_MS),
        }
    }
}
