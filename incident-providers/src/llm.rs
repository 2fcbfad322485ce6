// incident-providers/src/llm.rs
// ============================================================================
// Module: Claude LLM Provider
// Description: Chat-completion client for the root-cause analyzer's primary
//              (LLM) path.
// Purpose: Translate incident_core::LlmClient calls into Claude Messages API
//          requests at a deterministic (low) temperature.
// Dependencies: incident-core, reqwest, serde_json
// ============================================================================

//! ## Overview
//! The analyzer hands this client an already-built system and user prompt;
//! it owns provider selection, authentication, and request/response
//! plumbing. Temperature is fixed low rather than configurable so that the
//! same signals tend to produce the same category across retries.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;

use incident_core::LlmClient;
use incident_core::LlmClientError;
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

/// Deterministic temperature used for every root-cause analysis request.
const ANALYSIS_TEMPERATURE: f64 = 0.0;
/// Anthropic API version header value this client speaks.
const ANTHROPIC_VERSION: &str = "2023-06-01";

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Configuration for the Claude-backed [`LlmClient`].
#[derive(Debug, Clone)]
pub struct ClaudeLlmConfig {
    /// Base URL of the Messages API, e.g. `https://api.anthropic.com`.
    pub base_url: String,
    /// API key sent as the `x-api-key` header.
    pub api_key: String,
    /// Model identifier, e.g. `claude-3-5-sonnet-20241022`.
    pub model: String,
    /// Maximum tokens requested in the completion.
    pub max_tokens: u32,
    /// Request timeout in milliseconds.
    pub timeout_ms: u64,
}

// ============================================================================
// SECTION: Client
// ============================================================================

/// `LlmClient` implementation backed by the Claude Messages API.
pub struct ClaudeLlmClient {
    /// Client configuration.
    config: ClaudeLlmConfig,
    /// Blocking HTTP client.
    client: Client,
}

impl ClaudeLlmClient {
    /// Builds a client from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`LlmClientError::Transport`] if the underlying HTTP client
    /// cannot be constructed.
    pub fn new(config: ClaudeLlmConfig) -> Result<Self, LlmClientError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|err| LlmClientError::Transport(err.to_string()))?;
        Ok(Self { config, client })
    }
}

impl LlmClient for ClaudeLlmClient {
    fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String, LlmClientError> {
        let request = MessagesRequest {
            model: &self.config.model,
            max_tokens: self.config.max_tokens,
            temperature: ANALYSIS_TEMPERATURE,
            system: system_prompt,
            messages: [Message { role: "user", content: user_prompt }],
        };
        let response = self
            .client
            .post(format!("{}/v1/messages", self.config.base_url))
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .map_err(classify_transport_error)?;
        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(LlmClientError::QuotaExceeded);
        }
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(LlmClientError::Transport(format!("http {status}: {body}")));
        }
        let body: Value =
            response.json().map_err(|err| LlmClientError::ParseError(err.to_string()))?;
        extract_text(&body)
    }
}

// ============================================================================
// SECTION: Wire Types
// ============================================================================

/// Request body for the Claude Messages API.
#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    /// Model identifier.
    model: &'a str,
    /// Maximum tokens to generate.
    max_tokens: u32,
    /// Sampling temperature.
    temperature: f64,
    /// System prompt.
    system: &'a str,
    /// Conversation turns; the analyzer only ever sends one user turn.
    messages: [Message<'a>; 1],
}

/// A single conversation turn.
#[derive(Debug, Serialize)]
struct Message<'a> {
    /// Turn role (`"user"` for analyzer requests).
    role: &'a str,
    /// Turn content.
    content: &'a str,
}

/// Minimal shape read out of a Messages API response.
#[derive(Debug, Deserialize)]
struct MessagesResponse {
    /// Ordered content blocks; the analyzer expects the first text block.
    content: Vec<ContentBlock>,
}

/// One content block of a Messages API response.
#[derive(Debug, Deserialize)]
struct ContentBlock {
    /// Block text, present for `"type": "text"` blocks.
    #[serde(default)]
    text: Option<String>,
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Maps a `reqwest` send failure to the appropriate [`LlmClientError`].
fn classify_transport_error(error: reqwest::Error) -> LlmClientError {
    if error.is_timeout() {
        LlmClientError::Timeout
    } else {
        LlmClientError::Transport(error.to_string())
    }
}

/// Pulls the first text block out of a parsed Messages API response.
fn extract_text(body: &Value) -> Result<String, LlmClientError> {
    let response: MessagesResponse = serde_json::from_value(body.clone())
        .map_err(|err| LlmClientError::ParseError(err.to_string()))?;
    response
        .content
        .into_iter()
        .find_map(|block| block.text)
        .ok_or_else(|| LlmClientError::ParseError("no text content block in response".to_string()))
}

// ============================================================================
// SECTION: Tests
// ============================================================================
