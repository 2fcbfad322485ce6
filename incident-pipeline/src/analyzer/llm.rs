// incident-pipeline/src/analyzer/llm.rs
// ============================================================================
// Module: LLM Root-Cause Analyzer
// Description: Wraps a backend-agnostic LLM client behind a circuit breaker,
//              falling back to the rule-based analyzer on any failure.
// Purpose: Produce the highest-quality root-cause analysis available while
//          never leaving an issue without one.
// Dependencies: incident-core, incident-safety, serde_json, thiserror
// ============================================================================

//! ## Overview
//! [`RootCauseAnalyzer`] builds a prompt from up to the first ten signals
//! (the rest summarized by count) plus every detected pattern, sends it to
//! the configured [`LlmClient`] at a fixed low temperature, and parses the
//! response directly as a [`RootCauseAnalysis`]. Any failure along that
//! path — an open breaker, a transport error, quota exhaustion, or a
//! response that fails to parse or validate — degrades the `llm` service
//! and falls through to [`rule::apply_rules`] instead of propagating.

use std::sync::Arc;

use thiserror::Error;

use incident_core::ContextMap;
use incident_core::LlmClient;
use incident_core::Pattern;
use incident_core::RootCauseAnalysis;
use incident_core::Signal;
use incident_core::Timestamp;
use incident_safety::CircuitBreaker;
use incident_safety::DegradationManager;
use incident_safety::Service;

use super::rule;

/// Signals beyond this count are summarized rather than individually
/// rendered in the analysis prompt.
const MAX_PROMPT_SIGNALS: usize = 10;
/// Fixed low temperature for deterministic, repeatable classification.
const ANALYSIS_TEMPERATURE: f64 = 0.3;

const SYSTEM_PROMPT: &str = r#"You are an expert system for diagnosing e-commerce platform migration issues.

Classify the issue into exactly one of: migration_misstep, platform_regression, documentation_gap, config_error.

- migration_misstep: the merchant made an error during migration (bad credentials, missed a step, wrong endpoint).
- platform_regression: a bug was introduced in the platform itself.
- documentation_gap: documentation is missing, unclear, or incorrect.
- config_error: the merchant's settings or configuration are wrong.

Respond with ONLY a valid JSON object, no markdown and no code fences, with these fields:
category, confidence (0.0-1.0), reasoning, evidence (list of strings),
alternatives_considered (list of {hypothesis, reason_rejected}), recommended_actions (list of strings).

If confidence would be below 0.7, say so explicitly in reasoning and note what additional
information would raise it."#;

/// Errors from [`RootCauseAnalyzer::analyze`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AnalyzeError {
    /// No signals were provided; there is nothing to analyze.
    #[error("at least one signal is required for root-cause analysis")]
    InvalidInput,
}

/// Root-cause analyzer combining an LLM primary path with a deterministic
/// rule-based fallback, per the spec's graceful-degradation contract.
pub struct RootCauseAnalyzer {
    llm: Arc<dyn LlmClient + Send + Sync>,
    breaker: CircuitBreaker,
    degradation: Arc<DegradationManager>,
}

impl RootCauseAnalyzer {
    /// Builds an analyzer around `llm`, guarded by a breaker with
    /// `failure_threshold` consecutive failures and `open_timeout_seconds`
    /// recovery timeout (spec default: 5 failures / 60s).
    #[must_use]
    pub fn new(llm: Arc<dyn LlmClient + Send + Sync>, failure_threshold: u32, open_timeout_seconds: u64, degradation: Arc<DegradationManager>) -> Self {
        Self {
            llm,
            breaker: CircuitBreaker::new("llm", failure_threshold, open_timeout_seconds),
            degradation,
        }
    }

    /// Analyzes `signals` and `patterns`, preferring the LLM and falling
    /// back to deterministic rules on any failure.
    ///
    /// # Errors
    ///
    /// Returns [`AnalyzeError::InvalidInput`] when `signals` is empty.
    pub fn analyze(&self, signals: &[Signal], patterns: &[Pattern], merchant_context: Option<&ContextMap>, now: Timestamp) -> Result<RootCauseAnalysis, AnalyzeError> {
        if signals.is_empty() {
            return Err(AnalyzeError::InvalidInput);
        }

        if self.breaker.try_acquire(now).is_err() {
            tracing::warn!("llm circuit breaker open, using rule-based fallback");
            self.degradation.mark_degraded(Service::Llm);
            return Ok(rule::apply_rules(signals, patterns));
        }

        let prompt = build_prompt(signals, patterns, merchant_context);
        match self.llm.complete(SYSTEM_PROMPT, &prompt) {
            Ok(response) => match parse_response(&response) {
                Ok(analysis) => {
                    self.breaker.record_success();
                    self.degradation.mark_healthy(Service::Llm);
                    Ok(analysis)
                }
                Err(reason) => {
                    tracing::warn!(reason = %reason, "llm response failed validation, using rule-based fallback");
                    self.breaker.record_failure(now);
                    self.degradation.mark_degraded(Service::Llm);
                    Ok(rule::apply_rules(signals, patterns))
                }
            },
            Err(error) => {
                tracing::warn!(error = %error, "llm call failed, using rule-based fallback");
                self.breaker.record_failure(now);
                self.degradation.mark_degraded(Service::Llm);
                Ok(rule::apply_rules(signals, patterns))
            }
        }
    }
}

fn build_prompt(signals: &[Signal], patterns: &[Pattern], merchant_context: Option<&ContextMap>) -> String {
    let mut prompt = String::new();

    if let Some(context) = merchant_context {
        prompt.push_str("## Merchant Context\n");
        for (key, value) in context {
            prompt.push_str(&format!("- {key}: {value}\n"));
        }
        prompt.push('\n');
    }

    prompt.push_str(&format!("## Signals ({} total)\n\n", signals.len()));
    for (index, signal) in signals.iter().take(MAX_PROMPT_SIGNALS).enumerate() {
        prompt.push_str(&format!("### Signal {}\n", index + 1));
        prompt.push_str(&format!("- Source: {}\n", signal.source.as_str()));
        prompt.push_str(&format!("- Severity: {:?}\n", signal.severity));
        if let Some(error_code) = &signal.error_code {
            prompt.push_str(&format!("- Error Code: {error_code}\n"));
        }
        if let Some(error_message) = &signal.error_message {
            prompt.push_str(&format!("- Error Message: {error_message}\n"));
        }
        if let Some(affected_resource) = &signal.affected_resource {
            prompt.push_str(&format!("- Affected Resource: {affected_resource}\n"));
        }
        prompt.push('\n');
    }
    if signals.len() > MAX_PROMPT_SIGNALS {
        prompt.push_str(&format!("... and {} more signals\n\n", signals.len() - MAX_PROMPT_SIGNALS));
    }

    if !patterns.is_empty() {
        prompt.push_str(&format!("## Detected Patterns ({} total)\n\n", patterns.len()));
        for (index, pattern) in patterns.iter().enumerate() {
            prompt.push_str(&format!("### Pattern {}\n", index + 1));
            prompt.push_str(&format!("- Type: {:?}\n", pattern.pattern_type));
            prompt.push_str(&format!("- Confidence: {:.2}\n", pattern.confidence));
            prompt.push_str(&format!("- Frequency: {}\n", pattern.frequency()));
            prompt.push_str(&format!("- Merchants Affected: {}\n\n", pattern.merchant_ids.len()));
        }
    }

    prompt.push_str("## Analysis Task\n\nIdentify the root cause of this issue from the signals and patterns above.\n");
    prompt
}

/// Strips any fenced code markers and parses the remaining text as a
/// [`RootCauseAnalysis`], then checks the invariants the spec guarantees.
fn parse_response(text: &str) -> Result<RootCauseAnalysis, String> {
    let mut trimmed = text.trim();
    if let Some(stripped) = trimmed.strip_prefix("```json") {
        trimmed = stripped;
    } else if let Some(stripped) = trimmed.strip_prefix("```") {
        trimmed = stripped;
    }
    if let Some(stripped) = trimmed.strip_suffix("```") {
        trimmed = stripped;
    }
    trimmed = trimmed.trim();

    let analysis: RootCauseAnalysis = serde_json::from_str(trimmed).map_err(|error| format!("invalid JSON response from llm: {error}"))?;

    if !(0.0..=1.0).contains(&analysis.confidence) {
        return Err(format!("confidence {} out of [0, 1]", analysis.confidence));
    }
    if analysis.reasoning.trim().is_empty() {
        return Err("empty reasoning".to_string());
    }
    if analysis.evidence.is_empty() {
        return Err("empty evidence".to_string());
    }
    if analysis.recommended_actions.is_empty() {
        return Err("empty recommended_actions".to_string());
    }

    Ok(analysis)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, reason = "test assertions read values that must be present")]

    use std::sync::Arc;
    use std::sync::Mutex;

    use incident_core::LlmClient;
    use incident_core::LlmClientError;
    use incident_core::MerchantId;
    use incident_core::RootCauseCategory;
    use incident_core::Severity;
    use incident_core::Signal;
    use incident_core::SignalSource;
    use incident_core::Timestamp;
    use incident_safety::DegradationManager;
    use incident_safety::Service;
    use std::collections::BTreeMap;

    use super::RootCauseAnalyzer;
    use super::parse_response;

    struct StubLlm {
        response: Mutex<Result<String, LlmClientError>>,
    }

    impl LlmClient for StubLlm {
        fn complete(&self, _system_prompt: &str, _user_prompt: &str) -> Result<String, LlmClientError> {
            #[allow(clippy::unwrap_used, reason = "mutex is never poisoned: no panics while held")]
            let mut guard = self.response.lock().unwrap();
            std::mem::replace(&mut *guard, Err(LlmClientError::Transport("drained".to_string())))
        }
    }

    fn signal() -> Signal {
        Signal {
            signal_id: "sig-1".into(),
            timestamp: Timestamp::now(),
            source: SignalSource::ApiFailure,
            raw_data: serde_json::json!({}),
            merchant_id: MerchantId::from("merchant-1"),
            migration_stage: None,
            affected_resource: None,
            severity: Severity::Medium,
            error_code: Some("500".to_string()),
            error_message: Some("timeout".to_string()),
            context: BTreeMap::new(),
        }
    }

    #[test]
    fn empty_signals_reject_with_invalid_input() {
        let llm = Arc::new(StubLlm { response: Mutex::new(Ok(String::new())) });
        let analyzer = RootCauseAnalyzer::new(llm, 5, 60, Arc::new(DegradationManager::new()));
        let result = analyzer.analyze(&[], &[], None, Timestamp::now());
        assert!(result.is_err());
    }

    #[test]
    fn successful_llm_response_is_parsed_and_marks_service_healthy() {
        let body = serde_json::json!({
            "category": "config_error",
            "confidence": 0.9,
            "reasoning": "clear configuration mismatch",
            "evidence": ["evidence one"],
            "alternatives_considered": [],
            "recommended_actions": ["fix config"],
        })
        .to_string();
        let llm = Arc::new(StubLlm { response: Mutex::new(Ok(body)) });
        let degradation = Arc::new(DegradationManager::new());
        let analyzer = RootCauseAnalyzer::new(llm, 5, 60, Arc::clone(&degradation));
        let analysis = analyzer.analyze(&[signal()], &[], None, Timestamp::now()).expect("analysis succeeds");
        assert_eq!(analysis.category, RootCauseCategory::ConfigError);
        assert!(!degradation.is_degraded(Service::Llm));
    }

    #[test]
    fn llm_transport_failure_falls_back_to_rule_based_analysis() {
        let llm = Arc::new(StubLlm { response: Mutex::new(Err(LlmClientError::Timeout)) });
        let degradation = Arc::new(DegradationManager::new());
        let analyzer = RootCauseAnalyzer::new(llm, 5, 60, Arc::clone(&degradation));
        let analysis = analyzer.analyze(&[signal()], &[], None, Timestamp::now()).expect("fallback still yields an analysis");
        assert!(!analysis.evidence.is_empty());
        assert!(degradation.is_degraded(Service::Llm));
    }

    #[test]
    fn malformed_json_response_falls_back_to_rule_based_analysis() {
        let llm = Arc::new(StubLlm { response: Mutex::new(Ok("not json".to_string())) });
        let degradation = Arc::new(DegradationManager::new());
        let analyzer = RootCauseAnalyzer::new(llm, 5, 60, Arc::clone(&degradation));
        let analysis = analyzer.analyze(&[signal()], &[], None, Timestamp::now()).expect("fallback still yields an analysis");
        assert!(!analysis.recommended_actions.is_empty());
        assert!(degradation.is_degraded(Service::Llm));
    }

    #[test]
    fn open_breaker_short_circuits_to_fallback_without_calling_llm() {
        let llm = Arc::new(StubLlm { response: Mutex::new(Err(LlmClientError::Transport("should not be reached".to_string()))) });
        let degradation = Arc::new(DegradationManager::new());
        let analyzer = RootCauseAnalyzer::new(llm, 1, 60, Arc::clone(&degradation));
        let now = Timestamp::now();
        // First call trips the breaker via the stubbed transport failure.
        let _ = analyzer.analyze(&[signal()], &[], None, now);
        let analysis = analyzer.analyze(&[signal()], &[], None, now).expect("fallback still yields an analysis");
        assert!(!analysis.evidence.is_empty());
    }

    #[test]
    fn fenced_response_is_stripped_before_parsing() {
        let body = serde_json::json!({
            "category": "documentation_gap",
            "confidence": 0.6,
            "reasoning": "docs are unclear",
            "evidence": ["evidence one"],
            "alternatives_considered": [],
            "recommended_actions": ["update docs"],
        })
        .to_string();
        let fenced = format!("```json\n{body}\n```");
        let analysis = parse_response(&fenced).expect("fenced response parses");
        assert_eq!(analysis.category, RootCauseCategory::DocumentationGap);
    }

    #[test]
    fn out_of_range_confidence_is_rejected() {
        let body = serde_json::json!({
            "category": "config_error",
            "confidence": 1.5,
            "reasoning": "reasoning",
            "evidence": ["evidence"],
            "alternatives_considered": [],
            "recommended_actions": ["action"],
        })
        .to_string();
        assert!(parse_response(&body).is_err());
    }
}
