// incident-pipeline/src/analyzer/rule.rs
// ============================================================================
// Module: Rule-Based Root-Cause Analyzer
// Description: Deterministic, ordered-rule fallback for the root-cause
//              analyzer, used whenever the LLM path is unavailable.
// Purpose: Guarantee a valid RootCauseAnalysis even when the LLM circuit
//          breaker is open, the call times out, the response fails to
//          parse, or the account is over quota.
// Dependencies: incident-core
// ============================================================================

//! ## Overview
//! Seven ordered heuristics inspect the signal batch (and, for two of them,
//! the detected patterns) and return on the first match. A batch matching no
//! rule defaults to `migration_misstep` at low confidence. Every outcome
//! carries at least one evidence string and one rejected-alternative record,
//! and a fixed per-category list of recommended actions.

use incident_core::AlternativeConsidered;
use incident_core::Pattern;
use incident_core::RootCauseAnalysis;
use incident_core::RootCauseCategory;
use incident_core::Signal;
use incident_core::SignalSource;

const AUTH_KEYWORDS: [&str; 5] = ["401", "403", "unauthorized", "forbidden", "auth"];
const CONFIG_KEYWORDS: [&str; 5] = ["config", "configuration", "setting", "environment", "variable"];
const ENDPOINT_CODES: [&str; 2] = ["404", "405"];
const DOC_KEYWORDS: [&str; 7] = ["unclear", "missing", "documentation", "docs", "guide", "tutorial", "example"];

/// Frequency above which a pattern is considered evidence of a platform-wide
/// change, per Rule 4.
const HIGH_FREQUENCY_THRESHOLD: usize = 5;
/// Merchant count above which a pattern is considered cross-merchant
/// evidence, per Rule 6.
const CROSS_MERCHANT_THRESHOLD: usize = 3;

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    let lower = haystack.to_lowercase();
    needles.iter().any(|needle| lower.contains(needle))
}

fn matches_error_code_or_message(signal: &Signal, needles: &[&str]) -> bool {
    signal.error_code.as_deref().is_some_and(|code| contains_any(code, needles))
        || signal.error_message.as_deref().is_some_and(|message| contains_any(message, needles))
}

/// Runs the seven ordered rules against `signals` and `patterns`, returning
/// the first match (or the default) as a complete [`RootCauseAnalysis`].
///
/// Assumes `signals` is non-empty; the caller is responsible for rejecting
/// an empty batch before reaching this fallback.
#[must_use]
pub fn apply_rules(signals: &[Signal], patterns: &[Pattern]) -> RootCauseAnalysis {
    let auth_matches = signals.iter().filter(|signal| matches_error_code_or_message(signal, &AUTH_KEYWORDS)).count();
    if auth_matches > 0 {
        return finish(
            RootCauseCategory::MigrationMisstep,
            0.75,
            "Multiple authentication errors detected. This typically indicates incorrect API \
             credentials or missing authentication configuration during migration.",
            vec![format!("Found {auth_matches} authentication-related errors")],
        );
    }

    let config_matches = signals.iter().filter(|signal| signal.error_message.as_deref().is_some_and(|message| contains_any(message, &CONFIG_KEYWORDS))).count();
    if config_matches > 0 {
        return finish(
            RootCauseCategory::ConfigError,
            0.70,
            "Configuration-related errors detected. This suggests incorrect settings or \
             environment variables.",
            vec![format!("Found {config_matches} configuration-related errors")],
        );
    }

    let webhook_matches = signals.iter().filter(|signal| signal.source == SignalSource::WebhookFailure).count();
    if webhook_matches > 0 {
        return finish(
            RootCauseCategory::ConfigError,
            0.65,
            "Webhook failures detected. This typically indicates incorrect webhook URLs or \
             missing webhook configuration.",
            vec![format!("Found {webhook_matches} webhook failures")],
        );
    }

    let endpoint_matches = signals.iter().filter(|signal| signal.error_code.as_deref().is_some_and(|code| contains_any(code, &ENDPOINT_CODES))).count();
    if endpoint_matches > 0 {
        let evidence = vec![format!("Found {endpoint_matches} endpoint-related errors")];
        return if patterns.iter().any(|pattern| pattern.frequency() > HIGH_FREQUENCY_THRESHOLD) {
            finish(
                RootCauseCategory::PlatformRegression,
                0.68,
                "Multiple endpoint errors affecting many merchants. This suggests a platform API \
                 change or regression.",
                evidence,
            )
        } else {
            finish(
                RootCauseCategory::MigrationMisstep,
                0.65,
                "Endpoint errors detected. This may indicate incorrect API endpoint URLs in \
                 merchant configuration.",
                evidence,
            )
        };
    }

    let checkout_matches = signals.iter().filter(|signal| signal.source == SignalSource::CheckoutError).count();
    if checkout_matches > 0 {
        return finish(
            RootCauseCategory::MigrationMisstep,
            0.60,
            "Checkout errors detected. This typically indicates issues with payment gateway \
             configuration or checkout flow setup.",
            vec![format!("Found {checkout_matches} checkout errors")],
        );
    }

    let cross_merchant_patterns = patterns.iter().filter(|pattern| pattern.merchant_ids.len() > CROSS_MERCHANT_THRESHOLD).count();
    if cross_merchant_patterns > 0 {
        return finish(
            RootCauseCategory::PlatformRegression,
            0.70,
            "Issue affects multiple merchants simultaneously. This strongly suggests a \
             platform-wide regression or bug.",
            vec![format!("Found {cross_merchant_patterns} patterns affecting multiple merchants")],
        );
    }

    let doc_matches = signals.iter().filter(|signal| signal.error_message.as_deref().is_some_and(|message| contains_any(message, &DOC_KEYWORDS))).count();
    if doc_matches > 0 {
        return finish(
            RootCauseCategory::DocumentationGap,
            0.60,
            "Signals mention documentation issues. This suggests missing or unclear guidance in \
             documentation.",
            vec![format!("Found {doc_matches} documentation-related signals")],
        );
    }

    finish(
        RootCauseCategory::MigrationMisstep,
        0.50,
        "Unable to determine specific root cause with high confidence. Based on context, this \
         appears to be a merchant configuration issue during migration. Manual review \
         recommended.",
        vec!["No specific error patterns matched, defaulting to migration misstep".to_string()],
    )
}

fn finish(category: RootCauseCategory, confidence: f64, reasoning: &str, evidence: Vec<String>) -> RootCauseAnalysis {
    RootCauseAnalysis {
        category,
        confidence,
        reasoning: reasoning.to_string(),
        evidence,
        recommended_actions: recommended_actions(category),
        alternatives_considered: vec![AlternativeConsidered {
            hypothesis: "Other categories were considered".to_string(),
            reason_rejected: "Rule-based analysis selected the most likely category based on signal patterns".to_string(),
        }],
    }
}

/// Fixed per-category remediation list, independent of the evidence that
/// produced the category.
#[must_use]
pub fn recommended_actions(category: RootCauseCategory) -> Vec<String> {
    match category {
        RootCauseCategory::MigrationMisstep => vec![
            "Provide step-by-step guidance to merchant".to_string(),
            "Review merchant's migration checklist".to_string(),
            "Check API credentials and configuration".to_string(),
        ],
        RootCauseCategory::PlatformRegression => vec![
            "Escalate to engineering team".to_string(),
            "Check recent platform changes".to_string(),
            "Notify affected merchants".to_string(),
        ],
        RootCauseCategory::DocumentationGap => vec![
            "Update documentation with clearer instructions".to_string(),
            "Add examples and troubleshooting guide".to_string(),
            "Create FAQ entry".to_string(),
        ],
        RootCauseCategory::ConfigError => vec![
            "Review merchant configuration settings".to_string(),
            "Validate environment variables".to_string(),
            "Check webhook and API endpoint URLs".to_string(),
        ],
    }
}
