// incident-pipeline/src/decision.rs
// ============================================================================
// Module: Decision Engine
// Description: Deterministic category-to-action routing, risk assessment,
//              and approval-requirement determination.
// Purpose: Turn a root-cause analysis plus context into a single Decision,
//          with Safe Mode unconditionally forcing operator approval.
// Dependencies: incident-core, incident-safety
// ============================================================================

//! ## Overview
//! [`DecisionEngine::decide`] routes each of the four closed
//! [`RootCauseCategory`] values to its primary action, renders
//! action-specific parameters from the analysis and context, then runs
//! [`DecisionEngine::assess_risk`] to set the final risk level and approval
//! requirement. Safe Mode, when active, overrides the computed approval
//! requirement unconditionally — every decision requires approval.

use std::sync::Arc;

use serde_json::Value;

use incident_core::ActionType;
use incident_core::AlternativeConsidered;
use incident_core::ContextMap;
use incident_core::Decision;
use incident_core::IssueId;
use incident_core::RiskLevel;
use incident_core::RootCauseAnalysis;
use incident_core::RootCauseCategory;
use incident_core::Timestamp;
use incident_safety::SafeModeManager;

/// Configuration values accepted as a safe, reversible config change for
/// the `config_error` auto-fix path.
const SAFE_CONFIG_TYPES: [&str; 4] = ["webhook_url", "api_timeout", "retry_count", "log_level"];
/// Minimum confidence for the `config_error` category to auto-fix instead
/// of falling back to support guidance.
const AUTO_FIX_MIN_CONFIDENCE: f64 = 0.8;
/// Below this confidence, risk assessment adds a `low_confidence` factor and
/// approval is always required.
const LOW_CONFIDENCE_THRESHOLD: f64 = 0.7;

fn context_str<'a>(context: &'a ContextMap, key: &str) -> Option<&'a str> {
    context.get(key).and_then(Value::as_str)
}

fn context_bool(context: &ContextMap, key: &str) -> bool {
    context.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn context_value<'a>(context: &'a ContextMap, key: &str) -> Option<&'a Value> {
    context.get(key)
}

fn context_str_list(context: &ContextMap, key: &str) -> Vec<String> {
    context
        .get(key)
        .and_then(Value::as_array)
        .map(|values| values.iter().filter_map(|value| value.as_str().map(str::to_string)).collect())
        .unwrap_or_default()
}

fn affected_merchants(context: &ContextMap) -> Vec<String> {
    let merchants = context_str_list(context, "affected_merchants");
    if merchants.is_empty() {
        context_str(context, "merchant_id").map(str::to_string).into_iter().collect()
    } else {
        merchants
    }
}

/// Risk factors contributing to a decision's final [`RiskLevel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiskAssessment {
    /// Final risk level.
    pub risk_level: RiskLevel,
    /// Named factors that contributed to the level.
    pub risk_factors: Vec<String>,
    /// Whether the decision requires operator approval, before any Safe
    /// Mode override.
    pub requires_approval: bool,
}

/// Routes root-cause analyses to decisions and assesses their risk.
pub struct DecisionEngine {
    safe_mode: Arc<SafeModeManager>,
}

impl DecisionEngine {
    /// Builds a decision engine consulting `safe_mode` for its unconditional
    /// approval override.
    #[must_use]
    pub fn new(safe_mode: Arc<SafeModeManager>) -> Self {
        Self { safe_mode }
    }

    /// Routes `analysis` to a [`Decision`] for `issue_id`, given `context`.
    #[must_use]
    pub fn decide(&self, analysis: &RootCauseAnalysis, context: &ContextMap, issue_id: IssueId, now: Timestamp) -> Decision {
        let mut decision = match analysis.category {
            RootCauseCategory::MigrationMisstep => self.handle_migration_misstep(analysis, context, issue_id.clone(), now),
            RootCauseCategory::PlatformRegression => self.handle_platform_regression(analysis, context, issue_id.clone(), now),
            RootCauseCategory::DocumentationGap => self.handle_documentation_gap(analysis, context, issue_id.clone(), now),
            RootCauseCategory::ConfigError => self.handle_config_error(analysis, context, issue_id, now),
        };

        let assessment = self.assess_risk(&decision, context);
        decision.risk_level = assessment.risk_level;
        decision.requires_approval = self.safe_mode.is_active() || assessment.requires_approval;
        decision
    }

    fn handle_migration_misstep(&self, analysis: &RootCauseAnalysis, context: &ContextMap, issue_id: IssueId, now: Timestamp) -> Decision {
        let guidance = render_guidance(analysis);
        let mut parameters = base_support_parameters(context, guidance);
        parameters.insert("recommended_actions".to_string(), Value::from(analysis.recommended_actions.clone()));

        new_decision(
            issue_id,
            ActionType::SupportGuidance,
            analysis.confidence,
            format!("Migration misstep detected. Providing guidance to merchant: {}", analysis.reasoning),
            "Merchant will receive step-by-step guidance to resolve the issue".to_string(),
            parameters,
            vec![AlternativeConsidered {
                hypothesis: "proactive_communication".to_string(),
                reason_rejected: "Issue already reported via ticket, no need for proactive outreach".to_string(),
            }],
            now,
        )
    }

    fn handle_platform_regression(&self, analysis: &RootCauseAnalysis, context: &ContextMap, issue_id: IssueId, now: Timestamp) -> Decision {
        let mut parameters = BTreeMapBuilder::new();
        parameters.insert("title", Value::from(format!("Platform Regression: {}", context_str(context, "error_message").unwrap_or("Unknown error"))));
        parameters.insert("description", Value::from(render_escalation_description(analysis, context)));
        parameters.insert("priority", Value::from(escalation_priority(context).as_str()));
        parameters.insert("affected_merchants", Value::from(affected_merchants(context)));
        parameters.insert("signals", Value::from(context_str_list(context, "signal_ids")));
        parameters.insert("patterns", Value::from(context_str_list(context, "pattern_ids")));

        new_decision(
            issue_id,
            ActionType::EngineeringEscalation,
            analysis.confidence,
            format!("Platform regression detected. Escalating to engineering: {}", analysis.reasoning),
            "Engineering team will investigate and fix the platform bug".to_string(),
            parameters.build(),
            vec![AlternativeConsidered {
                hypothesis: "temporary_mitigation".to_string(),
                reason_rejected: "Platform bug requires a code fix, not a configuration change".to_string(),
            }],
            now,
        )
    }

    fn handle_documentation_gap(&self, analysis: &RootCauseAnalysis, context: &ContextMap, issue_id: IssueId, now: Timestamp) -> Decision {
        let mut parameters = BTreeMapBuilder::new();
        parameters.insert("section", Value::from(context_str(context, "documentation_section").unwrap_or("migration_guide")));
        parameters.insert("issue_description", Value::from(analysis.reasoning.clone()));
        parameters.insert("suggested_content", Value::from(render_doc_suggestion(analysis)));
        if let Some(merchant_id) = context_str(context, "merchant_id") {
            parameters.insert("merchant_id", Value::from(merchant_id));
        }
        parameters.insert("related_signals", Value::from(context_str_list(context, "signal_ids")));

        new_decision(
            issue_id,
            ActionType::DocumentationUpdate,
            analysis.confidence,
            format!("Documentation gap identified. Creating update request: {}", analysis.reasoning),
            "Documentation will be updated to prevent future confusion".to_string(),
            parameters.build(),
            vec![AlternativeConsidered {
                hypothesis: "support_guidance".to_string(),
                reason_rejected: "Also needed: immediate guidance is provided while the doc update lands".to_string(),
            }],
            now,
        )
    }

    fn handle_config_error(&self, analysis: &RootCauseAnalysis, context: &ContextMap, issue_id: IssueId, now: Timestamp) -> Decision {
        if can_auto_fix_config(analysis, context) {
            let resource = context_str(context, "affected_resource").unwrap_or_default().to_lowercase();
            let resource_type = SAFE_CONFIG_TYPES
                .iter()
                .find(|safe_type| resource.contains(*safe_type))
                .copied()
                .unwrap_or("webhook_url");
            let resource_id = context_str(context, "merchant_id").unwrap_or("system");

            let mut parameters = BTreeMapBuilder::new();
            parameters.insert("config_change", render_config_fix(context));
            if let Some(merchant_id) = context_str(context, "merchant_id") {
                parameters.insert("merchant_id", Value::from(merchant_id));
            }
            if let Some(resource) = context_str(context, "affected_resource") {
                parameters.insert("resource", Value::from(resource));
            }
            parameters.insert("validation_required", Value::from(true));
            parameters.insert("resource_type", Value::from(resource_type));
            parameters.insert("resource_id", Value::from(resource_id));
            parameters.insert(
                "current_config",
                context_value(context, "current_config").cloned().unwrap_or_else(|| Value::Object(serde_json::Map::new())),
            );
            parameters.insert(
                "config_changes",
                context_value(context, "proposed_config_changes").cloned().unwrap_or_else(|| Value::Object(serde_json::Map::new())),
            );
            parameters.insert("reason", Value::from(analysis.reasoning.clone()));

            return new_decision(
                issue_id,
                ActionType::TemporaryMitigation,
                analysis.confidence,
                format!("Configuration error detected with high confidence. Applying automatic fix: {}", analysis.reasoning),
                "Configuration will be corrected automatically, resolving the issue".to_string(),
                parameters.build(),
                vec![AlternativeConsidered {
                    hypothesis: "support_guidance".to_string(),
                    reason_rejected: "High confidence and a known-safe resource allow an automatic fix".to_string(),
                }],
                now,
            );
        }

        let guidance = render_config_guidance(analysis);
        let mut parameters = base_support_parameters(context, guidance);
        parameters.insert("recommended_actions".to_string(), Value::from(analysis.recommended_actions.clone()));

        new_decision(
            issue_id,
            ActionType::SupportGuidance,
            analysis.confidence,
            format!("Configuration error detected. Providing guidance for manual correction: {}", analysis.reasoning),
            "Merchant will receive guidance to correct their configuration".to_string(),
            parameters,
            vec![AlternativeConsidered {
                hypothesis: "temporary_mitigation".to_string(),
                reason_rejected: "Confidence too low, or the affected resource is not in the known-safe set, for an automatic fix".to_string(),
            }],
            now,
        )
    }

    /// Computes risk factors and a risk level for `decision` given `context`,
    /// per the spec's fixed factor table. Does not apply the Safe Mode
    /// override; [`DecisionEngine::decide`] does that afterward.
    #[must_use]
    pub fn assess_risk(&self, decision: &Decision, context: &ContextMap) -> RiskAssessment {
        let mut risk_factors = Vec::new();

        let affects_checkout = context_bool(context, "affects_checkout");
        let affects_payment = context_bool(context, "affects_payment");
        if affects_checkout {
            risk_factors.push("revenue_impact".to_string());
        }
        if affects_payment {
            risk_factors.push("payment_impact".to_string());
        }
        if decision.action_type == ActionType::TemporaryMitigation {
            risk_factors.push("config_change".to_string());
        }
        if decision.confidence < LOW_CONFIDENCE_THRESHOLD {
            risk_factors.push("low_confidence".to_string());
        }
        if affected_merchants(context).len() > 1 {
            risk_factors.push("multi_merchant_impact".to_string());
        }
        if context_str(context, "severity") == Some("critical") {
            risk_factors.push("critical_severity".to_string());
        }

        let risk_level = if affects_checkout || affects_payment {
            RiskLevel::Critical
        } else if risk_factors.len() >= 2 {
            RiskLevel::High
        } else if risk_factors.len() == 1 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        };

        let requires_approval = matches!(risk_level, RiskLevel::High | RiskLevel::Critical)
            || decision.confidence < LOW_CONFIDENCE_THRESHOLD
            || decision.action_type == ActionType::TemporaryMitigation;

        RiskAssessment {
            risk_level,
            risk_factors,
            requires_approval,
        }
    }
}

/// Escalation priority from `(severity, |affected_merchants|)`.
#[must_use]
fn escalation_priority(context: &ContextMap) -> String {
    let severity = context_str(context, "severity").unwrap_or("medium");
    let affected_count = affected_merchants(context).len();
    if severity == "critical" || affected_count > 5 {
        "critical".to_string()
    } else if severity == "high" || affected_count > 2 {
        "high".to_string()
    } else {
        "medium".to_string()
    }
}

/// Auto-fix conditions (all required): confidence ≥ 0.8, not
/// affects_checkout, not affects_payment, exactly one affected merchant,
/// and the affected resource is in the known-safe set.
fn can_auto_fix_config(analysis: &RootCauseAnalysis, context: &ContextMap) -> bool {
    if analysis.confidence < AUTO_FIX_MIN_CONFIDENCE {
        return false;
    }
    if context_bool(context, "affects_checkout") || context_bool(context, "affects_payment") {
        return false;
    }
    if affected_merchants(context).len() != 1 {
        return false;
    }
    let resource = context_str(context, "affected_resource").unwrap_or_default().to_lowercase();
    SAFE_CONFIG_TYPES.iter().any(|safe_type| resource.contains(safe_type))
}

fn render_guidance(analysis: &RootCauseAnalysis) -> String {
    let actions = analysis.recommended_actions.iter().map(|action| format!("- {action}")).collect::<Vec<_>>().join("\n");
    format!(
        "Based on our analysis, we've identified the following issue:\n\n{}\n\nRecommended actions:\n{actions}\n\nIf you need further assistance, please don't hesitate to reach out to our support team.",
        analysis.reasoning
    )
}

fn render_config_guidance(analysis: &RootCauseAnalysis) -> String {
    let actions = analysis.recommended_actions.iter().enumerate().map(|(index, action)| format!("{}. {action}", index + 1)).collect::<Vec<_>>().join("\n");
    format!(
        "We've detected a configuration issue that needs your attention:\n\n{}\n\nTo resolve this issue:\n{actions}\n\nPlease review your configuration and make the necessary changes. If you need help, our support team is here to assist.",
        analysis.reasoning
    )
}

fn render_escalation_description(analysis: &RootCauseAnalysis, context: &ContextMap) -> String {
    let evidence = analysis.evidence.iter().map(|item| format!("- {item}")).collect::<Vec<_>>().join("\n");
    format!(
        "Platform Regression Detected\n\nRoot Cause Analysis:\n{}\n\nEvidence:\n{evidence}\n\nAffected Merchant(s): {}\nMigration Stage: {}\nSeverity: {}\n\nSignals: {}\nPatterns: {}",
        analysis.reasoning,
        context_str(context, "merchant_id").unwrap_or("unknown"),
        context_str(context, "migration_stage").unwrap_or("Unknown"),
        context_str(context, "severity").unwrap_or("Unknown"),
        context_str_list(context, "signal_ids").join(", "),
        context_str_list(context, "pattern_ids").join(", "),
    )
}

fn render_doc_suggestion(analysis: &RootCauseAnalysis) -> String {
    let actions = analysis.recommended_actions.iter().map(|action| format!("- {action}")).collect::<Vec<_>>().join("\n");
    format!(
        "Suggested documentation update:\n\nIssue: {}\n\nRecommended content to add:\n{actions}\n\nThis will help merchants avoid similar issues in the future.",
        analysis.reasoning
    )
}

fn render_config_fix(context: &ContextMap) -> Value {
    let mut fix = BTreeMapBuilder::new();
    if let Some(resource) = context_str(context, "affected_resource") {
        fix.insert("resource", Value::from(resource));
    }
    fix.insert("change_type", Value::from("update"));
    fix.insert("validation_rules", Value::from(vec!["syntax_check", "connectivity_test"]));
    fix.insert("rollback_on_failure", Value::from(true));
    Value::Object(fix.build().into_iter().collect())
}

fn base_support_parameters(context: &ContextMap, message: String) -> std::collections::BTreeMap<String, Value> {
    let mut parameters = BTreeMapBuilder::new();
    parameters.insert("message", Value::from(message));
    if let Some(merchant_id) = context_str(context, "merchant_id") {
        parameters.insert("merchant_id", Value::from(merchant_id));
    }
    parameters.insert("support_system", Value::from(context_str(context, "support_system").unwrap_or("zendesk")));
    if let Some(ticket_id) = context_str(context, "ticket_id") {
        parameters.insert("ticket_id", Value::from(ticket_id));
    }
    parameters.build()
}

#[allow(clippy::too_many_arguments, reason = "mirrors the fixed Decision schema one-for-one")]
fn new_decision(
    issue_id: IssueId,
    action_type: ActionType,
    confidence: f64,
    reasoning: String,
    estimated_outcome: String,
    parameters: std::collections::BTreeMap<String, Value>,
    alternatives_considered: Vec<AlternativeConsidered>,
    now: Timestamp,
) -> Decision {
    Decision {
        decision_id: format!("dec_{issue_id}_{}_{}", now.as_offset().unix_timestamp(), uuid::Uuid::new_v4()).into(),
        issue_id,
        action_type,
        risk_level: RiskLevel::Low,
        requires_approval: false,
        confidence,
        reasoning,
        estimated_outcome,
        parameters,
        alternatives_considered,
    }
}

/// Small ordered-insertion builder so each handler reads as a flat list of
/// `key, value` pairs instead of repeated `BTreeMap::new()` boilerplate.
struct BTreeMapBuilder(std::collections::BTreeMap<String, Value>);

impl BTreeMapBuilder {
    fn new() -> Self {
        Self(std::collections::BTreeMap::new())
    }

    fn insert(&mut self, key: &str, value: Value) -> &mut Self {
        self.0.insert(key.to_string(), value);
        self
    }

    fn build(self) -> std::collections::BTreeMap<String, Value> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use incident_core::AlternativeConsidered;
    use incident_core::RiskLevel;
    use incident_core::RootCauseAnalysis;
    use incident_core::RootCauseCategory;
    use incident_core::Timestamp;
    use incident_safety::SafeModeManager;
    use serde_json::json;
    use std::collections::BTreeMap;

    use super::DecisionEngine;

    fn analysis(category: RootCauseCategory, confidence: f64) -> RootCauseAnalysis {
        RootCauseAnalysis {
            category,
            confidence,
            reasoning: "reasoning".to_string(),
            evidence: vec!["evidence".to_string()],
            recommended_actions: vec!["do the thing".to_string()],
            alternatives_considered: vec![AlternativeConsidered {
                hypothesis: "other".to_string(),
                reason_rejected: "rejected".to_string(),
            }],
        }
    }

    fn engine() -> (DecisionEngine, Arc<SafeModeManager>) {
        let safe_mode = Arc::new(SafeModeManager::new());
        (DecisionEngine::new(Arc::clone(&safe_mode)), safe_mode)
    }

    #[test]
    fn migration_misstep_routes_to_support_guidance() {
        let (engine, _safe_mode) = engine();
        let context: BTreeMap<String, serde_json::Value> = BTreeMap::from([("merchant_id".to_string(), json!("merchant-1"))]);
        let decision = engine.decide(&analysis(RootCauseCategory::MigrationMisstep, 0.8), &context, "issue-1".into(), Timestamp::now());
        assert_eq!(decision.action_type, incident_core::ActionType::SupportGuidance);
        assert_eq!(decision.risk_level, RiskLevel::Low);
        assert!(!decision.requires_approval);
    }

    #[test]
    fn config_error_auto_fixes_when_conditions_are_met() {
        let (engine, _safe_mode) = engine();
        let context: BTreeMap<String, serde_json::Value> = BTreeMap::from([
            ("merchant_id".to_string(), json!("merchant-1")),
            ("affected_resource".to_string(), json!("webhook_url")),
        ]);
        let decision = engine.decide(&analysis(RootCauseCategory::ConfigError, 0.9), &context, "issue-1".into(), Timestamp::now());
        assert_eq!(decision.action_type, incident_core::ActionType::TemporaryMitigation);
        assert!(decision.requires_approval, "temporary_mitigation always requires approval");
    }

    #[test]
    fn config_error_falls_back_to_guidance_below_auto_fix_confidence() {
        let (engine, _safe_mode) = engine();
        let context: BTreeMap<String, serde_json::Value> = BTreeMap::from([("affected_resource".to_string(), json!("webhook_url"))]);
        let decision = engine.decide(&analysis(RootCauseCategory::ConfigError, 0.5), &context, "issue-1".into(), Timestamp::now());
        assert_eq!(decision.action_type, incident_core::ActionType::SupportGuidance);
    }

    #[test]
    fn checkout_impact_forces_critical_risk_and_approval() {
        let (engine, _safe_mode) = engine();
        let context: BTreeMap<String, serde_json::Value> = BTreeMap::from([("affects_checkout".to_string(), json!(true))]);
        let decision = engine.decide(&analysis(RootCauseCategory::MigrationMisstep, 0.95), &context, "issue-1".into(), Timestamp::now());
        assert_eq!(decision.risk_level, RiskLevel::Critical);
        assert!(decision.requires_approval);
    }

    #[test]
    fn safe_mode_forces_approval_regardless_of_risk() {
        let (engine, safe_mode) = engine();
        safe_mode.activate(incident_safety::SafeModeReason::Manual("test".to_string()), Timestamp::now());
        let context: BTreeMap<String, serde_json::Value> = BTreeMap::new();
        let decision = engine.decide(&analysis(RootCauseCategory::MigrationMisstep, 0.95), &context, "issue-1".into(), Timestamp::now());
        assert_eq!(decision.risk_level, RiskLevel::Low);
        assert!(decision.requires_approval, "safe mode overrides the computed approval requirement");
    }

    #[test]
    fn platform_regression_escalation_priority_reflects_severity_and_reach() {
        let (engine, _safe_mode) = engine();
        let context: BTreeMap<String, serde_json::Value> = BTreeMap::from([
            ("severity".to_string(), json!("critical")),
            ("affected_merchants".to_string(), json!(["m1", "m2"])),
        ]);
        let decision = engine.decide(&analysis(RootCauseCategory::PlatformRegression, 0.9), &context, "issue-1".into(), Timestamp::now());
        assert_eq!(decision.action_type, incident_core::ActionType::EngineeringEscalation);
        let priority = decision.parameters.get("priority").and_then(serde_json::Value::as_str);
        assert_eq!(priority, Some("critical"));
    }
}
