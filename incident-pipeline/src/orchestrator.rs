// incident-pipeline/src/orchestrator.rs
// ============================================================================
// Module: Agent Orchestrator
// Description: Drives one issue through the canonical observe -> detect ->
//              reason -> decide -> act sequence, explaining every cycle.
// Purpose: Tie every other pipeline stage together behind one entry point,
//          with audit recording and a terminal failure path for each stage.
// Dependencies: incident-core, incident-safety, crate::{normalizer, detector,
//               analyzer, decision, executor}
// ============================================================================

//! ## Overview
//! [`Orchestrator::run_cycle`] normalizes a raw signal, folds it into the
//! pattern detector's window, runs root-cause analysis once at least one
//! pattern exists, routes the analysis to a decision, and executes that
//! decision's action — unless it requires operator approval, in which case
//! the cycle stops at [`incident_core::IssueStatus::PendingApproval`]
//! without dispatching. Every stage appends a reasoning-chain entry and an
//! audit record; a stage failure records the failure, transitions the issue
//! to [`incident_core::IssueStatus::ActionFailed`], and returns without
//! running later stages.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;

use serde_json::Value;
use serde_json::json;
use thiserror::Error;

use incident_core::Action;
use incident_core::ActionResult;
use incident_core::AuditEntry;
use incident_core::AuditId;
use incident_core::AuditStore;
use incident_core::ContextMap;
use incident_core::Decision;
use incident_core::IssueId;
use incident_core::IssueState;
use incident_core::IssueStatus;
use incident_core::IssueStore;
use incident_core::Pattern;
use incident_core::StoreError;
use incident_core::Timestamp;
use incident_core::compute_entry_hash;

use crate::analyzer::AnalyzeError;
use crate::analyzer::RootCauseAnalyzer;
use crate::decision::DecisionEngine;
use crate::detector::PatternDetector;
use crate::executor::ActionExecutor;
use crate::normalizer;
use crate::normalizer::NormalizeError;

/// The four canonical reasoning-chain stages, in order.
const STAGES: [&str; 4] = ["signals", "patterns", "root_cause", "decision"];
/// Minimum mean confidence across stages for [`ConfidenceLevel::High`].
const HIGH_CONFIDENCE_THRESHOLD: f64 = 0.85;
/// Minimum mean confidence across stages for [`ConfidenceLevel::Medium`].
const MEDIUM_CONFIDENCE_THRESHOLD: f64 = 0.70;
/// Per-stage confidence below which an uncertainty note is recorded.
const UNCERTAINTY_THRESHOLD: f64 = 0.70;

/// A single stage's contribution to an [`Explanation`].
#[derive(Debug, Clone, PartialEq)]
pub struct ReasoningStep {
    /// One of [`STAGES`].
    pub stage: &'static str,
    /// Human-readable summary of what happened at this stage.
    pub summary: String,
    /// Confidence carried by this stage, in `[0, 1]`.
    pub confidence: f64,
    /// Identifiers this stage's conclusion rests on.
    pub evidence_refs: Vec<String>,
    /// Set when `confidence < 0.7`.
    pub uncertainty: Option<String>,
}

/// Coarse confidence bucket derived from the mean of all stage confidences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfidenceLevel {
    /// Mean stage confidence `>= 0.85`.
    High,
    /// Mean stage confidence `>= 0.70`.
    Medium,
    /// Mean stage confidence `< 0.70`.
    Low,
}

impl ConfidenceLevel {
    fn from_mean(mean: f64) -> Self {
        if mean >= HIGH_CONFIDENCE_THRESHOLD {
            Self::High
        } else if mean >= MEDIUM_CONFIDENCE_THRESHOLD {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

/// The full explanation of one completed cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct Explanation {
    /// The issue this cycle concerned.
    pub issue_id: IssueId,
    /// Exactly four entries, one per stage in [`STAGES`] order.
    pub reasoning_chain: Vec<ReasoningStep>,
    /// Alternatives considered while routing the decision.
    pub alternatives_considered: Vec<incident_core::AlternativeConsidered>,
    /// The decision this cycle produced, if routing completed.
    pub final_decision: Option<Decision>,
    /// Overall confidence bucket for the cycle.
    pub confidence_level: ConfidenceLevel,
    /// Every stage's uncertainty note, collected in stage order.
    pub uncertainty_factors: Vec<String>,
}

/// Errors a cycle can fail with before the stage that raised them records
/// its own audit entry and the issue is marked [`IssueStatus::ActionFailed`].
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Raw signal normalization failed.
    #[error("signal normalization failed: {0}")]
    Normalize(#[from] NormalizeError),
    /// Root-cause analysis failed after exhausting its fallback.
    #[error("root cause analysis failed: {0}")]
    Analyze(#[from] AnalyzeError),
    /// Persisting issue state or audit entries failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    /// Issue state was not in a status this cycle could advance from.
    #[error("issue {0} is in status {1:?}, cannot continue a cycle")]
    InvalidTransition(IssueId, IssueStatus),
    /// An approve/reject call targeted an issue not awaiting approval.
    #[error("issue {0} is not pending approval")]
    NoPendingApproval(IssueId),
}

/// Outcome of one orchestrator cycle.
#[derive(Debug)]
pub enum CycleOutcome {
    /// The decision's action executed (successfully or not) and the
    /// explanation is attached.
    Completed(Box<Explanation>),
    /// The decision requires operator approval; no action was dispatched.
    PendingApproval(Box<Explanation>),
}

/// Drives one issue through the canonical sequence, recording a reasoning
/// chain and an audit entry per stage.
pub struct Orchestrator {
    detector: Mutex<PatternDetector>,
    analyzer: RootCauseAnalyzer,
    decision_engine: DecisionEngine,
    executor: ActionExecutor,
    issue_store: Arc<dyn IssueStore + Send + Sync>,
    audit_store: Arc<dyn AuditStore + Send + Sync>,
}

impl Orchestrator {
    /// Builds an orchestrator over the given stage implementations.
    #[must_use]
    pub fn new(
        detector: PatternDetector,
        analyzer: RootCauseAnalyzer,
        decision_engine: DecisionEngine,
        executor: ActionExecutor,
        issue_store: Arc<dyn IssueStore + Send + Sync>,
        audit_store: Arc<dyn AuditStore + Send + Sync>,
    ) -> Self {
        Self {
            detector: Mutex::new(detector),
            analyzer,
            decision_engine,
            executor,
            issue_store,
            audit_store,
        }
    }

    /// Runs one full cycle for `issue_id` over `source_type`/`raw_data`,
    /// given `merchant_context` used by root-cause analysis and decision
    /// routing.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError`] when normalization, analysis, or
    /// persistence fails; the failing stage's audit entry and the issue's
    /// terminal [`IssueStatus::ActionFailed`] status are recorded before the
    /// error is returned.
    #[allow(clippy::too_many_lines, reason = "one cycle, four sequential stages, each audited")]
    pub fn run_cycle(&self, issue_id: IssueId, source_type: &str, raw_data: &Value, merchant_context: Option<&ContextMap>, now: Timestamp) -> Result<CycleOutcome, OrchestratorError> {
        let mut issue = self.issue_store.load(&issue_id)?.unwrap_or_else(|| IssueState::new(issue_id.clone()));
        let mut steps = Vec::with_capacity(STAGES.len());

        let signal = match normalizer::normalize(source_type, raw_data) {
            Ok(signal) => signal,
            Err(error) => {
                self.fail(&mut issue, "signals", &error.to_string(), now)?;
                return Err(OrchestratorError::Normalize(error));
            }
        };
        issue.signal_ids.push(signal.signal_id.clone());
        self.advance(&mut issue, IssueStatus::Observing)?;
        steps.push(self.record_stage(
            &issue,
            "signals",
            format!("Observed signal {} from {source_type}", signal.signal_id),
            1.0,
            vec![signal.signal_id.to_string()],
            now,
        )?);

        let pattern = {
            let mut detector = self.detector.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            let matched = detector.observe(signal.clone(), now);
            matched.or_else(|| detector.run_window_analysis().into_iter().find(|pattern| pattern.signal_ids.contains(&signal.signal_id)))
        };

        let patterns: Vec<Pattern> = pattern.clone().into_iter().collect();
        if let Some(pattern) = &pattern {
            if !issue.pattern_ids.contains(&pattern.pattern_id) {
                issue.pattern_ids.push(pattern.pattern_id.clone());
            }
            if issue.status.can_transition_to(IssueStatus::PatternDetected) {
                self.advance(&mut issue, IssueStatus::PatternDetected)?;
            }
        }
        steps.push(self.record_stage(
            &issue,
            "patterns",
            pattern.as_ref().map_or_else(|| "No pattern matched yet".to_string(), |pattern| format!("Matched pattern {} ({} signals)", pattern.pattern_id, pattern.frequency())),
            pattern.as_ref().map_or(0.5, |pattern| pattern.confidence),
            patterns.iter().map(|pattern| pattern.pattern_id.to_string()).collect(),
            now,
        )?);

        let analysis = match self.analyzer.analyze(std::slice::from_ref(&signal), &patterns, merchant_context, now) {
            Ok(analysis) => analysis,
            Err(error) => {
                self.fail(&mut issue, "root_cause", &error.to_string(), now)?;
                return Err(OrchestratorError::Analyze(error));
            }
        };
        issue.analysis = Some(analysis.clone());
        self.advance(&mut issue, IssueStatus::Analyzed)?;
        steps.push(self.record_stage(&issue, "root_cause", analysis.reasoning.clone(), analysis.confidence, analysis.evidence.clone(), now)?);

        let context = merchant_context.cloned().unwrap_or_default();
        let decision = self.decision_engine.decide(&analysis, &context, issue_id.clone(), now);
        issue.decision = Some(decision.clone());
        self.advance(&mut issue, IssueStatus::Decided)?;
        steps.push(self.record_stage(
            &issue,
            "decision",
            decision.reasoning.clone(),
            decision.confidence,
            decision.alternatives_considered.iter().map(|alternative| alternative.hypothesis.clone()).collect(),
            now,
        )?);

        let mean_confidence = steps.iter().map(|step| step.confidence).sum::<f64>() / steps.len() as f64;
        let uncertainty_factors = steps.iter().filter_map(|step| step.uncertainty.clone()).collect();
        let explanation = Explanation {
            issue_id: issue_id.clone(),
            reasoning_chain: steps,
            alternatives_considered: decision.alternatives_considered.clone(),
            final_decision: Some(decision.clone()),
            confidence_level: ConfidenceLevel::from_mean(mean_confidence),
            uncertainty_factors,
        };

        if decision.requires_approval {
            self.advance(&mut issue, IssueStatus::PendingApproval)?;
            self.issue_store.save(&issue)?;
            return Ok(CycleOutcome::PendingApproval(Box::new(explanation)));
        }

        let action = Action {
            action_id: incident_core::ActionId::new(format!("act_{issue_id}")),
            issue_id: issue_id.clone(),
            action_type: decision.action_type,
            risk_level: decision.risk_level,
            merchant_id: context.get("merchant_id").and_then(Value::as_str).unwrap_or("unknown").into(),
            parameters: decision.parameters.clone(),
        };
        let result = self.executor.execute(&action, now);
        issue.actions.push((action, result.clone()));
        self.advance(&mut issue, if result.success { IssueStatus::ActionExecuted } else { IssueStatus::ActionFailed })?;
        self.issue_store.save(&issue)?;

        Ok(CycleOutcome::Completed(Box::new(explanation)))
    }

    /// Executes the action of an issue an operator approved while it sat in
    /// [`IssueStatus::PendingApproval`], recording the approval itself as an
    /// audit entry before the execution audit entries `executor.execute`
    /// appends on its own.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::NoPendingApproval`] if `issue_id` does
    /// not exist or is not awaiting approval, or a store error.
    pub fn approve(&self, issue_id: &IssueId, operator_id: &str, feedback: Option<&str>, now: Timestamp) -> Result<ActionResult, OrchestratorError> {
        let mut issue = self.issue_store.load(issue_id)?.ok_or_else(|| OrchestratorError::NoPendingApproval(issue_id.clone()))?;
        if issue.status != IssueStatus::PendingApproval {
            return Err(OrchestratorError::NoPendingApproval(issue_id.clone()));
        }
        let decision = issue.decision.clone().ok_or_else(|| OrchestratorError::NoPendingApproval(issue_id.clone()))?;

        self.append_operator_audit(issue_id, "operator_approve", operator_id, feedback, now)?;

        let action = Action {
            action_id: incident_core::ActionId::new(format!("act_{issue_id}")),
            issue_id: issue_id.clone(),
            action_type: decision.action_type,
            risk_level: decision.risk_level,
            merchant_id: decision.parameters.get("merchant_id").and_then(Value::as_str).unwrap_or("unknown").into(),
            parameters: decision.parameters,
        };
        let result = self.executor.execute(&action, now);
        issue.actions.push((action, result.clone()));
        let next_status = if result.success { IssueStatus::ActionExecuted } else { IssueStatus::ActionFailed };
        if issue.status.can_transition_to(next_status) {
            issue.status = next_status;
        }
        self.issue_store.save(&issue)?;
        Ok(result)
    }

    /// Records an operator's rejection of a pending decision. The decision's
    /// action never executes; `feedback` is recorded under
    /// `reasoning.operator_feedback` in the audit entry.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::NoPendingApproval`] if `issue_id` does
    /// not exist or is not awaiting approval, or a store error.
    pub fn reject(&self, issue_id: &IssueId, operator_id: &str, feedback: Option<&str>, now: Timestamp) -> Result<(), OrchestratorError> {
        let mut issue = self.issue_store.load(issue_id)?.ok_or_else(|| OrchestratorError::NoPendingApproval(issue_id.clone()))?;
        if issue.status != IssueStatus::PendingApproval {
            return Err(OrchestratorError::NoPendingApproval(issue_id.clone()));
        }

        self.append_operator_audit(issue_id, "operator_reject", operator_id, feedback, now)?;

        if issue.status.can_transition_to(IssueStatus::ActionFailed) {
            issue.status = IssueStatus::ActionFailed;
        }
        self.issue_store.save(&issue)?;
        Ok(())
    }

    fn append_operator_audit(&self, issue_id: &IssueId, event_type: &str, operator_id: &str, feedback: Option<&str>, now: Timestamp) -> Result<(), OrchestratorError> {
        let mut reasoning = BTreeMap::new();
        if let Some(feedback) = feedback {
            reasoning.insert("operator_feedback".to_string(), Value::from(feedback));
        }
        let mut outputs = BTreeMap::new();
        outputs.insert("operator_id".to_string(), Value::from(operator_id));
        self.append_audit_as(issue_id, event_type, operator_id, BTreeMap::new(), outputs, reasoning, now)
    }

    fn advance(&self, issue: &mut IssueState, next: IssueStatus) -> Result<(), OrchestratorError> {
        if !issue.status.can_transition_to(next) {
            return Err(OrchestratorError::InvalidTransition(issue.issue_id.clone(), issue.status));
        }
        issue.status = next;
        Ok(())
    }

    fn record_stage(&self, issue: &IssueState, stage: &'static str, summary: String, confidence: f64, evidence_refs: Vec<String>, now: Timestamp) -> Result<ReasoningStep, OrchestratorError> {
        let uncertainty = (confidence < UNCERTAINTY_THRESHOLD).then(|| format!("{stage} stage confidence {confidence:.2} is below the 0.70 threshold"));

        let mut inputs = BTreeMap::new();
        inputs.insert("stage".to_string(), Value::from(stage));
        inputs.insert("evidence_refs".to_string(), json!(evidence_refs));

        let mut outputs = BTreeMap::new();
        outputs.insert("confidence".to_string(), Value::from(confidence));
        outputs.insert("status".to_string(), Value::from(format!("{:?}", issue.status)));

        let mut reasoning = BTreeMap::new();
        reasoning.insert("summary".to_string(), Value::from(summary.clone()));
        if let Some(note) = &uncertainty {
            reasoning.insert("uncertainty".to_string(), Value::from(note.as_str()));
        }

        self.append_audit(&issue.issue_id, &format!("stage_{stage}"), inputs, outputs, reasoning, now)?;

        Ok(ReasoningStep {
            stage,
            summary,
            confidence,
            evidence_refs,
            uncertainty,
        })
    }

    fn fail(&self, issue: &mut IssueState, stage: &'static str, message: &str, now: Timestamp) -> Result<(), OrchestratorError> {
        let mut outputs = BTreeMap::new();
        outputs.insert("error".to_string(), Value::from(message));
        let mut reasoning = BTreeMap::new();
        reasoning.insert("summary".to_string(), Value::from(format!("{stage} stage failed: {message}")));
        self.append_audit(&issue.issue_id, &format!("stage_{stage}_failed"), BTreeMap::new(), outputs, reasoning, now)?;

        if issue.status.can_transition_to(IssueStatus::ActionFailed) {
            issue.status = IssueStatus::ActionFailed;
        }
        self.issue_store.save(issue)?;
        Ok(())
    }

    fn append_audit(&self, issue_id: &IssueId, event_type: &str, inputs: BTreeMap<String, Value>, outputs: BTreeMap<String, Value>, reasoning: BTreeMap<String, Value>, now: Timestamp) -> Result<(), OrchestratorError> {
        self.append_audit_as(issue_id, event_type, "system", inputs, outputs, reasoning, now)
    }

    fn append_audit_as(&self, issue_id: &IssueId, event_type: &str, actor: &str, inputs: BTreeMap<String, Value>, outputs: BTreeMap<String, Value>, reasoning: BTreeMap<String, Value>, now: Timestamp) -> Result<(), OrchestratorError> {
        let previous_hash = self.audit_store.load_chain(issue_id)?.last().map(|entry| entry.hash.clone()).unwrap_or_default();
        let timestamp_text = now.to_rfc3339().map_err(|_| StoreError::Invalid("failed to format audit timestamp".to_string()))?;
        let hash = compute_entry_hash(&timestamp_text, issue_id.as_str(), event_type, actor, &inputs, &outputs, &reasoning, &previous_hash)
            .map_err(|error| StoreError::Invalid(error.to_string()))?;

        let entry = AuditEntry {
            audit_id: AuditId::new(format!("audit_{issue_id}_{event_type}_{timestamp_text}")),
            timestamp: now,
            issue_id: issue_id.clone(),
            event_type: event_type.to_string(),
            actor: actor.to_string(),
            inputs,
            outputs,
            reasoning,
            hash,
            previous_hash,
        };
        self.audit_store.append(&entry)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, reason = "test assertions read values that must be present")]
    #![allow(clippy::unwrap_used, reason = "mutex is never poisoned in these tests")]

    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::Mutex;

    use serde_json::json;

    use incident_config::PatternDetectorConfig;
    use incident_config::RateLimitConfig;
    use incident_config::RetryConfig;
    use incident_core::Action;
    use incident_core::ActionHandler;
    use incident_core::ActionHandlerError;
    use incident_core::ActionResult;
    use incident_core::ActionType;
    use incident_core::AuditEntry;
    use incident_core::EventBus;
    use incident_core::EventBusError;
    use incident_core::EventMessage;
    use incident_core::IssueId;
    use incident_core::IssueState;
    use incident_core::IssueStore;
    use incident_core::LlmClient;
    use incident_core::LlmClientError;
    use incident_core::MerchantId;
    use incident_core::Pattern;
    use incident_core::PatternCache;
    use incident_core::SearchIndex;
    use incident_core::SearchIndexError;
    use incident_core::Signal;
    use incident_core::SimilarityMatch;
    use incident_core::StoreError;
    use incident_core::Timestamp;
    use incident_core::Topic;
    use incident_safety::DegradationManager;
    use incident_safety::SafeModeManager;

    use crate::analyzer::RootCauseAnalyzer;
    use crate::decision::DecisionEngine;
    use crate::detector::PatternDetector;
    use crate::executor::ActionExecutor;

    use super::CycleOutcome;
    use super::Orchestrator;

    #[derive(Default)]
    struct NoopEventBus;
    impl EventBus for NoopEventBus {
        fn publish(&self, _topic: Topic, _message: &EventMessage) -> Result<(), EventBusError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct NoopSearchIndex;
    impl SearchIndex for NoopSearchIndex {
        fn find_similar(&self, _signal: &Signal, _min_score: f64) -> Result<Vec<SimilarityMatch>, SearchIndexError> {
            Ok(Vec::new())
        }
        fn index(&self, _pattern: &Pattern) -> Result<(), SearchIndexError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct MemoryPatternCache {
        patterns: Mutex<Vec<Pattern>>,
    }
    impl PatternCache for MemoryPatternCache {
        fn get(&self, pattern_id: &incident_core::PatternId) -> Option<Pattern> {
            self.patterns.lock().unwrap().iter().find(|pattern| &pattern.pattern_id == pattern_id).cloned()
        }
        fn put(&self, pattern: Pattern) {
            let mut patterns = self.patterns.lock().unwrap();
            patterns.retain(|existing| existing.pattern_id != pattern.pattern_id);
            patterns.push(pattern);
        }
        fn all(&self) -> Vec<Pattern> {
            self.patterns.lock().unwrap().clone()
        }
        fn evict_expired(&self, _now: Timestamp, _window_seconds: i64) {}
    }

    struct NeverCalledLlm;
    impl LlmClient for NeverCalledLlm {
        fn complete(&self, _system_prompt: &str, _user_prompt: &str) -> Result<String, LlmClientError> {
            Err(LlmClientError::Timeout)
        }
    }

    #[derive(Default)]
    struct MemoryIssueStore {
        issues: Mutex<HashMap<IssueId, IssueState>>,
    }
    impl IssueStore for MemoryIssueStore {
        fn load(&self, issue_id: &IssueId) -> Result<Option<IssueState>, StoreError> {
            Ok(self.issues.lock().unwrap().get(issue_id).cloned())
        }
        fn save(&self, issue: &IssueState) -> Result<(), StoreError> {
            self.issues.lock().unwrap().insert(issue.issue_id.clone(), issue.clone());
            Ok(())
        }
        fn list_open(&self) -> Result<Vec<IssueId>, StoreError> {
            Ok(self.issues.lock().unwrap().values().map(|issue| issue.issue_id.clone()).collect())
        }
    }

    #[derive(Default)]
    struct MemoryAuditStore {
        entries: Mutex<Vec<AuditEntry>>,
    }
    impl incident_core::AuditStore for MemoryAuditStore {
        fn append(&self, entry: &AuditEntry) -> Result<(), StoreError> {
            self.entries.lock().unwrap().push(entry.clone());
            Ok(())
        }
        fn load_chain(&self, issue_id: &IssueId) -> Result<Vec<AuditEntry>, StoreError> {
            Ok(self.entries.lock().unwrap().iter().filter(|entry| &entry.issue_id == issue_id).cloned().collect())
        }
    }

    struct AlwaysOkHandler;
    impl ActionHandler for AlwaysOkHandler {
        fn execute(&self, _action: &Action, _merchant_id: &MerchantId) -> Result<ActionResult, ActionHandlerError> {
            Ok(ActionResult {
                success: true,
                result: std::collections::BTreeMap::new(),
                error_message: None,
                executed_at: Timestamp::now(),
                rollback_data: None,
            })
        }
    }

    fn build_orchestrator(audit: Arc<MemoryAuditStore>, issues: Arc<MemoryIssueStore>) -> Orchestrator {
        let safe_mode = Arc::new(SafeModeManager::new());
        let degradation = Arc::new(DegradationManager::new());
        let detector = PatternDetector::new(PatternDetectorConfig::default(), Arc::new(NoopSearchIndex), Arc::new(MemoryPatternCache::default()), Arc::new(NoopEventBus), Arc::clone(&degradation));
        let analyzer = RootCauseAnalyzer::new(Arc::new(NeverCalledLlm), 5, 60, degradation);
        let decision_engine = DecisionEngine::new(Arc::clone(&safe_mode));
        let mut handlers: HashMap<ActionType, Arc<dyn ActionHandler + Send + Sync>> = HashMap::new();
        handlers.insert(ActionType::SupportGuidance, Arc::new(AlwaysOkHandler));
        handlers.insert(ActionType::EngineeringEscalation, Arc::new(AlwaysOkHandler));
        let executor = ActionExecutor::new(safe_mode, RateLimitConfig::default(), RetryConfig::default(), handlers, audit.clone() as Arc<dyn incident_core::AuditStore + Send + Sync>);
        Orchestrator::new(detector, analyzer, decision_engine, executor, issues, audit)
    }

    #[test]
    fn run_cycle_completes_and_audits_every_stage() {
        let audit = Arc::new(MemoryAuditStore::default());
        let issues = Arc::new(MemoryIssueStore::default());
        let orchestrator = build_orchestrator(audit.clone(), issues.clone());

        let raw = json!({
            "ticket_id": "t-1",
            "subject": "Checkout broken after migration step 3",
            "description": "Customer cannot complete checkout",
            "custom_fields": {"merchant_id": "merchant-1", "migration_stage": "step_3"},
        });
        let outcome = orchestrator.run_cycle(IssueId::new("issue-1"), "zendesk", &raw, None, Timestamp::now()).expect("cycle completes");

        let explanation = match outcome {
            CycleOutcome::Completed(explanation) | CycleOutcome::PendingApproval(explanation) => explanation,
        };
        assert_eq!(explanation.reasoning_chain.len(), 4);
        assert_eq!(explanation.reasoning_chain[0].stage, "signals");
        assert_eq!(explanation.reasoning_chain[3].stage, "decision");

        let entries = audit.entries.lock().unwrap();
        assert!(entries.len() >= 4, "expected at least one audit entry per stage, got {}", entries.len());
        let saved = issues.issues.lock().unwrap();
        assert!(saved.contains_key(&IssueId::new("issue-1")));
    }

    #[test]
    fn run_cycle_fails_closed_on_bad_source_type() {
        let audit = Arc::new(MemoryAuditStore::default());
        let issues = Arc::new(MemoryIssueStore::default());
        let orchestrator = build_orchestrator(audit.clone(), issues);

        let result = orchestrator.run_cycle(IssueId::new("issue-2"), "not_a_real_source", &json!({}), None, Timestamp::now());
        assert!(result.is_err());
        let entries = audit.entries.lock().unwrap();
        assert!(entries.iter().any(|entry| entry.event_type.contains("failed")));
    }
}
