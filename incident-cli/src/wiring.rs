// incident-cli/src/wiring.rs
// ============================================================================
// Module: Service Wiring
// Description: Constructs the orchestrator and every backend it depends on
//              from configuration and environment settings.
// Purpose: One place that turns `incident.toml` + env settings into a live
//          `Orchestrator`, so `serve`, `verify-audit`, and `config` all share
//          identical backend construction.
// Dependencies: incident-broker, incident-config, incident-core,
//               incident-pipeline, incident-providers, incident-safety,
//               incident-store
// ============================================================================

//! ## Overview
//! [`Pipeline`] bundles the orchestrator with the shared handles its HTTP
//! surface needs directly: the issue/audit store (for query and audit-chain
//! endpoints), the safe mode manager (for the approve/reject endpoints'
//! interlock), and the webhook secrets (for signature verification).

use std::collections::HashMap;
use std::sync::Arc;

use incident_broker::ChannelEventBus;
use incident_broker::LogEventBus;
use incident_config::IncidentConfig;
use incident_core::ActionHandler;
use incident_core::ActionType;
use incident_core::AuditStore;
use incident_core::EventBus;
use incident_core::IssueStore;
use incident_pipeline::ActionExecutor;
use incident_pipeline::ConfigManager;
use incident_pipeline::DecisionEngine;
use incident_pipeline::Orchestrator;
use incident_pipeline::PatternDetector;
use incident_pipeline::RootCauseAnalyzer;
use incident_pipeline::TemporaryMitigationHandler;
use incident_providers::ClaudeLlmClient;
use incident_providers::ClaudeLlmConfig;
use incident_providers::HttpSearchIndex;
use incident_providers::HttpSearchIndexConfig;
use incident_providers::NotificationActionHandler;
use incident_providers::NotificationConfig;
use incident_providers::TicketingActionHandler;
use incident_providers::TicketingConfig;
use incident_safety::DegradationManager;
use incident_safety::SafeModeManager;
use incident_store::SqliteIncidentStore;
use incident_store::SqliteStoreConfig;
use incident_store::SqliteStoreError;
use thiserror::Error;

use crate::settings::Settings;

/// Failures that can occur while wiring the pipeline together.
#[derive(Debug, Error)]
pub enum WiringError {
    /// The `SQLite` store could not be opened or migrated.
    #[error("store init failed: {0}")]
    Store(#[from] SqliteStoreError),
    /// A provider's HTTP client could not be constructed.
    #[error("provider init failed: {0}")]
    Provider(String),
}

/// Every live handle the CLI's HTTP surface and subcommands need.
pub struct Pipeline {
    /// The orchestrator driving one reasoning cycle per ingested signal.
    pub orchestrator: Orchestrator,
    /// Durable issue and audit storage, shared with the query endpoints.
    pub store: Arc<SqliteIncidentStore>,
    /// Process-wide safe mode interlock, shared with the approval endpoints.
    pub safe_mode: Arc<SafeModeManager>,
    /// Parsed pipeline configuration (webhook secrets, tuning knobs).
    pub config: IncidentConfig,
}

/// Builds every backend and wires them into a single [`Pipeline`].
///
/// Event delivery defaults to [`LogEventBus`] unless `event_bus` carries a
/// [`ChannelEventBus`] sender, letting `serve` fan events out to an in-process
/// subscriber while the standalone CLI subcommands stay dependency-free.
///
/// # Errors
///
/// Returns [`WiringError`] if the `SQLite` store or any HTTP-backed provider
/// fails to initialize.
pub fn build_pipeline(
    config: IncidentConfig,
    settings: &Settings,
    event_bus: Option<ChannelEventBus>,
) -> Result<Pipeline, WiringError> {
    let store = Arc::new(SqliteIncidentStore::new(SqliteStoreConfig {
        path: settings.db_path.clone(),
        busy_timeout_ms: 5_000,
        journal_mode: incident_store::SqliteStoreMode::Wal,
        sync_mode: incident_store::SqliteSyncMode::Full,
    })?);

    let safe_mode = Arc::new(SafeModeManager::new());
    let degradation = Arc::new(DegradationManager::new());

    let event_bus: Arc<dyn EventBus + Send + Sync> =
        event_bus.map_or_else(|| Arc::new(LogEventBus) as Arc<dyn EventBus + Send + Sync>, |bus| Arc::new(bus) as Arc<dyn EventBus + Send + Sync>);

    let search_index = Arc::new(
        HttpSearchIndex::new(HttpSearchIndexConfig {
            base_url: settings.search_index_base_url.clone(),
            timeout_ms: settings.provider_timeout_ms,
        })
        .map_err(|err| WiringError::Provider(err.to_string()))?,
    );

    let detector = PatternDetector::new(config.pattern_detector.clone(), search_index, Arc::clone(&store) as Arc<dyn incident_core::PatternCache + Send + Sync>, event_bus, Arc::clone(&degradation));

    let llm = Arc::new(
        ClaudeLlmClient::new(ClaudeLlmConfig {
            base_url: settings.llm_base_url.clone(),
            api_key: settings.llm_api_key.clone(),
            model: settings.llm_model.clone(),
            max_tokens: 1024,
            timeout_ms: settings.provider_timeout_ms,
        })
        .map_err(|err| WiringError::Provider(err.to_string()))?,
    );
    let analyzer = RootCauseAnalyzer::new(llm, config.circuit_breakers.llm.failure_threshold, config.circuit_breakers.llm.open_timeout_seconds, Arc::clone(&degradation));

    let decision_engine = DecisionEngine::new(Arc::clone(&safe_mode));

    let ticketing = Arc::new(
        TicketingActionHandler::new(TicketingConfig { base_url: settings.ticketing_base_url.clone(), timeout_ms: settings.provider_timeout_ms })
            .map_err(|err| WiringError::Provider(err.to_string()))?,
    );
    let notification = Arc::new(
        NotificationActionHandler::new(NotificationConfig { base_url: settings.notification_base_url.clone(), timeout_ms: settings.provider_timeout_ms })
            .map_err(|err| WiringError::Provider(err.to_string()))?,
    );
    let config_manager = ConfigManager::new(Arc::clone(&store) as Arc<dyn incident_core::ConfigStore + Send + Sync>);
    let mitigation = Arc::new(TemporaryMitigationHandler::new(config_manager));

    let mut handlers: HashMap<ActionType, Arc<dyn ActionHandler + Send + Sync>> = HashMap::new();
    handlers.insert(ActionType::SupportGuidance, Arc::clone(&ticketing) as Arc<dyn ActionHandler + Send + Sync>);
    handlers.insert(ActionType::EngineeringEscalation, Arc::clone(&ticketing) as Arc<dyn ActionHandler + Send + Sync>);
    handlers.insert(ActionType::DocumentationUpdate, ticketing as Arc<dyn ActionHandler + Send + Sync>);
    handlers.insert(ActionType::ProactiveCommunication, notification as Arc<dyn ActionHandler + Send + Sync>);
    handlers.insert(ActionType::TemporaryMitigation, mitigation as Arc<dyn ActionHandler + Send + Sync>);

    let executor = ActionExecutor::new(
        Arc::clone(&safe_mode),
        config.rate_limit.clone(),
        config.retry.clone(),
        handlers,
        Arc::clone(&store) as Arc<dyn AuditStore + Send + Sync>,
    );

    let orchestrator = Orchestrator::new(
        detector,
        analyzer,
        decision_engine,
        executor,
        Arc::clone(&store) as Arc<dyn IssueStore + Send + Sync>,
        Arc::clone(&store) as Arc<dyn AuditStore + Send + Sync>,
    );

    Ok(Pipeline { orchestrator, store, safe_mode, config })
}
