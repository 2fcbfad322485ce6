// incident-config/src/config.rs
// ============================================================================
// Module: Incident Pipeline Configuration
// Description: Configuration loading and validation for the incident
//              response pipeline.
// Purpose: Provide strict, fail-closed config parsing with hard limits on
//          every tunable threshold.
// Dependencies: incident-core, serde, toml
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with strict size and bound
//! limits. Missing or invalid configuration fails closed: an out-of-range
//! threshold is a startup error, not a silently clamped value.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "incident.toml";
/// Environment variable used to override the config path.
pub(crate) const CONFIG_ENV_VAR: &str = "INCIDENT_CONFIG";
/// Maximum configuration file size in bytes.
pub(crate) const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum total path length.
pub(crate) const MAX_TOTAL_PATH_LENGTH: usize = 4096;

/// Minimum pattern-detector sliding window, in seconds.
pub const MIN_WINDOW_SECONDS: u64 = 30;
/// Maximum pattern-detector sliding window, in seconds.
pub const MAX_WINDOW_SECONDS: u64 = 3600;
/// Default pattern-detector sliding window, in seconds (spec: 2 minutes).
pub const DEFAULT_WINDOW_SECONDS: u64 = 120;
/// Default periodic window-analysis interval, in seconds (spec: ~30s).
pub const DEFAULT_ANALYSIS_INTERVAL_SECONDS: u64 = 30;
/// Default minimum frequency for a pattern to be emitted.
pub const DEFAULT_MIN_PATTERN_FREQUENCY: usize = 3;
/// Default similarity-search minimum score.
pub const DEFAULT_SIMILARITY_MIN_SCORE: f64 = 0.7;
/// Default DBSCAN epsilon for n-gram clustering.
pub const DEFAULT_CLUSTER_EPSILON: f64 = 0.3;

/// Default per-merchant rate-limit window, in seconds.
pub const DEFAULT_RATE_LIMIT_WINDOW_SECONDS: u64 = 60;
/// Default per-merchant rate-limit action ceiling within the window.
pub const DEFAULT_RATE_LIMIT_MAX_ACTIONS: u32 = 10;
/// Default excessive-action flag threshold (logs, does not reject).
pub const DEFAULT_RATE_LIMIT_EXCESSIVE_THRESHOLD: u32 = 10;

/// Default retry attempts for action execution.
pub const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 3;
/// Default retry base backoff, in seconds.
pub const DEFAULT_RETRY_BASE_SECONDS: u64 = 2;
/// Default retry backoff cap, in seconds.
pub const DEFAULT_RETRY_CAP_SECONDS: u64 = 10;

/// Minimum circuit-breaker failure threshold.
pub const MIN_BREAKER_FAILURE_THRESHOLD: u32 = 1;
/// Maximum circuit-breaker failure threshold.
pub const MAX_BREAKER_FAILURE_THRESHOLD: u32 = 100;

// ============================================================================
// SECTION: Root Configuration
// ============================================================================

/// Root configuration for the incident response pipeline.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IncidentConfig {
    /// Pattern detector tuning.
    #[serde(default)]
    pub pattern_detector: PatternDetectorConfig,
    /// Per-merchant action rate limiting.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// Retry policy for action execution.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Per-breaker circuit-breaker thresholds and timeouts.
    #[serde(default)]
    pub circuit_breakers: CircuitBreakerConfigs,
    /// Safe-mode activation thresholds.
    #[serde(default)]
    pub safe_mode: SafeModeConfig,
    /// Webhook signing secrets, keyed by vendor.
    #[serde(default)]
    pub webhooks: WebhookConfig,
    /// Redaction policy overrides.
    #[serde(default)]
    pub redaction: RedactionConfig,
}

impl Default for IncidentConfig {
    fn default() -> Self {
        Self {
            pattern_detector: PatternDetectorConfig::default(),
            rate_limit: RateLimitConfig::default(),
            retry: RetryConfig::default(),
            circuit_breakers: CircuitBreakerConfigs::default(),
            safe_mode: SafeModeConfig::default(),
            webhooks: WebhookConfig::default(),
            redaction: RedactionConfig::default(),
        }
    }
}

impl IncidentConfig {
    /// Loads configuration from disk using the default resolution rules:
    /// an explicit `path`, else `INCIDENT_CONFIG`, else `./incident.toml`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = resolve_path(path)?;
        validate_path(&resolved)?;
        let bytes = fs::read(&resolved).map_err(|err| ConfigError::Io(err.to_string()))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes)
            .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        let config: Self = toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when any sub-configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pattern_detector.validate()?;
        self.rate_limit.validate()?;
        self.retry.validate()?;
        self.circuit_breakers.validate()?;
        self.safe_mode.validate()?;
        self.webhooks.validate()?;
        Ok(())
    }
}

// ============================================================================
// SECTION: Pattern Detector
// ============================================================================

/// Pattern-detector tuning parameters.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PatternDetectorConfig {
    /// Sliding correlation window, in seconds.
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
    /// Interval between periodic window-analysis passes, in seconds.
    #[serde(default = "default_analysis_interval_seconds")]
    pub analysis_interval_seconds: u64,
    /// Minimum signal count for a pattern to be emitted.
    #[serde(default = "default_min_pattern_frequency")]
    pub min_pattern_frequency: usize,
    /// Minimum similarity score for known-pattern matching.
    #[serde(default = "default_similarity_min_score")]
    pub similarity_min_score: f64,
    /// DBSCAN epsilon used for n-gram clustering of uncoded signals.
    #[serde(default = "default_cluster_epsilon")]
    pub cluster_epsilon: f64,
}

const fn default_window_seconds() -> u64 {
    DEFAULT_WINDOW_SECONDS
}
const fn default_analysis_interval_seconds() -> u64 {
    DEFAULT_ANALYSIS_INTERVAL_SECONDS
}
const fn default_min_pattern_frequency() -> usize {
    DEFAULT_MIN_PATTERN_FREQUENCY
}
const fn default_similarity_min_score() -> f64 {
    DEFAULT_SIMILARITY_MIN_SCORE
}
const fn default_cluster_epsilon() -> f64 {
    DEFAULT_CLUSTER_EPSILON
}

impl Default for PatternDetectorConfig {
    fn default() -> Self {
        Self {
            window_seconds: default_window_seconds(),
            analysis_interval_seconds: default_analysis_interval_seconds(),
            min_pattern_frequency: default_min_pattern_frequency(),
            similarity_min_score: default_similarity_min_score(),
            cluster_epsilon: default_cluster_epsilon(),
        }
    }
}

impl PatternDetectorConfig {
    /// Validates pattern-detector bounds.
    fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_WINDOW_SECONDS..=MAX_WINDOW_SECONDS).contains(&self.window_seconds) {
            return Err(ConfigError::Invalid(format!(
                "pattern_detector.window_seconds must be in [{MIN_WINDOW_SECONDS}, {MAX_WINDOW_SECONDS}]"
            )));
        }
        if self.analysis_interval_seconds == 0 {
            return Err(ConfigError::Invalid(
                "pattern_detector.analysis_interval_seconds must be greater than zero".to_string(),
            ));
        }
        if self.min_pattern_frequency < 2 {
            return Err(ConfigError::Invalid(
                "pattern_detector.min_pattern_frequency must be at least 2".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.similarity_min_score) {
            return Err(ConfigError::Invalid(
                "pattern_detector.similarity_min_score must be in [0.0, 1.0]".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.cluster_epsilon) {
            return Err(ConfigError::Invalid(
                "pattern_detector.cluster_epsilon must be in [0.0, 1.0]".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Rate Limit
// ============================================================================

/// Per-merchant action rate-limit configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Sliding window size, in seconds.
    #[serde(default = "default_rate_limit_window_seconds")]
    pub window_seconds: u64,
    /// Maximum actions permitted per merchant within the window.
    #[serde(default = "default_rate_limit_max_actions")]
    pub max_actions: u32,
    /// Count at or above which the executor logs an excessive-action flag
    /// without rejecting the action.
    #[serde(default = "default_rate_limit_excessive_threshold")]
    pub excessive_threshold: u32,
}

const fn default_rate_limit_window_seconds() -> u64 {
    DEFAULT_RATE_LIMIT_WINDOW_SECONDS
}
const fn default_rate_limit_max_actions() -> u32 {
    DEFAULT_RATE_LIMIT_MAX_ACTIONS
}
const fn default_rate_limit_excessive_threshold() -> u32 {
    DEFAULT_RATE_LIMIT_EXCESSIVE_THRESHOLD
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_seconds: default_rate_limit_window_seconds(),
            max_actions: default_rate_limit_max_actions(),
            excessive_threshold: default_rate_limit_excessive_threshold(),
        }
    }
}

impl RateLimitConfig {
    /// Validates rate-limit bounds.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.window_seconds == 0 {
            return Err(ConfigError::Invalid(
                "rate_limit.window_seconds must be greater than zero".to_string(),
            ));
        }
        if self.max_actions == 0 {
            return Err(ConfigError::Invalid(
                "rate_limit.max_actions must be greater than zero".to_string(),
            ));
        }
        if self.excessive_threshold == 0 {
            return Err(ConfigError::Invalid(
                "rate_limit.excessive_threshold must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Retry
// ============================================================================

/// Retry policy for action execution.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    /// Maximum retry attempts, including the first attempt.
    #[serde(default = "default_retry_max_attempts")]
    pub max_attempts: u32,
    /// Base backoff delay, in seconds, doubled per attempt.
    #[serde(default = "default_retry_base_seconds")]
    pub base_seconds: u64,
    /// Backoff cap, in seconds.
    #[serde(default = "default_retry_cap_seconds")]
    pub cap_seconds: u64,
}

const fn default_retry_max_attempts() -> u32 {
    DEFAULT_RETRY_MAX_ATTEMPTS
}
const fn default_retry_base_seconds() -> u64 {
    DEFAULT_RETRY_BASE_SECONDS
}
const fn default_retry_cap_seconds() -> u64 {
    DEFAULT_RETRY_CAP_SECONDS
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_max_attempts(),
            base_seconds: default_retry_base_seconds(),
            cap_seconds: default_retry_cap_seconds(),
        }
    }
}

impl RetryConfig {
    /// Validates retry bounds.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be greater than zero".to_string()));
        }
        if self.base_seconds == 0 {
            return Err(ConfigError::Invalid("retry.base_seconds must be greater than zero".to_string()));
        }
        if self.cap_seconds < self.base_seconds {
            return Err(ConfigError::Invalid("retry.cap_seconds must be >= retry.base_seconds".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Circuit Breakers
// ============================================================================

/// One circuit breaker's threshold and timeout.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct BreakerConfig {
    /// Consecutive failures before the breaker opens.
    pub failure_threshold: u32,
    /// Seconds the breaker stays open before probing half-open.
    pub open_timeout_seconds: u64,
}

impl BreakerConfig {
    /// Validates breaker bounds.
    fn validate(&self, name: &str) -> Result<(), ConfigError> {
        if !(MIN_BREAKER_FAILURE_THRESHOLD..=MAX_BREAKER_FAILURE_THRESHOLD).contains(&self.failure_threshold) {
            return Err(ConfigError::Invalid(format!(
                "circuit_breakers.{name}.failure_threshold must be in [{MIN_BREAKER_FAILURE_THRESHOLD}, {MAX_BREAKER_FAILURE_THRESHOLD}]"
            )));
        }
        if self.open_timeout_seconds == 0 {
            return Err(ConfigError::Invalid(format!(
                "circuit_breakers.{name}.open_timeout_seconds must be greater than zero"
            )));
        }
        Ok(())
    }
}

/// Per-breaker thresholds, one entry per protected external dependency.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct CircuitBreakerConfigs {
    /// Breaker guarding the root-cause LLM call (spec default: 5 failures / 60s).
    pub llm: BreakerConfig,
    /// Breaker guarding support-desk API calls (spec default: 3 failures / 30s).
    pub support_systems: BreakerConfig,
    /// Breaker guarding the search index (spec default: 5 failures / 45s).
    pub search_index: BreakerConfig,
    /// Breaker guarding the event bus (spec default: 5 failures / 30s).
    pub event_bus: BreakerConfig,
}

impl Default for CircuitBreakerConfigs {
    fn default() -> Self {
        Self {
            llm: BreakerConfig {
                failure_threshold: 5,
                open_timeout_seconds: 60,
            },
            support_systems: BreakerConfig {
                failure_threshold: 3,
                open_timeout_seconds: 30,
            },
            search_index: BreakerConfig {
                failure_threshold: 5,
                open_timeout_seconds: 45,
            },
            event_bus: BreakerConfig {
                failure_threshold: 5,
                open_timeout_seconds: 30,
            },
        }
    }
}

impl CircuitBreakerConfigs {
    /// Validates every configured breaker.
    fn validate(&self) -> Result<(), ConfigError> {
        self.llm.validate("llm")?;
        self.support_systems.validate("support_systems")?;
        self.search_index.validate("search_index")?;
        self.event_bus.validate("event_bus")?;
        Ok(())
    }
}

// ============================================================================
// SECTION: Safe Mode
// ============================================================================

/// Thresholds that trigger automatic safe-mode activation.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct SafeModeConfig {
    /// Consecutive critical errors before safe mode activates.
    #[serde(default = "default_safe_mode_critical_error_threshold")]
    pub critical_error_threshold: u32,
    /// Confidence drop (absolute) across consecutive analyses before safe mode activates.
    #[serde(default = "default_safe_mode_confidence_drift")]
    pub confidence_drift_threshold: f64,
    /// Actions within [`RateLimitConfig::window_seconds`] before excessive-action safe mode activates.
    #[serde(default = "default_safe_mode_excessive_actions")]
    pub excessive_action_threshold: u32,
}

const fn default_safe_mode_critical_error_threshold() -> u32 {
    5
}
const fn default_safe_mode_confidence_drift() -> f64 {
    0.3
}
const fn default_safe_mode_excessive_actions() -> u32 {
    20
}

impl Default for SafeModeConfig {
    fn default() -> Self {
        Self {
            critical_error_threshold: default_safe_mode_critical_error_threshold(),
            confidence_drift_threshold: default_safe_mode_confidence_drift(),
            excessive_action_threshold: default_safe_mode_excessive_actions(),
        }
    }
}

impl SafeModeConfig {
    /// Validates safe-mode threshold bounds.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.critical_error_threshold == 0 {
            return Err(ConfigError::Invalid(
                "safe_mode.critical_error_threshold must be greater than zero".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.confidence_drift_threshold) {
            return Err(ConfigError::Invalid(
                "safe_mode.confidence_drift_threshold must be in [0.0, 1.0]".to_string(),
            ));
        }
        if self.excessive_action_threshold == 0 {
            return Err(ConfigError::Invalid(
                "safe_mode.excessive_action_threshold must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Webhooks
// ============================================================================

/// Per-vendor webhook signing secrets. Absent secret disables signature
/// verification for that vendor (an explicit opt-out, never a silent one).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct WebhookConfig {
    /// Zendesk HMAC-SHA256 signing secret.
    #[serde(default)]
    pub zendesk_secret: Option<String>,
    /// Freshdesk HMAC-SHA256 signing secret.
    #[serde(default)]
    pub freshdesk_secret: Option<String>,
    /// Intercom HMAC-SHA1 signing secret.
    #[serde(default)]
    pub intercom_secret: Option<String>,
}

impl WebhookConfig {
    /// Validates that configured secrets are non-empty.
    fn validate(&self) -> Result<(), ConfigError> {
        for (name, secret) in [
            ("zendesk_secret", &self.zendesk_secret),
            ("freshdesk_secret", &self.freshdesk_secret),
            ("intercom_secret", &self.intercom_secret),
        ] {
            if let Some(value) = secret
                && value.trim().is_empty()
            {
                return Err(ConfigError::Invalid(format!("webhooks.{name} must be non-empty when set")));
            }
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Redaction
// ============================================================================

/// Extensions to the default redaction policy.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RedactionConfig {
    /// Additional sensitive field names, matched case-insensitively.
    #[serde(default)]
    pub extra_sensitive_fields: Vec<String>,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration loading or validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Path Helpers
// ============================================================================

/// Resolves the config path from an explicit argument, environment, or default.
fn resolve_path(path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = path {
        return Ok(path.to_path_buf());
    }
    if let Ok(env_path) = env::var(CONFIG_ENV_VAR) {
        if env_path.len() > MAX_TOTAL_PATH_LENGTH {
            return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
        }
        return Ok(PathBuf::from(env_path));
    }
    Ok(PathBuf::from(DEFAULT_CONFIG_NAME))
}

/// Validates the resolved path against security limits.
fn validate_path(path: &Path) -> Result<(), ConfigError> {
    let text = path.to_string_lossy();
    if text.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, reason = "test assertions read values that must be present")]

    use super::CircuitBreakerConfigs;
    use super::IncidentConfig;
    use super::PatternDetectorConfig;
    use super::RetryConfig;

    #[test]
    fn default_config_validates() {
        IncidentConfig::default().validate().expect("defaults are valid");
    }

    #[test]
    fn rejects_window_seconds_below_minimum() {
        let config = PatternDetectorConfig {
            window_seconds: 1,
            ..PatternDetectorConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_retry_cap_below_base() {
        let config = RetryConfig {
            max_attempts: 3,
            base_seconds: 10,
            cap_seconds: 2,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn default_circuit_breakers_match_spec_thresholds() {
        let breakers = CircuitBreakerConfigs::default();
        assert_eq!(breakers.llm.failure_threshold, 5);
        assert_eq!(breakers.llm.open_timeout_seconds, 60);
        assert_eq!(breakers.support_systems.failure_threshold, 3);
        assert_eq!(breakers.support_systems.open_timeout_seconds, 30);
        assert_eq!(breakers.search_index.failure_threshold, 5);
        assert_eq!(breakers.search_index.open_timeout_seconds, 45);
        assert_eq!(breakers.event_bus.failure_threshold, 5);
        assert_eq!(breakers.event_bus.open_timeout_seconds, 30);
        breakers.validate().expect("spec-default breakers are valid");
    }

    #[test]
    fn parses_from_toml() {
        let text = r#"
            [pattern_detector]
            window_seconds = 90
            min_pattern_frequency = 4

            [circuit_breakers.llm]
            failure_threshold = 5
            open_timeout_seconds = 60

            [circuit_breakers.support_systems]
            failure_threshold = 3
            open_timeout_seconds = 30

            [circuit_breakers.search_index]
            failure_threshold = 5
            open_timeout_seconds = 45

            [circuit_breakers.event_bus]
            failure_threshold = 5
            open_timeout_seconds = 30
        "#;
        let config: IncidentConfig = toml::from_str(text).expect("parses");
        assert_eq!(config.pattern_detector.window_seconds, 90);
        assert_eq!(config.pattern_detector.min_pattern_frequency, 4);
        config.validate().expect("parsed config is valid");
    }
}
