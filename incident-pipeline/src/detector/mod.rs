// incident-pipeline/src/detector/mod.rs
// ============================================================================
// Module: Pattern Detector
// Description: Sliding-window pattern detection over normalized signals:
//              known-pattern matching, periodic cross-merchant/frequency
//              grouping, and n-gram clustering for uncoded signals.
// Purpose: Correlate individually unremarkable signals into actionable
//          Patterns for the root-cause analyzer.
// Dependencies: incident-core, incident-safety, incident-config, time
// ============================================================================

//! ## Overview
//! One [`PatternDetector`] is owned by a single long-lived worker task; its
//! window buffer is never shared across tasks, matching the "one buffer per
//! worker" resource policy. [`PatternDetector::observe`] runs on every
//! arriving signal (known-pattern matching); [`PatternDetector::run_window_analysis`]
//! runs on the detector's periodic tick (cross-merchant/frequency grouping
//! plus n-gram clustering for signals without an error code).

mod clustering;

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::sync::Arc;

use serde_json::Value;

use incident_config::PatternDetectorConfig;
use incident_core::DEFAULT_HASH_ALGORITHM;
use incident_core::EventBus;
use incident_core::EventMessage;
use incident_core::MerchantId;
use incident_core::PATTERN_CONFIDENCE_CEILING;
use incident_core::Pattern;
use incident_core::PatternCache;
use incident_core::PatternId;
use incident_core::PatternType;
use incident_core::SearchIndex;
use incident_core::Signal;
use incident_core::SignalId;
use incident_core::Timestamp;
use incident_core::Topic;
use incident_core::hash_bytes;
use incident_safety::DegradationManager;
use incident_safety::Service;

/// Minimum confidence contribution from the cross-merchant formula's base term.
const CROSS_MERCHANT_BASE: f64 = 0.6;
/// Minimum confidence contribution from the frequency formula's base term.
const FREQUENCY_BASE: f64 = 0.5;
/// Ceiling applied to frequency-only (non-cross-merchant) patterns.
const FREQUENCY_CEILING: f64 = 0.9;
/// Ceiling applied to cluster patterns.
const CLUSTER_CEILING: f64 = 0.85;

/// Correlates signals into patterns over a bounded sliding window.
pub struct PatternDetector {
    config: PatternDetectorConfig,
    search_index: Arc<dyn SearchIndex + Send + Sync>,
    cache: Arc<dyn PatternCache + Send + Sync>,
    event_bus: Arc<dyn EventBus + Send + Sync>,
    degradation: Arc<DegradationManager>,
    window: VecDeque<Signal>,
}

impl PatternDetector {
    /// Builds a detector over an empty window.
    #[must_use]
    pub fn new(
        config: PatternDetectorConfig,
        search_index: Arc<dyn SearchIndex + Send + Sync>,
        cache: Arc<dyn PatternCache + Send + Sync>,
        event_bus: Arc<dyn EventBus + Send + Sync>,
        degradation: Arc<DegradationManager>,
    ) -> Self {
        Self {
            config,
            search_index,
            cache,
            event_bus,
            degradation,
            window: VecDeque::new(),
        }
    }

    /// Signals currently held in the sliding window (test/inspection use).
    #[must_use]
    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    fn trim_window(&mut self, now: Timestamp) {
        let span = time::Duration::seconds(i64::try_from(self.config.window_seconds).unwrap_or(i64::MAX));
        while let Some(front) = self.window.front() {
            if now.saturating_duration_since(front.timestamp) >= span {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }

    /// Trims the window to `now`, attempts to match `signal` against a known
    /// pattern, then appends `signal` to the window regardless of outcome.
    pub fn observe(&mut self, signal: Signal, now: Timestamp) -> Option<Pattern> {
        self.trim_window(now);
        let matched = self.match_known_pattern(&signal);
        self.window.push_back(signal);
        matched
    }

    fn match_known_pattern(&mut self, signal: &Signal) -> Option<Pattern> {
        if signal.error_message.is_none() && signal.error_code.is_none() {
            return None;
        }
        match self.search_index.find_similar(signal, self.config.similarity_min_score) {
            Ok(matches) => {
                self.degradation.mark_healthy(Service::SearchIndex);
                let best = matches.into_iter().max_by(|a, b| a.score.total_cmp(&b.score))?;
                Some(self.append_to_pattern(best.pattern, signal))
            }
            Err(error) => {
                tracing::warn!(error = %error, "search index unavailable, skipping known-pattern match");
                self.degradation.mark_degraded(Service::SearchIndex);
                None
            }
        }
    }

    fn append_to_pattern(&mut self, mut pattern: Pattern, signal: &Signal) -> Pattern {
        pattern.signal_ids.push(signal.signal_id.clone());
        if !pattern.merchant_ids.contains(&signal.merchant_id) {
            pattern.merchant_ids.push(signal.merchant_id.clone());
        }
        let frequency = pattern.frequency();
        #[allow(clippy::cast_precision_loss, reason = "frequency counts stay far below f64's integer precision limit")]
        let recomputed = FREQUENCY_BASE + 0.05 * frequency as f64;
        pattern.confidence = recomputed.min(PATTERN_CONFIDENCE_CEILING).max(pattern.confidence);
        pattern.last_seen = signal.timestamp;
        self.publish_and_store(&pattern);
        pattern
    }

    /// Groups the current window by source, then by error code, emitting
    /// cross-merchant or frequency patterns (cross-merchant takes
    /// precedence when both would match), plus n-gram cluster patterns for
    /// signals lacking an error code. Run on the detector's periodic tick
    /// (spec default: every 30s) once the window holds at least
    /// `min_pattern_frequency` signals.
    pub fn run_window_analysis(&mut self) -> Vec<Pattern> {
        if self.window.len() < self.config.min_pattern_frequency {
            return Vec::new();
        }

        let mut by_source: BTreeMap<&'static str, Vec<&Signal>> = BTreeMap::new();
        for signal in &self.window {
            by_source.entry(signal.source.as_str()).or_default().push(signal);
        }

        let mut emitted = Vec::new();
        for (source_name, signals) in by_source {
            emitted.extend(self.detect_for_source(source_name, &signals));
        }
        emitted
    }

    fn detect_for_source(&mut self, source_name: &str, signals: &[&Signal]) -> Vec<Pattern> {
        let mut by_error_code: BTreeMap<&str, Vec<&Signal>> = BTreeMap::new();
        for signal in signals {
            if let Some(error_code) = signal.error_code.as_deref() {
                by_error_code.entry(error_code).or_default().push(signal);
            }
        }

        let mut patterns = Vec::new();
        let pattern_type = signals.first().map_or(PatternType::ConfigError, |signal| PatternType::from_signal_source(signal.source));

        for (error_code, code_signals) in by_error_code {
            if code_signals.len() < self.config.min_pattern_frequency {
                continue;
            }
            let mut merchant_ids: Vec<MerchantId> = Vec::new();
            for signal in &code_signals {
                if !merchant_ids.contains(&signal.merchant_id) {
                    merchant_ids.push(signal.merchant_id.clone());
                }
            }

            let pattern = if merchant_ids.len() >= 2 {
                self.upsert_cross_merchant_pattern(source_name, error_code, &code_signals, &merchant_ids, pattern_type)
            } else {
                self.upsert_frequency_pattern(source_name, error_code, &code_signals, &merchant_ids, pattern_type)
            };
            patterns.push(pattern);
        }

        let uncoded: Vec<&Signal> = signals.iter().filter(|signal| signal.error_code.is_none()).copied().collect();
        if uncoded.len() >= self.config.min_pattern_frequency {
            patterns.extend(self.cluster_uncoded(source_name, &uncoded, pattern_type));
        }

        patterns
    }

    fn upsert_cross_merchant_pattern(
        &mut self,
        source_name: &str,
        error_code: &str,
        signals: &[&Signal],
        merchant_ids: &[MerchantId],
        pattern_type: PatternType,
    ) -> Pattern {
        let pattern_id = generate_pattern_id(&format!("cross_merchant_{source_name}_{error_code}"));
        #[allow(clippy::cast_precision_loss, reason = "merchant/signal counts stay far below f64's integer precision limit")]
        let confidence = (CROSS_MERCHANT_BASE + 0.05 * merchant_ids.len() as f64 + 0.02 * signals.len() as f64).min(PATTERN_CONFIDENCE_CEILING);
        let mut characteristics: BTreeMap<String, Value> = BTreeMap::new();
        characteristics.insert("error_code".to_string(), Value::from(error_code));
        characteristics.insert("cross_merchant".to_string(), Value::from(true));
        characteristics.insert("merchant_count".to_string(), Value::from(merchant_ids.len()));
        self.upsert_pattern(pattern_id, pattern_type, signals, characteristics, confidence)
    }

    fn upsert_frequency_pattern(
        &mut self,
        source_name: &str,
        error_code: &str,
        signals: &[&Signal],
        _merchant_ids: &[MerchantId],
        pattern_type: PatternType,
    ) -> Pattern {
        let pattern_id = generate_pattern_id(&format!("frequency_{source_name}_{error_code}"));
        #[allow(clippy::cast_precision_loss, reason = "signal counts stay far below f64's integer precision limit")]
        let confidence = (FREQUENCY_BASE + 0.05 * signals.len() as f64).min(FREQUENCY_CEILING);
        let mut characteristics: BTreeMap<String, Value> = BTreeMap::new();
        characteristics.insert("error_code".to_string(), Value::from(error_code));
        characteristics.insert("frequency_based".to_string(), Value::from(true));
        self.upsert_pattern(pattern_id, pattern_type, signals, characteristics, confidence)
    }

    fn cluster_uncoded(&mut self, source_name: &str, signals: &[&Signal], pattern_type: PatternType) -> Vec<Pattern> {
        let messages: Vec<String> = signals.iter().map(|signal| signal.error_message.clone().unwrap_or_default()).collect();
        let labels = clustering::cluster_messages(&messages, self.config.cluster_epsilon, self.config.min_pattern_frequency);

        let mut by_label: BTreeMap<i64, Vec<&Signal>> = BTreeMap::new();
        for (index, label) in labels.iter().enumerate() {
            if *label == clustering::NOISE_LABEL {
                continue;
            }
            by_label.entry(*label).or_default().push(signals[index]);
        }

        by_label
            .into_iter()
            .filter(|(_, members)| members.len() >= self.config.min_pattern_frequency)
            .map(|(label, members)| {
                let pattern_id = generate_pattern_id(&format!("cluster_{source_name}_{label}"));
                #[allow(clippy::cast_precision_loss, reason = "signal counts stay far below f64's integer precision limit")]
                let confidence = (FREQUENCY_BASE + 0.04 * members.len() as f64).min(CLUSTER_CEILING);
                let mut characteristics: BTreeMap<String, Value> = BTreeMap::new();
                characteristics.insert("cluster_based".to_string(), Value::from(true));
                characteristics.insert("cluster_label".to_string(), Value::from(label));
                characteristics.insert("similarity_threshold".to_string(), Value::from(self.config.similarity_min_score));
                self.upsert_pattern(pattern_id, pattern_type, &members, characteristics, confidence)
            })
            .collect()
    }

    /// Merges `signals` into any existing cached pattern for `pattern_id`
    /// (so a repeated detection of the same discriminator updates rather
    /// than duplicates), stores the result, and publishes it.
    fn upsert_pattern(
        &mut self,
        pattern_id: PatternId,
        pattern_type: PatternType,
        signals: &[&Signal],
        characteristics: BTreeMap<String, Value>,
        computed_confidence: f64,
    ) -> Pattern {
        let existing = self.cache.get(&pattern_id);

        let mut signal_ids: Vec<SignalId> = existing.as_ref().map(|pattern| pattern.signal_ids.clone()).unwrap_or_default();
        let mut merchant_ids: Vec<MerchantId> = existing.as_ref().map(|pattern| pattern.merchant_ids.clone()).unwrap_or_default();
        for signal in signals {
            if !signal_ids.contains(&signal.signal_id) {
                signal_ids.push(signal.signal_id.clone());
            }
            if !merchant_ids.contains(&signal.merchant_id) {
                merchant_ids.push(signal.merchant_id.clone());
            }
        }

        let signal_timestamps = signals.iter().map(|signal| signal.timestamp);
        let first_seen = signal_timestamps
            .clone()
            .min()
            .map_or_else(Timestamp::now, |candidate| existing.as_ref().map_or(candidate, |pattern| candidate.min(pattern.first_seen)));
        let last_seen = signal_timestamps
            .max()
            .map_or_else(Timestamp::now, |candidate| existing.as_ref().map_or(candidate, |pattern| candidate.max(pattern.last_seen)));

        let confidence = computed_confidence.min(PATTERN_CONFIDENCE_CEILING).max(existing.as_ref().map_or(0.0, |pattern| pattern.confidence));

        let pattern = Pattern {
            pattern_id,
            pattern_type,
            signal_ids,
            merchant_ids,
            first_seen,
            last_seen,
            confidence,
            characteristics,
        };
        self.publish_and_store(&pattern);
        pattern
    }

    fn publish_and_store(&self, pattern: &Pattern) {
        self.cache.put(pattern.clone());
        if let Err(error) = self.search_index.index(pattern) {
            tracing::warn!(error = %error, pattern_id = %pattern.pattern_id, "failed to index pattern");
            self.degradation.mark_degraded(Service::SearchIndex);
        }

        let payload = match serde_json::to_value(pattern) {
            Ok(payload) => payload,
            Err(error) => {
                tracing::error!(error = %error, pattern_id = %pattern.pattern_id, "failed to serialize pattern for publication");
                return;
            }
        };
        let message = EventMessage {
            key: pattern.pattern_id.as_str().to_string(),
            payload,
        };
        if let Err(error) = self.event_bus.publish(Topic::PatternsDetected, &message) {
            tracing::warn!(error = %error, pattern_id = %pattern.pattern_id, "event bus publish failed, marking degraded");
            self.degradation.mark_degraded(Service::EventBus);
        } else {
            self.degradation.mark_healthy(Service::EventBus);
        }
    }
}

fn generate_pattern_id(seed: &str) -> PatternId {
    let digest = hash_bytes(DEFAULT_HASH_ALGORITHM, seed.as_bytes());
    PatternId::new(format!("pattern_{}", &digest.value[..16]))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, reason = "test assertions read values that must be present")]

    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::sync::Mutex;

    use serde_json::json;

    use super::PatternDetector;
    use incident_config::PatternDetectorConfig;
    use incident_core::EventBus;
    use incident_core::EventBusError;
    use incident_core::EventMessage;
    use incident_core::Pattern;
    use incident_core::PatternCache;
    use incident_core::PatternId;
    use incident_core::SearchIndex;
    use incident_core::Severity;
    use incident_core::Signal;
    use incident_core::SignalSource;
    use incident_core::SimilarityMatch;
    use incident_core::Timestamp;
    use incident_core::Topic;
    use incident_safety::DegradationManager;

    #[derive(Default)]
    struct StubSearchIndex;

    impl SearchIndex for StubSearchIndex {
        fn find_similar(&self, _signal: &Signal, _min_score: f64) -> Result<Vec<SimilarityMatch>, incident_core::SearchIndexError> {
            Ok(Vec::new())
        }

        fn index(&self, _pattern: &Pattern) -> Result<(), incident_core::SearchIndexError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct MemoryCache {
        patterns: Mutex<BTreeMap<String, Pattern>>,
    }

    impl PatternCache for MemoryCache {
        fn get(&self, pattern_id: &PatternId) -> Option<Pattern> {
            self.patterns.lock().expect("lock").get(pattern_id.as_str()).cloned()
        }

        fn put(&self, pattern: Pattern) {
            self.patterns.lock().expect("lock").insert(pattern.pattern_id.as_str().to_string(), pattern);
        }

        fn all(&self) -> Vec<Pattern> {
            self.patterns.lock().expect("lock").values().cloned().collect()
        }

        fn evict_expired(&self, _now: Timestamp, _window_seconds: i64) {}
    }

    #[derive(Default)]
    struct RecordingBus {
        published: Mutex<Vec<(String, String)>>,
    }

    impl EventBus for RecordingBus {
        fn publish(&self, topic: Topic, message: &EventMessage) -> Result<(), EventBusError> {
            self.published.lock().expect("lock").push((topic.as_str().to_string(), message.key.clone()));
            Ok(())
        }
    }

    impl RecordingBus {
        fn published(&self) -> Vec<(String, String)> {
            self.published.lock().expect("lock").clone()
        }
    }

    fn signal(source: SignalSource, merchant: &str, error_code: Option<&str>, error_message: Option<&str>, now: Timestamp) -> Signal {
        Signal {
            signal_id: uuid::Uuid::new_v4().to_string().into(),
            timestamp: now,
            source,
            raw_data: json!({}),
            merchant_id: merchant.into(),
            migration_stage: None,
            affected_resource: None,
            severity: Severity::High,
            error_code: error_code.map(ToString::to_string),
            error_message: error_message.map(ToString::to_string),
            context: BTreeMap::new(),
        }
    }

    fn detector() -> (PatternDetector, Arc<RecordingBus>) {
        let bus = Arc::new(RecordingBus::default());
        let detector = PatternDetector::new(
            PatternDetectorConfig::default(),
            Arc::new(StubSearchIndex::default()),
            Arc::new(MemoryCache::default()),
            Arc::clone(&bus) as Arc<dyn EventBus + Send + Sync>,
            Arc::new(DegradationManager::new()),
        );
        (detector, bus)
    }

    #[test]
    fn cross_merchant_pattern_emitted_over_frequency_when_both_match() {
        let (mut detector, bus) = detector();
        let now = Timestamp::now();
        for merchant in ["m1", "m1", "m2"] {
            detector.observe(signal(SignalSource::ApiFailure, merchant, Some("500"), Some("boom"), now), now);
        }
        let patterns = detector.run_window_analysis();
        assert_eq!(patterns.len(), 1);
        assert!(patterns[0].characteristics.get("cross_merchant").and_then(serde_json::Value::as_bool).unwrap_or(false));
        assert_eq!(bus.published().len(), 1);
    }

    #[test]
    fn frequency_pattern_emitted_for_single_merchant_repetition() {
        let (mut detector, _bus) = detector();
        let now = Timestamp::now();
        for _ in 0..3 {
            detector.observe(signal(SignalSource::ApiFailure, "m1", Some("500"), Some("boom"), now), now);
        }
        let patterns = detector.run_window_analysis();
        assert_eq!(patterns.len(), 1);
        assert!(patterns[0].characteristics.get("frequency_based").and_then(serde_json::Value::as_bool).unwrap_or(false));
    }

    #[test]
    fn repeated_detection_updates_same_pattern_id_instead_of_duplicating() {
        let (mut detector, _bus) = detector();
        let now = Timestamp::now();
        for _ in 0..3 {
            detector.observe(signal(SignalSource::ApiFailure, "m1", Some("500"), Some("boom"), now), now);
        }
        let first_round = detector.run_window_analysis();
        for _ in 0..2 {
            detector.observe(signal(SignalSource::ApiFailure, "m1", Some("500"), Some("boom"), now), now);
        }
        let second_round = detector.run_window_analysis();
        assert_eq!(first_round[0].pattern_id, second_round[0].pattern_id);
        assert!(second_round[0].frequency() > first_round[0].frequency());
        assert!(second_round[0].confidence >= first_round[0].confidence);
    }

    #[test]
    fn below_minimum_frequency_emits_nothing() {
        let (mut detector, _bus) = detector();
        let now = Timestamp::now();
        detector.observe(signal(SignalSource::ApiFailure, "m1", Some("500"), Some("boom"), now), now);
        assert!(detector.run_window_analysis().is_empty());
    }
}
