// incident-providers/src/search.rs
// ============================================================================
// Module: HTTP Search Index Provider
// Description: Similarity-search client for the pattern detector.
// Purpose: Translate incident_core::SearchIndex calls into HTTP requests
//          against a remote similarity index (e.g. Elasticsearch).
// Dependencies: incident-core, reqwest, serde_json
// ============================================================================

//! ## Overview
//! The pattern detector queries for patterns similar to a newly observed
//! signal, and indexes patterns it creates or updates, without knowing
//! whether the backend is an embedded index or a remote search cluster.
//! This provider speaks a small HTTP contract: `POST {base_url}/similar`
//! for queries, `POST {base_url}/index` for writes.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;

use incident_core::Pattern;
use incident_core::SearchIndex;
use incident_core::SearchIndexError;
use incident_core::Signal;
use incident_core::SimilarityMatch;
use reqwest::blocking::Client;
use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Configuration for [`HttpSearchIndex`].
#[derive(Debug, Clone)]
pub struct HttpSearchIndexConfig {
    /// Base URL of the search index service.
    pub base_url: String,
    /// Request timeout in milliseconds.
    pub timeout_ms: u64,
}

// ============================================================================
// SECTION: Client
// ============================================================================

/// `SearchIndex` implementation backed by an HTTP similarity service.
pub struct HttpSearchIndex {
    /// Client configuration.
    config: HttpSearchIndexConfig,
    /// Blocking HTTP client.
    client: Client,
}

impl HttpSearchIndex {
    /// Builds a client from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`SearchIndexError::QueryFailed`] if the underlying HTTP
    /// client cannot be constructed.
    pub fn new(config: HttpSearchIndexConfig) -> Result<Self, SearchIndexError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|err| SearchIndexError::QueryFailed(err.to_string()))?;
        Ok(Self { config, client })
    }
}

impl SearchIndex for HttpSearchIndex {
    fn find_similar(
        &self,
        signal: &Signal,
        min_score: f64,
    ) -> Result<Vec<SimilarityMatch>, SearchIndexError> {
        let request = SimilarityQuery { signal, min_score };
        let response = self
            .client
            .post(format!("{}/similar", self.config.base_url))
            .json(&request)
            .send()
            .map_err(|err| SearchIndexError::QueryFailed(err.to_string()))?;
        if !response.status().is_success() {
            return Err(SearchIndexError::QueryFailed(format!("http {}", response.status())));
        }
        let body: SimilarityResponse =
            response.json().map_err(|err| SearchIndexError::QueryFailed(err.to_string()))?;
        Ok(body
            .matches
            .into_iter()
            .filter(|candidate| candidate.score >= min_score)
            .map(|candidate| SimilarityMatch { pattern: candidate.pattern, score: candidate.score })
            .collect())
    }

    fn index(&self, pattern: &Pattern) -> Result<(), SearchIndexError> {
        let response = self
            .client
            .post(format!("{}/index", self.config.base_url))
            .json(pattern)
            .send()
            .map_err(|err| SearchIndexError::QueryFailed(err.to_string()))?;
        if !response.status().is_success() {
            return Err(SearchIndexError::QueryFailed(format!("http {}", response.status())));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Wire Types
// ============================================================================

/// Request body for a similarity query.
#[derive(Debug, Serialize)]
struct SimilarityQuery<'a> {
    /// Signal to find matches for.
    signal: &'a Signal,
    /// Minimum similarity score requested.
    min_score: f64,
}

/// Response body for a similarity query.
#[derive(Debug, Deserialize)]
struct SimilarityResponse {
    /// Candidate matches, in no particular order.
    matches: Vec<SimilarityCandidate>,
}

/// One candidate match returned by the similarity service.
#[derive(Debug, Deserialize)]
struct SimilarityCandidate {
    /// Matched pattern.
    pattern: Pattern,
    /// Similarity score in `[0, 1]`.
    score: f64,
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use incident_core::MerchantId;
    use incident_core::PatternId;
    use incident_core::PatternType;
    use incident_core::Timestamp;

    use super::*;

    fn sample_pattern() -> Pattern {
        Pattern {
            pattern_id: PatternId::new("pattern-1"),
            pattern_type: PatternType::ApiFailure,
            signal_ids: Vec::new(),
            merchant_ids: vec![MerchantId::new("m1")],
            first_seen: Timestamp::now(),
            last_seen: Timestamp::now(),
            confidence: 0.9,
            characteristics: std::collections::BTreeMap::new(),
        }
    }

    #[test]
    fn similarity_response_filters_below_min_score() {
        let body = SimilarityResponse {
            matches: vec![
                SimilarityCandidate { pattern: sample_pattern(), score: 0.95 },
                SimilarityCandidate { pattern: sample_pattern(), score: 0.2 },
            ],
        };
        let filtered: Vec<_> = body.matches.into_iter().filter(|candidate| candidate.score >= 0.5).collect();
        assert_eq!(filtered.len(), 1);
    }
}
