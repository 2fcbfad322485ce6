// incident-pipeline/src/detector/clustering.rs
// ============================================================================
// Module: N-gram TF-IDF Clustering
// Description: Character n-gram TF-IDF feature extraction and
//              density-based clustering for error messages without a
//              shared error code.
// Purpose: Group textually similar, otherwise uncorrelated signals into
//          cluster patterns.
// Dependencies: none (pure)
// ============================================================================

//! ## Overview
//! Mirrors a `TfidfVectorizer(analyzer='char', ngram_range=(3, 5),
//! max_features=100)` feature matrix fed into `DBSCAN(eps, min_samples)`:
//! character n-grams of length 3 to 5, term frequency scaled by inverse
//! document frequency across the message corpus, capped to the 100 most
//! frequent n-grams, clustered by Euclidean distance with the standard
//! core-point/border-point/noise DBSCAN expansion.

use std::collections::BTreeMap;
use std::collections::HashMap;

const MAX_FEATURES: usize = 100;
const MIN_NGRAM_LEN: usize = 3;
const MAX_NGRAM_LEN: usize = 5;

/// Label assigned to a point that DBSCAN could not attach to any cluster.
pub const NOISE_LABEL: i64 = -1;

fn char_ngrams(text: &str, out: &mut Vec<String>) {
    let chars: Vec<char> = text.chars().collect();
    for n in MIN_NGRAM_LEN..=MAX_NGRAM_LEN {
        if chars.len() < n {
            continue;
        }
        for window in chars.windows(n) {
            out.push(window.iter().collect());
        }
    }
}

/// Builds TF-IDF vectors (as sparse maps from vocabulary index to weight)
/// for `messages`, restricted to the [`MAX_FEATURES`] most frequent n-grams
/// across the corpus.
fn tfidf_vectors(messages: &[String]) -> Vec<BTreeMap<usize, f64>> {
    let mut document_ngrams: Vec<HashMap<String, usize>> = Vec::with_capacity(messages.len());
    let mut corpus_frequency: HashMap<String, usize> = HashMap::new();
    let mut document_frequency: HashMap<String, usize> = HashMap::new();

    for message in messages {
        let mut grams = Vec::new();
        char_ngrams(message, &mut grams);
        let mut counts: HashMap<String, usize> = HashMap::new();
        for gram in grams {
            *corpus_frequency.entry(gram.clone()).or_insert(0) += 1;
            *counts.entry(gram).or_insert(0) += 1;
        }
        for gram in counts.keys() {
            *document_frequency.entry(gram.clone()).or_insert(0) += 1;
        }
        document_ngrams.push(counts);
    }

    let mut vocabulary: Vec<&String> = corpus_frequency.keys().collect();
    vocabulary.sort_by(|a, b| corpus_frequency[*b].cmp(&corpus_frequency[*a]).then_with(|| a.cmp(b)));
    vocabulary.truncate(MAX_FEATURES);
    let index_of: HashMap<&str, usize> = vocabulary.iter().enumerate().map(|(index, gram)| (gram.as_str(), index)).collect();

    let document_count = messages.len().max(1) as f64;
    let idf: HashMap<&str, f64> = vocabulary
        .iter()
        .map(|gram| {
            let df = document_frequency.get(gram.as_str()).copied().unwrap_or(0) as f64;
            (gram.as_str(), ((document_count + 1.0) / (df + 1.0)).ln() + 1.0)
        })
        .collect();

    document_ngrams
        .into_iter()
        .map(|counts| {
            let mut vector: BTreeMap<usize, f64> = BTreeMap::new();
            let total: f64 = counts.values().sum::<usize>() as f64;
            if total == 0.0 {
                return vector;
            }
            for (gram, count) in counts {
                if let Some(&index) = index_of.get(gram.as_str()) {
                    let term_frequency = f64::from(u32::try_from(count).unwrap_or(u32::MAX)) / total;
                    vector.insert(index, term_frequency * idf[gram.as_str()]);
                }
            }
            let norm = vector.values().map(|weight| weight * weight).sum::<f64>().sqrt();
            if norm > 0.0 {
                for weight in vector.values_mut() {
                    *weight /= norm;
                }
            }
            vector
        })
        .collect()
}

fn euclidean_distance(a: &BTreeMap<usize, f64>, b: &BTreeMap<usize, f64>) -> f64 {
    let mut sum_sq = 0.0;
    for (index, value) in a {
        let other = b.get(index).copied().unwrap_or(0.0);
        sum_sq += (value - other).powi(2);
    }
    for (index, value) in b {
        if !a.contains_key(index) {
            sum_sq += value.powi(2);
        }
    }
    sum_sq.sqrt()
}

fn region_query(vectors: &[BTreeMap<usize, f64>], point: usize, eps: f64) -> Vec<usize> {
    (0..vectors.len())
        .filter(|&other| other != point && euclidean_distance(&vectors[point], &vectors[other]) <= eps)
        .collect()
}

/// Clusters `messages` by character n-gram TF-IDF similarity using DBSCAN
/// with the given `eps` neighborhood radius and `min_samples` core-point
/// threshold. Returns one label per input message; [`NOISE_LABEL`] marks
/// points that did not join any cluster.
#[must_use]
pub fn cluster_messages(messages: &[String], eps: f64, min_samples: usize) -> Vec<i64> {
    let vectors = tfidf_vectors(messages);
    let mut labels = vec![NOISE_LABEL; vectors.len()];
    let mut visited = vec![false; vectors.len()];
    let mut next_label = 0_i64;

    for point in 0..vectors.len() {
        if visited[point] {
            continue;
        }
        visited[point] = true;

        let mut neighbors = region_query(&vectors, point, eps);
        if neighbors.len() + 1 < min_samples {
            continue;
        }

        labels[point] = next_label;
        let mut seed_set = neighbors.clone();
        let mut cursor = 0;
        while cursor < seed_set.len() {
            let candidate = seed_set[cursor];
            cursor += 1;

            if !visited[candidate] {
                visited[candidate] = true;
                neighbors = region_query(&vectors, candidate, eps);
                if neighbors.len() + 1 >= min_samples {
                    for neighbor in neighbors {
                        if !seed_set.contains(&neighbor) {
                            seed_set.push(neighbor);
                        }
                    }
                }
            }
            if labels[candidate] == NOISE_LABEL {
                labels[candidate] = next_label;
            }
        }
        next_label += 1;
    }

    labels
}

#[cfg(test)]
mod tests {
    use super::NOISE_LABEL;
    use super::cluster_messages;

    #[test]
    fn groups_near_identical_messages_together() {
        let messages = vec![
            "connection timeout to payment gateway".to_string(),
            "connection timeout to payment service".to_string(),
            "connection timeout while reaching payment gw".to_string(),
            "completely unrelated inventory sync failure".to_string(),
        ];
        let labels = cluster_messages(&messages, 0.9, 3);
        assert_eq!(labels[0], labels[1]);
        assert_eq!(labels[1], labels[2]);
        assert_ne!(labels[0], NOISE_LABEL);
    }

    #[test]
    fn isolated_message_is_noise_when_below_min_samples() {
        let messages = vec!["alpha beta gamma".to_string(), "delta epsilon zeta".to_string()];
        let labels = cluster_messages(&messages, 0.1, 3);
        assert!(labels.iter().all(|label| *label == NOISE_LABEL));
    }

    #[test]
    fn empty_input_produces_no_labels() {
        let labels = cluster_messages(&[], 0.3, 3);
        assert!(labels.is_empty());
    }
}
