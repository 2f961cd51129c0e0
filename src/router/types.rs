//! Types used by the query router: intents and route outcomes.

use serde::{Deserialize, Serialize};

use crate::types::Metadata;

/// A named query intent: a centroid embedding plus descriptive metadata.
///
/// Intents are the router's unit of classification. A query routes to
/// the intent whose centroid is most cosine-similar to it, provided
/// that similarity clears [`crate::config::LearningConfig::router_threshold`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Intent {
    /// Unique intent name.
    pub name: String,
    /// Centroid embedding, updated incrementally as exemplars are added.
    pub centroid: Vec<f32>,
    /// Free-form descriptive metadata (e.g. `{"description": "..."}`).
    pub metadata: Metadata,
    /// Number of exemplars folded into the running centroid.
    pub exemplar_count: u64,
}

impl Intent {
    /// Creates a new intent seeded with a single exemplar embedding.
    pub fn new(name: impl Into<String>, seed_embedding: Vec<f32>, metadata: Metadata) -> Self {
        Self {
            name: name.into(),
            centroid: seed_embedding,
            metadata,
            exemplar_count: 1,
        }
    }

    /// Folds a new exemplar into the running centroid via incremental mean.
    pub fn fold_exemplar(&mut self, embedding: &[f32]) {
        let n = self.exemplar_count as f32;
        for (c, e) in self.centroid.iter_mut().zip(embedding.iter()) {
            *c += (*e - *c) / (n + 1.0);
        }
        self.exemplar_count += 1;
    }
}

/// The outcome of routing a single query.
#[derive(Clone, Debug)]
pub struct RouteResult {
    /// Matched intent name, or `None` if nothing cleared the threshold.
    pub intent: Option<String>,
    /// Cosine similarity to the matched intent's centroid (0.0 if no match).
    pub similarity: f32,
    /// Ranked candidates considered, most similar first.
    pub candidates: Vec<(String, f32)>,
}

/// Cumulative router statistics.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RouterStats {
    /// Total queries routed.
    pub total_queries: u64,
    /// Queries that cleared the threshold and matched an intent.
    pub total_matched: u64,
    /// Per-intent hit counts.
    pub hits_by_intent: std::collections::BTreeMap<String, u64>,
}

pub(super) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fold_exemplar_moves_centroid_toward_mean() {
        let mut intent = Intent::new("greet", vec![0.0, 0.0], Metadata::new());
        intent.fold_exemplar(&[2.0, 0.0]);
        assert_eq!(intent.exemplar_count, 2);
        assert!((intent.centroid[0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_identical_vectors() {
        let sim = cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_zero_vector_is_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }
}
