//! Nearest-identity matching under a threshold.
//!
//! Each identity is scored by its best reference (or its mean, in mean mode)
//! and the global best identity wins if it clears the threshold.
//!
//! Ties: when two identities reach exactly the same winning score, the
//! lexicographically smallest identity key is chosen. The store is walked in
//! sorted key order and the incumbent is only replaced by a strictly better
//! score, so the outcome never depends on enrollment order.

use crate::store::EmbeddingStore;
use crate::types::{
    Embedding, InvalidEmbedding, MatchConfig, MatchResult, Metric, RepresentativeMode, Score,
};

/// Strategy for deciding the identity behind a query embedding.
pub trait Matcher {
    fn compare(&self, query: &[f32], store: &EmbeddingStore) -> Result<MatchResult, InvalidEmbedding>;
}

/// Threshold matcher over an [`EmbeddingStore`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GalleryMatcher {
    pub metric: Metric,
    pub threshold: f32,
    pub mode: RepresentativeMode,
}

impl GalleryMatcher {
    pub fn new(config: &MatchConfig) -> Self {
        Self {
            metric: config.metric,
            threshold: config.threshold,
            mode: config.representative_mode,
        }
    }

    /// Best score of `probe` against any of `references`.
    fn identity_score(&self, probe: &Embedding, references: &[Embedding]) -> Option<f32> {
        let kind = self.metric.score_kind();
        references
            .iter()
            .map(|reference| self.metric.score(probe, reference))
            .fold(None, |best, score| match best {
                Some(incumbent) if !kind.is_better(score, incumbent) => Some(incumbent),
                _ => Some(score),
            })
    }
}

impl From<MatchConfig> for GalleryMatcher {
    fn from(config: MatchConfig) -> Self {
        Self::new(&config)
    }
}

impl Matcher for GalleryMatcher {
    fn compare(&self, query: &[f32], store: &EmbeddingStore) -> Result<MatchResult, InvalidEmbedding> {
        let probe = Embedding::from_slice(query)?;
        let kind = self.metric.score_kind();

        let Some(expected) = store.dimension() else {
            return Ok(MatchResult::EmptyStore {
                score: Score::sentinel(kind),
            });
        };
        if probe.dimension() != expected {
            return Err(InvalidEmbedding::DimensionMismatch {
                expected,
                got: probe.dimension(),
            });
        }

        let mut best: Option<(&str, f32)> = None;
        for identity in store.all_identities() {
            let Some(representative) = store.representative(identity, self.mode) else {
                continue;
            };
            let Some(score) = self.identity_score(&probe, representative.as_slice()) else {
                continue;
            };
            let replace = match best {
                None => true,
                Some((_, incumbent)) => kind.is_better(score, incumbent),
            };
            if replace {
                best = Some((identity, score));
            }
        }

        let Some((identity, value)) = best else {
            return Ok(MatchResult::EmptyStore {
                score: Score::sentinel(kind),
            });
        };
        let score = Score { value, kind };

        let result = if kind.passes(value, self.threshold) {
            MatchResult::Matched {
                identity: identity.to_string(),
                score,
            }
        } else {
            MatchResult::BelowThreshold {
                nearest: identity.to_string(),
                score,
            }
        };

        tracing::debug!(
            metric = %self.metric,
            threshold = self.threshold,
            best = identity,
            score = value,
            matched = result.is_match(),
            "query compared"
        );
        Ok(result)
    }
}

/// Match one query vector against `store` with the given options.
pub fn match_query(
    query: &[f32],
    store: &EmbeddingStore,
    config: &MatchConfig,
) -> Result<MatchResult, InvalidEmbedding> {
    GalleryMatcher::new(config).compare(query, store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ScoreKind;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn cosine(threshold: f32) -> MatchConfig {
        MatchConfig {
            metric: Metric::Cosine,
            threshold,
            representative_mode: RepresentativeMode::PerReference,
        }
    }

    fn euclidean(threshold: f32) -> MatchConfig {
        MatchConfig {
            metric: Metric::Euclidean,
            threshold,
            representative_mode: RepresentativeMode::PerReference,
        }
    }

    fn random_vector(rng: &mut StdRng, dim: usize) -> Vec<f32> {
        (0..dim).map(|_| rng.gen_range(-1.0f32..1.0)).collect()
    }

    /// 12 identities, 3 references each, 16 dimensions.
    fn random_store(rng: &mut StdRng) -> (EmbeddingStore, Vec<(String, Vec<f32>)>) {
        let mut enrolled = Vec::new();
        for i in 0..12 {
            for _ in 0..3 {
                enrolled.push((format!("S{i:02}"), random_vector(rng, 16)));
            }
        }
        let mut store = EmbeddingStore::new();
        for (id, v) in &enrolled {
            store.enroll(id, v).unwrap();
        }
        (store, enrolled)
    }

    #[test]
    fn test_best_similarity_clears_threshold() {
        // Best cosine similarity of the query against S1 is 0.92.
        let mut store = EmbeddingStore::new();
        store.enroll("S1", &[0.0, 1.0]).unwrap();
        store.enroll("S1", &[0.92, (1.0f32 - 0.92 * 0.92).sqrt()]).unwrap();
        store.enroll("S2", &[-1.0, 0.0]).unwrap();

        let result = match_query(&[1.0, 0.0], &store, &cosine(0.8)).unwrap();
        let MatchResult::Matched { identity, score } = result else {
            panic!("expected a match, got {result:?}");
        };
        assert_eq!(identity, "S1");
        assert_eq!(score.kind, ScoreKind::Similarity);
        assert!((score.value - 0.92).abs() < 1e-5, "got {}", score.value);
    }

    #[test]
    fn test_below_threshold_is_unknown() {
        let mut store = EmbeddingStore::new();
        store.enroll("S1", &[0.0, 1.0]).unwrap();

        let result = match_query(&[1.0, 0.0], &store, &cosine(0.5)).unwrap();
        assert!(!result.is_match());
        assert_eq!(result.label(), "Unknown");
        assert!(matches!(result, MatchResult::BelowThreshold { ref nearest, .. } if nearest == "S1"));
    }

    #[test]
    fn test_threshold_is_strict() {
        let mut store = EmbeddingStore::new();
        store.enroll("S1", &[1.0, 0.0]).unwrap();
        let result = match_query(&[1.0, 0.0], &store, &cosine(1.0)).unwrap();
        assert!(!result.is_match());
    }

    #[test]
    fn test_empty_store_is_unknown_with_sentinel() {
        let store = EmbeddingStore::new();
        let result = match_query(&[0.3, 0.4, 0.5], &store, &cosine(0.4)).unwrap();
        assert_eq!(
            result,
            MatchResult::EmptyStore {
                score: Score { value: -1.0, kind: ScoreKind::Similarity }
            }
        );

        let result = match_query(&[0.3, 0.4, 0.5], &store, &euclidean(0.8)).unwrap();
        let score = result.score().unwrap();
        assert_eq!(score.kind, ScoreKind::Distance);
        assert!(score.value.is_infinite());
    }

    #[test]
    fn test_invalid_query_is_rejected() {
        let mut store = EmbeddingStore::new();
        store.enroll("S1", &[1.0, 0.0]).unwrap();
        assert_eq!(
            match_query(&[], &store, &cosine(0.4)),
            Err(InvalidEmbedding::Empty)
        );
        assert_eq!(
            match_query(&[0.0, 0.0], &store, &cosine(0.4)),
            Err(InvalidEmbedding::ZeroNorm)
        );
        assert_eq!(
            match_query(&[f32::NAN, 1.0], &store, &cosine(0.4)),
            Err(InvalidEmbedding::NonFinite { index: 0 })
        );
        assert_eq!(
            match_query(&[1.0, 0.0, 0.0], &store, &cosine(0.4)),
            Err(InvalidEmbedding::DimensionMismatch { expected: 2, got: 3 })
        );
    }

    #[test]
    fn test_invalid_query_rejected_even_when_store_empty() {
        let store = EmbeddingStore::new();
        assert_eq!(
            match_query(&[0.0, 0.0], &store, &cosine(0.4)),
            Err(InvalidEmbedding::ZeroNorm)
        );
    }

    #[test]
    fn test_euclidean_uses_minimum_distance() {
        let mut store = EmbeddingStore::new();
        store.enroll("far", &[-1.0, 0.0]).unwrap();
        store.enroll("near", &[0.0, 1.0]).unwrap();
        store.enroll("near", &[0.9, 0.1]).unwrap();

        let result = match_query(&[1.0, 0.0], &store, &euclidean(0.8)).unwrap();
        let MatchResult::Matched { identity, score } = result else {
            panic!("expected a match, got {result:?}");
        };
        assert_eq!(identity, "near");
        assert_eq!(score.kind, ScoreKind::Distance);
        assert!(score.value < 0.2);
    }

    #[test]
    fn test_query_is_normalized_before_comparison() {
        let mut store = EmbeddingStore::new();
        store.enroll("S1", &[1.0, 0.0]).unwrap();
        let result = match_query(&[40.0, 0.0], &store, &euclidean(0.1)).unwrap();
        assert!(result.is_match());
        assert!(result.score().unwrap().value.abs() < 1e-6);
    }

    #[test]
    fn test_mean_mode_compares_against_mean() {
        // References at 0 and 90 degrees; the query sits on the 45 degree mean.
        let mut store = EmbeddingStore::new();
        store.enroll("S1", &[1.0, 0.0]).unwrap();
        store.enroll("S1", &[0.0, 1.0]).unwrap();
        let query = [1.0, 1.0];

        let per_ref = match_query(&query, &store, &cosine(0.9)).unwrap();
        assert!(!per_ref.is_match());

        let mean = MatchConfig {
            representative_mode: RepresentativeMode::Mean,
            ..cosine(0.9)
        };
        let result = match_query(&query, &store, &mean).unwrap();
        assert!(result.is_match());
        assert!((result.score().unwrap().value - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_exact_tie_picks_smallest_key() {
        // Mirror-image references give bit-identical similarities.
        for order in [["bravo", "alpha"], ["alpha", "bravo"]] {
            let mut store = EmbeddingStore::new();
            store.enroll(order[0], &[0.6, 0.8]).unwrap();
            store.enroll(order[1], &[0.6, -0.8]).unwrap();

            let result = match_query(&[1.0, 0.0], &store, &cosine(0.5)).unwrap();
            assert_eq!(result.identity(), Some("alpha"));
        }
    }

    #[test]
    fn test_exact_tie_on_distance_picks_smallest_key() {
        let mut store = EmbeddingStore::new();
        store.enroll("zulu", &[0.6, 0.8]).unwrap();
        store.enroll("yankee", &[0.6, -0.8]).unwrap();
        let result = match_query(&[1.0, 0.0], &store, &euclidean(1.0)).unwrap();
        assert_eq!(result.identity(), Some("yankee"));
    }

    #[test]
    fn test_insertion_order_independent() {
        let mut rng = StdRng::seed_from_u64(7);
        let (forward, enrolled) = random_store(&mut rng);

        let mut reversed = EmbeddingStore::new();
        for (id, v) in enrolled.iter().rev() {
            reversed.enroll(id, v).unwrap();
        }

        for config in [cosine(0.2), euclidean(1.2)] {
            for _ in 0..50 {
                let query = random_vector(&mut rng, 16);
                let a = match_query(&query, &forward, &config).unwrap();
                let b = match_query(&query, &reversed, &config).unwrap();
                assert_eq!(a.identity(), b.identity());
                assert_eq!(a.score().map(|s| s.kind), b.score().map(|s| s.kind));
            }
        }
    }

    #[test]
    fn test_identical_queries_identical_results() {
        let mut rng = StdRng::seed_from_u64(11);
        let (store, _) = random_store(&mut rng);
        let query = random_vector(&mut rng, 16);
        let config = cosine(0.1);
        assert_eq!(
            match_query(&query, &store, &config).unwrap(),
            match_query(&query.clone(), &store, &config).unwrap()
        );
    }

    #[test]
    fn test_raising_cosine_threshold_never_adds_matches() {
        let mut rng = StdRng::seed_from_u64(42);
        let (store, _) = random_store(&mut rng);
        let queries: Vec<Vec<f32>> = (0..60).map(|_| random_vector(&mut rng, 16)).collect();

        let mut previous = usize::MAX;
        for step in 0..=40 {
            let threshold = -1.0 + step as f32 * 0.05;
            let matched = queries
                .iter()
                .filter(|q| match_query(q, &store, &cosine(threshold)).unwrap().is_match())
                .count();
            assert!(matched <= previous, "threshold {threshold}: {matched} > {previous}");
            previous = matched;
        }
    }

    #[test]
    fn test_lowering_distance_threshold_never_adds_matches() {
        let mut rng = StdRng::seed_from_u64(43);
        let (store, _) = random_store(&mut rng);
        let queries: Vec<Vec<f32>> = (0..60).map(|_| random_vector(&mut rng, 16)).collect();

        let mut previous = usize::MAX;
        for step in (0..=40).rev() {
            let threshold = step as f32 * 0.05;
            let matched = queries
                .iter()
                .filter(|q| match_query(q, &store, &euclidean(threshold)).unwrap().is_match())
                .count();
            assert!(matched <= previous, "threshold {threshold}: {matched} > {previous}");
            previous = matched;
        }
    }
}
