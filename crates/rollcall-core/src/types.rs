use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Label rendered for every face that did not resolve to a roster identity.
pub const UNKNOWN_LABEL: &str = "Unknown";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidEmbedding {
    #[error("embedding has no components")]
    Empty,
    #[error("embedding component {index} is not finite")]
    NonFinite { index: usize },
    #[error("embedding has zero norm")]
    ZeroNorm,
    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

/// A roster entry: the student's unique key (USN) and display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentRecord {
    pub key: String,
    pub name: String,
}

impl StudentRecord {
    pub fn new(key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
        }
    }
}

/// Bounding box for a detected face, in source image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    /// Detector confidence. Manifests that omit it are treated as certain.
    #[serde(default = "full_confidence")]
    pub confidence: f32,
}

fn full_confidence() -> f32 {
    1.0
}

/// Unit-normalized face embedding (typically 512-dimensional for ArcFace).
///
/// The only way to build one is [`Embedding::new`], so every value of this
/// type is finite, non-empty and has unit L2 norm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f32>", into = "Vec<f32>")]
pub struct Embedding {
    values: Vec<f32>,
}

impl Embedding {
    /// Validate and L2-normalize a raw extractor output.
    pub fn new(values: Vec<f32>) -> Result<Self, InvalidEmbedding> {
        if values.is_empty() {
            return Err(InvalidEmbedding::Empty);
        }
        if let Some(index) = values.iter().position(|v| !v.is_finite()) {
            return Err(InvalidEmbedding::NonFinite { index });
        }

        // Accumulate in f64 so large components cannot overflow the norm.
        let norm = values
            .iter()
            .map(|&v| f64::from(v) * f64::from(v))
            .sum::<f64>()
            .sqrt();
        if norm == 0.0 {
            return Err(InvalidEmbedding::ZeroNorm);
        }

        let values = values
            .iter()
            .map(|&v| (f64::from(v) / norm) as f32)
            .collect();
        Ok(Self { values })
    }

    pub fn from_slice(values: &[f32]) -> Result<Self, InvalidEmbedding> {
        Self::new(values.to_vec())
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    /// Cosine similarity in [-1, 1]. Higher = more similar.
    ///
    /// Both sides are unit length, so this is a plain dot product.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| a * b)
            .sum()
    }

    /// Euclidean distance in [0, 2]. Lower = more similar.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// Component-wise mean of `embeddings`, re-normalized.
    ///
    /// Fails with `ZeroNorm` when the references cancel out and with `Empty`
    /// when there is nothing to average.
    pub fn mean(embeddings: &[Embedding]) -> Result<Embedding, InvalidEmbedding> {
        let first = embeddings.first().ok_or(InvalidEmbedding::Empty)?;
        let dim = first.dimension();

        let mut sum = vec![0.0f64; dim];
        for embedding in embeddings {
            if embedding.dimension() != dim {
                return Err(InvalidEmbedding::DimensionMismatch {
                    expected: dim,
                    got: embedding.dimension(),
                });
            }
            for (acc, v) in sum.iter_mut().zip(embedding.values.iter()) {
                *acc += f64::from(*v);
            }
        }

        let count = embeddings.len() as f64;
        Embedding::new(sum.into_iter().map(|v| (v / count) as f32).collect())
    }
}

impl TryFrom<Vec<f32>> for Embedding {
    type Error = InvalidEmbedding;

    fn try_from(values: Vec<f32>) -> Result<Self, Self::Error> {
        Embedding::new(values)
    }
}

impl From<Embedding> for Vec<f32> {
    fn from(embedding: Embedding) -> Self {
        embedding.values
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown {kind} '{value}' (expected one of: {expected})")]
pub struct ParseOptionError {
    kind: &'static str,
    value: String,
    expected: &'static str,
}

/// Comparison metric used for a matching decision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    #[default]
    Cosine,
    Euclidean,
}

impl Metric {
    pub fn score_kind(self) -> ScoreKind {
        match self {
            Metric::Cosine => ScoreKind::Similarity,
            Metric::Euclidean => ScoreKind::Distance,
        }
    }

    pub fn score(self, a: &Embedding, b: &Embedding) -> f32 {
        match self {
            Metric::Cosine => a.similarity(b),
            Metric::Euclidean => a.euclidean_distance(b),
        }
    }

    /// Threshold that works for ArcFace embeddings under this metric.
    pub fn default_threshold(self) -> f32 {
        match self {
            Metric::Cosine => 0.40,
            Metric::Euclidean => 0.80,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Metric::Cosine => "cosine",
            Metric::Euclidean => "euclidean",
        })
    }
}

impl FromStr for Metric {
    type Err = ParseOptionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cosine" => Ok(Metric::Cosine),
            "euclidean" | "l2" => Ok(Metric::Euclidean),
            _ => Err(ParseOptionError {
                kind: "metric",
                value: s.to_string(),
                expected: "cosine, euclidean",
            }),
        }
    }
}

/// How an identity with several reference embeddings is compared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepresentativeMode {
    /// Best score over every stored reference.
    #[default]
    PerReference,
    /// Single mean of the references, re-normalized.
    Mean,
}

impl fmt::Display for RepresentativeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RepresentativeMode::PerReference => "per_reference",
            RepresentativeMode::Mean => "mean",
        })
    }
}

impl FromStr for RepresentativeMode {
    type Err = ParseOptionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "per_reference" | "per-reference" => Ok(RepresentativeMode::PerReference),
            "mean" => Ok(RepresentativeMode::Mean),
            _ => Err(ParseOptionError {
                kind: "representative mode",
                value: s.to_string(),
                expected: "per_reference, mean",
            }),
        }
    }
}

/// Direction of a score: which way is "better".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreKind {
    /// Higher is better.
    Similarity,
    /// Lower is better.
    Distance,
}

impl ScoreKind {
    /// Whether `candidate` strictly beats `incumbent`.
    pub fn is_better(self, candidate: f32, incumbent: f32) -> bool {
        match self {
            ScoreKind::Similarity => candidate > incumbent,
            ScoreKind::Distance => candidate < incumbent,
        }
    }

    /// Whether `score` clears `threshold`. The comparison is strict.
    pub fn passes(self, score: f32, threshold: f32) -> bool {
        self.is_better(score, threshold)
    }

    /// Worst possible score, reported when there was nothing to compare.
    pub fn sentinel(self) -> f32 {
        match self {
            ScoreKind::Similarity => -1.0,
            ScoreKind::Distance => f32::INFINITY,
        }
    }
}

impl fmt::Display for ScoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ScoreKind::Similarity => "similarity",
            ScoreKind::Distance => "distance",
        })
    }
}

/// A score together with its direction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub value: f32,
    pub kind: ScoreKind,
}

impl Score {
    pub fn sentinel(kind: ScoreKind) -> Self {
        Self {
            value: kind.sentinel(),
            kind,
        }
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3} ({})", self.value, self.kind)
    }
}

/// Matching options consumed by the core.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchConfig {
    pub metric: Metric,
    pub threshold: f32,
    pub representative_mode: RepresentativeMode,
}

impl MatchConfig {
    /// Config for `metric` with that metric's default threshold.
    pub fn for_metric(metric: Metric) -> Self {
        Self {
            metric,
            threshold: metric.default_threshold(),
            representative_mode: RepresentativeMode::default(),
        }
    }
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self::for_metric(Metric::default())
    }
}

/// Outcome of matching one face against the gallery.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MatchResult {
    /// Best candidate cleared the threshold.
    Matched { identity: String, score: Score },
    /// Best candidate did not clear the threshold. `nearest` is diagnostic only.
    BelowThreshold { nearest: String, score: Score },
    /// Nothing enrolled; `score` is the sentinel for the metric.
    EmptyStore { score: Score },
    /// The face could not be embedded at all.
    NoEmbedding { reason: String },
}

impl MatchResult {
    /// Resolved roster key, if the face matched someone.
    pub fn identity(&self) -> Option<&str> {
        match self {
            MatchResult::Matched { identity, .. } => Some(identity),
            _ => None,
        }
    }

    pub fn is_match(&self) -> bool {
        matches!(self, MatchResult::Matched { .. })
    }

    pub fn score(&self) -> Option<Score> {
        match self {
            MatchResult::Matched { score, .. }
            | MatchResult::BelowThreshold { score, .. }
            | MatchResult::EmptyStore { score } => Some(*score),
            MatchResult::NoEmbedding { .. } => None,
        }
    }

    /// Identity key, or [`UNKNOWN_LABEL`].
    pub fn label(&self) -> &str {
        self.identity().unwrap_or(UNKNOWN_LABEL)
    }
}

impl fmt::Display for MatchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchResult::NoEmbedding { reason } => write!(f, "{UNKNOWN_LABEL} (no embedding: {reason})"),
            other => match other.score() {
                Some(score) => write!(f, "{} {score}", other.label()),
                None => f.write_str(other.label()),
            },
        }
    }
}
