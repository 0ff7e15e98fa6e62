//! Per-scene recognition: one matching decision per detected face.

use crate::matcher::Matcher;
use crate::store::EmbeddingStore;
use crate::types::{BoundingBox, MatchResult};
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("scene unavailable: {0}")]
    SceneUnavailable(String),
    #[error("detection failed: {0}")]
    DetectionFailed(String),
    #[error("no embedding: {0}")]
    NoEmbedding(String),
}

/// A face located by the detector. `crop` is whatever the backend needs to
/// embed the face later (pixels, a handle, a precomputed vector).
#[derive(Debug, Clone)]
pub struct Detection<C> {
    pub bbox: BoundingBox,
    pub crop: C,
}

/// Face detection and embedding extraction, provided by an external service.
pub trait FaceBackend {
    type Scene: ?Sized;
    type Crop;

    /// Locate faces in a scene.
    fn detect(&mut self, scene: &Self::Scene) -> Result<Vec<Detection<Self::Crop>>, BackendError>;

    /// Turn one detected face into a raw embedding vector.
    fn embed(&mut self, crop: &Self::Crop) -> Result<Vec<f32>, BackendError>;
}

#[derive(Debug, Clone)]
pub struct RecognizedFace<C> {
    pub detection: Detection<C>,
    pub result: MatchResult,
}

/// Decisions for every face of one scene, in detection order.
#[derive(Debug, Clone)]
pub struct SceneReport<C> {
    pub faces: Vec<RecognizedFace<C>>,
}

impl<C> SceneReport<C> {
    /// Distinct identities matched in this scene.
    pub fn recognized_identities(&self) -> RecognizedSet {
        self.faces
            .iter()
            .filter_map(|face| face.result.identity())
            .collect()
    }

    pub fn matched_count(&self) -> usize {
        self.faces.iter().filter(|f| f.result.is_match()).count()
    }

    /// Faces that were embedded but matched nobody.
    pub fn unknown_count(&self) -> usize {
        self.faces
            .iter()
            .filter(|f| {
                matches!(
                    f.result,
                    MatchResult::BelowThreshold { .. } | MatchResult::EmptyStore { .. }
                )
            })
            .count()
    }

    pub fn no_embedding_count(&self) -> usize {
        self.faces
            .iter()
            .filter(|f| matches!(f.result, MatchResult::NoEmbedding { .. }))
            .count()
    }
}

/// Identities recognized so far in a run, accumulated over one or more scenes.
///
/// A set, not a tally: the same student seen twice is still one identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecognizedSet(BTreeSet<String>);

impl RecognizedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether the identity was newly added.
    pub fn insert(&mut self, identity: impl Into<String>) -> bool {
        self.0.insert(identity.into())
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.0.contains(identity)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Identities in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &str> + '_ {
        self.0.iter().map(String::as_str)
    }

    pub fn absorb<C>(&mut self, report: &SceneReport<C>) {
        self.0.extend(report.recognized_identities().0);
    }
}

impl<S: Into<String>> FromIterator<S> for RecognizedSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl<S: Into<String>> Extend<S> for RecognizedSet {
    fn extend<I: IntoIterator<Item = S>>(&mut self, iter: I) {
        self.0.extend(iter.into_iter().map(Into::into));
    }
}

/// Embed and match every detection of one scene.
///
/// Faces are decided independently. An extraction failure, or an extracted
/// vector the gallery cannot accept, resolves that face to
/// [`MatchResult::NoEmbedding`] and the rest of the scene carries on.
pub fn recognize<B, M>(
    detections: Vec<Detection<B::Crop>>,
    backend: &mut B,
    store: &EmbeddingStore,
    matcher: &M,
) -> SceneReport<B::Crop>
where
    B: FaceBackend + ?Sized,
    M: Matcher + ?Sized,
{
    if store.is_empty() && !detections.is_empty() {
        tracing::warn!(faces = detections.len(), "gallery is empty; every face will be unknown");
    }

    let faces = detections
        .into_iter()
        .enumerate()
        .map(|(index, detection)| {
            let result = match backend.embed(&detection.crop) {
                Ok(vector) => match matcher.compare(&vector, store) {
                    Ok(result) => result,
                    Err(err) => {
                        tracing::warn!(face = index, error = %err, "extracted embedding rejected");
                        MatchResult::NoEmbedding {
                            reason: format!("invalid embedding: {err}"),
                        }
                    }
                },
                Err(err) => {
                    tracing::warn!(face = index, error = %err, "embedding extraction failed");
                    MatchResult::NoEmbedding {
                        reason: err.to_string(),
                    }
                }
            };
            tracing::debug!(face = index, result = %result, "face resolved");
            RecognizedFace { detection, result }
        })
        .collect();

    SceneReport { faces }
}
