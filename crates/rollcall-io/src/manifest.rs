//! Face manifests: per-image JSON written by the external detector/extractor.
//!
//! ```json
//! {
//!   "source": "B_SECTION.jpeg",
//!   "faces": [
//!     { "bbox": { "x": 10, "y": 20, "width": 64, "height": 80, "confidence": 0.91 },
//!       "embedding": [0.012, -0.034, ...] },
//!     { "bbox": { "x": 200, "y": 24, "width": 60, "height": 77 }, "embedding": null }
//!   ]
//! }
//! ```
//!
//! A `null` or missing embedding means the extractor could not embed that face.

use rollcall_core::{BackendError, BoundingBox, Detection, FaceBackend};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const MANIFEST_EXTENSION: &str = "json";

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("cannot read manifest {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid manifest {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneManifest {
    /// Name of the image the faces were found in.
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub faces: Vec<ManifestFace>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestFace {
    pub bbox: BoundingBox,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
}

impl SceneManifest {
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let text = std::fs::read_to_string(path).map_err(|source| ManifestError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ManifestError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Whether `path` looks like a face manifest.
pub fn is_manifest(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(MANIFEST_EXTENSION))
}

/// [`FaceBackend`] over face manifests. The embedding travels with each
/// detection, so `embed` only hands it back.
#[derive(Debug, Default, Clone, Copy)]
pub struct ManifestBackend;

impl FaceBackend for ManifestBackend {
    type Scene = Path;
    type Crop = Option<Vec<f32>>;

    /// Faces sorted by confidence, highest first.
    fn detect(&mut self, scene: &Path) -> Result<Vec<Detection<Self::Crop>>, BackendError> {
        let manifest = SceneManifest::load(scene).map_err(|err| match err {
            ManifestError::Read { .. } => BackendError::SceneUnavailable(err.to_string()),
            ManifestError::Parse { .. } => BackendError::DetectionFailed(err.to_string()),
        })?;

        let mut detections: Vec<_> = manifest
            .faces
            .into_iter()
            .map(|face| Detection {
                bbox: face.bbox,
                crop: face.embedding,
            })
            .collect();
        detections.sort_by(|a, b| {
            b.bbox
                .confidence
                .partial_cmp(&a.bbox.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        tracing::debug!(scene = %scene.display(), faces = detections.len(), "manifest read");
        Ok(detections)
    }

    fn embed(&mut self, crop: &Self::Crop) -> Result<Vec<f32>, BackendError> {
        match crop {
            Some(values) if !values.is_empty() => Ok(values.clone()),
            _ => Err(BackendError::NoEmbedding(
                "extractor produced no embedding for this face".into(),
            )),
        }
    }
}
