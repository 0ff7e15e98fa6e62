//! Enrollment from a directory tree of face manifests.
//!
//! ```text
//! enroll/
//!   4NM21CS001/  front.json  left.json  glasses.json
//!   4NM21CS002/  front.json
//! ```
//!
//! Each manifest describes one reference photo; its highest-confidence face is
//! enrolled under the directory name.

use crate::manifest::is_manifest;
use rollcall_core::{EmbeddingStore, FaceBackend};
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnrollmentError {
    #[error("cannot read enrollment directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EnrollmentSummary {
    /// Identities that ended up with at least one reference.
    pub identities: usize,
    pub references: usize,
    /// Reference images that yielded no usable embedding.
    pub skipped_images: usize,
    /// Identities dropped because none of their images yielded an embedding.
    pub dropped: Vec<String>,
}

/// Build a fresh [`EmbeddingStore`] from `dir`.
///
/// Per-image problems are logged and skipped; only an unreadable top-level
/// directory fails the pass.
pub fn enroll_directory<B>(
    dir: &Path,
    backend: &mut B,
) -> Result<(EmbeddingStore, EnrollmentSummary), EnrollmentError>
where
    B: FaceBackend<Scene = Path> + ?Sized,
{
    let mut store = EmbeddingStore::new();
    let mut summary = EnrollmentSummary::default();

    let identities = sorted_entries(dir)
        .map_err(|source| EnrollmentError::ReadDir {
            path: dir.to_path_buf(),
            source,
        })?
        .into_iter()
        .filter(|p| p.is_dir());

    for identity_dir in identities {
        let Some(identity) = identity_dir.file_name().and_then(|n| n.to_str()) else {
            tracing::warn!(path = %identity_dir.display(), "skipping non UTF-8 identity directory");
            continue;
        };

        let images = match sorted_entries(&identity_dir) {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!(identity, error = %err, "cannot list reference images");
                Vec::new()
            }
        };

        for image in images.iter().filter(|p| p.is_file() && is_manifest(p)) {
            match enroll_image(&mut store, backend, identity, image) {
                Ok(()) => tracing::debug!(identity, image = %image.display(), "reference added"),
                Err(reason) => {
                    tracing::warn!(identity, image = %image.display(), %reason, "reference skipped");
                    summary.skipped_images += 1;
                }
            }
        }

        let count = store.reference_count(identity);
        if count == 0 {
            tracing::warn!(identity, "no valid embeddings; identity dropped");
            summary.dropped.push(identity.to_string());
        } else {
            tracing::info!(identity, references = count, "identity enrolled");
        }
    }

    summary.identities = store.len();
    summary.references = store.total_references();
    tracing::info!(
        identities = summary.identities,
        references = summary.references,
        skipped = summary.skipped_images,
        dropped = summary.dropped.len(),
        "enrollment complete"
    );
    Ok((store, summary))
}

fn enroll_image<B>(
    store: &mut EmbeddingStore,
    backend: &mut B,
    identity: &str,
    image: &Path,
) -> Result<(), String>
where
    B: FaceBackend<Scene = Path> + ?Sized,
{
    let detections = backend.detect(image).map_err(|e| e.to_string())?;
    let face = detections
        .first()
        .ok_or_else(|| "no face detected".to_string())?;
    let vector = backend.embed(&face.crop).map_err(|e| e.to_string())?;
    store.enroll(identity, &vector).map_err(|e| e.to_string())
}

fn sorted_entries(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut entries = std::fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()?;
    entries.sort();
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ManifestBackend;

    fn face(embedding: &str, confidence: f32) -> String {
        format!(
            r#"{{"bbox": {{"x": 0, "y": 0, "width": 10, "height": 10, "confidence": {confidence}}}, "embedding": {embedding}}}"#
        )
    }

    fn manifest(dir: &Path, identity: &str, file: &str, faces: &[String]) {
        let identity_dir = dir.join(identity);
        std::fs::create_dir_all(&identity_dir).unwrap();
        let body = format!(r#"{{"faces": [{}]}}"#, faces.join(","));
        std::fs::write(identity_dir.join(file), body).unwrap();
    }

    #[test]
    fn test_enrolls_every_valid_reference() {
        let dir = tempfile::tempdir().unwrap();
        manifest(dir.path(), "S1", "a.json", &[face("[1, 0, 0]", 0.9)]);
        manifest(dir.path(), "S1", "b.json", &[face("[0.9, 0.1, 0]", 0.8)]);
        manifest(dir.path(), "S2", "a.json", &[face("[0, 1, 0]", 0.9)]);

        let (store, summary) = enroll_directory(dir.path(), &mut ManifestBackend).unwrap();
        assert_eq!(store.reference_count("S1"), 2);
        assert_eq!(store.reference_count("S2"), 1);
        assert_eq!(
            summary,
            EnrollmentSummary {
                identities: 2,
                references: 3,
                skipped_images: 0,
                dropped: vec![],
            }
        );
    }

    #[test]
    fn test_identity_without_embeddings_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        manifest(dir.path(), "S1", "a.json", &[face("[1, 0]", 0.9)]);
        manifest(dir.path(), "S2", "empty.json", &[]);
        manifest(dir.path(), "S2", "failed.json", &[face("null", 0.9)]);
        manifest(dir.path(), "S2", "zero.json", &[face("[0, 0]", 0.9)]);

        let (store, summary) = enroll_directory(dir.path(), &mut ManifestBackend).unwrap();
        assert!(!store.contains("S2"));
        assert_eq!(store.all_identities().collect::<Vec<_>>(), vec!["S1"]);
        assert_eq!(summary.dropped, vec!["S2".to_string()]);
        assert_eq!(summary.skipped_images, 3);
    }

    #[test]
    fn test_highest_confidence_face_is_used() {
        let dir = tempfile::tempdir().unwrap();
        manifest(
            dir.path(),
            "S1",
            "group.json",
            &[face("[0, 1]", 0.4), face("[1, 0]", 0.95)],
        );
        let (store, _) = enroll_directory(dir.path(), &mut ManifestBackend).unwrap();
        let rep = store
            .representative("S1", rollcall_core::RepresentativeMode::PerReference)
            .unwrap();
        assert_eq!(rep.as_slice()[0].values(), &[1.0f32, 0.0][..]);
    }

    #[test]
    fn test_non_manifest_files_and_loose_files_ignored() {
        let dir = tempfile::tempdir().unwrap();
        manifest(dir.path(), "S1", "a.json", &[face("[1, 0]", 0.9)]);
        std::fs::write(dir.path().join("S1/photo.jpg"), b"\xff\xd8").unwrap();
        std::fs::write(dir.path().join("notes.json"), "{}").unwrap();

        let (store, summary) = enroll_directory(dir.path(), &mut ManifestBackend).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(summary.skipped_images, 0);
    }

    #[test]
    fn test_missing_directory_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = enroll_directory(&dir.path().join("missing"), &mut ManifestBackend);
        assert!(matches!(result, Err(EnrollmentError::ReadDir { .. })));
    }
}
