//! rollcall-core: Face identity matching and attendance reconciliation.
//!
//! Holds the enrolled gallery, decides an identity (or "unknown") for each
//! face embedding found in a scene, and reconciles the recognized identities
//! against the full roster. Detection and embedding extraction are external
//! and reached through the [`FaceBackend`] capability.

pub mod attendance;
pub mod matcher;
pub mod scene;
pub mod store;
pub mod types;

pub use attendance::{
    reconcile, AttendanceRecord, AttendanceStatus, Reconciliation, ReconcileWarning, Roster,
    RosterError, TIMESTAMP_FORMAT,
};
pub use matcher::{match_query, GalleryMatcher, Matcher};
pub use scene::{
    recognize, BackendError, Detection, FaceBackend, RecognizedFace, RecognizedSet, SceneReport,
};
pub use store::{EmbeddingStore, Representative};
pub use types::{
    BoundingBox, Embedding, InvalidEmbedding, MatchConfig, MatchResult, Metric, ParseOptionError,
    RepresentativeMode, Score, ScoreKind, StudentRecord, UNKNOWN_LABEL,
};
