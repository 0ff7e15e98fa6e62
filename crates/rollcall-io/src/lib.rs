//! rollcall-io: The collaborators around the matching core.
//!
//! Loads configuration and the roster, reads face manifests written by the
//! external detector/extractor, persists the enrolled gallery in SQLite and
//! writes the attendance ledger. [`pipeline`] strings these together into
//! one attendance run.

pub mod config;
pub mod enrollment;
pub mod gallery;
pub mod ledger;
pub mod manifest;
pub mod pipeline;
pub mod roster;

pub use config::{Config, ConfigError};
pub use enrollment::{enroll_directory, EnrollmentError, EnrollmentSummary};
pub use gallery::{Gallery, GalleryError};
pub use ledger::{write_ledger, write_report, LedgerError, ReportRow};
pub use manifest::{ManifestBackend, ManifestError, SceneManifest};
pub use pipeline::{match_scene, run_attendance, PipelineError, RunOutcome, RunSettings, RunSummary};
pub use roster::{load_roster, RosterLoadError};
