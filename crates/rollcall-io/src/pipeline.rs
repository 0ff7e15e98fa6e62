//! One attendance run: roster, scenes, recognition, reconciliation, ledger.

use crate::config::Config;
use crate::ledger::{self, LedgerError, ReportRow};
use crate::roster::{self, RosterLoadError};
use chrono::NaiveDateTime;
use rollcall_core::{
    reconcile, recognize, BackendError, EmbeddingStore, FaceBackend, GalleryMatcher, MatchConfig,
    RecognizedSet, Reconciliation, SceneReport, TIMESTAMP_FORMAT,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("roster load failed: {0}")]
    RosterLoad(#[from] RosterLoadError),
    #[error("no scenes given")]
    NoScenes,
    #[error("no input artifact: {0}")]
    NoInputArtifact(PathBuf),
    #[error("detection failed for {path}: {source}")]
    Detection { path: PathBuf, source: BackendError },
    #[error("ledger write failed: {0}")]
    Ledger(#[from] LedgerError),
}

/// File locations and matching options for an attendance run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSettings {
    pub roster_path: PathBuf,
    pub ledger_path: PathBuf,
    pub report_path: Option<PathBuf>,
    pub matching: MatchConfig,
}

impl From<&Config> for RunSettings {
    fn from(config: &Config) -> Self {
        Self {
            roster_path: config.roster_path.clone(),
            ledger_path: config.ledger_path.clone(),
            report_path: config.report_path.clone(),
            matching: config.matching,
        }
    }
}

/// What a run did, suitable for logs, D-Bus replies and the CLI.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub scenes: Vec<String>,
    pub timestamp: String,
    pub roster_size: usize,
    pub present: usize,
    pub absent: usize,
    pub faces: usize,
    pub matched_faces: usize,
    pub unknown_faces: usize,
    pub no_embedding: usize,
    /// Distinct recognized identities, sorted.
    pub recognized: Vec<String>,
    pub warnings: Vec<String>,
    pub ledger: PathBuf,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub summary: RunSummary,
    pub reconciliation: Reconciliation,
    pub report: Vec<ReportRow>,
}

/// Match every face of one scene. Used by runs and by diagnostics.
pub fn match_scene<B>(
    backend: &mut B,
    store: &EmbeddingStore,
    matching: &MatchConfig,
    scene: &Path,
) -> Result<SceneReport<B::Crop>, PipelineError>
where
    B: FaceBackend<Scene = Path> + ?Sized,
{
    let detections = backend
        .detect(scene)
        .map_err(|source| PipelineError::Detection {
            path: scene.to_path_buf(),
            source,
        })?;
    Ok(recognize(
        detections,
        backend,
        store,
        &GalleryMatcher::new(matching),
    ))
}

/// Take attendance from one or more scenes and overwrite the ledger.
///
/// Every whole-run failure (roster, missing scene, unreadable scene) happens
/// before the ledger is touched, so a failed run leaves the previous ledger
/// as it was. Per-face problems only show up in the summary.
pub fn run_attendance<B>(
    backend: &mut B,
    store: &EmbeddingStore,
    settings: &RunSettings,
    scenes: &[PathBuf],
    now: NaiveDateTime,
) -> Result<RunOutcome, PipelineError>
where
    B: FaceBackend<Scene = Path> + ?Sized,
{
    let run_id = Uuid::new_v4();
    let span = tracing::info_span!("attendance", %run_id);
    let _enter = span.enter();

    let roster = roster::load_roster(&settings.roster_path)?;

    if scenes.is_empty() {
        return Err(PipelineError::NoScenes);
    }
    if let Some(missing) = scenes.iter().find(|scene| !scene.is_file()) {
        return Err(PipelineError::NoInputArtifact(missing.clone()));
    }

    let mut recognized = RecognizedSet::new();
    let mut report = Vec::new();
    let (mut faces, mut matched, mut unknown, mut no_embedding) = (0, 0, 0, 0);

    for scene in scenes {
        let scene_report = match_scene(backend, store, &settings.matching, scene)?;
        let name = scene_name(scene);
        tracing::info!(
            scene = %name,
            faces = scene_report.faces.len(),
            matched = scene_report.matched_count(),
            "scene recognized"
        );

        faces += scene_report.faces.len();
        matched += scene_report.matched_count();
        unknown += scene_report.unknown_count();
        no_embedding += scene_report.no_embedding_count();
        recognized.absorb(&scene_report);
        report.extend(ReportRow::from_scene(&name, &scene_report));
    }

    let reconciliation = reconcile(&roster, &recognized, now);
    ledger::write_ledger(&settings.ledger_path, &reconciliation.records)?;

    if let Some(report_path) = &settings.report_path {
        // The report is diagnostic; failing to write it does not fail the run.
        if let Err(err) = ledger::write_report(report_path, &report) {
            tracing::warn!(error = %err, "match report not written");
        }
    }

    let summary = RunSummary {
        run_id,
        scenes: scenes.iter().map(|s| scene_name(s)).collect(),
        timestamp: now.format(TIMESTAMP_FORMAT).to_string(),
        roster_size: roster.len(),
        present: reconciliation.present_count(),
        absent: reconciliation.absent_count(),
        faces,
        matched_faces: matched,
        unknown_faces: unknown,
        no_embedding,
        recognized: recognized.iter().map(str::to_string).collect(),
        warnings: reconciliation.warnings.iter().map(|w| w.to_string()).collect(),
        ledger: settings.ledger_path.clone(),
    };
    tracing::info!(
        present = summary.present,
        absent = summary.absent,
        faces = summary.faces,
        warnings = summary.warnings.len(),
        "attendance recorded"
    );

    Ok(RunOutcome {
        summary,
        reconciliation,
        report,
    })
}

fn scene_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
