//! Attendance ledger and match report CSV output.
//!
//! Both files are written to a temporary sibling and renamed into place, so
//! a reader never sees a half-written ledger and a failed write leaves the
//! previous snapshot untouched.

use rollcall_core::{
    AttendanceRecord, BoundingBox, MatchResult, SceneReport, ScoreKind, TIMESTAMP_FORMAT,
};
use serde::Serialize;
use std::fs::File;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const LEDGER_HEADER: [&str; 4] = ["USN", "Name", "Status", "Timestamp"];
pub const REPORT_HEADER: [&str; 9] = [
    "scene", "face", "x", "y", "width", "height", "identity", "score", "metric",
];

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("cannot write {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot encode {path}: {source}")]
    Csv { path: PathBuf, source: csv::Error },
}

/// One line of the per-face match report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRow {
    pub scene: String,
    /// Rank in detection order (highest confidence first).
    pub face: usize,
    /// Where the face is in the scene; identifies it independently of rank.
    pub bbox: BoundingBox,
    /// Roster key or "Unknown".
    pub identity: String,
    /// Absent when the face could not be embedded.
    pub score: Option<f32>,
    pub metric: Option<ScoreKind>,
}

impl ReportRow {
    pub fn new(scene: &str, face: usize, bbox: BoundingBox, result: &MatchResult) -> Self {
        let score = result.score();
        ReportRow {
            scene: scene.to_string(),
            face,
            bbox,
            identity: result.label().to_string(),
            score: score.map(|s| s.value),
            metric: score.map(|s| s.kind),
        }
    }

    /// One row per face of `report`, in detection order.
    pub fn from_scene<C>(scene: &str, report: &SceneReport<C>) -> Vec<ReportRow> {
        report
            .faces
            .iter()
            .enumerate()
            .map(|(face, recognized)| {
                ReportRow::new(scene, face, recognized.detection.bbox, &recognized.result)
            })
            .collect()
    }

    pub fn is_unknown(&self) -> bool {
        self.identity == rollcall_core::UNKNOWN_LABEL
    }
}

/// Overwrite the ledger at `path` with `records`.
pub fn write_ledger(path: &Path, records: &[AttendanceRecord]) -> Result<(), LedgerError> {
    write_atomically(path, |writer| {
        writer.write_record(LEDGER_HEADER)?;
        for record in records {
            let timestamp = record.timestamp.format(TIMESTAMP_FORMAT).to_string();
            let status = record.status.to_string();
            writer.write_record([
                record.key.as_str(),
                record.name.as_str(),
                status.as_str(),
                timestamp.as_str(),
            ])?;
        }
        Ok(())
    })?;
    tracing::debug!(path = %path.display(), rows = records.len(), "ledger written");
    Ok(())
}

/// Overwrite the match report at `path` with `rows`.
pub fn write_report(path: &Path, rows: &[ReportRow]) -> Result<(), LedgerError> {
    write_atomically(path, |writer| {
        writer.write_record(REPORT_HEADER)?;
        for row in rows {
            let score = row.score.map(|s| format!("{s:.4}")).unwrap_or_default();
            let metric = row.metric.map(|m| m.to_string()).unwrap_or_default();
            writer.write_record([
                row.scene.clone(),
                row.face.to_string(),
                row.bbox.x.to_string(),
                row.bbox.y.to_string(),
                row.bbox.width.to_string(),
                row.bbox.height.to_string(),
                row.identity.clone(),
                score,
                metric,
            ])?;
        }
        Ok(())
    })
}

fn write_atomically<F>(path: &Path, fill: F) -> Result<(), LedgerError>
where
    F: FnOnce(&mut csv::Writer<&mut File>) -> Result<(), csv::Error>,
{
    let io_err = |source: std::io::Error| LedgerError::Io {
        path: path.to_path_buf(),
        source,
    };
    let csv_err = |source: csv::Error| LedgerError::Csv {
        path: path.to_path_buf(),
        source,
    };

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(io_err)?;

    let mut staged = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
    {
        let mut writer = csv::Writer::from_writer(staged.as_file_mut());
        fill(&mut writer).map_err(csv_err)?;
        writer.flush().map_err(io_err)?;
    }
    staged.as_file().sync_all().map_err(io_err)?;
    staged.persist(path).map_err(|e| io_err(e.error))?;
    Ok(())
}
