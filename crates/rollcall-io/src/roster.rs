//! Roster CSV loading (`USN,Name`).

use rollcall_core::{Roster, RosterError, StudentRecord};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RosterLoadError {
    #[error("cannot read roster {path}: {source}")]
    Csv { path: PathBuf, source: csv::Error },
    #[error("invalid roster {path}: {source}")]
    Invalid { path: PathBuf, source: RosterError },
}

#[derive(Debug, Deserialize)]
struct RosterRow {
    #[serde(rename = "USN")]
    usn: String,
    #[serde(rename = "Name")]
    name: String,
}

/// Load the roster in file order. Duplicate keys and empty files are errors.
pub fn load_roster(path: &Path) -> Result<Roster, RosterLoadError> {
    let csv_err = |source: csv::Error| RosterLoadError::Csv {
        path: path.to_path_buf(),
        source,
    };

    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(csv_err)?;

    let students = reader
        .deserialize::<RosterRow>()
        .map(|row| row.map(|r| StudentRecord::new(r.usn, r.name)))
        .collect::<Result<Vec<_>, _>>()
        .map_err(csv_err)?;

    let roster = Roster::new(students).map_err(|source| RosterLoadError::Invalid {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::debug!(path = %path.display(), students = roster.len(), "roster loaded");
    Ok(roster)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn roster_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_keeps_file_order_and_trims() {
        let file = roster_file("USN, Name\n4NM21CS002 , Bob\n4NM21CS001, Alice Smith\n");
        let roster = load_roster(file.path()).unwrap();
        let students = roster.students();
        assert_eq!(students.len(), 2);
        assert_eq!(students[0], StudentRecord::new("4NM21CS002", "Bob"));
        assert_eq!(students[1], StudentRecord::new("4NM21CS001", "Alice Smith"));
    }

    #[test]
    fn test_duplicate_key_is_error() {
        let file = roster_file("USN,Name\n1,Alice\n1,Alicia\n");
        let err = load_roster(file.path()).unwrap_err();
        assert!(matches!(
            err,
            RosterLoadError::Invalid { source: RosterError::DuplicateKey(ref k), .. } if k == "1"
        ));
    }

    #[test]
    fn test_empty_roster_is_error() {
        let file = roster_file("USN,Name\n");
        let err = load_roster(file.path()).unwrap_err();
        assert!(matches!(err, RosterLoadError::Invalid { source: RosterError::Empty, .. }));
    }

    #[test]
    fn test_missing_column_is_error() {
        let file = roster_file("USN\n1\n");
        assert!(matches!(load_roster(file.path()), Err(RosterLoadError::Csv { .. })));
    }

    #[test]
    fn test_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_roster(&dir.path().join("students.csv")).unwrap_err();
        assert!(matches!(err, RosterLoadError::Csv { .. }));
    }
}
