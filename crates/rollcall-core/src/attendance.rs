//! Reconciliation of recognized identities against the full roster.

use crate::scene::RecognizedSet;
use crate::types::StudentRecord;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

/// Timestamp format used in the attendance ledger.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RosterError {
    #[error("roster is empty")]
    Empty,
    #[error("duplicate roster key: {0}")]
    DuplicateKey(String),
}

/// The authoritative, ordered list of students for a run. Keys are unique.
#[derive(Debug, Clone)]
pub struct Roster {
    students: Vec<StudentRecord>,
    keys: HashSet<String>,
}

impl Roster {
    pub fn new(students: Vec<StudentRecord>) -> Result<Self, RosterError> {
        if students.is_empty() {
            return Err(RosterError::Empty);
        }
        let mut keys = HashSet::with_capacity(students.len());
        for student in &students {
            if !keys.insert(student.key.clone()) {
                return Err(RosterError::DuplicateKey(student.key.clone()));
            }
        }
        Ok(Self { students, keys })
    }

    pub fn students(&self) -> &[StudentRecord] {
        &self.students
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.students.len()
    }

    pub fn is_empty(&self) -> bool {
        self.students.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttendanceStatus {
    Present,
    Absent,
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AttendanceStatus::Present => "Present",
            AttendanceStatus::Absent => "Absent",
        })
    }
}

/// One ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub key: String,
    pub name: String,
    pub status: AttendanceStatus,
    pub timestamp: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ReconcileWarning {
    /// A recognized key with no roster row; it is left out of the ledger.
    UnknownIdentity(String),
}

impl fmt::Display for ReconcileWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconcileWarning::UnknownIdentity(key) => {
                write!(f, "recognized identity {key} is not on the roster")
            }
        }
    }
}

/// A complete ledger plus the warnings raised while building it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub records: Vec<AttendanceRecord>,
    pub warnings: Vec<ReconcileWarning>,
}

impl Reconciliation {
    pub fn present_count(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.status == AttendanceStatus::Present)
            .count()
    }

    pub fn absent_count(&self) -> usize {
        self.records.len() - self.present_count()
    }
}

/// Build one attendance record per roster member, in roster order.
///
/// A member is present iff their key was recognized. Recognized keys that are
/// not on the roster are reported as warnings and never become rows.
pub fn reconcile(
    roster: &Roster,
    recognized: &RecognizedSet,
    timestamp: NaiveDateTime,
) -> Reconciliation {
    let records = roster
        .students()
        .iter()
        .map(|student| AttendanceRecord {
            key: student.key.clone(),
            name: student.name.clone(),
            status: if recognized.contains(&student.key) {
                AttendanceStatus::Present
            } else {
                AttendanceStatus::Absent
            },
            timestamp,
        })
        .collect();

    let warnings = recognized
        .iter()
        .filter(|key| !roster.contains(key))
        .map(|key| {
            tracing::warn!(identity = key, "recognized identity missing from roster; dropped");
            ReconcileWarning::UnknownIdentity(key.to_string())
        })
        .collect();

    Reconciliation { records, warnings }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn t() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap()
    }

    fn roster() -> Roster {
        Roster::new(vec![
            StudentRecord::new("1", "Alice"),
            StudentRecord::new("2", "Bob"),
        ])
        .unwrap()
    }

    #[test]
    fn test_scenario_one_present_one_absent() {
        let result = reconcile(&roster(), &["1"].into_iter().collect(), t());
        assert_eq!(
            result.records,
            vec![
                AttendanceRecord {
                    key: "1".into(),
                    name: "Alice".into(),
                    status: AttendanceStatus::Present,
                    timestamp: t(),
                },
                AttendanceRecord {
                    key: "2".into(),
                    name: "Bob".into(),
                    status: AttendanceStatus::Absent,
                    timestamp: t(),
                },
            ]
        );
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_nobody_recognized_all_absent() {
        let result = reconcile(&roster(), &RecognizedSet::new(), t());
        assert_eq!(result.records.len(), 2);
        assert!(result
            .records
            .iter()
            .all(|r| r.status == AttendanceStatus::Absent));
        assert_eq!(result.absent_count(), 2);
    }

    #[test]
    fn test_everyone_recognized_in_roster_order() {
        let roster = Roster::new(vec![
            StudentRecord::new("9", "Zed"),
            StudentRecord::new("3", "Cy"),
            StudentRecord::new("5", "Eve"),
        ])
        .unwrap();
        let recognized: RecognizedSet = ["3", "5", "9"].into_iter().collect();
        let result = reconcile(&roster, &recognized, t());
        let keys: Vec<_> = result.records.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["9", "3", "5"]);
        assert_eq!(result.present_count(), 3);
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let recognized: RecognizedSet = ["2"].into_iter().collect();
        let first = reconcile(&roster(), &recognized, t());
        let second = reconcile(&roster(), &recognized, t());
        assert_eq!(first, second);
    }

    #[test]
    fn test_recognition_order_does_not_matter() {
        let a: RecognizedSet = ["2", "1", "x"].into_iter().collect();
        let b: RecognizedSet = ["x", "1", "2", "1"].into_iter().collect();
        assert_eq!(reconcile(&roster(), &a, t()), reconcile(&roster(), &b, t()));
    }

    #[test]
    fn test_unknown_identity_warned_and_dropped() {
        let recognized: RecognizedSet = ["1", "99", "42"].into_iter().collect();
        let result = reconcile(&roster(), &recognized, t());
        assert_eq!(result.records.len(), 2);
        assert!(result.records.iter().all(|r| r.key != "99" && r.key != "42"));
        assert_eq!(
            result.warnings,
            vec![
                ReconcileWarning::UnknownIdentity("42".into()),
                ReconcileWarning::UnknownIdentity("99".into()),
            ]
        );
    }

    #[test]
    fn test_roster_rejects_duplicates_and_empty() {
        assert_eq!(Roster::new(vec![]).unwrap_err(), RosterError::Empty);
        let err = Roster::new(vec![
            StudentRecord::new("1", "Alice"),
            StudentRecord::new("1", "Alicia"),
        ])
        .unwrap_err();
        assert_eq!(err, RosterError::DuplicateKey("1".into()));
    }

    #[test]
    fn test_status_display() {
        assert_eq!(AttendanceStatus::Present.to_string(), "Present");
        assert_eq!(AttendanceStatus::Absent.to_string(), "Absent");
    }
}
