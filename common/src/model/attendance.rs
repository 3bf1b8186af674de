use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};

/// Status values recognised by downstream consumers. Imports do not enforce
/// this list; anything else is stored verbatim.
pub const KNOWN_STATUSES: [&str; 4] = ["present", "absent", "late", "justified"];

pub fn is_known_status(status: &str) -> bool {
    KNOWN_STATUSES.contains(&status)
}

/// One normalized attendance row, keyed by a deterministic composite id so
/// that re-importing the same row overwrites instead of duplicating.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub id: String,
    /// Calendar day of the attendance.
    pub date: NaiveDate,
    /// Local noon of `date` for date-only inputs, the parsed instant otherwise.
    pub timestamp: DateTime<FixedOffset>,
    /// The date exactly as it appeared in the file.
    pub date_string: String,
    pub course_id: String,
    pub course: String,
    pub section: Option<String>,
    pub section_id: Option<String>,
    /// Username when present, otherwise the national id. Never empty.
    pub student_identifier: String,
    pub student_username: Option<String>,
    pub rut: Option<String>,
    pub student_name: Option<String>,
    pub status: String,
    pub comment: Option<String>,
    pub year: i32,
}
