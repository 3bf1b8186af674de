//! Turns a `RawRow` into a typed `AttendanceRecord`, or says why it can't.

use crate::import::error::{RowError, RowErrorKind};
use crate::import::resolve::CatalogIndex;
use crate::import::rows::RawRow;
use crate::import::text::slug;
use chrono::{DateTime, Datelike, FixedOffset, Local, NaiveDate, NaiveDateTime, TimeZone};
use common::model::attendance::{is_known_status, AttendanceRecord};
use log::{debug, warn};
use regex::Regex;

pub const DATE: &[&str] = &["date", "fecha"];
pub const COURSE: &[&str] = &["course", "curso"];
pub const SECTION: &[&str] = &["section", "seccion"];
pub const USERNAME: &[&str] = &["studentusername", "username"];
pub const RUT: &[&str] = &["rut"];
pub const NAME: &[&str] = &["name", "nombre"];
pub const STATUS: &[&str] = &["status", "estado"];
pub const COMMENT: &[&str] = &["comment", "comentario", "observacion"];

const TIMESTAMP_FORMATS: [&str; 14] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%dT%H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S%.f",
    "%Y/%m/%d %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
    "%d-%m-%Y %H:%M:%S",
    "%d-%m-%Y %H:%M",
    "%d.%m.%Y %H:%M:%S",
    "%d.%m.%Y %H:%M",
    "%Y.%m.%d %H:%M",
];

const LOOSE_DATE_FORMATS: [&str; 6] = [
    "%d %B %Y",
    "%d %b %Y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%B %d %Y",
    "%b %d %Y",
];

fn local(naive: NaiveDateTime) -> Option<DateTime<FixedOffset>> {
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.fixed_offset())
}

/// Date-only values are pinned to local noon so no timezone shifts the day.
fn local_noon(date: NaiveDate) -> Option<(NaiveDate, DateTime<FixedOffset>)> {
    let noon = date.and_hms_opt(12, 0, 0)?;
    local(noon).map(|ts| (date, ts))
}

/// Cascading parser for the date formats spreadsheet exports produce.
pub struct DateParser {
    has_time: Regex,
    ymd: Regex,
    dmy: Regex,
}

impl DateParser {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(DateParser {
            has_time: Regex::new(r"[Tt]|:\d{2}")?,
            ymd: Regex::new(r"^(\d{4})/(\d{1,2})/(\d{1,2})$")?,
            dmy: Regex::new(r"^(\d{1,2})/(\d{1,2})/(\d{4})$")?,
        })
    }

    pub fn parse(&self, raw: &str) -> Option<(NaiveDate, DateTime<FixedOffset>)> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }

        if self.has_time.is_match(raw) {
            return parse_timestamp(raw)
                .map(|ts| (ts.date_naive(), ts))
                .or_else(|| parse_loose(raw));
        }

        let slashed = raw.replace(['.', '-'], "/");
        if let Some(caps) = self.ymd.captures(&slashed) {
            return ymd(&caps[1], &caps[2], &caps[3]).and_then(local_noon);
        }
        if let Some(caps) = self.dmy.captures(&slashed) {
            return ymd(&caps[3], &caps[2], &caps[1]).and_then(local_noon);
        }

        parse_loose(raw)
    }
}

fn parse_loose(raw: &str) -> Option<(NaiveDate, DateTime<FixedOffset>)> {
    LOOSE_DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
        .and_then(local_noon)
}

fn ymd(y: &str, m: &str, d: &str) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(y.parse().ok()?, m.parse().ok()?, d.parse().ok()?)
}

fn parse_timestamp(raw: &str) -> Option<DateTime<FixedOffset>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts);
    }
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .and_then(local)
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Stateless per-row converter; borrows the catalog for the whole run.
pub struct RecordNormalizer<'c> {
    catalog: &'c CatalogIndex,
    dates: DateParser,
}

impl<'c> RecordNormalizer<'c> {
    pub fn new(catalog: &'c CatalogIndex) -> Result<Self, regex::Error> {
        Ok(RecordNormalizer {
            catalog,
            dates: DateParser::new()?,
        })
    }

    pub fn normalize(&self, row: &RawRow) -> Result<AttendanceRecord, RowError> {
        let date_str = row.get(DATE);
        let course = row.get(COURSE);
        let section = row.get(SECTION);
        let username = row.get(USERNAME);
        let rut = row.get(RUT);
        let status = row.get(STATUS);
        let identifier = username.or(rut);

        let (Some(date_str), Some(course), Some(identifier), Some(status)) =
            (date_str, course, identifier, status)
        else {
            let mut missing = Vec::new();
            if date_str.is_none() {
                missing.push("date");
            }
            if course.is_none() {
                missing.push("course");
            }
            if identifier.is_none() {
                missing.push("username/rut");
            }
            if status.is_none() {
                missing.push("status");
            }
            return Err(RowError::new(row.number, RowErrorKind::MissingFields(missing)));
        };

        let (date, timestamp) = self.dates.parse(date_str).ok_or_else(|| {
            RowError::new(row.number, RowErrorKind::InvalidDate(date_str.to_string()))
        })?;

        let section_id = section.and_then(|section| {
            let resolved = self.catalog.resolve(course, section);
            match &resolved {
                Some(r) => debug!("Row {}: section {} matched ({:?})", row.number, r.section_id, r.tier),
                None => warn!(
                    "Row {}: no section id for \"{}|{}\", keeping record without section",
                    row.number, course, section
                ),
            }
            resolved.map(|r| r.section_id.to_string())
        });

        if !is_known_status(status) {
            debug!("Row {}: unrecognised status \"{}\" stored as-is", row.number, status);
        }

        Ok(AttendanceRecord {
            id: slug(&[date_str, course, section.unwrap_or(""), identifier]),
            date,
            timestamp,
            date_string: date_str.to_string(),
            course_id: slug(&[course]),
            course: course.to_string(),
            section: non_empty(section),
            section_id,
            student_identifier: identifier.to_string(),
            student_username: non_empty(username),
            rut: non_empty(rut),
            student_name: non_empty(row.get(NAME)),
            status: status.to_string(),
            comment: non_empty(row.get(COMMENT)),
            year: date.year(),
        })
    }
}
