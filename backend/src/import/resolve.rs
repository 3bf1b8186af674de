//! Maps free-text course/section names from a file onto catalog section ids.
//!
//! Lookups try, in order: the exact `"course|section"` key, the same key with
//! case and accents folded, and finally the closest course name (Levenshtein)
//! among entries whose folded section matches exactly.

use crate::import::text::fold;
use common::model::catalog::{CatalogId, CourseEntry, SectionEntry};
use log::{debug, warn};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Largest course-name edit distance still accepted as the same course.
pub const FUZZY_THRESHOLD: usize = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchTier {
    Exact,
    Normalized,
    Fuzzy { distance: usize },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resolution<'c> {
    pub section_id: &'c str,
    pub tier: MatchTier,
}

#[derive(Clone, Debug)]
struct CatalogEntry {
    course_key: String,
    section_key: String,
    section_id: String,
}

/// Read-only lookup table built once per upload.
#[derive(Clone, Debug, Default)]
pub struct CatalogIndex {
    entries: Vec<CatalogEntry>,
    exact: HashMap<String, usize>,
}

/// The object entries of a JSON array; anything else is logged and dropped.
fn json_objects(bytes: &[u8], list: &'static str) -> impl Iterator<Item = Map<String, Value>> {
    let items = match serde_json::from_slice::<Vec<Value>>(bytes) {
        Ok(items) => items,
        Err(e) => {
            warn!("Could not parse {} catalog: {}", list, e);
            Vec::new()
        }
    };
    items.into_iter().enumerate().filter_map(move |(i, item)| match item {
        Value::Object(entry) => Some(entry),
        other => {
            warn!("Skipping {} entry {}: expected an object, got {}", list, i, other);
            None
        }
    })
}

/// A JSON scalar as text. Whole floats print without a fraction (`3.0` → `"3"`).
fn scalar_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < 1e15 => Some(format!("{}", f as i64)),
            _ => Some(n.to_string()),
        },
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn key(course: &str, section: &str) -> String {
    format!("{}|{}", course, section)
}

impl CatalogIndex {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Inserts `course|section → section_id`. A repeated key keeps its
    /// position and takes the newer id.
    pub fn insert(&mut self, course: &str, section: &str, section_id: &str) {
        let exact_key = key(course.trim(), section.trim());
        if let Some(&idx) = self.exact.get(&exact_key) {
            self.entries[idx].section_id = section_id.to_string();
            return;
        }
        self.exact.insert(exact_key, self.entries.len());
        self.entries.push(CatalogEntry {
            course_key: fold(course),
            section_key: fold(section),
            section_id: section_id.to_string(),
        });
    }

    pub fn from_entries(courses: &[CourseEntry], sections: &[SectionEntry]) -> Self {
        let course_names: HashMap<String, String> = courses
            .iter()
            .filter_map(|c| match (&c.id, &c.name) {
                (Some(id), Some(name)) => Some((id.to_string(), name.trim().to_string())),
                _ => None,
            })
            .collect();

        let mut index = CatalogIndex::empty();
        for section in sections {
            let (Some(id), Some(course_id), Some(name)) =
                (&section.id, &section.course_id, &section.name)
            else {
                continue;
            };
            match course_names.get(&course_id.to_string()) {
                Some(course_name) => index.insert(course_name, name, &id.to_string()),
                None => warn!(
                    "No course with id={} for section \"{}\", skipping",
                    course_id, name
                ),
            }
        }
        debug!("Catalog index built with {} entries", index.len());
        index
    }

    /// Parses the `courses` and `sections` JSON arrays sent with an upload.
    ///
    /// Entries are read one at a time: scalar fields of any JSON type are
    /// taken as text, and an entry that is not an object is skipped. Missing
    /// input or a list that is not a JSON array yields an empty index.
    pub fn from_json(courses: Option<&[u8]>, sections: Option<&[u8]>) -> Self {
        let (Some(courses), Some(sections)) = (courses, sections) else {
            warn!("No course/section catalog supplied, sections will not be resolved");
            return CatalogIndex::empty();
        };
        let courses: Vec<CourseEntry> = json_objects(courses, "courses")
            .map(|entry| CourseEntry {
                id: scalar_text(entry.get("id")).map(CatalogId::Text),
                name: scalar_text(entry.get("name")),
            })
            .collect();
        let sections: Vec<SectionEntry> = json_objects(sections, "sections")
            .map(|entry| SectionEntry {
                id: scalar_text(entry.get("id")).map(CatalogId::Text),
                course_id: scalar_text(entry.get("courseId")).map(CatalogId::Text),
                name: scalar_text(entry.get("name")),
            })
            .collect();
        Self::from_entries(&courses, &sections)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn resolve(&self, course: &str, section: &str) -> Option<Resolution<'_>> {
        let (course, section) = (course.trim(), section.trim());
        if course.is_empty() || section.is_empty() || self.is_empty() {
            return None;
        }

        if let Some(&idx) = self.exact.get(&key(course, section)) {
            return Some(Resolution {
                section_id: &self.entries[idx].section_id,
                tier: MatchTier::Exact,
            });
        }

        let (course_key, section_key) = (fold(course), fold(section));
        if let Some(entry) = self
            .entries
            .iter()
            .find(|e| e.course_key == course_key && e.section_key == section_key)
        {
            return Some(Resolution {
                section_id: &entry.section_id,
                tier: MatchTier::Normalized,
            });
        }

        let mut best: Option<(&CatalogEntry, usize)> = None;
        for entry in self.entries.iter().filter(|e| e.section_key == section_key) {
            let distance = strsim::levenshtein(&entry.course_key, &course_key);
            if distance <= FUZZY_THRESHOLD && best.map_or(true, |(_, d)| distance < d) {
                best = Some((entry, distance));
            }
        }
        best.map(|(entry, distance)| {
            debug!(
                "Fuzzy match \"{}\" -> \"{}\" (distance {})",
                course, entry.course_key, distance
            );
            Resolution {
                section_id: &entry.section_id,
                tier: MatchTier::Fuzzy { distance },
            }
        })
    }
}
