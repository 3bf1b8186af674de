//! Course and section lists supplied by the client alongside an upload.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifiers arrive either as strings (UUIDs) or as plain numbers.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CatalogId {
    Text(String),
    Number(i64),
}

impl fmt::Display for CatalogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatalogId::Text(s) => f.write_str(s),
            CatalogId::Number(n) => write!(f, "{}", n),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CourseEntry {
    pub id: Option<CatalogId>,
    pub name: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionEntry {
    pub id: Option<CatalogId>,
    pub course_id: Option<CatalogId>,
    pub name: Option<String>,
}
