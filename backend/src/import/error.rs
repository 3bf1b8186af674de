use crate::import::decode::DecodeError;
use crate::store::StoreError;
use std::fmt;

/// Failures that abort an import. Everything row- or batch-scoped is
/// recovered inside the pipeline and reported in the summary instead.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("The CSV file contains no rows")]
    NoRows,
    #[error("Regex error: {0}")]
    Pattern(#[from] regex::Error),
    #[error("Datastore unavailable: {0}")]
    StoreUnavailable(#[source] StoreError),
    #[error("Could not start commit workers: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RowErrorKind {
    MissingFields(Vec<&'static str>),
    InvalidDate(String),
    Malformed(String),
}

impl fmt::Display for RowErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowErrorKind::MissingFields(fields) => {
                write!(f, "missing required fields ({})", fields.join(", "))
            }
            RowErrorKind::InvalidDate(raw) => write!(f, "invalid date \"{}\"", raw),
            RowErrorKind::Malformed(reason) => write!(f, "unreadable record: {}", reason),
        }
    }
}

/// A rejected data row; `row` is the 1-based data row number.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("Row {row}: {kind}")]
pub struct RowError {
    pub row: usize,
    pub kind: RowErrorKind,
}

impl RowError {
    pub fn new(row: usize, kind: RowErrorKind) -> Self {
        RowError { row, kind }
    }
}
