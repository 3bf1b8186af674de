//! Attendance CSV ingestion.
//!
//! An upload flows through the stages in order: bytes are decoded to text,
//! the schema is detected, rows are split and normalized into records, and
//! records are committed in retried batches while progress is published to
//! the job controller. Row- and batch-level problems are collected into the
//! summary; only file-level failures abort the run.

pub mod commit;
pub mod decode;
pub mod error;
pub mod normalize;
pub mod progress;
pub mod resolve;
pub mod retry;
pub mod rows;
pub mod schema;
mod text;

use crate::import::commit::{BatchCommitter, CommitReport, CommitSettings};
use crate::import::error::IngestError;
use crate::import::normalize::{RecordNormalizer, COURSE};
use crate::import::progress::{ProgressDelta, ProgressTracker};
use crate::import::resolve::CatalogIndex;
use crate::import::retry::Clock;
use crate::import::rows::{RawRow, RowReader};
use crate::job_controller::state::JobUpdate;
use crate::store::{DocumentStore, StoreError, ATTENDANCE};
use common::jobs::JobPhase;
use common::responses::ImportSummary;
use log::{debug, error, info, warn};
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc;

/// One uploaded file plus the form fields that travel with it.
#[derive(Clone, Debug)]
pub struct RawUpload {
    pub bytes: Vec<u8>,
    pub filename: Option<String>,
    pub year: i32,
    pub job_id: String,
}

#[derive(Clone, Debug)]
pub struct ImportSettings {
    pub commit: CommitSettings,
    /// How many error strings the summary carries.
    pub error_detail_limit: usize,
}

impl Default for ImportSettings {
    fn default() -> Self {
        ImportSettings {
            commit: CommitSettings::default(),
            error_detail_limit: 10,
        }
    }
}

pub struct Importer<'a> {
    store: &'a dyn DocumentStore,
    clock: &'a dyn Clock,
    settings: &'a ImportSettings,
}

impl<'a> Importer<'a> {
    pub fn new(store: &'a dyn DocumentStore, clock: &'a dyn Clock, settings: &'a ImportSettings) -> Self {
        Importer {
            store,
            clock,
            settings,
        }
    }

    /// Runs the whole pipeline for `upload`. Blocks; call it from a blocking
    /// thread. The job always ends in a terminal phase.
    pub fn run(
        &self,
        upload: &RawUpload,
        catalog: &CatalogIndex,
        tx: &mpsc::Sender<JobUpdate>,
    ) -> Result<ImportSummary, IngestError> {
        info!(
            "Attendance import {} started: {} ({} bytes, year {})",
            upload.job_id,
            upload.filename.as_deref().unwrap_or("<unnamed>"),
            upload.bytes.len(),
            upload.year
        );
        self.execute(upload, catalog, tx).inspect_err(|e| {
            error!("Attendance import {} failed: {}", upload.job_id, e);
            ProgressTracker::fail(tx, &upload.job_id, format!("Import failed: {}", e));
        })
    }

    fn execute(
        &self,
        upload: &RawUpload,
        catalog: &CatalogIndex,
        tx: &mpsc::Sender<JobUpdate>,
    ) -> Result<ImportSummary, IngestError> {
        let rows = {
            let decoded = decode::decode(&upload.bytes)?;
            info!(
                "Decoded upload as {:?} (BOM {:?}, {} replacement(s), {} mojibake sequence(s))",
                decoded.encoding,
                decoded.diagnostics.bom,
                decoded.diagnostics.replacements,
                decoded.diagnostics.mojibake
            );
            let schema = schema::detect(&decoded.text)?;
            let rows: Vec<_> = RowReader::new(&decoded.text, &schema).collect();
            rows
        };
        if rows.is_empty() {
            return Err(IngestError::NoRows);
        }
        if let Some(first) = rows.iter().find_map(|row| row.as_ref().ok()) {
            debug!("Columns: {}", first.columns().collect::<Vec<_>>().join(", "));
        }

        self.store.ping().map_err(IngestError::StoreUnavailable)?;

        let total_rows = rows.len() as u64;
        let mut progress = Mutex::new(ProgressTracker::create(
            tx.clone(),
            &upload.job_id,
            total_rows,
            self.clock,
        ));
        let committer = BatchCommitter::new(self.store, self.clock, &self.settings.commit);

        committer
            .create_courses(&referenced_courses(&rows), upload.year)
            .map_err(|e| IngestError::StoreUnavailable(e.source))?;

        let normalizer = RecordNormalizer::new(catalog)?;
        let mut error_details = Vec::new();
        let mut records = Vec::with_capacity(rows.len());
        {
            let tracker = progress.get_mut().unwrap_or_else(PoisonError::into_inner);
            for row in rows {
                match row.and_then(|row| normalizer.normalize(&row).map(|r| (row.number, r))) {
                    Ok(record) => {
                        records.push(record);
                        tracker.advance(ProgressDelta::processed(1));
                    }
                    Err(e) => {
                        warn!("Skipping {}", e);
                        error_details.push(e.to_string());
                        tracker.advance(ProgressDelta::rejected(1));
                    }
                }
            }
        }
        info!(
            "{} of {} rows normalized, {} rejected",
            records.len(),
            total_rows,
            error_details.len()
        );

        let report = committer.commit(records.into_iter(), &progress)?;
        error_details.extend(report.failures.iter().map(|f| f.to_string()));

        let summary = self.summarize(upload, report, error_details);
        progress
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .finish(JobPhase::Completed, summary.message.clone());
        info!("Attendance import {}: {}", upload.job_id, summary.message);
        Ok(summary)
    }

    fn summarize(&self, upload: &RawUpload, report: CommitReport, error_details: Vec<String>) -> ImportSummary {
        let total_attendance = self.store.count(ATTENDANCE).unwrap_or_else(|e| {
            warn!("Could not count attendance records: {}", e);
            report.committed
        });

        let mut years: Vec<i32> = report.saved_by_year.keys().copied().collect();
        years.push(upload.year);
        let year_counts: BTreeMap<i32, u64> = years
            .into_iter()
            .map(|year| {
                let count = self
                    .store
                    .count_by_year(ATTENDANCE, year)
                    .unwrap_or_else(|e: StoreError| {
                        warn!("Could not count attendance records for {}: {}", year, e);
                        report.saved_by_year.get(&year).copied().unwrap_or(0)
                    });
                (year, count)
            })
            .collect();

        let per_year = report
            .saved_by_year
            .iter()
            .map(|(year, n)| format!("{}: {}", year, n))
            .collect::<Vec<_>>()
            .join(", ");
        let errors = error_details.len() as u64;
        let message = if per_year.is_empty() {
            format!(
                "Import completed: {} attendance records saved, {} errors",
                report.committed, errors
            )
        } else {
            format!(
                "Import completed: {} attendance records saved ({}), {} errors",
                report.committed, per_year, errors
            )
        };

        ImportSummary {
            success: true,
            saved: report.committed,
            saved_by_year: report.saved_by_year,
            errors,
            error_details: error_details
                .into_iter()
                .take(self.settings.error_detail_limit)
                .collect(),
            total_attendance,
            year_counts,
            message,
        }
    }
}

/// Distinct `course id → course name` over every readable row.
fn referenced_courses(rows: &[Result<RawRow, error::RowError>]) -> BTreeMap<String, String> {
    rows.iter()
        .filter_map(|row| row.as_ref().ok())
        .filter_map(|row| row.get(COURSE))
        .map(|course| (text::slug(&[course]), course.to_string()))
        .collect()
}
