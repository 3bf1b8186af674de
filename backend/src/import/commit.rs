//! Idempotent, retried batch writes of normalized records.
//!
//! Records are grouped into fixed-size batches and merged by id, so a batch
//! can be replayed or committed out of order without changing the result.
//! With a concurrency above one, batches are pulled by a small rayon pool.

use crate::import::error::IngestError;
use crate::import::progress::{ProgressDelta, ProgressTracker};
use crate::import::retry::{Clock, RetryError, RetryExecutor, RetryPolicy};
use crate::store::{Document, DocumentStore, StoreError, ATTENDANCE, COURSES};
use chrono::Utc;
use common::model::attendance::AttendanceRecord;
use log::{debug, error, info};
use rayon::prelude::*;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct CommitSettings {
    pub batch_size: usize,
    pub course_batch_size: usize,
    pub concurrency: usize,
    /// Pause after each successful batch, keeping the write rate under the
    /// datastore's limits.
    pub pause: Duration,
    pub retry: RetryPolicy,
}

impl Default for CommitSettings {
    fn default() -> Self {
        CommitSettings {
            batch_size: 200,
            course_batch_size: 400,
            concurrency: 1,
            pause: Duration::from_millis(50),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchFailure {
    pub first_row: usize,
    pub last_row: usize,
    pub records: usize,
    pub error: String,
}

impl fmt::Display for BatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Batch failed (rows {}-{}): {}",
            self.first_row, self.last_row, self.error
        )
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommitReport {
    pub committed: u64,
    pub saved_by_year: BTreeMap<i32, u64>,
    /// Sorted by first row.
    pub failures: Vec<BatchFailure>,
}

enum BatchOutcome {
    Committed(BTreeMap<i32, u64>),
    Failed(BatchFailure),
}

/// Lazily groups an iterator into `Vec`s of at most `size` items.
struct Batches<I> {
    inner: I,
    size: usize,
}

impl<I: Iterator> Iterator for Batches<I> {
    type Item = Vec<I::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        let batch: Vec<_> = self.inner.by_ref().take(self.size).collect();
        if batch.is_empty() {
            None
        } else {
            Some(batch)
        }
    }
}

fn record_document(record: &AttendanceRecord) -> Result<Document, StoreError> {
    let mut doc = Document::from_serialize(&record.id, record)?;
    doc.fields
        .insert("updatedAt".to_string(), Value::String(Utc::now().to_rfc3339()));
    Ok(doc)
}

fn course_document(id: &str, name: &str, year: i32) -> Document {
    let fields = match json!({
        "id": id,
        "name": name,
        "year": year,
        "updatedAt": Utc::now().to_rfc3339(),
    }) {
        Value::Object(fields) => fields,
        _ => Default::default(),
    };
    Document::new(id, fields)
}

pub struct BatchCommitter<'a> {
    store: &'a dyn DocumentStore,
    clock: &'a dyn Clock,
    settings: &'a CommitSettings,
}

impl<'a> BatchCommitter<'a> {
    pub fn new(store: &'a dyn DocumentStore, clock: &'a dyn Clock, settings: &'a CommitSettings) -> Self {
        BatchCommitter {
            store,
            clock,
            settings,
        }
    }

    fn retry(&self) -> RetryExecutor<'a> {
        RetryExecutor::new(self.settings.retry, self.clock)
    }

    /// Merges one document per referenced course (`id → name`) ahead of the
    /// attendance writes.
    pub fn create_courses(
        &self,
        courses: &BTreeMap<String, String>,
        year: i32,
    ) -> Result<usize, RetryError<StoreError>> {
        let docs: Vec<Document> = courses
            .iter()
            .map(|(id, name)| course_document(id, name, year))
            .collect();

        let retry = self.retry();
        for chunk in docs.chunks(self.settings.course_batch_size.max(1)) {
            retry.run("Course batch", |_| self.store.merge_batch(COURSES, chunk))?;
            debug!("Course batch saved: {} documents", chunk.len());
        }
        info!("{} course document(s) ensured", docs.len());
        Ok(docs.len())
    }

    /// Commits `(row number, record)` pairs in batches, reporting progress as
    /// each batch settles.
    pub fn commit<I>(
        &self,
        records: I,
        progress: &Mutex<ProgressTracker<'_>>,
    ) -> Result<CommitReport, IngestError>
    where
        I: Iterator<Item = (usize, AttendanceRecord)> + Send,
    {
        let batches = Batches {
            inner: records,
            size: self.settings.batch_size.max(1),
        };

        let outcomes: Vec<BatchOutcome> = if self.settings.concurrency <= 1 {
            batches.map(|batch| self.commit_batch(batch, progress)).collect()
        } else {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.settings.concurrency)
                .build()?;
            pool.install(|| {
                batches
                    .par_bridge()
                    .map(|batch| self.commit_batch(batch, progress))
                    .collect()
            })
        };

        let mut report = CommitReport::default();
        for outcome in outcomes {
            match outcome {
                BatchOutcome::Committed(years) => {
                    for (year, n) in years {
                        report.committed += n;
                        *report.saved_by_year.entry(year).or_insert(0) += n;
                    }
                }
                BatchOutcome::Failed(failure) => report.failures.push(failure),
            }
        }
        report.failures.sort_by_key(|f| f.first_row);
        Ok(report)
    }

    fn commit_batch(
        &self,
        batch: Vec<(usize, AttendanceRecord)>,
        progress: &Mutex<ProgressTracker<'_>>,
    ) -> BatchOutcome {
        let first_row = batch.first().map(|(row, _)| *row).unwrap_or(0);
        let last_row = batch.last().map(|(row, _)| *row).unwrap_or(0);
        let size = batch.len() as u64;

        let result = batch
            .iter()
            .map(|(_, record)| record_document(record))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| e.to_string())
            .and_then(|docs| {
                self.retry()
                    .run(format!("Attendance batch (rows {}-{})", first_row, last_row), |_| {
                        self.store.merge_batch(ATTENDANCE, &docs)
                    })
                    .map_err(|e| e.source.to_string())
            });

        match result {
            Ok(()) => {
                debug!("Attendance batch saved: rows {}-{}", first_row, last_row);
                self.clock.sleep(self.settings.pause);
                progress
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .advance(ProgressDelta::committed(size));

                let mut years = BTreeMap::new();
                for (_, record) in &batch {
                    *years.entry(record.year).or_insert(0) += 1;
                }
                BatchOutcome::Committed(years)
            }
            Err(e) => {
                error!(
                    "Attendance batch (rows {}-{}) dropped after retries: {}",
                    first_row, last_row, e
                );
                progress
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .advance(ProgressDelta::failed(size));
                BatchOutcome::Failed(BatchFailure {
                    first_row,
                    last_row,
                    records: batch.len(),
                    error: e,
                })
            }
        }
    }
}
