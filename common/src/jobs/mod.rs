//! Pollable progress document for long-running import jobs.
//!
//! A `JobProgress` is created when an upload starts and is then only ever
//! patched. Patches are merge-only: fields left as `None` keep their stored
//! value, counters never move backwards and a terminal phase is final.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPhase {
    Running,
    Completed,
    Error,
}

impl JobPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobPhase::Completed | JobPhase::Error)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgress {
    pub job_id: String,
    pub total_rows: u64,
    pub processed: u64,
    pub committed: u64,
    pub failed: u64,
    pub phase: JobPhase,
    pub message: String,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// A partial update to a `JobProgress`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProgressPatch {
    pub total_rows: Option<u64>,
    pub processed: Option<u64>,
    pub committed: Option<u64>,
    pub failed: Option<u64>,
    pub phase: Option<JobPhase>,
    pub message: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobProgress {
    pub fn new(job_id: impl Into<String>, total_rows: u64, message: impl Into<String>) -> Self {
        let now = Utc::now();
        JobProgress {
            job_id: job_id.into(),
            total_rows,
            processed: 0,
            committed: 0,
            failed: 0,
            phase: JobPhase::Running,
            message: message.into(),
            started_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Merges `patch` into this document.
    pub fn apply(&mut self, patch: &ProgressPatch) {
        if let Some(total) = patch.total_rows {
            self.total_rows = self.total_rows.max(total);
        }
        if let Some(processed) = patch.processed {
            self.processed = self.processed.max(processed);
        }
        if let Some(committed) = patch.committed {
            self.committed = self.committed.max(committed);
        }
        if let Some(failed) = patch.failed {
            self.failed = self.failed.max(failed);
        }
        if !self.phase.is_terminal() {
            if let Some(phase) = patch.phase {
                self.phase = phase;
            }
            if let Some(message) = &patch.message {
                self.message = message.clone();
            }
            if patch.completed_at.is_some() {
                self.completed_at = patch.completed_at;
            }
        }
        self.updated_at = Utc::now();
    }

    /// Builds a fresh document from a patch, for jobs first seen through an update.
    pub fn from_patch(job_id: impl Into<String>, patch: &ProgressPatch) -> Self {
        let mut progress = JobProgress::new(job_id, 0, "");
        progress.apply(patch);
        progress
    }
}
