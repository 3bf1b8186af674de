//! Tracks the progress of long-running import jobs.
//!
//! Work running outside the request/response cycle (the attendance pipeline in
//! `import`) never touches the job map itself. It sends `JobUpdate` patches
//! over a channel, and a single updater task merges them into `JobsState` and
//! persists the merged document to the `imports` collection so pollers can
//! still read it after a restart.
//!
//! - `JobsState`: clonable, shared as `web::Data`.
//! - `JobUpdate`: one progress patch for one job.
//! - `start_job_updater`: the single writer of the map.

use crate::store::{Document, DocumentStore, IMPORTS};
use common::jobs::{JobProgress, ProgressPatch};
use log::{debug, warn};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::{mpsc, RwLock};

/// Shared state of every job this process has seen.
#[derive(Clone)]
pub struct JobsState {
    /// Job id → latest merged progress document. Read by the status endpoint,
    /// written by `start_job_updater` and by the upload handler when a job
    /// is registered.
    pub jobs: Arc<RwLock<HashMap<String, JobProgress>>>,

    /// Background pipelines push their progress patches here.
    pub tx: mpsc::Sender<JobUpdate>,
}

impl JobsState {
    pub fn new(tx: mpsc::Sender<JobUpdate>) -> Self {
        JobsState {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            tx,
        }
    }
}

#[derive(Debug)]
pub struct JobUpdate {
    pub(crate) job_id: String,
    pub(crate) patch: ProgressPatch,
}

/// Merges `update` into the map, creating the entry if the job is unknown,
/// and returns the merged snapshot.
async fn merge_update(state: &JobsState, update: JobUpdate) -> JobProgress {
    let mut jobs = state.jobs.write().await;
    match jobs.get_mut(&update.job_id) {
        Some(progress) => {
            progress.apply(&update.patch);
            progress.clone()
        }
        None => {
            let progress = JobProgress::from_patch(&update.job_id, &update.patch);
            jobs.insert(update.job_id, progress.clone());
            progress
        }
    }
}

fn persist(store: &dyn DocumentStore, progress: &JobProgress) -> Result<(), crate::store::StoreError> {
    let doc = Document::from_serialize(&progress.job_id, progress)?;
    store.merge(IMPORTS, &doc)
}

/// Runs until every sender is dropped. Spawn it once at startup.
///
/// A failed write to the datastore only costs persistence of that snapshot;
/// the in-memory map is already up to date.
pub async fn start_job_updater(
    state: JobsState,
    store: Arc<dyn DocumentStore>,
    mut rx: mpsc::Receiver<JobUpdate>,
) {
    while let Some(update) = rx.recv().await {
        let snapshot = merge_update(&state, update).await;
        debug!(
            "Job {} is {:?}: {}",
            snapshot.job_id, snapshot.phase, snapshot.message
        );

        let store = store.clone();
        let job_id = snapshot.job_id.clone();
        match tokio::task::spawn_blocking(move || persist(store.as_ref(), &snapshot)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Could not persist progress of job {}: {}", job_id, e),
            Err(e) => warn!("Progress writer for job {} panicked: {}", job_id, e),
        }
    }
}
