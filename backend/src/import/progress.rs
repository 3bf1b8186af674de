//! Throttled publisher of `JobProgress` patches for one import.
//!
//! Patches go to the job controller over its channel. A push happens every
//! 5% of rows moved or every 5 seconds, whichever comes first. Publishing is
//! best effort: a closed channel is logged and ignored.

use crate::import::retry::Clock;
use crate::job_controller::state::JobUpdate;
use chrono::Utc;
use common::jobs::{JobPhase, ProgressPatch};
use log::warn;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

const PUSH_INTERVAL: Duration = Duration::from_secs(5);
const MILESTONES: u64 = 20;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProgressDelta {
    pub processed: u64,
    pub committed: u64,
    pub failed: u64,
}

impl ProgressDelta {
    pub fn processed(n: u64) -> Self {
        ProgressDelta { processed: n, ..Default::default() }
    }

    pub fn rejected(n: u64) -> Self {
        ProgressDelta { processed: n, failed: n, ..Default::default() }
    }

    pub fn committed(n: u64) -> Self {
        ProgressDelta { committed: n, ..Default::default() }
    }

    pub fn failed(n: u64) -> Self {
        ProgressDelta { failed: n, ..Default::default() }
    }
}

fn publish(tx: &mpsc::Sender<JobUpdate>, job_id: &str, patch: ProgressPatch) {
    let update = JobUpdate {
        job_id: job_id.to_string(),
        patch,
    };
    if let Err(e) = tx.blocking_send(update) {
        warn!("Could not publish progress for job {}: {}", job_id, e);
    }
}

pub struct ProgressTracker<'c> {
    tx: mpsc::Sender<JobUpdate>,
    job_id: String,
    total_rows: u64,
    processed: u64,
    committed: u64,
    failed: u64,
    step: u64,
    last_milestone: u64,
    last_push: Instant,
    clock: &'c dyn Clock,
}

impl<'c> ProgressTracker<'c> {
    pub fn create(
        tx: mpsc::Sender<JobUpdate>,
        job_id: &str,
        total_rows: u64,
        clock: &'c dyn Clock,
    ) -> Self {
        publish(
            &tx,
            job_id,
            ProgressPatch {
                total_rows: Some(total_rows),
                processed: Some(0),
                committed: Some(0),
                failed: Some(0),
                phase: Some(JobPhase::Running),
                message: Some(format!("Starting attendance import of {} rows", total_rows)),
                ..Default::default()
            },
        );
        ProgressTracker {
            tx,
            job_id: job_id.to_string(),
            total_rows,
            processed: 0,
            committed: 0,
            failed: 0,
            step: (total_rows / MILESTONES).max(1),
            last_milestone: 0,
            last_push: clock.now(),
            clock,
        }
    }

    pub fn advance(&mut self, delta: ProgressDelta) {
        self.processed += delta.processed;
        self.committed += delta.committed;
        self.failed += delta.failed;

        let milestone = (self.processed + self.committed + self.failed) / self.step;
        let now = self.clock.now();
        if milestone > self.last_milestone || now.duration_since(self.last_push) >= PUSH_INTERVAL {
            self.last_milestone = milestone;
            self.last_push = now;
            let message = format!(
                "Processing... {}/{} ({} saved, {} errors)",
                self.processed, self.total_rows, self.committed, self.failed
            );
            publish(&self.tx, &self.job_id, self.counters(Some(message)));
        }
    }

    pub fn finish(&mut self, phase: JobPhase, message: String) {
        let mut patch = self.counters(Some(message));
        patch.phase = Some(phase);
        patch.completed_at = Some(Utc::now());
        publish(&self.tx, &self.job_id, patch);
    }

    /// Marks a job as failed when no tracker exists yet (or it was lost).
    pub fn fail(tx: &mpsc::Sender<JobUpdate>, job_id: &str, message: String) {
        publish(
            tx,
            job_id,
            ProgressPatch {
                phase: Some(JobPhase::Error),
                message: Some(message),
                completed_at: Some(Utc::now()),
                ..Default::default()
            },
        );
    }

    fn counters(&self, message: Option<String>) -> ProgressPatch {
        ProgressPatch {
            total_rows: Some(self.total_rows),
            processed: Some(self.processed),
            committed: Some(self.committed),
            failed: Some(self.failed),
            message,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::retry::testing::FakeClock;

    fn drain(rx: &mut mpsc::Receiver<JobUpdate>) -> Vec<ProgressPatch> {
        let mut out = Vec::new();
        while let Ok(update) = rx.try_recv() {
            out.push(update.patch);
        }
        out
    }

    #[test]
    fn create_publishes_running_phase() {
        let (tx, mut rx) = mpsc::channel(16);
        let clock = FakeClock::new();
        let _tracker = ProgressTracker::create(tx, "job-1", 100, &clock);

        let patches = drain(&mut rx);
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].phase, Some(JobPhase::Running));
        assert_eq!(patches[0].total_rows, Some(100));
    }

    #[test]
    fn pushes_once_per_five_percent() {
        let (tx, mut rx) = mpsc::channel(256);
        let clock = FakeClock::new();
        let mut tracker = ProgressTracker::create(tx, "job-1", 100, &clock);
        drain(&mut rx);

        for _ in 0..100 {
            tracker.advance(ProgressDelta::processed(1));
        }
        let patches = drain(&mut rx);
        assert_eq!(patches.len(), 20);
        assert_eq!(patches.last().unwrap().processed, Some(100));
    }

    #[test]
    fn pushes_after_five_seconds_without_a_milestone() {
        let (tx, mut rx) = mpsc::channel(256);
        let clock = FakeClock::new();
        let mut tracker = ProgressTracker::create(tx, "job-1", 10_000, &clock);
        drain(&mut rx);

        tracker.advance(ProgressDelta::processed(1));
        assert!(drain(&mut rx).is_empty());

        clock.advance(Duration::from_secs(5));
        tracker.advance(ProgressDelta::rejected(1));
        let patches = drain(&mut rx);
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].processed, Some(2));
        assert_eq!(patches[0].failed, Some(1));
    }

    #[test]
    fn finish_sets_terminal_phase() {
        let (tx, mut rx) = mpsc::channel(16);
        let clock = FakeClock::new();
        let mut tracker = ProgressTracker::create(tx, "job-1", 1, &clock);
        tracker.advance(ProgressDelta::processed(1));
        tracker.advance(ProgressDelta::committed(1));
        tracker.finish(JobPhase::Completed, "done".into());

        let last = drain(&mut rx).pop().unwrap();
        assert_eq!(last.phase, Some(JobPhase::Completed));
        assert_eq!(last.committed, Some(1));
        assert!(last.completed_at.is_some());
    }

    #[test]
    fn closed_channel_is_not_fatal() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let clock = FakeClock::new();
        let mut tracker = ProgressTracker::create(tx.clone(), "job-1", 1, &clock);
        tracker.advance(ProgressDelta::processed(1));
        ProgressTracker::fail(&tx, "job-1", "boom".into());
    }
}
