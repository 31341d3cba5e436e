//! Job Queue
//!
//! Ordering and crash recovery. The queue picks the next job to run and
//! repairs jobs whose executing process died without recording an outcome.
//! It never executes anything itself.

use jobslot_core::domain::job::{Job, JobId};
use jobslot_core::dto::job::{JobFilter, JobOrder, JobPatch};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::{QueueError, Result};
use crate::liveness::LivenessChecker;
use crate::repository::JobStore;

/// Error recorded on a job whose process disappeared mid-run
pub const ORPHANED_JOB_MESSAGE: &str = "Job has terminated unexpectedly.";

/// What a reconcile pass found among started-but-unfinished jobs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Jobs whose process is still alive, left untouched
    pub alive: Vec<JobId>,
    /// Jobs whose process is gone, now marked Error
    pub orphaned: Vec<JobId>,
}

#[derive(Clone)]
pub struct JobQueue {
    store: Arc<dyn JobStore>,
    liveness: Arc<dyn LivenessChecker>,
    clock: Arc<dyn Clock>,
}

impl JobQueue {
    pub fn new(
        store: Arc<dyn JobStore>,
        liveness: Arc<dyn LivenessChecker>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            liveness,
            clock,
        }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Marks every started job whose process is no longer alive as Error
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let in_flight = self
            .store
            .query(&JobFilter::in_flight(), JobOrder::Queue)
            .await?;

        let mut report = ReconcileReport::default();

        for job in in_flight {
            if self.is_process_alive(&job) {
                debug!(job_id = %job.id, pid = ?job.process_id, "Job is still running");
                report.alive.push(job.id);
                continue;
            }

            warn!(
                job_id = %job.id,
                pid = ?job.process_id,
                name = %job.name,
                "Job process is gone, marking job as failed"
            );

            let patch = JobPatch::failed(self.clock.now(), ORPHANED_JOB_MESSAGE);
            self.store
                .update_fields(job.id, &patch)
                .await
                .map_err(QueueError::from_store)?;

            report.orphaned.push(job.id);
        }

        Ok(report)
    }

    /// True if any job is started and unfinished
    ///
    /// Meant to be called right after `reconcile`, at which point every such
    /// job belongs to a live process.
    pub async fn has_active_run(&self) -> Result<bool> {
        let filter = JobFilter::in_flight().paged(1, 0);
        let running = self.store.query(&filter, JobOrder::Queue).await?;
        Ok(!running.is_empty())
    }

    /// The Waiting job with the lowest priority value, oldest first on ties
    pub async fn next_eligible(&self) -> Result<Option<Job>> {
        let filter = JobFilter::waiting().paged(1, 0);
        let mut next = self.store.query(&filter, JobOrder::Queue).await?;
        Ok(next.pop())
    }

    fn is_process_alive(&self, job: &Job) -> bool {
        job.process_id
            .is_some_and(|pid| pid != 0 && self.liveness.is_alive(pid))
    }
}
