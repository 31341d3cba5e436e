//! Job Controller
//!
//! Operations callers use to change the queue from outside the run loop:
//! submitting, reporting progress, cancelling and rerunning. All writes are
//! per-field so they can safely interleave with a launch in progress.

use jobslot_core::domain::job::{Job, JobId};
use jobslot_core::dto::job::{JobFilter, JobOrder, JobPatch, NewJob};
use std::sync::Arc;
use tracing::info;

use crate::clock::Clock;
use crate::error::{QueueError, Result};
use crate::repository::JobStore;

#[derive(Clone)]
pub struct JobController {
    store: Arc<dyn JobStore>,
    clock: Arc<dyn Clock>,
}

impl JobController {
    pub fn new(store: Arc<dyn JobStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Adds a Waiting job to the queue and returns its id
    pub async fn submit(&self, job: NewJob) -> Result<JobId> {
        let name = job.name.clone();
        let module = job.module.clone();
        let priority = job.priority;

        let id = self.store.insert(job, self.clock.now()).await?;

        info!(job_id = %id, %name, %module, priority, "Job submitted");
        Ok(id)
    }

    /// Records how far a job has progressed, as a percentage
    ///
    /// Values outside 0..=100 are rejected and the stored value is kept.
    pub async fn set_progress(&self, job_id: JobId, percent: i64) -> Result<()> {
        let percent = u8::try_from(percent)
            .ok()
            .filter(|p| *p <= 100)
            .ok_or(QueueError::InvalidProgress(percent))?;

        self.store
            .update_fields(job_id, &JobPatch::progress(percent))
            .await
            .map_err(QueueError::from_store)
    }

    /// Cancels a job that has not started yet
    pub async fn cancel(&self, job_id: JobId) -> Result<()> {
        let job = self.get(job_id).await?;
        if !job.is_waiting() {
            return Err(QueueError::InvalidTransition {
                job_id,
                status: job.status,
            });
        }

        let patch = JobPatch::cancelled(self.clock.now());
        if !self.store.update_if_waiting(job_id, &patch).await? {
            // Lost a race with a launch or another cancel
            let current = self.get(job_id).await?;
            return Err(QueueError::InvalidTransition {
                job_id,
                status: current.status,
            });
        }

        info!(job_id = %job_id, "Job cancelled");
        Ok(())
    }

    /// Submits a copy of an existing job on behalf of `owner`
    pub async fn rerun(&self, job_id: JobId, owner: impl Into<String>) -> Result<JobId> {
        let job = self.get(job_id).await?;
        let new_id = self.submit(NewJob::rerun_of(&job, owner)).await?;

        info!(job_id = %job_id, new_job_id = %new_id, "Job resubmitted");
        Ok(new_id)
    }

    pub async fn get(&self, job_id: JobId) -> Result<Job> {
        self.store.get(job_id).await.map_err(QueueError::from_store)
    }

    /// Jobs newest first, one page at a time
    pub async fn list_jobs(&self, limit: i64, offset: i64) -> Result<Vec<Job>> {
        let filter = JobFilter::all().paged(limit, offset);
        Ok(self.store.query(&filter, JobOrder::NewestFirst).await?)
    }

    /// Jobs submitted by a module that have not ended yet
    pub async fn active_jobs_for_module(&self, module: &str) -> Result<Vec<Job>> {
        let filter = JobFilter::active_in_module(module);
        Ok(self.store.query(&filter, JobOrder::Queue).await?)
    }
}
