//! In-memory Job Store
//!
//! Same semantics as the Postgres store, kept in a map behind an async lock.
//! Used by tests and by embedders that do not need durability.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobslot_core::domain::job::{Job, JobId, JobStatus};
use jobslot_core::dto::job::{JobFilter, JobOrder, JobPatch, NewJob};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

use super::JobStore;
use crate::error::StoreError;

#[derive(Default)]
struct State {
    next_id: i64,
    jobs: BTreeMap<JobId, Job>,
}

#[derive(Default)]
pub struct MemoryJobStore {
    state: RwLock<State>,
    launch_locked: AtomicBool,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored jobs, in any state. Mostly useful to tests
    pub async fn len(&self) -> usize {
        self.state.read().await.jobs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, job: NewJob, submitted_at: DateTime<Utc>) -> Result<JobId, StoreError> {
        let mut state = self.state.write().await;
        state.next_id += 1;
        let id = JobId(state.next_id);

        state.jobs.insert(
            id,
            Job {
                id,
                name: job.name,
                module: job.module,
                callback: job.callback,
                arguments: job.arguments,
                priority: job.priority,
                status: JobStatus::Waiting,
                progress: 0,
                owner: job.owner,
                submitted_at,
                started_at: None,
                ended_at: None,
                process_id: None,
                error_message: None,
            },
        );

        Ok(id)
    }

    async fn update_fields(&self, id: JobId, patch: &JobPatch) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let job = state.jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        patch.apply_to(job);
        Ok(())
    }

    async fn update_if_waiting(&self, id: JobId, patch: &JobPatch) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        let Some(job) = state.jobs.get_mut(&id) else {
            return Ok(false);
        };

        if !job.is_waiting() {
            return Ok(false);
        }

        patch.apply_to(job);
        Ok(true)
    }

    async fn get(&self, id: JobId) -> Result<Job, StoreError> {
        let state = self.state.read().await;
        state.jobs.get(&id).cloned().ok_or(StoreError::NotFound(id))
    }

    async fn query(&self, filter: &JobFilter, order: JobOrder) -> Result<Vec<Job>, StoreError> {
        let state = self.state.read().await;
        let mut jobs: Vec<Job> = state
            .jobs
            .values()
            .filter(|job| filter.matches(job))
            .cloned()
            .collect();

        match order {
            JobOrder::Queue => jobs.sort_by_key(Job::queue_key),
            JobOrder::NewestFirst => jobs.sort_by(|a, b| b.id.cmp(&a.id)),
        }

        let offset = usize::try_from(filter.offset).unwrap_or(0);
        let limit = filter
            .limit
            .and_then(|l| usize::try_from(l).ok())
            .unwrap_or(usize::MAX);

        Ok(jobs.into_iter().skip(offset).take(limit).collect())
    }

    async fn try_lock_launch(&self) -> Result<bool, StoreError> {
        Ok(self
            .launch_locked
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok())
    }

    async fn unlock_launch(&self) -> Result<(), StoreError> {
        self.launch_locked.store(false, Ordering::Release);
        Ok(())
    }
}
