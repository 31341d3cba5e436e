//! Repository Module
//!
//! Data access layer for jobs. Stores are pure persistence: they apply the
//! writes they are given and answer queries, but make no scheduling decisions.

pub mod job;
pub mod memory;

pub use job::PgJobStore;
pub use memory::MemoryJobStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobslot_core::domain::job::{Job, JobId};
use jobslot_core::dto::job::{JobFilter, JobOrder, JobPatch, NewJob};

use crate::error::StoreError;

/// Durable record store for job rows
///
/// Failures surface as `StoreError` and are never retried here.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Inserts a Waiting job and returns its freshly assigned id
    async fn insert(&self, job: NewJob, submitted_at: DateTime<Utc>) -> Result<JobId, StoreError>;

    /// Overwrites the fields set in `patch` and nothing else
    ///
    /// Fails with `StoreError::NotFound` if the job does not exist.
    async fn update_fields(&self, id: JobId, patch: &JobPatch) -> Result<(), StoreError>;

    /// Applies `patch` only if the job has neither started nor ended
    ///
    /// Returns whether the write happened. The check and the write are a
    /// single atomic step, so two callers racing for the same Waiting job
    /// cannot both win.
    async fn update_if_waiting(&self, id: JobId, patch: &JobPatch) -> Result<bool, StoreError>;

    async fn get(&self, id: JobId) -> Result<Job, StoreError>;

    async fn query(&self, filter: &JobFilter, order: JobOrder) -> Result<Vec<Job>, StoreError>;

    /// Tries to take the store-wide launch lock without waiting
    ///
    /// Stores shared between processes use this to serialize launches
    /// across hosts. The default lets every caller through.
    async fn try_lock_launch(&self) -> Result<bool, StoreError> {
        Ok(true)
    }

    async fn unlock_launch(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
