//! Error types for the queue engine

use jobslot_core::domain::job::{JobId, JobStatus};
use thiserror::Error;

/// Failure reported by a job store
#[derive(Debug, Error)]
pub enum StoreError {
    /// The database rejected the statement or could not be reached
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// No row exists for the id
    #[error("job {0} not found")]
    NotFound(JobId),

    /// A stored row cannot be mapped back to a job
    #[error("corrupt job row: {0}")]
    Corrupt(String),
}

/// Failure reported by queue, runner and controller operations
#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("job {0} not found")]
    NotFound(JobId),

    /// The job's current state does not allow the requested transition
    #[error("job {job_id} cannot be changed: it is {status}")]
    InvalidTransition { job_id: JobId, status: JobStatus },

    /// Progress must be a whole percentage between 0 and 100
    #[error("invalid progress value {0}: expected 0..=100")]
    InvalidProgress(i64),

    /// The launch task was cancelled before reporting, e.g. at runtime shutdown
    #[error("launch interrupted: {0}")]
    Interrupted(String),
}

impl QueueError {
    /// Maps a store-level missing row onto the queue-level variant
    pub(crate) fn from_store(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => QueueError::NotFound(id),
            other => QueueError::Store(other),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, QueueError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, QueueError>;
