//! Job DTOs for submission, updates and queries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::job::{DEFAULT_PRIORITY, Job, JobStatus};

/// Request to submit a new job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewJob {
    pub name: String,
    pub module: String,
    pub callback: String,
    #[serde(default)]
    pub arguments: Vec<String>,
    pub owner: String,
    #[serde(default = "default_priority")]
    pub priority: i32,
}

fn default_priority() -> i32 {
    DEFAULT_PRIORITY
}

impl NewJob {
    /// Creates a submission with no arguments and the default priority
    pub fn new(
        name: impl Into<String>,
        module: impl Into<String>,
        callback: impl Into<String>,
        owner: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            module: module.into(),
            callback: callback.into(),
            arguments: Vec::new(),
            owner: owner.into(),
            priority: DEFAULT_PRIORITY,
        }
    }

    pub fn with_arguments<I, S>(mut self, arguments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.arguments = arguments.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Copies everything a rerun keeps from an existing job
    ///
    /// The owner is the identity of whoever asked for the rerun.
    pub fn rerun_of(job: &Job, owner: impl Into<String>) -> Self {
        Self {
            name: job.name.clone(),
            module: job.module.clone(),
            callback: job.callback.clone(),
            arguments: job.arguments.clone(),
            owner: owner.into(),
            priority: job.priority,
        }
    }
}

/// Per-field update of a stored job
///
/// Only fields set to `Some` are written. Writers never send whole rows so
/// that concurrent progress reports and lifecycle transitions do not clobber
/// each other.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub progress: Option<u8>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub process_id: Option<u32>,
    pub error_message: Option<String>,
}

impl JobPatch {
    /// Marks a job as started by the given process
    pub fn running(now: DateTime<Utc>, process_id: u32) -> Self {
        Self {
            status: Some(JobStatus::Running),
            started_at: Some(now),
            process_id: Some(process_id),
            ..Self::default()
        }
    }

    pub fn completed(now: DateTime<Utc>) -> Self {
        Self {
            status: Some(JobStatus::Completed),
            ended_at: Some(now),
            progress: Some(100),
            ..Self::default()
        }
    }

    pub fn failed(now: DateTime<Utc>, message: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Error),
            ended_at: Some(now),
            error_message: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn cancelled(now: DateTime<Utc>) -> Self {
        Self {
            status: Some(JobStatus::Cancelled),
            ended_at: Some(now),
            progress: Some(0),
            ..Self::default()
        }
    }

    pub fn progress(percent: u8) -> Self {
        Self {
            progress: Some(percent),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Writes the set fields onto an in-memory job
    pub fn apply_to(&self, job: &mut Job) {
        if let Some(status) = self.status {
            job.status = status;
        }
        if let Some(progress) = self.progress {
            job.progress = progress;
        }
        if let Some(started_at) = self.started_at {
            job.started_at = Some(started_at);
        }
        if let Some(ended_at) = self.ended_at {
            job.ended_at = Some(ended_at);
        }
        if let Some(process_id) = self.process_id {
            job.process_id = Some(process_id);
        }
        if let Some(message) = &self.error_message {
            job.error_message = Some(message.clone());
        }
    }
}

/// Predicate over stored jobs
///
/// Every set field must match. `started`/`ended` test whether the
/// corresponding timestamp is present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub module: Option<String>,
    pub started: Option<bool>,
    pub ended: Option<bool>,
    pub limit: Option<i64>,
    pub offset: i64,
}

impl JobFilter {
    pub fn all() -> Self {
        Self::default()
    }

    /// Jobs that have neither started nor ended
    pub fn waiting() -> Self {
        Self {
            started: Some(false),
            ended: Some(false),
            ..Self::default()
        }
    }

    /// Jobs that started but have no recorded end
    pub fn in_flight() -> Self {
        Self {
            started: Some(true),
            ended: Some(false),
            ..Self::default()
        }
    }

    /// Jobs of a module that have not ended, whether started or not
    pub fn active_in_module(module: impl Into<String>) -> Self {
        Self {
            module: Some(module.into()),
            ended: Some(false),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn paged(mut self, limit: i64, offset: i64) -> Self {
        self.limit = Some(limit);
        self.offset = offset;
        self
    }

    /// Evaluates the predicate part of the filter; paging is left to the store
    pub fn matches(&self, job: &Job) -> bool {
        if self.status.is_some_and(|status| job.status != status) {
            return false;
        }
        if self.module.as_ref().is_some_and(|m| &job.module != m) {
            return false;
        }
        if self
            .started
            .is_some_and(|started| job.started_at.is_some() != started)
        {
            return false;
        }
        if self.ended.is_some_and(|ended| job.ended_at.is_some() != ended) {
            return false;
        }
        true
    }
}

/// Result ordering for store queries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum JobOrder {
    /// Execution order: lowest priority value first, then oldest id
    #[default]
    Queue,
    /// Newest submission first
    NewestFirst,
}
