//! Job domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Priority assigned when a submitter does not pick one.
///
/// Lower values run first.
pub const DEFAULT_PRIORITY: i32 = 10;

/// Job identifier
///
/// Assigned by the store at insert time. Ids grow with creation order, which
/// makes them the FIFO tie-breaker inside a priority tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub i64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().trim_start_matches('#').parse().map(JobId)
    }
}

/// Persisted job record
///
/// One row per submitted unit of work. Timestamps that have not happened yet
/// are `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub name: String,
    /// Subsystem that submitted the job, used for filtering only
    pub module: String,
    /// Name of the registered handler to invoke
    pub callback: String,
    pub arguments: Vec<String>,
    pub priority: i32,
    pub status: JobStatus,
    pub progress: u8,
    pub owner: String,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub process_id: Option<u32>,
    pub error_message: Option<String>,
}

impl Job {
    /// True while the job has neither started nor ended
    pub fn is_waiting(&self) -> bool {
        self.started_at.is_none() && self.ended_at.is_none()
    }

    /// True once execution began and no terminal state was recorded yet
    pub fn is_in_flight(&self) -> bool {
        self.started_at.is_some() && self.ended_at.is_none()
    }

    /// Ordering key used to pick the next job: priority first, then age
    pub fn queue_key(&self) -> (i32, JobId) {
        (self.priority, self.id)
    }
}

/// Job lifecycle status
///
/// `Waiting -> Running -> {Completed, Error}` and `Waiting -> Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    Waiting,
    Running,
    Completed,
    Error,
    Cancelled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Waiting,
        JobStatus::Running,
        JobStatus::Completed,
        JobStatus::Error,
        JobStatus::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Waiting => "Waiting",
            JobStatus::Running => "Running",
            JobStatus::Completed => "Completed",
            JobStatus::Error => "Error",
            JobStatus::Cancelled => "Cancelled",
        }
    }

    /// Terminal states never transition again
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Error | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a stored status string is not recognised
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStatus(pub String);

impl fmt::Display for UnknownStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown job status '{}'", self.0)
    }
}

impl std::error::Error for UnknownStatus {}

impl FromStr for JobStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}
