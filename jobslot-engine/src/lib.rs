//! Jobslot Engine
//!
//! A persistent, priority-ordered job queue that runs one background job at
//! a time. There is no daemon: an external trigger calls
//! [`JobRunner::launch`] periodically, and each call recovers crashed jobs,
//! then starts the next Waiting job if the run slot is free.
//!
//! Layers:
//! - `repository`: durable job storage (Postgres) and an in-memory store
//! - `service`: queue ordering, execution and management operations
//! - `liveness`: probing whether the process that started a job is alive

pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod liveness;
pub mod repository;
pub mod service;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use error::{QueueError, Result, StoreError};
pub use liveness::{LivenessChecker, ProcessLivenessChecker};
pub use repository::{JobStore, MemoryJobStore, PgJobStore};
pub use service::{
    CallbackRegistry, CompletionNotifier, JobController, JobHandler, JobQueue, JobRunner,
    LaunchOutcome,
};
