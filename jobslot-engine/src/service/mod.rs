//! Service Module
//!
//! Scheduling and lifecycle logic on top of the job store.
//! - `queue`: ordering and orphan recovery
//! - `runner`: executes one job per launch
//! - `controller`: submit, progress, cancel, rerun
//! - `registry`: callback name to handler mapping
//! - `notify`: completion hook

pub mod controller;
pub mod notify;
pub mod queue;
pub mod registry;
pub mod runner;

// Re-export for convenience
pub use controller::JobController;
pub use notify::{CompletionNotifier, NoopNotifier};
pub use queue::{JobQueue, ORPHANED_JOB_MESSAGE, ReconcileReport};
pub use registry::{CallbackRegistry, FnHandler, JobHandler};
pub use runner::{JobRunner, LaunchOutcome};
