//! Completion notification hook
//!
//! Called once a job reaches Completed or Error. The default does nothing;
//! applications plug in mail or chat delivery here.

use async_trait::async_trait;
use jobslot_core::domain::job::Job;

#[async_trait]
pub trait CompletionNotifier: Send + Sync {
    /// Tells the job's owner the job finished
    ///
    /// Failures are logged by the runner and never change the job.
    async fn notify(&self, job: &Job) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

#[async_trait]
impl CompletionNotifier for NoopNotifier {
    async fn notify(&self, _job: &Job) -> anyhow::Result<()> {
        Ok(())
    }
}
