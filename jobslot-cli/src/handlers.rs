//! Built-in callbacks
//!
//! The CLI has no application code of its own to run, so it ships an `exec`
//! callback that runs an external program for each job.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use jobslot_core::domain::job::JobId;
use jobslot_engine::{CallbackRegistry, JobHandler};
use std::sync::Arc;
use tokio::process::Command;
use tracing::debug;

/// Callback name under which [`ExecHandler`] is registered
pub const EXEC_CALLBACK: &str = "exec";

/// Runs `arguments[0]` with the remaining arguments and the job id appended
///
/// The program inherits stdout and stderr. A non-zero exit fails the job.
pub struct ExecHandler;

#[async_trait]
impl JobHandler for ExecHandler {
    async fn run(&self, arguments: Vec<String>, job_id: JobId) -> Result<()> {
        let Some((program, args)) = arguments.split_first() else {
            bail!("exec requires the program to run as its first argument");
        };

        debug!(%program, ?args, %job_id, "Spawning program");

        let status = Command::new(program)
            .args(args)
            .arg(job_id.to_string())
            .kill_on_drop(true)
            .status()
            .await
            .with_context(|| format!("Failed to start {}", program))?;

        if !status.success() {
            match status.code() {
                Some(code) => bail!("{} exited with status {}", program, code),
                None => bail!("{} was terminated by a signal", program),
            }
        }

        Ok(())
    }
}

pub fn builtin_registry() -> CallbackRegistry {
    let mut registry = CallbackRegistry::new();
    registry.register(EXEC_CALLBACK, Arc::new(ExecHandler));
    registry
}
