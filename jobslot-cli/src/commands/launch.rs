//! Launch command handler
//!
//! One `launch` runs at most one job. With `--drain` the command keeps
//! launching until nothing more can be started.

use anyhow::Result;
use colored::*;
use jobslot_core::domain::job::JobStatus;
use jobslot_engine::LaunchOutcome;
use tracing::info;

use super::job::colorize_status;
use crate::app::App;
use crate::config::Config;
use crate::handlers::builtin_registry;

pub async fn handle_launch(config: &Config, drain: bool) -> Result<()> {
    let app = App::connect(config).await?;
    let mut finished = 0usize;

    loop {
        let outcome = app.runner.launch().await?;
        print_outcome(&app, outcome).await?;

        if !drain || !keeps_draining(outcome) {
            break;
        }
        if matches!(outcome, LaunchOutcome::Finished { .. }) {
            finished += 1;
        }
    }

    if drain {
        info!("Drained {} job(s)", finished);
    }

    Ok(())
}

/// Whether another launch could make progress after this outcome
fn keeps_draining(outcome: LaunchOutcome) -> bool {
    matches!(
        outcome,
        LaunchOutcome::Finished { .. } | LaunchOutcome::Contended(_)
    )
}

async fn print_outcome(app: &App, outcome: LaunchOutcome) -> Result<()> {
    match outcome {
        LaunchOutcome::Busy => {
            println!("{}", "Another job is running, nothing started.".yellow());
        }
        LaunchOutcome::Idle => {
            println!("{}", "No waiting jobs.".dimmed());
        }
        LaunchOutcome::Contended(job_id) => {
            println!(
                "{}",
                format!("Job {} was claimed elsewhere, skipping.", job_id).yellow()
            );
        }
        LaunchOutcome::Finished { job_id, status } => {
            let job = app.controller.get(job_id).await?;
            let mark = if status == JobStatus::Completed {
                "✓".green()
            } else {
                "✗".red()
            };
            println!(
                "{} Job {} ({}) {}",
                mark,
                job_id.to_string().cyan(),
                job.name,
                colorize_status(&status)
            );
            if let Some(error) = &job.error_message {
                println!("  {}", error.red());
            }
        }
    }

    Ok(())
}

/// Print the callbacks registered in this binary
pub fn list_callbacks() {
    let registry = builtin_registry();
    println!("{}", "Registered callbacks:".bold());
    for name in registry.names() {
        println!("  {} {}", "▸".cyan(), name);
    }
}
