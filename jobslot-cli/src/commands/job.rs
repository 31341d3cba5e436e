//! Job command handlers
//!
//! Handles all job-related CLI commands including submitting, cancelling,
//! rerunning and inspecting jobs.

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use jobslot_core::domain::job::{DEFAULT_PRIORITY, Job, JobId, JobStatus};
use jobslot_core::dto::job::NewJob;

use crate::app::App;
use crate::config::Config;

/// Job subcommands
#[derive(Subcommand)]
pub enum JobCommands {
    /// Queue a new job
    Submit {
        /// Human-readable job name
        name: String,
        /// Submitting module, used for filtering
        module: String,
        /// Registered callback to run
        callback: String,
        /// Lower runs first
        #[arg(short, long, default_value_t = DEFAULT_PRIORITY)]
        priority: i32,
        /// Who the job is submitted for
        #[arg(long, env = "JOBSLOT_OWNER", default_value = "cli")]
        owner: String,
        /// Arguments passed to the callback, after `--`
        #[arg(last = true)]
        arguments: Vec<String>,
    },
    /// Cancel a job that has not started
    Cancel {
        /// Job ID
        id: JobId,
    },
    /// Queue a fresh copy of an existing job
    Rerun {
        /// Job ID
        id: JobId,
        /// Owner of the new copy
        #[arg(long, env = "JOBSLOT_OWNER", default_value = "cli")]
        owner: String,
    },
    /// Record progress for a job, as a percentage
    Progress {
        /// Job ID
        id: JobId,
        /// Percentage between 0 and 100
        #[arg(allow_negative_numbers = true)]
        percent: i64,
    },
    /// List jobs, newest first
    List {
        /// Jobs per page
        #[arg(short, long, default_value_t = 20)]
        limit: i64,
        /// Page number, starting at 1
        #[arg(long, default_value_t = 1)]
        page: i64,
    },
    /// Get job details
    Show {
        /// Job ID
        id: JobId,
        /// Print the job as JSON
        #[arg(long)]
        json: bool,
    },
    /// List unfinished jobs submitted by a module
    Active {
        /// Module name
        module: String,
    },
}

/// Handle job commands
///
/// Routes job subcommands to their respective handlers.
pub async fn handle_job_command(command: JobCommands, config: &Config) -> Result<()> {
    let app = App::connect(config).await?;

    match command {
        JobCommands::Submit {
            name,
            module,
            callback,
            priority,
            owner,
            arguments,
        } => {
            let request = NewJob::new(name, module, callback, owner)
                .with_arguments(arguments)
                .with_priority(priority);
            submit_job(&app, request).await
        }
        JobCommands::Cancel { id } => cancel_job(&app, id).await,
        JobCommands::Rerun { id, owner } => rerun_job(&app, id, owner).await,
        JobCommands::Progress { id, percent } => set_progress(&app, id, percent).await,
        JobCommands::List { limit, page } => list_jobs(&app, limit, page).await,
        JobCommands::Show { id, json } => show_job(&app, id, json).await,
        JobCommands::Active { module } => list_active_jobs(&app, &module).await,
    }
}

async fn submit_job(app: &App, request: NewJob) -> Result<()> {
    let id = app.controller.submit(request).await?;
    println!("{} Submitted job {}", "✓".green(), id.to_string().cyan());
    Ok(())
}

async fn cancel_job(app: &App, id: JobId) -> Result<()> {
    app.controller.cancel(id).await?;
    println!("{} Cancelled job {}", "✓".green(), id.to_string().cyan());
    Ok(())
}

async fn rerun_job(app: &App, id: JobId, owner: String) -> Result<()> {
    let new_id = app.controller.rerun(id, owner).await?;
    println!(
        "{} Resubmitted job {} as {}",
        "✓".green(),
        id.to_string().dimmed(),
        new_id.to_string().cyan()
    );
    Ok(())
}

async fn set_progress(app: &App, id: JobId, percent: i64) -> Result<()> {
    app.controller.set_progress(id, percent).await?;
    println!("{} Job {} at {}%", "✓".green(), id.to_string().cyan(), percent);
    Ok(())
}

async fn list_jobs(app: &App, limit: i64, page: i64) -> Result<()> {
    let (limit, offset) = page_bounds(limit, page);
    let jobs = app.controller.list_jobs(limit, offset).await?;

    if jobs.is_empty() {
        println!("{}", "No jobs found.".yellow());
    } else {
        println!(
            "{}",
            format!("Page {} ({} job(s)):", page.max(1), jobs.len()).bold()
        );
        println!();
        for job in jobs {
            print_job_summary(&job);
        }
    }

    Ok(())
}

async fn show_job(app: &App, id: JobId, json: bool) -> Result<()> {
    let job = app.controller.get(id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&job)?);
    } else {
        print_job_details(&job);
    }

    Ok(())
}

async fn list_active_jobs(app: &App, module: &str) -> Result<()> {
    let jobs = app.controller.active_jobs_for_module(module).await?;

    if jobs.is_empty() {
        println!(
            "{}",
            format!("No active jobs for module {}.", module).yellow()
        );
    } else {
        println!(
            "{}",
            format!("Found {} active job(s) for module {}:", jobs.len(), module).bold()
        );
        println!();
        for job in jobs {
            print_job_summary(&job);
        }
    }

    Ok(())
}

/// Converts a 1-based page number into a limit and offset
fn page_bounds(limit: i64, page: i64) -> (i64, i64) {
    let limit = limit.max(1);
    let offset = (page.max(1) - 1).saturating_mul(limit);
    (limit, offset)
}

/// Print a job summary
fn print_job_summary(job: &Job) {
    let status_colored = colorize_status(&job.status);

    println!(
        "  {} Job {} {}",
        "▸".cyan(),
        job.id.to_string().dimmed(),
        job.name
    );
    println!("    Module:    {}", job.module.dimmed());
    println!("    Status:    {} ({}%)", status_colored, job.progress);
    println!("    Priority:  {}", job.priority);
    println!(
        "    Submitted: {}",
        job.submitted_at
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
            .dimmed()
    );
    println!();
}

/// Print detailed job information
fn print_job_details(job: &Job) {
    let status_colored = colorize_status(&job.status);

    println!("{}", "Job Details:".bold());
    println!("  ID:        {}", job.id.to_string().cyan());
    println!("  Name:      {}", job.name);
    println!("  Module:    {}", job.module);
    println!("  Callback:  {}", job.callback);
    println!("  Owner:     {}", job.owner);
    println!("  Priority:  {}", job.priority);
    println!("  Status:    {}", status_colored);
    println!("  Progress:  {}%", job.progress);
    println!(
        "  Submitted: {}",
        job.submitted_at.format("%Y-%m-%d %H:%M:%S")
    );

    if let Some(started) = job.started_at {
        println!("  Started:   {}", started.format("%Y-%m-%d %H:%M:%S"));
    }

    if let Some(ended) = job.ended_at {
        println!("  Ended:     {}", ended.format("%Y-%m-%d %H:%M:%S"));

        if let Some(started) = job.started_at {
            let duration = ended.signed_duration_since(started);
            println!("  Duration:  {}s", duration.num_seconds());
        }
    }

    if let Some(pid) = job.process_id {
        println!("  PID:       {}", pid);
    }

    if !job.arguments.is_empty() {
        println!("\n{}", "Arguments:".bold());
        for arg in &job.arguments {
            println!("  {}", arg.cyan());
        }
    }

    if let Some(error) = &job.error_message {
        println!("\n{}", "Error:".bold());
        println!("{}", error.red());
    }
}

/// Colorize job status for display
pub(super) fn colorize_status(status: &JobStatus) -> colored::ColoredString {
    let status_str = status.to_string();
    match status {
        JobStatus::Waiting => status_str.yellow(),
        JobStatus::Running => status_str.cyan(),
        JobStatus::Completed => status_str.green(),
        JobStatus::Error => status_str.red(),
        JobStatus::Cancelled => status_str.dimmed(),
    }
}
