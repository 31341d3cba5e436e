//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod job;
mod launch;

pub use job::JobCommands;

use anyhow::Result;
use clap::Subcommand;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run the next waiting job if no other job is running
    ///
    /// Intended to be invoked periodically, e.g. from cron.
    Launch {
        /// Keep launching until the queue is empty or another job holds the slot
        #[arg(long)]
        drain: bool,
    },
    /// Job management
    Job {
        #[command(subcommand)]
        command: JobCommands,
    },
    /// List callbacks this binary can run
    Callbacks,
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module.
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Launch { drain } => launch::handle_launch(config, drain).await,
        Commands::Job { command } => job::handle_job_command(command, config).await,
        Commands::Callbacks => {
            launch::list_callbacks();
            Ok(())
        }
    }
}
