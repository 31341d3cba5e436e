//! Runtime wiring
//!
//! Connects to the database and assembles the controller and runner that
//! the commands operate on.

use anyhow::{Context, Result};
use jobslot_engine::db::{create_pool, run_migrations};
use jobslot_engine::{
    JobController, JobQueue, JobRunner, PgJobStore, ProcessLivenessChecker, SystemClock,
};
use std::sync::Arc;
use tracing::debug;

use crate::config::Config;
use crate::handlers;

pub struct App {
    pub controller: JobController,
    pub runner: JobRunner,
}

impl App {
    pub async fn connect(config: &Config) -> Result<Self> {
        let engine = &config.engine;

        let pool = create_pool(engine)
            .await
            .context("Failed to connect to database")?;
        run_migrations(&pool)
            .await
            .context("Failed to prepare jobs table")?;
        debug!(max_connections = engine.max_connections, "Database ready");

        let store = Arc::new(PgJobStore::new(pool));
        let clock = Arc::new(SystemClock);
        let queue = JobQueue::new(store.clone(), Arc::new(ProcessLivenessChecker), clock.clone());

        let controller = JobController::new(store, clock);
        let runner = JobRunner::from_config(queue, Arc::new(handlers::builtin_registry()), engine);

        Ok(Self { controller, runner })
    }
}
