//! Postgres Job Store
//!
//! Handles all database operations related to jobs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobslot_core::domain::job::{Job, JobId, JobStatus};
use jobslot_core::dto::job::{JobFilter, JobOrder, JobPatch, NewJob};
use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tokio::sync::Mutex;

use super::JobStore;
use crate::error::StoreError;

/// Advisory lock key shared by every process launching from the same database
const LAUNCH_LOCK_KEY: i64 = 0x6a6f_6273_6c6f_74;

const JOB_COLUMNS: &str = "id, name, module, callback, arguments, priority, status, progress, \
     owner, submitted_at, started_at, ended_at, process_id, error_message";

/// Job store backed by a Postgres `jobs` table
pub struct PgJobStore {
    pool: PgPool,
    /// Connection holding the session-level launch lock, if we own it
    launch_conn: Mutex<Option<PoolConnection<Postgres>>>,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            launch_conn: Mutex::new(None),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn insert(&self, job: NewJob, submitted_at: DateTime<Utc>) -> Result<JobId, StoreError> {
        // An empty argument list is stored as NULL
        let arguments = (!job.arguments.is_empty()).then_some(job.arguments);

        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO jobs (name, module, callback, arguments, priority, status, progress,
                              owner, submitted_at)
            VALUES ($1, $2, $3, $4, $5, $6, 0, $7, $8)
            RETURNING id
            "#,
        )
        .bind(&job.name)
        .bind(&job.module)
        .bind(&job.callback)
        .bind(arguments)
        .bind(job.priority)
        .bind(JobStatus::Waiting.as_str())
        .bind(&job.owner)
        .bind(submitted_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(JobId(id))
    }

    async fn update_fields(&self, id: JobId, patch: &JobPatch) -> Result<(), StoreError> {
        if patch.is_empty() {
            return self.get(id).await.map(|_| ());
        }

        let mut qb = update_builder(id, patch);
        let result = qb.build().execute(&self.pool).await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }

        Ok(())
    }

    async fn update_if_waiting(&self, id: JobId, patch: &JobPatch) -> Result<bool, StoreError> {
        if patch.is_empty() {
            return Ok(self.get(id).await?.is_waiting());
        }

        let mut qb = claim_builder(id, patch);
        let result = qb.build().execute(&self.pool).await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get(&self, id: JobId) -> Result<Job, StoreError> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or(StoreError::NotFound(id))?.try_into()
    }

    async fn query(&self, filter: &JobFilter, order: JobOrder) -> Result<Vec<Job>, StoreError> {
        let mut qb = query_builder(filter, order);
        let rows = qb.build_query_as::<JobRow>().fetch_all(&self.pool).await?;

        rows.into_iter().map(Job::try_from).collect()
    }

    async fn try_lock_launch(&self) -> Result<bool, StoreError> {
        let mut held = self.launch_conn.lock().await;
        if held.is_some() {
            return Ok(false);
        }

        let mut conn = self.pool.acquire().await?;
        let acquired = sqlx::query_scalar::<_, bool>("SELECT pg_try_advisory_lock($1)")
            .bind(LAUNCH_LOCK_KEY)
            .fetch_one(&mut *conn)
            .await?;

        if acquired {
            *held = Some(conn);
        }

        Ok(acquired)
    }

    async fn unlock_launch(&self) -> Result<(), StoreError> {
        let Some(mut conn) = self.launch_conn.lock().await.take() else {
            return Ok(());
        };

        let unlocked = sqlx::query_scalar::<_, bool>("SELECT pg_advisory_unlock($1)")
            .bind(LAUNCH_LOCK_KEY)
            .fetch_one(&mut *conn)
            .await;

        if let Err(e) = unlocked {
            // Ending the session drops its advisory locks; never pool it again
            let _ = conn.close().await;
            return Err(e.into());
        }

        Ok(())
    }
}

// =============================================================================
// Query Builders
// =============================================================================

fn update_builder(id: JobId, patch: &JobPatch) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new("UPDATE jobs SET ");
    let mut set = qb.separated(", ");

    if let Some(status) = patch.status {
        set.push("status = ").push_bind_unseparated(status.as_str());
    }
    if let Some(progress) = patch.progress {
        set.push("progress = ").push_bind_unseparated(i32::from(progress));
    }
    if let Some(started_at) = patch.started_at {
        set.push("started_at = ").push_bind_unseparated(started_at);
    }
    if let Some(ended_at) = patch.ended_at {
        set.push("ended_at = ").push_bind_unseparated(ended_at);
    }
    if let Some(process_id) = patch.process_id {
        set.push("process_id = ").push_bind_unseparated(i64::from(process_id));
    }
    if let Some(message) = &patch.error_message {
        set.push("error_message = ").push_bind_unseparated(message.clone());
    }

    qb.push(" WHERE id = ").push_bind(id.0);
    qb
}

/// Same update, applied only while the job has neither started nor ended
fn claim_builder(id: JobId, patch: &JobPatch) -> QueryBuilder<'static, Postgres> {
    let mut qb = update_builder(id, patch);
    qb.push(" AND started_at IS NULL AND ended_at IS NULL");
    qb
}

fn query_builder(filter: &JobFilter, order: JobOrder) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new(format!("SELECT {JOB_COLUMNS} FROM jobs WHERE TRUE"));

    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(module) = &filter.module {
        qb.push(" AND module = ").push_bind(module.clone());
    }
    match filter.started {
        Some(true) => {
            qb.push(" AND started_at IS NOT NULL");
        }
        Some(false) => {
            qb.push(" AND started_at IS NULL");
        }
        None => {}
    }
    match filter.ended {
        Some(true) => {
            qb.push(" AND ended_at IS NOT NULL");
        }
        Some(false) => {
            qb.push(" AND ended_at IS NULL");
        }
        None => {}
    }

    qb.push(match order {
        JobOrder::Queue => " ORDER BY priority ASC, id ASC",
        JobOrder::NewestFirst => " ORDER BY id DESC",
    });

    if let Some(limit) = filter.limit {
        qb.push(" LIMIT ").push_bind(limit);
    }
    if filter.offset > 0 {
        qb.push(" OFFSET ").push_bind(filter.offset);
    }

    qb
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct JobRow {
    id: i64,
    name: String,
    module: String,
    callback: String,
    arguments: Option<Vec<String>>,
    priority: i32,
    status: String,
    progress: i32,
    owner: String,
    submitted_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    process_id: Option<i64>,
    error_message: Option<String>,
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<JobStatus>()
            .map_err(|e| StoreError::Corrupt(format!("job {}: {}", row.id, e)))?;

        let progress = u8::try_from(row.progress)
            .ok()
            .filter(|p| *p <= 100)
            .ok_or_else(|| {
                StoreError::Corrupt(format!("job {}: progress {} out of range", row.id, row.progress))
            })?;

        // Rows written by older tooling use 0 for "no pid"
        let process_id = match row.process_id {
            None | Some(0) => None,
            Some(pid) => Some(u32::try_from(pid).map_err(|_| {
                StoreError::Corrupt(format!("job {}: process id {} out of range", row.id, pid))
            })?),
        };

        Ok(Job {
            id: JobId(row.id),
            name: row.name,
            module: row.module,
            callback: row.callback,
            arguments: row.arguments.unwrap_or_default(),
            priority: row.priority,
            status,
            progress,
            owner: row.owner,
            submitted_at: row.submitted_at,
            started_at: row.started_at,
            ended_at: row.ended_at,
            process_id,
            error_message: row.error_message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> JobRow {
        JobRow {
            id: 5,
            name: "Load FASTA".to_string(),
            module: "loader".to_string(),
            callback: "load_fasta".to_string(),
            arguments: None,
            priority: 10,
            status: "Running".to_string(),
            progress: 40,
            owner: "1".to_string(),
            submitted_at: Utc::now(),
            started_at: Some(Utc::now()),
            ended_at: None,
            process_id: Some(4242),
            error_message: None,
        }
    }

    #[test]
    fn test_row_conversion() {
        let job = Job::try_from(row()).unwrap();
        assert_eq!(job.id, JobId(5));
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.progress, 40);
        assert_eq!(job.process_id, Some(4242));
        assert!(job.arguments.is_empty());
    }

    #[test]
    fn test_row_with_arguments_and_zero_pid() {
        let mut r = row();
        r.arguments = Some(vec!["a.fa".to_string(), "b.fa".to_string()]);
        r.process_id = Some(0);
        let job = Job::try_from(r).unwrap();
        assert_eq!(job.arguments, vec!["a.fa", "b.fa"]);
        assert_eq!(job.process_id, None);
    }

    #[test]
    fn test_corrupt_rows_are_rejected() {
        let mut r = row();
        r.status = "Exploded".to_string();
        assert!(matches!(Job::try_from(r), Err(StoreError::Corrupt(_))));

        let mut r = row();
        r.progress = 140;
        assert!(matches!(Job::try_from(r), Err(StoreError::Corrupt(_))));

        let mut r = row();
        r.process_id = Some(-3);
        assert!(matches!(Job::try_from(r), Err(StoreError::Corrupt(_))));
    }

    #[test]
    fn test_update_builder_sets_only_patched_fields() {
        let patch = JobPatch::progress(30);
        let qb = update_builder(JobId(1), &patch);
        assert_eq!(qb.sql(), "UPDATE jobs SET progress = $1 WHERE id = $2");

        let patch = JobPatch::running(Utc::now(), 99);
        let qb = update_builder(JobId(1), &patch);
        assert_eq!(
            qb.sql(),
            "UPDATE jobs SET status = $1, started_at = $2, process_id = $3 WHERE id = $4"
        );
    }

    #[test]
    fn test_claim_builder_only_matches_unstarted_rows() {
        let patch = JobPatch::running(Utc::now(), 99);
        let qb = claim_builder(JobId(1), &patch);
        assert_eq!(
            qb.sql(),
            "UPDATE jobs SET status = $1, started_at = $2, process_id = $3 \
             WHERE id = $4 AND started_at IS NULL AND ended_at IS NULL"
        );

        let patch = JobPatch::cancelled(Utc::now());
        let qb = claim_builder(JobId(1), &patch);
        assert!(qb.sql().ends_with("AND started_at IS NULL AND ended_at IS NULL"));
    }

    #[test]
    fn test_query_builder_waiting_in_queue_order() {
        let qb = query_builder(&JobFilter::waiting(), JobOrder::Queue);
        assert!(qb.sql().ends_with(
            "WHERE TRUE AND started_at IS NULL AND ended_at IS NULL ORDER BY priority ASC, id ASC"
        ));

        let filter = JobFilter::active_in_module("loader").paged(10, 20);
        let qb = query_builder(&filter, JobOrder::NewestFirst);
        assert!(qb.sql().ends_with(
            "WHERE TRUE AND module = $1 AND ended_at IS NULL ORDER BY id DESC LIMIT $2 OFFSET $3"
        ));
    }
}
