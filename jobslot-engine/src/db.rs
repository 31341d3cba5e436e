use sqlx::{PgPool, postgres::PgPoolOptions};

use crate::config::EngineConfig;

pub async fn create_pool(config: &EngineConfig) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
        .connect(&config.database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id BIGSERIAL PRIMARY KEY,
            name VARCHAR(255) NOT NULL,
            module VARCHAR(255) NOT NULL,
            callback VARCHAR(255) NOT NULL,
            arguments TEXT[],
            priority INTEGER NOT NULL DEFAULT 10,
            status VARCHAR(50) NOT NULL,
            progress INTEGER NOT NULL DEFAULT 0,
            owner VARCHAR(255) NOT NULL,
            submitted_at TIMESTAMPTZ NOT NULL,
            started_at TIMESTAMPTZ,
            ended_at TIMESTAMPTZ,
            process_id BIGINT,
            error_message TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Queue order over jobs that have not started
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_jobs_queue ON jobs(priority, id)
        WHERE started_at IS NULL AND ended_at IS NULL
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_module ON jobs(module)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status)")
        .execute(pool)
        .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
