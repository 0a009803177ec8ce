use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;

use crate::coordinator::retry::RetryPolicy;

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

/// Connect, retrying while the database is still coming up
pub async fn connect_with_retry(
    database_url: &str,
    policy: &RetryPolicy,
) -> Result<PgPool, sqlx::Error> {
    let mut attempt = 1;

    loop {
        match create_pool(database_url).await {
            Ok(pool) => return Ok(pool),
            Err(e) if policy.should_retry(attempt) => {
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    "Database connection attempt {}/{} failed: {}. Retrying in {:?}...",
                    attempt,
                    policy.max_attempts,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    // Run ledger
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pipeline_runs (
            pipeline VARCHAR(255) NOT NULL,
            logical_timestamp TIMESTAMPTZ NOT NULL,
            id UUID NOT NULL,
            status VARCHAR(50) NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            finished_at TIMESTAMPTZ,
            reason TEXT,
            steps JSONB NOT NULL DEFAULT '[]',
            PRIMARY KEY (pipeline, logical_timestamp)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_pipeline_runs_status ON pipeline_runs(pipeline, status)",
    )
    .execute(pool)
    .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
