//! Run Repository
//!
//! Persists run reports in `pipeline_runs`, one row per
//! (pipeline, logical timestamp).

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::types::Json;
use stratus_core::domain::run::{RunInstance, RunStatus};
use stratus_core::domain::step::StepExecution;
use uuid::Uuid;

/// Insert a run report or overwrite the stored one for the same timestamp
pub async fn upsert(pool: &PgPool, pipeline: &str, run: &RunInstance) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO pipeline_runs
            (pipeline, logical_timestamp, id, status, created_at, finished_at, reason, steps)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (pipeline, logical_timestamp) DO UPDATE
        SET id = EXCLUDED.id,
            status = EXCLUDED.status,
            finished_at = EXCLUDED.finished_at,
            reason = EXCLUDED.reason,
            steps = EXCLUDED.steps
        "#,
    )
    .bind(pipeline)
    .bind(run.logical_timestamp)
    .bind(run.id)
    .bind(status_to_string(run.status))
    .bind(run.created_at)
    .bind(run.finished_at)
    .bind(&run.reason)
    .bind(Json(&run.steps))
    .execute(pool)
    .await?;

    Ok(())
}

/// Latest logical timestamp ever admitted for the pipeline
pub async fn latest_logical_timestamp(
    pool: &PgPool,
    pipeline: &str,
) -> Result<Option<DateTime<Utc>>, sqlx::Error> {
    let latest: Option<DateTime<Utc>> = sqlx::query_scalar(
        "SELECT MAX(logical_timestamp) FROM pipeline_runs WHERE pipeline = $1",
    )
    .bind(pipeline)
    .fetch_one(pool)
    .await?;

    Ok(latest)
}

/// Runs that were admitted but never reached a terminal status
pub async fn find_unfinished(
    pool: &PgPool,
    pipeline: &str,
) -> Result<Vec<RunInstance>, sqlx::Error> {
    let rows = sqlx::query_as::<_, RunRow>(
        r#"
        SELECT id, logical_timestamp, status, created_at, finished_at, reason, steps
        FROM pipeline_runs
        WHERE pipeline = $1 AND status IN ('pending', 'running')
        ORDER BY logical_timestamp ASC
        "#,
    )
    .bind(pipeline)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

/// Most recent terminal runs, newest first
pub async fn find_recent_finished(
    pool: &PgPool,
    pipeline: &str,
    limit: i64,
) -> Result<Vec<RunInstance>, sqlx::Error> {
    let rows = sqlx::query_as::<_, RunRow>(
        r#"
        SELECT id, logical_timestamp, status, created_at, finished_at, reason, steps
        FROM pipeline_runs
        WHERE pipeline = $1 AND status NOT IN ('pending', 'running')
        ORDER BY logical_timestamp DESC
        LIMIT $2
        "#,
    )
    .bind(pipeline)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.into()).collect())
}

// =============================================================================
// Helper Functions
// =============================================================================

fn status_to_string(status: RunStatus) -> &'static str {
    status.as_str()
}

fn string_to_status(s: &str) -> RunStatus {
    match s {
        "running" => RunStatus::Running,
        "success" => RunStatus::Success,
        "failed" => RunStatus::Failed,
        "cancelled" => RunStatus::Cancelled,
        _ => RunStatus::Pending,
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct RunRow {
    id: Uuid,
    logical_timestamp: DateTime<Utc>,
    status: String,
    created_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    reason: Option<String>,
    steps: Json<Vec<StepExecution>>,
}

impl From<RunRow> for RunInstance {
    fn from(row: RunRow) -> Self {
        RunInstance {
            id: row.id,
            logical_timestamp: row.logical_timestamp,
            status: string_to_status(&row.status),
            created_at: row.created_at,
            finished_at: row.finished_at,
            reason: row.reason,
            steps: row.steps.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_strings_round_trip() {
        for status in [
            RunStatus::Pending,
            RunStatus::Running,
            RunStatus::Success,
            RunStatus::Failed,
            RunStatus::Cancelled,
        ] {
            assert_eq!(string_to_status(status_to_string(status)), status);
        }
    }

    #[test]
    fn test_unknown_status_reads_as_pending() {
        assert_eq!(string_to_status("exploded"), RunStatus::Pending);
    }
}
