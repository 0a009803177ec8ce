//! Measurement Repository
//!
//! Handles all database operations on the observation table. The table name
//! is configurable, so statements are built with it spliced in; callers pass
//! a name already validated by `Config::validate`.

use sqlx::PgPool;
use stratus_core::domain::observation::WeatherObservation;

/// Create the observation table if it does not exist
pub async fn create_table(pool: &PgPool, table: &str) -> Result<(), sqlx::Error> {
    let sql = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {table} (
            timestamp BIGINT NOT NULL,
            location TEXT NOT NULL,
            temperature DOUBLE PRECISION NOT NULL,
            humidity DOUBLE PRECISION NOT NULL,
            cloudiness DOUBLE PRECISION NOT NULL,
            wind_speed DOUBLE PRECISION NOT NULL,
            ingested_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            PRIMARY KEY (timestamp, location)
        )
        "#
    );

    sqlx::query(&sql).execute(pool).await?;

    tracing::debug!("Ensured observation table {}", table);
    Ok(())
}

/// Insert an observation, replacing the values of an existing row with the same key
pub async fn upsert(
    pool: &PgPool,
    table: &str,
    observation: &WeatherObservation,
) -> Result<(), sqlx::Error> {
    let sql = format!(
        r#"
        INSERT INTO {table} (timestamp, location, temperature, humidity, cloudiness, wind_speed)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (timestamp, location) DO UPDATE
        SET temperature = EXCLUDED.temperature,
            humidity = EXCLUDED.humidity,
            cloudiness = EXCLUDED.cloudiness,
            wind_speed = EXCLUDED.wind_speed,
            ingested_at = now()
        "#
    );

    sqlx::query(&sql)
        .bind(observation.timestamp)
        .bind(&observation.location)
        .bind(observation.temperature)
        .bind(observation.humidity)
        .bind(observation.cloudiness)
        .bind(observation.wind_speed)
        .execute(pool)
        .await?;

    Ok(())
}
