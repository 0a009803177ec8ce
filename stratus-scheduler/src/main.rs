//! Stratus Scheduler
//!
//! Ingests current weather observations for a fixed set of locations on a
//! schedule.
//!
//! Architecture:
//! - Clock: which logical timestamps are due
//! - Graph + steps: the per-run task graph and the actions behind each node
//! - Coordinator: runs the graph, retries steps, records run reports
//! - Sink / ledger: Postgres (or in-memory) storage for rows and run reports
//! - API: read-mostly status endpoints plus run cancellation

mod api;
mod clock;
mod config;
mod coordinator;
mod db;
mod definition;
mod error;
mod exchange;
mod graph;
mod ledger;
mod repository;
mod scheduler;
mod sink;
mod source;
mod steps;
#[cfg(test)]
mod testing;

use anyhow::{Context, Result};
use std::sync::Arc;
use stratus_client::WeatherClient;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Backend, Config};
use crate::coordinator::Coordinator;
use crate::coordinator::retry::RetryPolicy;
use crate::definition::PipelineDefinition;
use crate::ledger::{MemoryLedger, PostgresLedger, RunLedger};
use crate::scheduler::RunTicker;
use crate::sink::{MemorySink, PostgresSink, Sink};
use crate::source::HttpWeatherSource;
use crate::steps::StepRegistry;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stratus_scheduler=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Stratus Scheduler...");

    let config = Config::from_env().context("Failed to load configuration")?;
    let definition = PipelineDefinition::from_config(&config);
    info!(
        "Pipeline '{}': schedule={}, start={}, catchup={}, {} location(s)",
        definition.id,
        definition.schedule,
        definition.start,
        definition.catchup,
        definition.locations.len()
    );

    let http = reqwest::Client::builder()
        .timeout(config.http_timeout)
        .build()
        .context("Failed to build HTTP client")?;
    let client = WeatherClient::with_client(
        config.weather_api_url.clone(),
        config.weather_api_key.clone(),
        http,
    );
    let source = Arc::new(HttpWeatherSource::new(
        client,
        config.probe_location.clone(),
    ));

    let (sink, ledger) = open_storage(&config, &definition.id).await?;

    let steps = StepRegistry::weather(source, sink, definition.gate);
    let coordinator = Coordinator::new(definition, steps, ledger)
        .await
        .context("Failed to start coordinator")?;

    let shutdown = CancellationToken::new();
    let app = api::create_router(coordinator.handle());
    let ticker = tokio::spawn(
        RunTicker::new(coordinator, config.tick_interval).run(shutdown.clone()),
    );

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received Ctrl-C");
            }
            shutdown.cancel();
        }
    });

    info!("Listening on {}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown({
            let shutdown = shutdown.clone();
            async move { shutdown.cancelled().await }
        })
        .await
        .context("Failed to start server")?;

    // The server also stops when the ticker fails; make sure both are down
    shutdown.cancel();
    match ticker.await {
        Ok(result) => result?,
        Err(e) => error!("Run ticker panicked: {}", e),
    }

    info!("Stratus Scheduler stopped");
    Ok(())
}

/// Opens the observation sink and the run ledger for the configured backend
async fn open_storage(
    config: &Config,
    pipeline: &str,
) -> Result<(Arc<dyn Sink>, Arc<dyn RunLedger>)> {
    match &config.backend {
        Backend::Memory => {
            info!("Using in-memory storage, nothing survives a restart");
            Ok((Arc::new(MemorySink::new()), Arc::new(MemoryLedger::new())))
        }
        Backend::Postgres(url) => {
            info!("Connecting to database...");
            let pool = db::connect_with_retry(url, &RetryPolicy::default())
                .await
                .context("Failed to create database pool")?;

            db::run_migrations(&pool)
                .await
                .context("Failed to run database migrations")?;
            info!("Database ready");

            Ok((
                Arc::new(PostgresSink::new(pool.clone(), config.sink_table.clone())),
                Arc::new(PostgresLedger::new(pool, pipeline)),
            ))
        }
    }
}
