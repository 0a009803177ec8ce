//! Run ticker
//!
//! Ticks the coordinator whenever a step reports, an operator command
//! arrives, a run deadline passes or `tick_interval` elapses, whichever
//! comes first. On shutdown the coordinator cancels its active runs and the
//! loop returns.

use anyhow::{Context, Result};
use chrono::Utc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::coordinator::Coordinator;
use crate::error::EngineError;

pub struct RunTicker {
    coordinator: Coordinator,
    tick_interval: Duration,
}

impl RunTicker {
    pub fn new(coordinator: Coordinator, tick_interval: Duration) -> Self {
        Self {
            coordinator,
            tick_interval,
        }
    }

    /// Runs until `shutdown` is cancelled or the coordinator hits a fatal error
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<()> {
        info!(
            "Starting run ticker for pipeline '{}' (interval: {:?})",
            self.coordinator.definition().id,
            self.tick_interval
        );

        let outcome = self.run_loop(&shutdown).await;
        if outcome.is_err() {
            shutdown.cancel();
        }

        self.coordinator
            .shutdown()
            .await
            .context("Failed to stop coordinator")?;
        outcome
    }

    async fn run_loop(&mut self, shutdown: &CancellationToken) -> Result<()> {
        loop {
            match self.coordinator.tick(Utc::now()).await {
                Ok(outcome) => {
                    if !outcome.admitted.is_empty() {
                        info!("Admitted {} run(s)", outcome.admitted.len());
                    }
                    debug!("Tick done, {} run(s) in flight", outcome.in_flight);
                }
                // Ledger writes are retried on the next tick
                Err(EngineError::Database(e)) => {
                    error!("Run ledger unavailable: {}", e);
                }
                Err(e) => return Err(e).context("Coordinator failed"),
            }

            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Shutdown requested, stopping run ticker");
                    return Ok(());
                }
                progress = self.coordinator.wait_for_progress() => {
                    progress.context("Coordinator failed")?;
                }
                _ = tokio::time::sleep(self.tick_interval) => {}
            }
        }
    }
}
