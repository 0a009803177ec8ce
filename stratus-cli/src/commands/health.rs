//! Health command handler

use anyhow::{Context, Result};
use colored::*;
use stratus_client::SchedulerClient;

use crate::config::Config;

pub async fn handle_health_command(config: &Config) -> Result<()> {
    let client = SchedulerClient::new(&config.scheduler_url);
    let health = client
        .health()
        .await
        .with_context(|| format!("Scheduler at {} is unreachable", client.base_url()))?;

    println!("{}", "Scheduler Health:".bold());
    println!("  Status:      {}", health.status.green());
    println!("  Pipeline:    {}", health.pipeline.cyan());
    println!("  Active runs: {}", health.active_runs);
    match health.watermark {
        Some(watermark) => println!("  Watermark:   {}", watermark.format("%Y-%m-%d %H:%M:%S")),
        None => println!("  Watermark:   {}", "none yet".dimmed()),
    }

    Ok(())
}
