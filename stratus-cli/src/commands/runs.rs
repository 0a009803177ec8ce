//! Run command handlers
//!
//! Lists run reports, shows one run step by step and requests cancellation.

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::*;
use stratus_client::SchedulerClient;
use stratus_core::domain::run::RunInstance;
use stratus_core::dto::run::RunSummary;

use super::{colorize_run_status, colorize_step_state};
use crate::config::Config;
use crate::types::RunRef;

/// Run subcommands
#[derive(Subcommand)]
pub enum RunCommands {
    /// List known runs, newest first
    List,
    /// Show a run and its step executions
    Show {
        /// Logical timestamp (epoch seconds, RFC 3339 or YYYY-MM-DD)
        run: String,
    },
    /// Cancel a queued or running run
    Cancel {
        /// Logical timestamp (epoch seconds, RFC 3339 or YYYY-MM-DD)
        run: String,
    },
}

pub async fn handle_run_command(command: RunCommands, config: &Config) -> Result<()> {
    let client = SchedulerClient::new(&config.scheduler_url);

    match command {
        RunCommands::List => list_runs(&client).await,
        RunCommands::Show { run } => show_run(&client, RunRef::parse(&run)?).await,
        RunCommands::Cancel { run } => cancel_run(&client, RunRef::parse(&run)?).await,
    }
}

async fn list_runs(client: &SchedulerClient) -> Result<()> {
    let runs = client.list_runs().await.context("Failed to list runs")?;

    if runs.is_empty() {
        println!("{}", "No runs found.".yellow());
    } else {
        println!("{}", format!("Found {} run(s):", runs.len()).bold());
        println!();
        for run in &runs {
            print_run_summary(run);
        }
    }

    Ok(())
}

async fn show_run(client: &SchedulerClient, run: RunRef) -> Result<()> {
    let report = client.get_run(run.epoch_seconds()).await.map_err(|e| {
        if e.is_not_found() {
            anyhow::anyhow!("No run for {}", run)
        } else {
            anyhow::Error::new(e).context("Failed to fetch run")
        }
    })?;

    print_run_details(&report);
    Ok(())
}

async fn cancel_run(client: &SchedulerClient, run: RunRef) -> Result<()> {
    match client.cancel_run(run.epoch_seconds()).await {
        Ok(_) => {
            println!("{} Cancellation requested for run {}", "✓".green(), run);
            Ok(())
        }
        Err(e) if e.is_not_found() => {
            println!("{} Run {} is not queued or running", "✗".red(), run);
            Ok(())
        }
        Err(e) => Err(anyhow::Error::new(e).context("Failed to cancel run")),
    }
}

fn print_run_summary(run: &RunSummary) {
    println!(
        "  {} Run {}",
        "▸".cyan(),
        run.logical_timestamp.format("%Y-%m-%d %H:%M:%S")
    );
    println!("    Status:   {}", colorize_run_status(run.status));
    println!(
        "    Steps:    {}/{} succeeded, {} failed, {} upstream failed",
        run.succeeded, run.total_steps, run.failed, run.upstream_failed
    );
    if !run.affected_locations.is_empty() {
        println!("    Affected: {}", run.affected_locations.join(", ").red());
    }
    println!();
}

fn print_run_details(run: &RunInstance) {
    println!("{}", "Run Details:".bold());
    println!("  ID:        {}", run.id.to_string().cyan());
    println!(
        "  Logical:   {}",
        run.logical_timestamp.format("%Y-%m-%d %H:%M:%S")
    );
    println!("  Status:    {}", colorize_run_status(run.status));
    println!(
        "  Created:   {}",
        run.created_at.format("%Y-%m-%d %H:%M:%S")
    );

    if let Some(finished) = run.finished_at {
        println!("  Finished:  {}", finished.format("%Y-%m-%d %H:%M:%S"));
        let seconds = finished.signed_duration_since(run.created_at).num_seconds();
        println!("  Duration:  {}s", seconds);
    }
    if let Some(reason) = &run.reason {
        println!("  Reason:    {}", reason.yellow());
    }

    if !run.steps.is_empty() {
        println!("\n{}", "Steps:".bold());
        for execution in &run.steps {
            println!(
                "  {:<32} {:<16} attempts: {}",
                execution.step.to_string(),
                colorize_step_state(execution.state).to_string(),
                execution.attempts
            );
            if let Some(error) = &execution.last_error {
                println!("    {}", error.dimmed());
            }
        }
    }
}
