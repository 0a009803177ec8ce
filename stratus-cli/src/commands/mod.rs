//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod health;
mod runs;

pub use runs::RunCommands;

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use stratus_core::domain::run::RunStatus;
use stratus_core::domain::step::StepState;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Show scheduler health
    Health,
    /// Run inspection and cancellation
    Runs {
        #[command(subcommand)]
        command: RunCommands,
    },
}

/// Handle a CLI command
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Health => health::handle_health_command(config).await,
        Commands::Runs { command } => runs::handle_run_command(command, config).await,
    }
}

pub(crate) fn colorize_run_status(status: RunStatus) -> ColoredString {
    match status {
        RunStatus::Pending => status.as_str().yellow(),
        RunStatus::Running => status.as_str().cyan(),
        RunStatus::Success => status.as_str().green(),
        RunStatus::Failed => status.as_str().red(),
        RunStatus::Cancelled => status.as_str().dimmed(),
    }
}

pub(crate) fn colorize_step_state(state: StepState) -> ColoredString {
    match state {
        StepState::Pending | StepState::Ready => state.as_str().dimmed(),
        StepState::Running => state.as_str().cyan(),
        StepState::Success => state.as_str().green(),
        StepState::Failed => state.as_str().red(),
        StepState::UpstreamFailed => state.as_str().yellow(),
        StepState::Cancelled => state.as_str().dimmed(),
    }
}
