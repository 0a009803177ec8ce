//! Pipeline definition
//!
//! The immutable, process-wide description of the pipeline: when it runs,
//! which locations it covers and the policies applied to its steps. Built
//! once at startup from [`Config`](crate::config::Config).

use chrono::{DateTime, Utc};
use std::time::Duration;
use stratus_core::domain::location::Location;

use crate::clock::Schedule;
use crate::config::Config;
use crate::coordinator::retry::RetryPolicy;
use crate::error::Result;
use crate::graph::TaskGraph;
use crate::steps::availability::GateSettings;

/// Identifier used for logs, the status API and the run ledger
pub const DEFAULT_PIPELINE_ID: &str = "weather_ingest";

#[derive(Debug, Clone)]
pub struct PipelineDefinition {
    pub id: String,
    pub schedule: Schedule,
    pub start: DateTime<Utc>,
    /// Execute missed historical runs
    pub catchup: bool,
    pub locations: Vec<Location>,
    pub retry: RetryPolicy,
    pub gate: GateSettings,
    /// Wall-clock budget of a single run
    pub run_timeout: Duration,
    pub max_active_runs: usize,
    pub max_parallel_steps: usize,
}

impl PipelineDefinition {
    /// Creates a definition with default policies and no locations
    pub fn new(id: impl Into<String>, schedule: Schedule, start: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            schedule,
            start,
            catchup: true,
            locations: Vec::new(),
            retry: RetryPolicy::default(),
            gate: GateSettings::default(),
            run_timeout: Duration::from_secs(3600),
            max_active_runs: 16,
            max_parallel_steps: 8,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            id: DEFAULT_PIPELINE_ID.to_string(),
            schedule: config.schedule,
            start: config.start_date,
            catchup: config.catchup,
            locations: config.locations.clone(),
            retry: config.retry_policy(),
            gate: GateSettings {
                poke_interval: config.availability_poke_interval,
                timeout: config.availability_timeout,
            },
            run_timeout: config.run_timeout,
            max_active_runs: config.max_active_runs,
            max_parallel_steps: config.max_parallel_steps,
        }
    }

    pub fn with_catchup(mut self, catchup: bool) -> Self {
        self.catchup = catchup;
        self
    }

    pub fn with_locations(mut self, locations: Vec<Location>) -> Self {
        self.locations = locations;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_gate(mut self, gate: GateSettings) -> Self {
        self.gate = gate;
        self
    }

    pub fn with_run_timeout(mut self, run_timeout: Duration) -> Self {
        self.run_timeout = run_timeout;
        self
    }

    pub fn with_max_active_runs(mut self, max_active_runs: usize) -> Self {
        self.max_active_runs = max_active_runs;
        self
    }

    /// Builds the task graph template for this definition's locations
    pub fn graph(&self) -> Result<TaskGraph> {
        TaskGraph::weather(&self.locations)
    }
}
