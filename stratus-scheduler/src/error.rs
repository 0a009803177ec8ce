//! Error types for the scheduler
//!
//! Two families:
//! - [`EngineError`] is fatal and escapes the coordinator (startup problems
//!   and broken invariants)
//! - [`StepError`] is local to one step execution; it is recorded on the
//!   step and never crosses the coordinator boundary

use std::time::Duration;

use stratus_core::domain::step::StepId;
use thiserror::Error;

use crate::sink::SinkError;
use crate::source::SourceError;

/// Fatal engine errors
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed pipeline configuration, detected at startup
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Cyclic or otherwise malformed task graph, detected at startup
    #[error("Invalid task graph: {0}")]
    Graph(String),

    /// A programming invariant was violated
    #[error("Invariant violated: {0}")]
    Assertion(String),

    /// The coordinator loop has stopped and no longer takes commands
    #[error("Coordinator is not running")]
    Stopped,

    /// Run ledger storage failure
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Failure of a single step attempt
#[derive(Debug, Error)]
pub enum StepError {
    /// The availability gate did not open in time
    #[error("Weather API not available after {0:?}")]
    Timeout(Duration),

    /// Reading from the weather API failed
    #[error("Extract failed: {0}")]
    Extract(#[from] SourceError),

    /// The payload is missing a field or has a field of the wrong type
    #[error("Schema error: {0}")]
    Schema(String),

    /// Persisting to the sink failed
    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    /// An upstream step did not leave the output this step needs
    #[error("Missing output of upstream step {0}")]
    MissingInput(StepId),

    /// A location-scoped action ran without a location
    #[error("Step {0} has no location")]
    Unscoped(StepId),

    /// The run was cancelled while the step was in flight
    #[error("Cancelled")]
    Cancelled,
}

impl StepError {
    /// Whether another attempt may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StepError::Extract(_) | StepError::Schema(_) | StepError::Sink(_)
        )
    }
}
