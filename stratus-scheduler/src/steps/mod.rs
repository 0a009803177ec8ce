//! Steps
//!
//! Each [`StepKind`] is executed by one [`StepAction`]. An action receives a
//! [`StepContext`] holding the run's logical timestamp, the location of the
//! branch it belongs to and the outputs of its direct dependencies, and
//! returns a [`StepOutput`] or a [`StepError`].

pub mod availability;
pub mod create_table;
pub mod extract;
pub mod load;
pub mod transform;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use stratus_core::domain::location::Location;
use stratus_core::domain::step::{StepId, StepKind};
use tokio_util::sync::CancellationToken;

use crate::error::{EngineError, Result, StepError};
use crate::exchange::StepOutput;
use crate::graph::TaskGraph;
use crate::sink::Sink;
use crate::source::WeatherSource;

use availability::{AvailabilityCheck, GateSettings};
use create_table::CreateTable;
use extract::Extract;
use load::Load;
use transform::Transform;

/// Everything a step attempt may look at
#[derive(Debug, Clone)]
pub struct StepContext {
    pub logical_timestamp: DateTime<Utc>,
    pub step: StepId,
    /// Location of the branch, `None` for shared steps
    pub location: Option<Location>,
    /// 1-based attempt number
    pub attempt: u32,
    /// Outputs of the direct dependencies
    pub inputs: BTreeMap<StepId, StepOutput>,
    /// Fires when the run is cancelled
    pub cancel: CancellationToken,
}

impl StepContext {
    pub fn new(
        logical_timestamp: DateTime<Utc>,
        step: StepId,
        location: Option<Location>,
        inputs: BTreeMap<StepId, StepOutput>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            logical_timestamp,
            step,
            location,
            attempt: 1,
            inputs,
            cancel,
        }
    }

    /// The location this step is scoped to
    pub fn location(&self) -> std::result::Result<&Location, StepError> {
        self.location
            .as_ref()
            .ok_or_else(|| StepError::Unscoped(self.step.clone()))
    }

    /// Output of the upstream step of `kind` in the same branch
    pub fn input(&self, kind: StepKind) -> std::result::Result<&StepOutput, StepError> {
        let upstream = StepId {
            kind,
            location: self.step.location.clone(),
        };
        self.inputs
            .get(&upstream)
            .ok_or(StepError::MissingInput(upstream))
    }
}

#[async_trait]
pub trait StepAction: Send + Sync {
    fn kind(&self) -> StepKind;

    /// Whether a failed attempt may be retried at all
    fn retryable(&self) -> bool {
        true
    }

    async fn run(&self, ctx: &StepContext) -> std::result::Result<StepOutput, StepError>;
}

/// Maps every step kind of a graph to the action that executes it
#[derive(Clone, Default)]
pub struct StepRegistry {
    actions: BTreeMap<StepKind, Arc<dyn StepAction>>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The actions of the weather ingestion pipeline
    pub fn weather(
        source: Arc<dyn WeatherSource>,
        sink: Arc<dyn Sink>,
        gate: GateSettings,
    ) -> Self {
        let mut registry = Self::new();
        registry
            .register(CreateTable::new(sink.clone()))
            .register(AvailabilityCheck::new(source.clone(), gate))
            .register(Extract::new(source))
            .register(Transform)
            .register(Load::new(sink));
        registry
    }

    /// Registers an action, replacing any previous one for the same kind
    pub fn register(&mut self, action: impl StepAction + 'static) -> &mut Self {
        self.actions.insert(action.kind(), Arc::new(action));
        self
    }

    pub fn get(&self, kind: StepKind) -> Option<Arc<dyn StepAction>> {
        self.actions.get(&kind).cloned()
    }

    /// Fails if some step of the graph has no action
    pub fn validate(&self, graph: &TaskGraph) -> Result<()> {
        let missing: Vec<&str> = graph
            .kinds()
            .into_iter()
            .filter(|kind| !self.actions.contains_key(kind))
            .map(|kind| kind.as_str())
            .collect();

        if !missing.is_empty() {
            return Err(EngineError::Graph(format!(
                "no action registered for: {}",
                missing.join(", ")
            )));
        }

        Ok(())
    }
}

impl std::fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepRegistry")
            .field("kinds", &self.actions.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;
    use crate::testing::{FakeSource, cities};

    #[test]
    fn test_weather_registry_covers_weather_graph() {
        let registry = StepRegistry::weather(
            Arc::new(FakeSource::new()),
            Arc::new(MemorySink::new()),
            GateSettings::default(),
        );
        let graph = TaskGraph::weather(&cities()).unwrap();

        assert!(registry.validate(&graph).is_ok());
    }

    #[test]
    fn test_missing_action_is_a_graph_error() {
        let mut registry = StepRegistry::new();
        registry.register(Transform);
        let graph = TaskGraph::weather(&cities()).unwrap();

        let err = registry.validate(&graph).unwrap_err();
        assert!(matches!(err, EngineError::Graph(msg) if msg.contains("create_table")));
    }

    #[test]
    fn test_input_is_looked_up_in_the_same_branch() {
        let payload = StepOutput::Payload(serde_json::json!({ "dt": 1 }));
        let ctx = StepContext::new(
            Utc::now(),
            StepId::scoped(StepKind::Transform, "Lviv"),
            Some(cities()[0].clone()),
            BTreeMap::from([(StepId::scoped(StepKind::Extract, "Lviv"), payload.clone())]),
            CancellationToken::new(),
        );

        assert_eq!(ctx.input(StepKind::Extract).unwrap(), &payload);
        assert!(matches!(
            ctx.input(StepKind::Load),
            Err(StepError::MissingInput(step)) if step == StepId::scoped(StepKind::Load, "Lviv")
        ));
    }

    #[test]
    fn test_shared_step_has_no_location() {
        let ctx = StepContext::new(
            Utc::now(),
            StepId::shared(StepKind::CreateTable),
            None,
            BTreeMap::new(),
            CancellationToken::new(),
        );

        assert!(matches!(ctx.location(), Err(StepError::Unscoped(_))));
    }
}
