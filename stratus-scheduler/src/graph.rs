//! Task graph
//!
//! A directed acyclic graph of steps, built once per pipeline definition.
//! Edges mean "must complete successfully before". Per-location branches
//! are expanded statically from the location set, so the topology never
//! changes at run time.

use std::collections::{BTreeMap, BTreeSet};
use stratus_core::domain::location::Location;
use stratus_core::domain::step::{StepId, StepKind};

use crate::error::{EngineError, Result};

static NO_STEPS: BTreeSet<StepId> = BTreeSet::new();

#[derive(Debug, Clone)]
pub struct TaskGraph {
    locations: BTreeMap<String, Location>,
    /// Map of step to its direct dependencies
    dependencies: BTreeMap<StepId, BTreeSet<StepId>>,
    /// Map of step to the steps that depend on it
    dependents: BTreeMap<StepId, BTreeSet<StepId>>,
    /// Steps in topological order (dependencies before dependents)
    order: Vec<StepId>,
}

impl TaskGraph {
    /// Create a new task graph builder
    pub fn builder() -> TaskGraphBuilder {
        TaskGraphBuilder::default()
    }

    /// The weather ingestion topology:
    /// `create_table -> availability_check -> extract[loc] -> transform[loc] -> load[loc]`
    pub fn weather(locations: &[Location]) -> Result<Self> {
        let create_table = StepId::shared(StepKind::CreateTable);
        let availability = StepId::shared(StepKind::AvailabilityCheck);

        let mut builder = Self::builder();
        builder
            .step(create_table.clone())
            .step(availability.clone())
            .edge(create_table, availability.clone());

        for location in locations {
            builder.location(location.clone());

            let extract = StepId::scoped(StepKind::Extract, &location.name);
            let transform = StepId::scoped(StepKind::Transform, &location.name);
            let load = StepId::scoped(StepKind::Load, &location.name);

            builder
                .step(extract.clone())
                .step(transform.clone())
                .step(load.clone())
                .edge(availability.clone(), extract.clone())
                .edge(extract, transform.clone())
                .edge(transform, load);
        }

        builder.build()
    }

    /// Steps in topological order (dependencies before dependents)
    ///
    /// Ties are broken by step ordering, so the sequence is deterministic.
    pub fn topological_order(&self) -> &[StepId] {
        &self.order
    }

    /// Get the direct dependencies of a step
    pub fn dependencies_of(&self, step: &StepId) -> &BTreeSet<StepId> {
        self.dependencies.get(step).unwrap_or(&NO_STEPS)
    }

    /// Get the steps that directly depend on the given step
    pub fn dependents_of(&self, step: &StepId) -> &BTreeSet<StepId> {
        self.dependents.get(step).unwrap_or(&NO_STEPS)
    }

    /// Every step reachable downstream of the given step
    pub fn transitive_dependents(&self, step: &StepId) -> BTreeSet<StepId> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<&StepId> = self.dependents_of(step).iter().collect();

        while let Some(next) = stack.pop() {
            if seen.insert(next.clone()) {
                stack.extend(self.dependents_of(next).iter());
            }
        }

        seen
    }

    pub fn location(&self, name: &str) -> Option<&Location> {
        self.locations.get(name)
    }

    pub fn locations(&self) -> impl Iterator<Item = &Location> {
        self.locations.values()
    }

    /// The steps of one location's branch, in topological order
    pub fn branch(&self, location: &str) -> Vec<&StepId> {
        self.order
            .iter()
            .filter(|step| step.location.as_deref() == Some(location))
            .collect()
    }

    /// Every location branch keyed by location name
    pub fn branches(&self) -> BTreeMap<&str, Vec<&StepId>> {
        self.locations
            .keys()
            .map(|name| (name.as_str(), self.branch(name)))
            .collect()
    }

    /// Step kinds present in the graph
    pub fn kinds(&self) -> BTreeSet<StepKind> {
        self.order.iter().map(|step| step.kind).collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Collects steps, edges and locations, then validates them into a [`TaskGraph`]
#[derive(Debug, Default)]
pub struct TaskGraphBuilder {
    locations: Vec<Location>,
    steps: Vec<StepId>,
    edges: Vec<(StepId, StepId)>,
}

impl TaskGraphBuilder {
    pub fn location(&mut self, location: Location) -> &mut Self {
        self.locations.push(location);
        self
    }

    pub fn step(&mut self, step: StepId) -> &mut Self {
        self.steps.push(step);
        self
    }

    /// `upstream` must succeed before `downstream` may run
    pub fn edge(&mut self, upstream: StepId, downstream: StepId) -> &mut Self {
        self.edges.push((upstream, downstream));
        self
    }

    pub fn build(&self) -> Result<TaskGraph> {
        let mut locations = BTreeMap::new();
        for location in &self.locations {
            if locations
                .insert(location.name.clone(), location.clone())
                .is_some()
            {
                return Err(EngineError::Graph(format!(
                    "location '{}' is declared twice",
                    location.name
                )));
            }
        }

        let mut dependencies: BTreeMap<StepId, BTreeSet<StepId>> = BTreeMap::new();
        let mut dependents: BTreeMap<StepId, BTreeSet<StepId>> = BTreeMap::new();

        for step in &self.steps {
            match (&step.location, step.kind.is_location_scoped()) {
                (Some(name), true) if !locations.contains_key(name) => {
                    return Err(EngineError::Graph(format!(
                        "step {} references undeclared location '{}'",
                        step, name
                    )));
                }
                (None, true) => {
                    return Err(EngineError::Graph(format!(
                        "step {} must be scoped to a location",
                        step
                    )));
                }
                (Some(_), false) => {
                    return Err(EngineError::Graph(format!(
                        "step {} cannot be scoped to a location",
                        step
                    )));
                }
                _ => {}
            }

            if dependencies.insert(step.clone(), BTreeSet::new()).is_some() {
                return Err(EngineError::Graph(format!(
                    "step {} is declared twice",
                    step
                )));
            }
            dependents.insert(step.clone(), BTreeSet::new());
        }

        for (upstream, downstream) in &self.edges {
            for endpoint in [upstream, downstream] {
                if !dependencies.contains_key(endpoint) {
                    return Err(EngineError::Graph(format!(
                        "edge {} -> {} references undeclared step {}",
                        upstream, downstream, endpoint
                    )));
                }
            }
            if upstream == downstream {
                return Err(EngineError::Graph(format!(
                    "step {} depends on itself",
                    upstream
                )));
            }

            if let Some(deps) = dependencies.get_mut(downstream) {
                deps.insert(upstream.clone());
            }
            if let Some(deps) = dependents.get_mut(upstream) {
                deps.insert(downstream.clone());
            }
        }

        let order = topological_sort(&dependencies, &dependents)?;

        Ok(TaskGraph {
            locations,
            dependencies,
            dependents,
            order,
        })
    }
}

/// Kahn's algorithm; fails naming the steps caught in a cycle
fn topological_sort(
    dependencies: &BTreeMap<StepId, BTreeSet<StepId>>,
    dependents: &BTreeMap<StepId, BTreeSet<StepId>>,
) -> Result<Vec<StepId>> {
    // Count incoming edges for each node
    let mut in_degree: BTreeMap<&StepId, usize> = dependencies
        .iter()
        .map(|(step, deps)| (step, deps.len()))
        .collect();

    // Start with nodes that have no dependencies
    let mut ready: BTreeSet<&StepId> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(step, _)| *step)
        .collect();

    let mut order = Vec::with_capacity(dependencies.len());

    while let Some(step) = ready.pop_first() {
        order.push(step.clone());

        for dependent in dependents.get(step).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(dependent) {
                *degree -= 1;
                if *degree == 0 {
                    ready.insert(dependent);
                }
            }
        }
    }

    // If we haven't processed all nodes, there's a cycle
    if order.len() != dependencies.len() {
        let remaining: Vec<String> = in_degree
            .iter()
            .filter(|(_, degree)| **degree > 0)
            .map(|(step, _)| step.to_string())
            .collect();

        return Err(EngineError::Graph(format!(
            "circular dependency among: {}",
            remaining.join(", ")
        )));
    }

    Ok(order)
}
