//! Output exchange
//!
//! The hand-off between a step and its dependents within one run. Slots are
//! keyed by (logical timestamp, step identity) and written exactly once.

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use stratus_core::domain::observation::WeatherObservation;
use stratus_core::domain::step::StepId;

use crate::error::{EngineError, Result};

/// Value produced by a successful step
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutput {
    /// The step only has a side effect
    Done,
    /// Raw weather API payload
    Payload(JsonValue),
    Observation(WeatherObservation),
}

type SlotKey = (DateTime<Utc>, StepId);

/// Write-once store of step outputs shared by concurrently running steps
#[derive(Debug, Default)]
pub struct OutputExchange {
    slots: Mutex<HashMap<SlotKey, StepOutput>>,
}

impl OutputExchange {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the output of a step
    ///
    /// A second write to the same slot is an invariant violation and leaves
    /// the first value in place.
    pub fn publish(&self, run: DateTime<Utc>, step: &StepId, output: StepOutput) -> Result<()> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let key = (run, step.clone());

        if slots.contains_key(&key) {
            return Err(EngineError::Assertion(format!(
                "output of {} for run {} was already published",
                step,
                run.to_rfc3339()
            )));
        }

        slots.insert(key, output);
        Ok(())
    }

    pub fn get(&self, run: DateTime<Utc>, step: &StepId) -> Option<StepOutput> {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.get(&(run, step.clone())).cloned()
    }

    /// Drops every slot of a finished run, returning how many were removed
    pub fn clear_run(&self, run: DateTime<Utc>) -> usize {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let before = slots.len();
        slots.retain(|(slot_run, _), _| *slot_run != run);
        before - slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
