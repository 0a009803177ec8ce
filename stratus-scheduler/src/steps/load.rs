use async_trait::async_trait;
use std::sync::Arc;
use stratus_core::domain::step::StepKind;
use tracing::info;

use super::{StepAction, StepContext};
use crate::error::StepError;
use crate::exchange::StepOutput;
use crate::sink::Sink;

/// Upserts the branch's observation into the sink
pub struct Load {
    sink: Arc<dyn Sink>,
}

impl Load {
    pub fn new(sink: Arc<dyn Sink>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl StepAction for Load {
    fn kind(&self) -> StepKind {
        StepKind::Load
    }

    async fn run(&self, ctx: &StepContext) -> Result<StepOutput, StepError> {
        let observation = match ctx.input(StepKind::Transform)? {
            StepOutput::Observation(observation) => observation,
            other => {
                return Err(StepError::Schema(format!(
                    "expected an observation from transform, got {:?}",
                    other
                )));
            }
        };

        self.sink.upsert_observation(observation).await?;
        info!(
            "[{}] Loaded observation {} at {}",
            ctx.logical_timestamp, observation.location, observation.timestamp
        );

        Ok(StepOutput::Done)
    }
}
