use async_trait::async_trait;
use std::sync::Arc;
use stratus_core::domain::step::StepKind;

use super::{StepAction, StepContext};
use crate::error::StepError;
use crate::exchange::StepOutput;
use crate::sink::Sink;

/// Provisions the observation table
pub struct CreateTable {
    sink: Arc<dyn Sink>,
}

impl CreateTable {
    pub fn new(sink: Arc<dyn Sink>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl StepAction for CreateTable {
    fn kind(&self) -> StepKind {
        StepKind::CreateTable
    }

    async fn run(&self, _ctx: &StepContext) -> Result<StepOutput, StepError> {
        self.sink.ensure_schema().await?;
        Ok(StepOutput::Done)
    }
}
